//! Clustering service configuration
//!
//! Reads the `[clustering]` section (and `[clustering.thresholds]`) of the
//! shared TOML file, plus `root_folder` and `[logging]`.

use crate::reconcile::Thresholds;
use cdrc_common::config::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClusteringServiceConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusteringConfig {
    /// How often the trigger is evaluated
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Unclustered coredumps that force a run
    #[serde(default = "default_min_new_threshold")]
    pub min_new_threshold: u64,

    /// Maximum time between runs while anything is pending
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,

    #[serde(default = "default_clusterer_image")]
    pub docker_image: String,

    #[serde(default = "default_compressor")]
    pub compressor: String,

    #[serde(default = "default_level")]
    pub level: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default)]
    pub thresholds: Thresholds,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            min_new_threshold: default_min_new_threshold(),
            max_interval_secs: default_max_interval_secs(),
            docker_image: default_clusterer_image(),
            compressor: default_compressor(),
            level: default_level(),
            timeout_secs: default_timeout_secs(),
            http_port: default_http_port(),
            thresholds: Thresholds::default(),
        }
    }
}

impl ClusteringConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_min_new_threshold() -> u64 {
    5
}

fn default_max_interval_secs() -> u64 {
    300
}

fn default_clusterer_image() -> String {
    "damicore-python".to_string()
}

fn default_compressor() -> String {
    "zlib".to_string()
}

fn default_level() -> u32 {
    9
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_http_port() -> u16 {
    5781
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: ClusteringServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.clustering.min_new_threshold, 5);
        assert_eq!(config.clustering.max_interval_secs, 300);
        assert_eq!(config.clustering.docker_image, "damicore-python");
        assert_eq!(config.clustering.thresholds, Thresholds::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_threshold_override_keeps_other_defaults() {
        let config: ClusteringServiceConfig = toml::from_str(
            r#"
            [mqtt]
            host = "ignored"

            [clustering]
            min_new_threshold = 10

            [clustering.thresholds]
            evolution_jaccard = 0.75
            "#,
        )
        .unwrap();

        assert_eq!(config.clustering.min_new_threshold, 10);
        assert_eq!(config.clustering.check_interval_secs, 60);
        assert_eq!(config.clustering.thresholds.evolution_jaccard, 0.75);
        assert_eq!(config.clustering.thresholds.merge_coverage_min, 0.8);
    }
}
