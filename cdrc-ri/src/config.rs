//! Receiver configuration
//!
//! Reads the `[mqtt]`, `[ingest]` and `[parser]` sections of the shared TOML
//! file (plus `root_folder` and `[logging]`). Sections belonging to the
//! clustering service are ignored. Every field has a built-in default.

use cdrc_common::config::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReceiverConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub ingest: IngestSettings,

    #[serde(default)]
    pub parser: ParserConfig,
}

/// Broker connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Root of the topic tree: `<base>/<device>` and `<base>/<device>/<index>`
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_true")]
    pub use_tls: bool,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            base_topic: default_base_topic(),
            client_id: default_client_id(),
            use_tls: true,
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

/// Session handling and dispatch sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestSettings {
    /// Incomplete sessions older than this are evicted
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Detect and decode base64-encoded fragment payloads
    #[serde(default = "default_true")]
    pub accept_base64: bool,

    /// Maximum concurrent dispatches (and therefore decoder invocations)
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,

    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,

    #[serde(default = "default_ingest_http_port")]
    pub http_port: u16,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            accept_base64: true,
            dispatch_workers: default_dispatch_workers(),
            dispatch_queue_capacity: default_dispatch_queue_capacity(),
            http_port: default_ingest_http_port(),
        }
    }
}

impl IngestSettings {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// External coredump decoder
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParserConfig {
    #[serde(default = "default_parser_image")]
    pub docker_image: String,

    #[serde(default = "default_parser_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            docker_image: default_parser_image(),
            timeout_secs: default_parser_timeout_secs(),
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    8883
}

fn default_base_topic() -> String {
    "coredump".to_string()
}

fn default_client_id() -> String {
    "cdrc-ri".to_string()
}

fn default_true() -> bool {
    true
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_session_timeout_secs() -> u64 {
    600
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_dispatch_workers() -> usize {
    4
}

fn default_dispatch_queue_capacity() -> usize {
    256
}

fn default_ingest_http_port() -> u16 {
    5780
}

fn default_parser_image() -> String {
    "espressif/idf:v5.5.1".to_string()
}

fn default_parser_timeout_secs() -> u64 {
    120
}
