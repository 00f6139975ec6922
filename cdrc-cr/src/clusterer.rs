//! External corpus clustering and its label CSV

use crate::config::ClusteringConfig;
use crate::error::ClustererError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const CONTAINER_INPUT: &str = "/data/input";
const CONTAINER_OUTPUT: &str = "/data/output";

/// Labels every file of a snapshot directory
#[async_trait]
pub trait CorpusClusterer: Send + Sync {
    /// Cluster `snapshot_dir` and write `filename,label` lines to `output_csv`
    async fn cluster(&self, snapshot_dir: &Path, output_csv: &Path) -> Result<(), ClustererError>;
}

/// Compression-distance clusterer packaged as a container image
#[derive(Debug, Clone)]
pub struct DockerCompressionClusterer {
    image: String,
    compressor: String,
    level: u32,
    timeout: Duration,
}

impl DockerCompressionClusterer {
    pub fn new(config: &ClusteringConfig) -> Self {
        Self {
            image: config.docker_image.clone(),
            compressor: config.compressor.clone(),
            level: config.level,
            timeout: config.timeout(),
        }
    }
}

pub fn clusterer_args(
    image: &str,
    compressor: &str,
    level: u32,
    snapshot_dir: &Path,
    output_dir: &Path,
    csv_name: &str,
) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        format!("{}:{}:ro", snapshot_dir.display(), CONTAINER_INPUT),
        "-v".to_string(),
        format!("{}:{}", output_dir.display(), CONTAINER_OUTPUT),
        "-w".to_string(),
        "/app".to_string(),
        image.to_string(),
        "python3".to_string(),
        "main.py".to_string(),
        "--compressor".to_string(),
        compressor.to_string(),
        "--level".to_string(),
        level.to_string(),
        "--output".to_string(),
        format!("{}/{}", CONTAINER_OUTPUT, csv_name),
        CONTAINER_INPUT.to_string(),
    ]
}

#[async_trait]
impl CorpusClusterer for DockerCompressionClusterer {
    async fn cluster(&self, snapshot_dir: &Path, output_csv: &Path) -> Result<(), ClustererError> {
        let output_dir = output_csv
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(output_dir).await?;
        let output_dir = tokio::fs::canonicalize(output_dir).await?;
        let snapshot_dir = tokio::fs::canonicalize(snapshot_dir).await?;
        let csv_name = output_csv
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ClustererError::MissingOutput(output_csv.display().to_string()))?;

        // Stale output from an earlier run must not be mistaken for this one
        match tokio::fs::remove_file(output_csv).await {
            Ok(()) => debug!(path = %output_csv.display(), "Removed previous clustering output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let args = clusterer_args(
            &self.image,
            &self.compressor,
            self.level,
            &snapshot_dir,
            &output_dir,
            &csv_name,
        );
        debug!(args = ?args, "Invoking corpus clusterer");

        let child = Command::new("docker")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ClustererError::Launch)?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ClustererError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            return Err(ClustererError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(stdout = %stdout.trim(), "Clusterer output");
        }
        info!(output = %output_csv.display(), "Corpus clustered");
        Ok(())
    }
}

/// `(filename, label)` pairs in file order
///
/// Splits each line on its first comma. Blank lines and a `filename,label`
/// header are skipped; malformed lines are skipped with a warning.
pub fn parse_label_csv(content: &str) -> Vec<(String, String)> {
    let mut rows = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((file, label)) = line.split_once(',') else {
            warn!(line = number + 1, content = %line, "Label line without a comma");
            continue;
        };
        let (file, label) = (file.trim(), label.trim());
        if number == 0
            && file.eq_ignore_ascii_case("filename")
            && label.eq_ignore_ascii_case("label")
        {
            continue;
        }
        if file.is_empty() || label.is_empty() {
            warn!(line = number + 1, content = %line, "Label line with an empty field");
            continue;
        }
        rows.push((file.to_string(), label.to_string()));
    }
    rows
}

pub async fn read_label_csv(path: &Path) -> Result<Vec<(String, String)>, ClustererError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ClustererError::MissingOutput(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    Ok(parse_label_csv(&content))
}
