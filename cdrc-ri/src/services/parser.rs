//! Coredump decoding
//!
//! [`ReportParser`] turns a raw coredump plus the firmware ELF into a text
//! report. [`DockerReportParser`] runs `esp-coredump` inside the ESP-IDF
//! container image, bounded by a wall-clock timeout.

use crate::config::ParserConfig;
use crate::error::ParserError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const REPORT_START_MARKER: &str =
    "==================== ESP32 CORE DUMP START ====================";
pub const REPORT_END_MARKER: &str =
    "===================== ESP32 CORE DUMP END =====================";

#[async_trait]
pub trait ReportParser: Send + Sync {
    /// Decode `raw_path` against `elf_path`; returns the written report path
    async fn generate_report(
        &self,
        raw_path: &Path,
        elf_path: &Path,
        chip_type: Option<&str>,
    ) -> Result<PathBuf, ParserError>;
}

/// Decoder backed by `docker run <esp-idf image> esp-coredump info_corefile`
#[derive(Debug, Clone)]
pub struct DockerReportParser {
    image: String,
    timeout: Duration,
    reports_dir: PathBuf,
}

impl DockerReportParser {
    pub fn new(config: &ParserConfig, reports_dir: PathBuf) -> Self {
        Self {
            image: config.docker_image.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            reports_dir,
        }
    }
}

/// Arguments for `docker`, with the core and ELF directories mounted read-only
pub fn docker_args(
    image: &str,
    core_dir: &Path,
    core_file: &str,
    elf_dir: &Path,
    elf_file: &str,
    chip_type: Option<&str>,
) -> Vec<String> {
    let mut inner = format!(
        "esp-coredump info_corefile --core-format raw --core /app/core/{}",
        core_file
    );
    if let Some(chip) = chip_type.filter(|c| !c.trim().is_empty()) {
        inner.push_str(&format!(
            " --rom-elf $IDF_PATH/components/esp_rom/rom_elfs/{}.elf",
            chip.trim()
        ));
    }
    inner.push_str(&format!(" /app/elf/{}", elf_file));

    vec![
        "run".to_string(),
        "--rm".to_string(),
        "-w".to_string(),
        "/app".to_string(),
        "-v".to_string(),
        format!("{}:/app/core:ro", core_dir.display()),
        "-v".to_string(),
        format!("{}:/app/elf:ro", elf_dir.display()),
        image.to_string(),
        "bash".to_string(),
        "-c".to_string(),
        inner,
    ]
}

/// Report body between the dump markers, or the whole output if either is missing
pub fn extract_report(stdout: &str) -> &str {
    let Some(start) = stdout.find(REPORT_START_MARKER) else {
        warn!(chars = stdout.len(), "Report start marker not found, keeping full output");
        return stdout;
    };
    let body_start = start + REPORT_START_MARKER.len();
    match stdout[body_start..].find(REPORT_END_MARKER) {
        Some(end) => stdout[body_start..body_start + end].trim(),
        None => {
            warn!(chars = stdout.len(), "Report end marker not found, keeping full output");
            stdout
        }
    }
}

/// Absolute parent directory and file name of an existing file
async fn split_mount(path: &Path, what: &str) -> Result<(PathBuf, String), ParserError> {
    let absolute = tokio::fs::canonicalize(path).await.map_err(|e| {
        ParserError::InvalidInput(format!("{} {}: {}", what, path.display(), e))
    })?;
    let dir = absolute
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| ParserError::InvalidInput(format!("{} has no parent", what)))?;
    let name = absolute
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ParserError::InvalidInput(format!("{} has no file name", what)))?;
    Ok((dir, name))
}

#[async_trait]
impl ReportParser for DockerReportParser {
    async fn generate_report(
        &self,
        raw_path: &Path,
        elf_path: &Path,
        chip_type: Option<&str>,
    ) -> Result<PathBuf, ParserError> {
        let (core_dir, core_file) = split_mount(raw_path, "coredump").await?;
        let (elf_dir, elf_file) = split_mount(elf_path, "ELF").await?;

        let args = docker_args(&self.image, &core_dir, &core_file, &elf_dir, &elf_file, chip_type);
        debug!(args = ?args, "Invoking coredump decoder");

        let child = Command::new("docker")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ParserError::Launch)?;

        // On timeout the output future is dropped, which kills the container client
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ParserError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            return Err(ParserError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = extract_report(&stdout);

        let stem = raw_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| core_file.clone());
        tokio::fs::create_dir_all(&self.reports_dir).await?;
        let report_path = self.reports_dir.join(format!("{}.txt", stem));
        tokio::fs::write(&report_path, report.as_bytes()).await?;

        info!(
            raw = %raw_path.display(),
            report = %report_path.display(),
            chars = report.len(),
            "Coredump report generated"
        );
        Ok(report_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_args_with_chip() {
        let args = docker_args(
            "espressif/idf:v5.5.1",
            Path::new("/data/raws"),
            "dump.cdmp",
            Path::new("/fw"),
            "app.elf",
            Some("esp32s3"),
        );

        assert_eq!(args[0], "run");
        assert!(args.contains(&"/data/raws:/app/core:ro".to_string()));
        assert!(args.contains(&"/fw:/app/elf:ro".to_string()));
        assert_eq!(args[8], "espressif/idf:v5.5.1");
        assert_eq!(
            args.last().unwrap(),
            "esp-coredump info_corefile --core-format raw --core /app/core/dump.cdmp \
             --rom-elf $IDF_PATH/components/esp_rom/rom_elfs/esp32s3.elf /app/elf/app.elf"
        );
    }

    #[test]
    fn test_docker_args_without_chip() {
        let args = docker_args("img", Path::new("/c"), "d.cdmp", Path::new("/e"), "a.elf", None);
        assert!(!args.last().unwrap().contains("--rom-elf"));
    }

    #[test]
    fn test_extract_between_markers() {
        let stdout = format!(
            "banner\n{}\n\ncrashed in app_main\n\n{}\ntrailer",
            REPORT_START_MARKER, REPORT_END_MARKER
        );
        assert_eq!(extract_report(&stdout), "crashed in app_main");
    }

    #[test]
    fn test_extract_without_markers_keeps_everything() {
        assert_eq!(extract_report("plain output"), "plain output");

        let only_start = format!("{}\nbody", REPORT_START_MARKER);
        assert_eq!(extract_report(&only_start), only_start);
    }

    #[tokio::test]
    async fn test_missing_input_is_invalid() {
        let parser = DockerReportParser::new(&ParserConfig::default(), PathBuf::from("/tmp"));
        let result = parser
            .generate_report(
                Path::new("/nonexistent/dump.cdmp"),
                Path::new("/nonexistent/app.elf"),
                None,
            )
            .await;
        assert!(matches!(result, Err(ParserError::InvalidInput(_))));
    }
}
