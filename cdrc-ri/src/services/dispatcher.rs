//! Ingestion dispatcher
//!
//! Runs once per completed session, off the transport loop:
//!
//! 1. write the raw artifact (the only step without a fallback)
//! 2. resolve device -> firmware id and chip type
//! 3. resolve firmware -> ELF path
//! 4. register the coredump so it joins the clustering corpus
//! 5. decode it with the external parser and attach the report
//!
//! An unknown device, a device without firmware or an unknown firmware stops
//! the pipeline after step 1: the artifact stays on disk for manual recovery
//! but is not registered. A missing ELF or a failed decode only loses the
//! report.

use crate::error::IngestResult;
use crate::models::AssembledArtifact;
use crate::services::artifact_store::ArtifactStore;
use crate::services::parser::ReportParser;
use cdrc_common::db::{CoredumpRepository, NewCoredump};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Why a written artifact was left out of the corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisteredReason {
    UnknownDevice,
    NoFirmware,
    UnknownFirmware,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Registered {
        coredump_id: i64,
        raw_path: PathBuf,
        report_path: Option<PathBuf>,
    },
    Unregistered {
        raw_path: PathBuf,
        reason: UnregisteredReason,
    },
}

pub struct IngestionDispatcher {
    repo: Arc<dyn CoredumpRepository>,
    parser: Arc<dyn ReportParser>,
    artifacts: ArtifactStore,
}

impl IngestionDispatcher {
    pub fn new(
        repo: Arc<dyn CoredumpRepository>,
        parser: Arc<dyn ReportParser>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            repo,
            parser,
            artifacts,
        }
    }

    pub async fn dispatch(&self, artifact: &AssembledArtifact) -> IngestResult<DispatchOutcome> {
        let device_id = artifact.device_id.as_str();

        let raw_path = self.artifacts.write(artifact).await?;
        info!(
            device_id = %device_id,
            path = %raw_path.display(),
            bytes = artifact.data.len(),
            "Raw coredump written"
        );

        let Some(device) = self.repo.get_device(device_id).await? else {
            error!(
                device_id = %device_id,
                path = %raw_path.display(),
                "Unknown device, coredump kept on disk but not registered"
            );
            return Ok(unregistered(raw_path, UnregisteredReason::UnknownDevice));
        };

        let Some(firmware_id) = device.current_firmware_id else {
            error!(
                device_id = %device_id,
                path = %raw_path.display(),
                "Device has no firmware assigned, coredump kept on disk but not registered"
            );
            return Ok(unregistered(raw_path, UnregisteredReason::NoFirmware));
        };

        let Some(firmware) = self.repo.get_firmware(firmware_id).await? else {
            error!(
                device_id = %device_id,
                firmware_id,
                path = %raw_path.display(),
                "Firmware record missing, coredump kept on disk but not registered"
            );
            return Ok(unregistered(raw_path, UnregisteredReason::UnknownFirmware));
        };

        let record = NewCoredump {
            device_mac_address: device.mac_address.clone(),
            firmware_id_on_crash: firmware.firmware_id,
            raw_dump_path: raw_path.to_string_lossy().into_owned(),
            log_path: None,
            received_at: artifact.completed_at.timestamp(),
        };
        let coredump_id = self.repo.save_raw_artifact(&record).await?;
        info!(device_id = %device_id, coredump_id, "Coredump registered");

        let elf_path = Path::new(&firmware.elf_path);
        if !tokio::fs::try_exists(elf_path).await.unwrap_or(false) {
            error!(
                coredump_id,
                firmware_id,
                elf = %elf_path.display(),
                "ELF not found, report generation skipped"
            );
            return Ok(DispatchOutcome::Registered {
                coredump_id,
                raw_path,
                report_path: None,
            });
        }

        let report_path = match self
            .parser
            .generate_report(&raw_path, elf_path, device.chip_type.as_deref())
            .await
        {
            Ok(path) => match self
                .repo
                .save_report(coredump_id, &path.to_string_lossy())
                .await
            {
                Ok(()) => Some(path),
                Err(e) => {
                    warn!(coredump_id, error = %e, "Report written but not recorded");
                    None
                }
            },
            Err(e) => {
                error!(coredump_id, error = %e, "Coredump decoding failed");
                None
            }
        };

        Ok(DispatchOutcome::Registered {
            coredump_id,
            raw_path,
            report_path,
        })
    }
}

fn unregistered(raw_path: PathBuf, reason: UnregisteredReason) -> DispatchOutcome {
    DispatchOutcome::Unregistered { raw_path, reason }
}
