//! Device and firmware registration
//!
//! Coredumps are only registered for known devices whose firmware (and ELF)
//! is on record, so these are the operator's entry points for onboarding.

use cdrc_common::db::CoredumpRepository;
use cdrc_common::{Error, Result};
use std::path::Path;
use tracing::info;

/// Chip families with a ROM ELF in the decoder image
pub const SUPPORTED_CHIP_TYPES: &[&str] = &[
    "esp32", "esp32c2", "esp32c3", "esp32c5", "esp32c6", "esp32c61", "esp32h2", "esp32h21",
    "esp32h4", "esp32p4", "esp32s2", "esp32s3",
];

pub fn validate_chip_type(chip_type: &str) -> Result<&'static str> {
    let wanted = chip_type.trim().to_ascii_lowercase();
    SUPPORTED_CHIP_TYPES
        .iter()
        .copied()
        .find(|c| *c == wanted)
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "unsupported chip type '{}', expected one of: {}",
                chip_type,
                SUPPORTED_CHIP_TYPES.join(", ")
            ))
        })
}

pub async fn register_firmware(
    repo: &dyn CoredumpRepository,
    name: &str,
    version: &str,
    elf_path: &Path,
) -> Result<i64> {
    if name.trim().is_empty() || version.trim().is_empty() {
        return Err(Error::InvalidInput("firmware name and version are required".to_string()));
    }
    if !elf_path.is_file() {
        return Err(Error::InvalidInput(format!(
            "ELF file not found: {}",
            elf_path.display()
        )));
    }

    let elf = std::fs::canonicalize(elf_path)?;
    let firmware_id = repo
        .add_firmware(name.trim(), version.trim(), &elf.to_string_lossy())
        .await?;
    info!(firmware_id, name = %name, version = %version, elf = %elf.display(), "Firmware registered");
    Ok(firmware_id)
}

pub async fn register_device(
    repo: &dyn CoredumpRepository,
    mac_address: &str,
    firmware_id: i64,
    chip_type: &str,
) -> Result<()> {
    let mac_address = mac_address.trim();
    if mac_address.is_empty() {
        return Err(Error::InvalidInput("device MAC address is required".to_string()));
    }
    let chip = validate_chip_type(chip_type)?;
    if repo.get_firmware(firmware_id).await?.is_none() {
        return Err(Error::NotFound(format!("firmware {}", firmware_id)));
    }

    repo.upsert_device(mac_address, firmware_id, chip).await?;
    info!(device_id = %mac_address, firmware_id, chip_type = %chip, "Device registered");
    Ok(())
}
