//! Typed database records

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Registered device, keyed by its MAC address as reported on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub mac_address: String,
    pub current_firmware_id: Option<i64>,
    pub chip_type: Option<String>,
}

/// Firmware build with the ELF needed to decode its coredumps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Firmware {
    pub firmware_id: i64,
    pub name: String,
    pub version: String,
    pub elf_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cluster {
    pub cluster_id: i64,
    pub name: String,
}

/// One corpus item: a reassembled coredump and its optional decoded report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Coredump {
    pub coredump_id: i64,
    pub device_mac_address: String,
    pub firmware_id_on_crash: i64,
    pub cluster_id: Option<i64>,
    pub raw_dump_path: String,
    pub log_path: Option<String>,
    /// Unix seconds
    pub received_at: i64,
}

impl Coredump {
    /// File name of the raw artifact, used as the item key in clustering snapshots
    pub fn raw_file_name(&self) -> Option<String> {
        Path::new(&self.raw_dump_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Raw artifact file name without extension
    pub fn raw_file_stem(&self) -> Option<String> {
        Path::new(&self.raw_dump_path)
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
    }
}

/// Insert record for a freshly reassembled coredump
#[derive(Debug, Clone)]
pub struct NewCoredump {
    pub device_mac_address: String,
    pub firmware_id_on_crash: i64,
    pub raw_dump_path: String,
    pub log_path: Option<String>,
    pub received_at: i64,
}

/// Cluster with its current member count
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClusterSize {
    pub cluster_id: i64,
    pub name: String,
    pub coredump_count: i64,
}
