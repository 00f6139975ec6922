#![allow(dead_code)]

//! Shared test utilities

use cdrc_common::db::{init_database, NewCoredump, SqliteRepository};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Create temporary test database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("test_cdrc.db"))
        .await
        .unwrap();
    (temp_dir, pool)
}

pub async fn create_test_repo() -> (TempDir, SqliteRepository) {
    let (dir, pool) = create_test_db().await;
    (dir, SqliteRepository::new(pool))
}

pub fn new_coredump(mac: &str, firmware_id: i64, raw: &str) -> NewCoredump {
    NewCoredump {
        device_mac_address: mac.to_string(),
        firmware_id_on_crash: firmware_id,
        raw_dump_path: raw.to_string(),
        log_path: None,
        received_at: 1_700_000_000,
    }
}
