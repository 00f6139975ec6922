//! Repository over the coredump database
//!
//! [`CoredumpRepository`] is the seam both services program against: the
//! ingest dispatcher registers new coredumps through it and the reconciliation
//! applier rewrites cluster assignments through it. [`SqliteRepository`] is
//! the production implementation; writes go through [`retry_on_lock`] because
//! the two services share one database file.

use super::models::{Cluster, ClusterSize, Coredump, Device, Firmware, NewCoredump};
use super::retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

#[async_trait]
pub trait CoredumpRepository: Send + Sync {
    async fn get_device(&self, mac_address: &str) -> Result<Option<Device>>;

    async fn get_firmware(&self, firmware_id: i64) -> Result<Option<Firmware>>;

    /// Register a reassembled coredump; returns its id
    async fn save_raw_artifact(&self, record: &NewCoredump) -> Result<i64>;

    /// Attach a decoded report to an existing coredump
    async fn save_report(&self, coredump_id: i64, report_path: &str) -> Result<()>;

    async fn get_coredump(&self, coredump_id: i64) -> Result<Option<Coredump>>;

    async fn list_coredumps(&self) -> Result<Vec<Coredump>>;

    async fn list_unclustered_coredumps(&self) -> Result<Vec<Coredump>>;

    async fn count_coredumps(&self) -> Result<i64>;

    async fn count_unclustered(&self) -> Result<i64>;

    async fn list_clusters(&self) -> Result<Vec<Cluster>>;

    async fn create_cluster(&self, name: &str) -> Result<i64>;

    async fn rename_cluster(&self, cluster_id: i64, name: &str) -> Result<()>;

    async fn delete_cluster(&self, cluster_id: i64) -> Result<()>;

    /// Clear the cluster of every member; returns how many were unassigned
    async fn unassign_cluster(&self, cluster_id: i64) -> Result<u64>;

    /// `None` leaves the coredump unclustered
    async fn assign_coredump_to_cluster(
        &self,
        coredump_id: i64,
        cluster_id: Option<i64>,
    ) -> Result<()>;

    async fn cluster_sizes(&self) -> Result<Vec<ClusterSize>>;

    async fn add_firmware(&self, name: &str, version: &str, elf_path: &str) -> Result<i64>;

    async fn list_firmwares(&self) -> Result<Vec<Firmware>>;

    /// Insert the device or update its firmware and chip type
    async fn upsert_device(&self, mac_address: &str, firmware_id: i64, chip_type: &str)
        -> Result<()>;

    async fn list_devices(&self) -> Result<Vec<Device>>;
}

/// SQLite-backed repository
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const COREDUMP_COLUMNS: &str = "coredump_id, device_mac_address, firmware_id_on_crash, cluster_id, \
     raw_dump_path, log_path, received_at";

#[async_trait]
impl CoredumpRepository for SqliteRepository {
    async fn get_device(&self, mac_address: &str) -> Result<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(
            "SELECT mac_address, current_firmware_id, chip_type FROM devices WHERE mac_address = ?",
        )
        .bind(mac_address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    async fn get_firmware(&self, firmware_id: i64) -> Result<Option<Firmware>> {
        let firmware = sqlx::query_as::<_, Firmware>(
            "SELECT firmware_id, name, version, elf_path FROM firmwares WHERE firmware_id = ?",
        )
        .bind(firmware_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(firmware)
    }

    async fn save_raw_artifact(&self, record: &NewCoredump) -> Result<i64> {
        let pool = &self.pool;
        retry_on_lock("save raw coredump", self.max_lock_wait_ms, move || async move {
            let result = sqlx::query(
                r#"
                INSERT INTO coredumps
                    (device_mac_address, firmware_id_on_crash, raw_dump_path, log_path, received_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.device_mac_address)
            .bind(record.firmware_id_on_crash)
            .bind(&record.raw_dump_path)
            .bind(&record.log_path)
            .bind(record.received_at)
            .execute(pool)
            .await?;

            Ok(result.last_insert_rowid())
        })
        .await
    }

    async fn save_report(&self, coredump_id: i64, report_path: &str) -> Result<()> {
        let pool = &self.pool;
        let updated = retry_on_lock("save report", self.max_lock_wait_ms, move || async move {
            let result = sqlx::query("UPDATE coredumps SET log_path = ? WHERE coredump_id = ?")
                .bind(report_path)
                .bind(coredump_id)
                .execute(pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if updated == 0 {
            return Err(Error::NotFound(format!("coredump {}", coredump_id)));
        }
        Ok(())
    }

    async fn get_coredump(&self, coredump_id: i64) -> Result<Option<Coredump>> {
        let coredump = sqlx::query_as::<_, Coredump>(&format!(
            "SELECT {} FROM coredumps WHERE coredump_id = ?",
            COREDUMP_COLUMNS
        ))
        .bind(coredump_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(coredump)
    }

    async fn list_coredumps(&self) -> Result<Vec<Coredump>> {
        let coredumps = sqlx::query_as::<_, Coredump>(&format!(
            "SELECT {} FROM coredumps ORDER BY coredump_id",
            COREDUMP_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(coredumps)
    }

    async fn list_unclustered_coredumps(&self) -> Result<Vec<Coredump>> {
        let coredumps = sqlx::query_as::<_, Coredump>(&format!(
            "SELECT {} FROM coredumps WHERE cluster_id IS NULL ORDER BY coredump_id",
            COREDUMP_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(coredumps)
    }

    async fn count_coredumps(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM coredumps")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_unclustered(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM coredumps WHERE cluster_id IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let clusters = sqlx::query_as::<_, Cluster>(
            "SELECT cluster_id, name FROM clusters ORDER BY cluster_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(clusters)
    }

    async fn create_cluster(&self, name: &str) -> Result<i64> {
        let pool = &self.pool;
        retry_on_lock("create cluster", self.max_lock_wait_ms, move || async move {
            let result = sqlx::query("INSERT INTO clusters (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await?;
            Ok(result.last_insert_rowid())
        })
        .await
    }

    async fn rename_cluster(&self, cluster_id: i64, name: &str) -> Result<()> {
        let pool = &self.pool;
        let updated = retry_on_lock("rename cluster", self.max_lock_wait_ms, move || async move {
            let result = sqlx::query("UPDATE clusters SET name = ? WHERE cluster_id = ?")
                .bind(name)
                .bind(cluster_id)
                .execute(pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if updated == 0 {
            return Err(Error::NotFound(format!("cluster {}", cluster_id)));
        }
        Ok(())
    }

    async fn delete_cluster(&self, cluster_id: i64) -> Result<()> {
        let pool = &self.pool;
        retry_on_lock("delete cluster", self.max_lock_wait_ms, move || async move {
            sqlx::query("DELETE FROM clusters WHERE cluster_id = ?")
                .bind(cluster_id)
                .execute(pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn unassign_cluster(&self, cluster_id: i64) -> Result<u64> {
        let pool = &self.pool;
        retry_on_lock("unassign cluster", self.max_lock_wait_ms, move || async move {
            let result = sqlx::query("UPDATE coredumps SET cluster_id = NULL WHERE cluster_id = ?")
                .bind(cluster_id)
                .execute(pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn assign_coredump_to_cluster(
        &self,
        coredump_id: i64,
        cluster_id: Option<i64>,
    ) -> Result<()> {
        let pool = &self.pool;
        retry_on_lock("assign coredump", self.max_lock_wait_ms, move || async move {
            sqlx::query("UPDATE coredumps SET cluster_id = ? WHERE coredump_id = ?")
                .bind(cluster_id)
                .bind(coredump_id)
                .execute(pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn cluster_sizes(&self) -> Result<Vec<ClusterSize>> {
        let sizes = sqlx::query_as::<_, ClusterSize>(
            r#"
            SELECT c.cluster_id, c.name, COUNT(d.coredump_id) AS coredump_count
            FROM clusters c
            LEFT JOIN coredumps d ON d.cluster_id = c.cluster_id
            GROUP BY c.cluster_id, c.name
            ORDER BY coredump_count DESC, c.cluster_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(sizes)
    }

    async fn add_firmware(&self, name: &str, version: &str, elf_path: &str) -> Result<i64> {
        let pool = &self.pool;
        retry_on_lock("add firmware", self.max_lock_wait_ms, move || async move {
            let result = sqlx::query(
                "INSERT INTO firmwares (name, version, elf_path) VALUES (?, ?, ?)",
            )
            .bind(name)
            .bind(version)
            .bind(elf_path)
            .execute(pool)
            .await?;
            Ok(result.last_insert_rowid())
        })
        .await
    }

    async fn list_firmwares(&self) -> Result<Vec<Firmware>> {
        let firmwares = sqlx::query_as::<_, Firmware>(
            "SELECT firmware_id, name, version, elf_path FROM firmwares ORDER BY firmware_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(firmwares)
    }

    async fn upsert_device(
        &self,
        mac_address: &str,
        firmware_id: i64,
        chip_type: &str,
    ) -> Result<()> {
        let pool = &self.pool;
        retry_on_lock("upsert device", self.max_lock_wait_ms, move || async move {
            sqlx::query(
                r#"
                INSERT INTO devices (mac_address, current_firmware_id, chip_type)
                VALUES (?, ?, ?)
                ON CONFLICT(mac_address) DO UPDATE SET
                    current_firmware_id = excluded.current_firmware_id,
                    chip_type = excluded.chip_type
                "#,
            )
            .bind(mac_address)
            .bind(firmware_id)
            .bind(chip_type)
            .execute(pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(
            "SELECT mac_address, current_firmware_id, chip_type FROM devices ORDER BY mac_address",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(devices)
    }
}
