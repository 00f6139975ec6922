#![allow(dead_code)]

//! Shared test utilities

use async_trait::async_trait;
use cdrc_common::db::{init_database, CoredumpRepository, NewCoredump, SqliteRepository};
use cdrc_cr::clusterer::CorpusClusterer;
use cdrc_cr::error::ClustererError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

pub const DEVICE: &str = "AA:BB:CC:DD:EE:FF";

/// Temporary root with a database; TempDir must outlive the test
pub async fn create_test_repo() -> (TempDir, SqliteRepository) {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("test_cdrc.db")).await.unwrap();
    (dir, SqliteRepository::new(pool))
}

pub fn raw_name(n: usize) -> String {
    format!("dump_{}.cdmp", n)
}

/// Register a device and firmware, returning the firmware id
pub async fn register_device(repo: &SqliteRepository, dir: &Path) -> i64 {
    let elf = dir.join("app.elf");
    std::fs::write(&elf, b"\x7fELF").unwrap();
    let fw = repo
        .add_firmware("app", "1.0.0", &elf.to_string_lossy())
        .await
        .unwrap();
    repo.upsert_device(DEVICE, fw, "esp32").await.unwrap();
    fw
}

/// Write `dump_<n>.cdmp` for each `n` in `range` and register it
///
/// Returns the coredump ids in the same order.
pub async fn seed_coredumps(
    repo: &SqliteRepository,
    dir: &Path,
    firmware_id: i64,
    range: std::ops::RangeInclusive<usize>,
) -> Vec<i64> {
    let raws = dir.join("raws");
    std::fs::create_dir_all(&raws).unwrap();

    let mut ids = Vec::new();
    for n in range {
        let path = raws.join(raw_name(n));
        std::fs::write(&path, format!("coredump body {}", n)).unwrap();
        let id = repo
            .save_raw_artifact(&NewCoredump {
                device_mac_address: DEVICE.to_string(),
                firmware_id_on_crash: firmware_id,
                raw_dump_path: path.to_string_lossy().into_owned(),
                log_path: None,
                received_at: 1_700_000_000 + n as i64,
            })
            .await
            .unwrap();
        ids.push(id);
    }
    ids
}

/// Current cluster of every coredump
pub async fn assignments(repo: &SqliteRepository) -> BTreeMap<i64, Option<i64>> {
    repo.list_coredumps()
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.coredump_id, c.cluster_id))
        .collect()
}

/// Clusterer double labelling snapshot files from a fixed table
pub struct FakeClusterer {
    labels: Mutex<BTreeMap<String, String>>,
    fail: bool,
    delay: Duration,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl FakeClusterer {
    pub fn new(labels: &[(usize, &str)]) -> Self {
        Self {
            labels: Mutex::new(Self::table(labels)),
            fail: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&[])
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_labels(&self, labels: &[(usize, &str)]) {
        *self.labels.lock().unwrap() = Self::table(labels);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// File names present in the last snapshot
    pub fn last_snapshot(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    fn table(labels: &[(usize, &str)]) -> BTreeMap<String, String> {
        labels
            .iter()
            .map(|(n, label)| (raw_name(*n), label.to_string()))
            .collect()
    }
}

#[async_trait]
impl CorpusClusterer for FakeClusterer {
    async fn cluster(&self, snapshot_dir: &Path, output_csv: &Path) -> Result<(), ClustererError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ClustererError::Timeout(600));
        }

        let mut files: Vec<String> = std::fs::read_dir(snapshot_dir)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<Result<_, _>>()?;
        files.sort();
        *self.seen.lock().unwrap() = files.clone();

        let labels = self.labels.lock().unwrap().clone();
        let mut csv = String::from("filename,label\n");
        for file in files {
            if let Some(label) = labels.get(&file) {
                csv.push_str(&format!("{},{}\n", file, label));
            }
        }

        if let Some(parent) = output_csv.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output_csv, csv)?;
        Ok(())
    }
}

pub fn clustering_paths(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let clustering = dir.join("clustering");
    (
        clustering.join("processing"),
        clustering.join("state.txt"),
        clustering.join("clusters.csv"),
    )
}
