#![allow(dead_code)]

//! Shared test utilities

use async_trait::async_trait;
use cdrc_common::db::{init_database, SqliteRepository};
use cdrc_ri::error::ParserError;
use cdrc_ri::services::ReportParser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Temporary root with a database; TempDir must outlive the test
pub async fn create_test_repo() -> (TempDir, SqliteRepository) {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("test_cdrc.db")).await.unwrap();
    (dir, SqliteRepository::new(pool))
}

/// Parser double writing `<stem>.txt` with a fixed body, or failing
pub struct FakeParser {
    reports_dir: PathBuf,
    fail: bool,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeParser {
    pub fn ok(reports_dir: PathBuf) -> Self {
        Self {
            reports_dir,
            fail: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Succeeds after sleeping, to keep the dispatch queue backed up
    pub fn slow(reports_dir: PathBuf, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::ok(reports_dir)
        }
    }

    pub fn failing(reports_dir: PathBuf) -> Self {
        Self {
            reports_dir,
            fail: true,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportParser for FakeParser {
    async fn generate_report(
        &self,
        raw_path: &Path,
        _elf_path: &Path,
        _chip_type: Option<&str>,
    ) -> Result<PathBuf, ParserError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ParserError::Timeout(120));
        }
        std::fs::create_dir_all(&self.reports_dir)?;
        let stem = raw_path.file_stem().unwrap().to_string_lossy().into_owned();
        let path = self.reports_dir.join(format!("{}.txt", stem));
        std::fs::write(&path, "exccause 0x1c (LoadProhibited)")?;
        Ok(path)
    }
}
