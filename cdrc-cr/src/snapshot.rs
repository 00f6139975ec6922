//! Corpus snapshot handed to the external clusterer

use cdrc_common::db::Coredump;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory of raw coredump copies plus the file name → coredump id index
#[derive(Debug)]
pub struct Snapshot {
    dir: PathBuf,
    files: BTreeMap<String, i64>,
}

impl Snapshot {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> &BTreeMap<String, i64> {
        &self.files
    }

    pub fn copied(&self) -> usize {
        self.files.len()
    }

    pub fn coredump_id(&self, file_name: &str) -> Option<i64> {
        self.files.get(file_name).copied()
    }

    /// Remove the snapshot directory; failures are only logged
    pub async fn cleanup(&self) {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => debug!(dir = %self.dir.display(), "Removed snapshot"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "Failed to remove snapshot"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    dir: PathBuf,
}

impl SnapshotBuilder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Recreate the directory empty and copy every raw file into it
    ///
    /// Missing raw files and repeated file names are skipped with a warning.
    pub async fn build(&self, corpus: &[Coredump]) -> std::io::Result<Snapshot> {
        if tokio::fs::try_exists(&self.dir).await? {
            tokio::fs::remove_dir_all(&self.dir).await?;
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut files = BTreeMap::new();
        for coredump in corpus {
            let Some(name) = coredump.raw_file_name() else {
                warn!(coredump_id = coredump.coredump_id, "Raw path has no file name");
                continue;
            };
            if let Some(first) = files.get(&name) {
                warn!(
                    coredump_id = coredump.coredump_id,
                    kept = first,
                    file = %name,
                    "Duplicate raw file name, skipping"
                );
                continue;
            }

            match tokio::fs::copy(&coredump.raw_dump_path, self.dir.join(&name)).await {
                Ok(_) => {
                    files.insert(name, coredump.coredump_id);
                }
                Err(e) => {
                    warn!(
                        coredump_id = coredump.coredump_id,
                        path = %coredump.raw_dump_path,
                        error = %e,
                        "Raw file unavailable, leaving it out of the snapshot"
                    );
                }
            }
        }

        info!(dir = %self.dir.display(), copied = files.len(), corpus = corpus.len(), "Snapshot ready");
        Ok(Snapshot {
            dir: self.dir.clone(),
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn coredump(id: i64, path: &Path) -> Coredump {
        Coredump {
            coredump_id: id,
            device_mac_address: "AA:BB".to_string(),
            firmware_id_on_crash: 1,
            cluster_id: None,
            raw_dump_path: path.to_string_lossy().into_owned(),
            log_path: None,
            received_at: 0,
        }
    }

    #[tokio::test]
    async fn test_build_copies_and_indexes() {
        let dir = TempDir::new().unwrap();
        let raws = dir.path().join("raws");
        std::fs::create_dir_all(&raws).unwrap();
        std::fs::write(raws.join("a.cdmp"), b"AAAA").unwrap();
        std::fs::write(raws.join("b.cdmp"), b"BBBB").unwrap();

        let processing = dir.path().join("processing");
        std::fs::create_dir_all(&processing).unwrap();
        std::fs::write(processing.join("stale.cdmp"), b"old").unwrap();

        let corpus = vec![
            coredump(1, &raws.join("a.cdmp")),
            coredump(2, &raws.join("b.cdmp")),
            coredump(3, &raws.join("missing.cdmp")),
        ];

        let snapshot = SnapshotBuilder::new(&processing).build(&corpus).await.unwrap();

        assert_eq!(snapshot.copied(), 2);
        assert_eq!(snapshot.coredump_id("a.cdmp"), Some(1));
        assert_eq!(snapshot.coredump_id("missing.cdmp"), None);
        assert!(!processing.join("stale.cdmp").exists());
        assert_eq!(std::fs::read(processing.join("b.cdmp")).unwrap(), b"BBBB");

        snapshot.cleanup().await;
        assert!(!processing.exists());
    }

    #[tokio::test]
    async fn test_duplicate_names_keep_first() {
        let dir = TempDir::new().unwrap();
        let one = dir.path().join("one");
        let two = dir.path().join("two");
        std::fs::create_dir_all(&one).unwrap();
        std::fs::create_dir_all(&two).unwrap();
        std::fs::write(one.join("x.cdmp"), b"first").unwrap();
        std::fs::write(two.join("x.cdmp"), b"second").unwrap();

        let processing = dir.path().join("processing");
        let snapshot = SnapshotBuilder::new(&processing)
            .build(&[coredump(7, &one.join("x.cdmp")), coredump(8, &two.join("x.cdmp"))])
            .await
            .unwrap();

        assert_eq!(snapshot.copied(), 1);
        assert_eq!(snapshot.coredump_id("x.cdmp"), Some(7));
        assert_eq!(std::fs::read(processing.join("x.cdmp")).unwrap(), b"first");
    }
}
