//! Durable storage of reassembled coredumps
//!
//! Artifacts are named `<UTC timestamp>_<DEVICE>.cdmp` from the completion
//! time and the normalised device id. A name is never reused: if it already
//! exists a numeric suffix is appended.

use crate::models::AssembledArtifact;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const ARTIFACT_EXTENSION: &str = "cdmp";

/// Device id as used in file names: separators removed, uppercased
pub fn normalize_device_id(device_id: &str) -> String {
    device_id
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .flat_map(char::to_uppercase)
        .collect()
}

/// Base file stem for an artifact, before collision suffixes
pub fn artifact_stem(artifact: &AssembledArtifact) -> String {
    format!(
        "{}_{}",
        artifact.completed_at.format("%Y-%m-%d_%H-%M-%S"),
        normalize_device_id(&artifact.device_id)
    )
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    raws_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(raws_dir: PathBuf) -> Self {
        Self { raws_dir }
    }

    pub fn raws_dir(&self) -> &Path {
        &self.raws_dir
    }

    /// Write the artifact exactly once; returns its path
    pub async fn write(&self, artifact: &AssembledArtifact) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.raws_dir).await?;

        let stem = artifact_stem(artifact);
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}.{}", stem, ARTIFACT_EXTENSION)
            } else {
                format!("{}_{}.{}", stem, attempt, ARTIFACT_EXTENSION)
            };
            let path = self.raws_dir.join(name);

            // create_new makes the existence check and the create one step
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&artifact.data).await?;
                    file.sync_all().await?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndexBase;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn artifact(device_id: &str, data: &[u8]) -> AssembledArtifact {
        AssembledArtifact {
            session_id: 1,
            device_id: device_id.to_string(),
            parts: 1,
            base: IndexBase::Zero,
            data: data.to_vec(),
            completed_at: Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap(),
        }
    }

    #[test]
    fn test_normalize_device_id() {
        assert_eq!(normalize_device_id("aa:bb:cc:dd:ee:ff"), "AABBCCDDEEFF");
        assert_eq!(normalize_device_id("aa-bb-cc"), "AABBCC");
    }

    #[tokio::test]
    async fn test_write_names_and_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("raws"));

        let first = store.write(&artifact("aa:bb:cc", b"one")).await.unwrap();
        let second = store.write(&artifact("aa:bb:cc", b"two")).await.unwrap();

        assert_eq!(
            first.file_name().unwrap().to_str().unwrap(),
            "2025-03-14_09-26-53_AABBCC.cdmp"
        );
        assert_eq!(
            second.file_name().unwrap().to_str().unwrap(),
            "2025-03-14_09-26-53_AABBCC_1.cdmp"
        );
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }
}
