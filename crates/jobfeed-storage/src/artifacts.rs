//! Hash-addressed, write-once storage for generated documents.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// `<namespace>/<YYYYMMDD>/<hash>.<ext>`
    pub fn relative_path_for(
        &self,
        created_at: DateTime<Utc>,
        namespace: &str,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let day = created_at.format("%Y%m%d").to_string();
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "txt" } else { ext };
        PathBuf::from(namespace)
            .join(day)
            .join(format!("{content_hash}.{ext}"))
    }

    /// Write `bytes` once under a content-addressed path using a temp file and atomic rename.
    /// Identical content lands on the same path and is reported as deduplicated.
    pub async fn store_bytes(
        &self,
        created_at: DateTime<Utc>,
        namespace: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.relative_path_for(created_at, namespace, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating artifact directory {}", parent.display()))?;

        let stored = |deduplicated: bool| StoredArtifact {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking artifact path {}", absolute_path.display()))?
        {
            return Ok(stored(true));
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp artifact file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp artifact file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp artifact file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(stored(false)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(stored(true))
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "renaming temp artifact {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn relative_path_is_namespaced_by_day() {
        let store = ArtifactStore::new("/tmp/unused");
        let at = Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap();
        assert_eq!(
            store.relative_path_for(at, "briefs", "abc", ".md"),
            PathBuf::from("briefs/20260224/abc.md")
        );
        assert_eq!(
            store.relative_path_for(at, "briefs", "abc", ""),
            PathBuf::from("briefs/20260224/abc.txt")
        );
    }

    #[tokio::test]
    async fn identical_documents_share_one_file() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let at = Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap();

        let first = store
            .store_bytes(at, "briefs", "md", b"# Brief\nsame")
            .await
            .expect("first store");
        let second = store
            .store_bytes(at, "briefs", "md", b"# Brief\nsame")
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert_eq!(
            std::fs::read(&first.absolute_path).unwrap(),
            b"# Brief\nsame".to_vec()
        );
    }
}
