//! Content-addressed batch storage. Every persisted batch gets its own
//! version file; a per-source latest pointer is repointed atomically via
//! a temp-file rename.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::errors::PulseError;
use crate::models::{LatestPointer, Record, VersionedBatch};

#[derive(Debug, Clone)]
pub struct VersionStore {
    out_dir: PathBuf,
}

impl VersionStore {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self { out_dir: out_dir.into() }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn versions_dir(&self) -> PathBuf {
        self.out_dir.join("versions")
    }

    fn latest_path(&self, source: &str) -> PathBuf {
        self.out_dir.join(format!("{source}_latest.json"))
    }

    pub async fn init(&self) -> Result<(), PulseError> {
        tokio::fs::create_dir_all(self.versions_dir())
            .await
            .map_err(|e| {
                PulseError::Storage(format!(
                    "cannot create output directory {}: {}",
                    self.out_dir.display(),
                    e
                ))
            })?;
        Ok(())
    }

    /// Write the batch as a new version file, then repoint the source's
    /// latest pointer at it.
    pub async fn persist(&self, batch: &VersionedBatch) -> Result<PathBuf, PulseError> {
        let stamp = batch.created_at.format("%Y%m%d_%H%M%S%3f");
        let file_name = format!("{}_{}_{}.json", batch.source, stamp, batch.short_hash());
        let path = self.versions_dir().join(file_name);

        let body = serde_json::to_vec_pretty(batch)?;
        tokio::fs::write(&path, body).await?;
        debug!(source = %batch.source, path = %path.display(), "Wrote version file");

        self.repoint_latest(batch, &path).await?;
        info!(
            source = %batch.source,
            hash = %batch.short_hash(),
            records = batch.records.len(),
            "Persisted batch version"
        );
        Ok(path)
    }

    /// The pointer write goes to a temp file first so readers of the
    /// latest file never see a partial one.
    async fn repoint_latest(&self, batch: &VersionedBatch, version_path: &Path) -> Result<(), PulseError> {
        let pointer = LatestPointer {
            source: batch.source.clone(),
            content_hash: batch.content_hash.clone(),
            created_at: batch.created_at,
            record_count: batch.records.len(),
            version_path: version_path.to_path_buf(),
        };
        let tmp = self.out_dir.join(format!(".{}_latest.tmp", batch.source));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&pointer)?).await?;
        tokio::fs::rename(&tmp, self.latest_path(&batch.source)).await?;
        Ok(())
    }

    /// Follow a source's latest pointer back to its batch. Returns None
    /// when nothing has been persisted for the source yet.
    pub async fn load_latest(&self, source: &str) -> Result<Option<VersionedBatch>, PulseError> {
        let pointer_raw = match tokio::fs::read(self.latest_path(source)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let pointer: LatestPointer = serde_json::from_slice(&pointer_raw)?;
        let batch_raw = tokio::fs::read(&pointer.version_path).await.map_err(|e| {
            PulseError::Storage(format!(
                "latest pointer for {} names missing version {}: {}",
                source,
                pointer.version_path.display(),
                e
            ))
        })?;
        Ok(Some(serde_json::from_slice(&batch_raw)?))
    }

    /// Follow every `*_latest.json` pointer in the output directory back
    /// to its batch. Used to rebuild in-memory state after a restart.
    pub async fn load_all_latest(&self) -> Result<Vec<VersionedBatch>, PulseError> {
        let mut entries = match tokio::fs::read_dir(&self.out_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut batches = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with("_latest.json") || name.starts_with('.') {
                continue;
            }
            let Some(source) = name.strip_suffix("_latest.json") else {
                continue;
            };
            if let Some(batch) = self.load_latest(source).await? {
                batches.push(batch);
            }
        }
        batches.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(batches)
    }

    pub async fn load_pointer(&self, source: &str) -> Result<Option<LatestPointer>, PulseError> {
        match tokio::fs::read(self.latest_path(source)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the cross-source merged view as a timestamped snapshot.
    pub async fn write_merged(&self, rows: &[Record]) -> Result<PathBuf, PulseError> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
        let path = self.out_dir.join(format!("merged_{stamp}.json"));
        tokio::fs::write(&path, serde_json::to_vec_pretty(rows)?).await?;
        info!(rows = rows.len(), path = %path.display(), "Wrote merged snapshot");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: serde_json::Value) -> Record {
        let serde_json::Value::Object(fields) = fields else {
            panic!("fields must be an object")
        };
        fields
    }

    #[tokio::test]
    async fn test_persist_then_load_latest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        store.init().await.unwrap();

        let batch = VersionedBatch::new("crime", vec![record(json!({"neighborhood": "Mission"}))]);
        let path = store.persist(&batch).await.unwrap();
        assert!(path.exists());

        let loaded = store.load_latest("crime").await.unwrap().unwrap();
        assert_eq!(loaded.content_hash, batch.content_hash);
        assert_eq!(loaded.records, batch.records);
    }

    #[tokio::test]
    async fn test_latest_pointer_tracks_newest_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        store.init().await.unwrap();

        let first = VersionedBatch::new("crime", vec![record(json!({"total_crimes": 1}))]);
        store.persist(&first).await.unwrap();
        let second = VersionedBatch::new("crime", vec![record(json!({"total_crimes": 2}))]);
        let second_path = store.persist(&second).await.unwrap();

        let pointer = store.load_pointer("crime").await.unwrap().unwrap();
        assert_eq!(pointer.content_hash, second.content_hash);
        assert_eq!(pointer.version_path, second_path);
        assert_eq!(pointer.record_count, 1);

        // Both version files remain on disk.
        let versions: Vec<_> = std::fs::read_dir(dir.path().join("versions"))
            .unwrap()
            .collect();
        assert_eq!(versions.len(), 2);
    }

    #[tokio::test]
    async fn test_load_latest_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        store.init().await.unwrap();
        assert!(store.load_latest("crime").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_all_latest_finds_every_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        store.init().await.unwrap();

        store
            .persist(&VersionedBatch::new("crime", vec![record(json!({"total_crimes": 1}))]))
            .await
            .unwrap();
        store
            .persist(&VersionedBatch::new("reviews", vec![record(json!({"rating": 4}))]))
            .await
            .unwrap();

        let batches = store.load_all_latest().await.unwrap();
        let sources: Vec<&str> = batches.iter().map(|b| b.source.as_str()).collect();
        assert_eq!(sources, vec!["crime", "reviews"]);
    }

    #[tokio::test]
    async fn test_identical_content_makes_new_version_same_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        store.init().await.unwrap();

        let records = vec![record(json!({"neighborhood": "Mission", "price": 900000}))];
        let a = VersionedBatch::new("real_estate", records.clone());
        store.persist(&a).await.unwrap();
        let b = VersionedBatch::new("real_estate", records);
        store.persist(&b).await.unwrap();

        assert_eq!(a.content_hash, b.content_hash);
        let pointer = store.load_pointer("real_estate").await.unwrap().unwrap();
        assert_eq!(pointer.created_at, b.created_at);
    }
}
