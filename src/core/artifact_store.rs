//! Durable storage for round artifacts.
//!
//! Artifacts are keyed by `(pipeline_id, round)`. `put` is an upsert: a
//! second write to the same key replaces the first and both succeed.
//! The store never inspects payload shape; validation happens upstream.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{RoundArtifact, RoundId, StoreReceipt};

/// Persistence layer failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Key-value persistence for round artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Write (or overwrite) the artifact for `(pipeline_id, round)`
    async fn put(
        &self,
        pipeline_id: Uuid,
        round: RoundId,
        payload: serde_json::Value,
    ) -> Result<StoreReceipt, StoreError>;

    /// Read an artifact; `Ok(None)` when it was never written
    async fn get(&self, pipeline_id: Uuid, round: RoundId) -> Result<Option<RoundArtifact>, StoreError>;

    /// All artifacts of a run, in round order
    async fn list(&self, pipeline_id: Uuid) -> Result<Vec<RoundArtifact>, StoreError>;
}

/// In-process store used by tests and ephemeral runs
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: RwLock<HashMap<(Uuid, RoundId), RoundArtifact>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored artifacts across all runs
    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(
        &self,
        pipeline_id: Uuid,
        round: RoundId,
        payload: serde_json::Value,
    ) -> Result<StoreReceipt, StoreError> {
        let artifact = RoundArtifact::new(pipeline_id, round, payload);
        let receipt = artifact.receipt(format!("memory://{}/{}", pipeline_id, round.key()));

        self.artifacts
            .write()
            .await
            .insert((pipeline_id, round), artifact);

        Ok(receipt)
    }

    async fn get(&self, pipeline_id: Uuid, round: RoundId) -> Result<Option<RoundArtifact>, StoreError> {
        Ok(self.artifacts.read().await.get(&(pipeline_id, round)).cloned())
    }

    async fn list(&self, pipeline_id: Uuid) -> Result<Vec<RoundArtifact>, StoreError> {
        let guard = self.artifacts.read().await;
        Ok(RoundId::ALL
            .iter()
            .filter_map(|r| guard.get(&(pipeline_id, *r)).cloned())
            .collect())
    }
}

/// File-backed store: `<runs_dir>/<run_id>/artifacts/<key>.json`
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    runs_dir: PathBuf,
}

impl FileArtifactStore {
    /// Open a store rooted at the given runs directory
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    /// Directory holding a run's artifacts
    pub fn artifacts_dir(&self, pipeline_id: Uuid) -> PathBuf {
        self.runs_dir.join(pipeline_id.to_string()).join("artifacts")
    }

    /// Path of a single artifact file
    pub fn artifact_path(&self, pipeline_id: Uuid, round: RoundId) -> PathBuf {
        self.artifacts_dir(pipeline_id)
            .join(format!("{}.json", round.key()))
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn put(
        &self,
        pipeline_id: Uuid,
        round: RoundId,
        payload: serde_json::Value,
    ) -> Result<StoreReceipt, StoreError> {
        let dir = self.artifacts_dir(pipeline_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let artifact = RoundArtifact::new(pipeline_id, round, payload);
        let json = serde_json::to_vec_pretty(&artifact)?;
        let path = self.artifact_path(pipeline_id, round);

        write_atomic(&dir, &path, json).await?;

        Ok(artifact.receipt(path.display().to_string()))
    }

    async fn get(&self, pipeline_id: Uuid, round: RoundId) -> Result<Option<RoundArtifact>, StoreError> {
        let path = self.artifact_path(pipeline_id, round);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn list(&self, pipeline_id: Uuid) -> Result<Vec<RoundArtifact>, StoreError> {
        let mut artifacts = Vec::new();
        for round in RoundId::ALL {
            if let Some(artifact) = self.get(pipeline_id, round).await? {
                artifacts.push(artifact);
            }
        }
        Ok(artifacts)
    }
}

/// Write `bytes` to `path` via a temp file in `dir` and an atomic rename,
/// so readers never observe a half-written artifact.
pub(crate) async fn write_atomic(dir: &Path, path: &Path, bytes: Vec<u8>) -> Result<(), StoreError> {
    let dir = dir.to_path_buf();
    let target = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
        use std::io::Write;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
        tmp.write_all(&bytes).map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.flush().map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&target)
            .map_err(|e| StoreError::io(&target, e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| StoreError::Unavailable(format!("write task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_put_overwrites() {
        let store = InMemoryArtifactStore::new();
        let id = Uuid::new_v4();

        store.put(id, RoundId::Trends, json!({"v": 1})).await.unwrap();
        store.put(id, RoundId::Trends, json!({"v": 2})).await.unwrap();

        assert_eq!(store.len().await, 1);
        let artifact = store.get(id, RoundId::Trends).await.unwrap().unwrap();
        assert_eq!(artifact.payload, json!({"v": 2}));
    }

    #[tokio::test]
    async fn test_memory_get_missing_is_none() {
        let store = InMemoryArtifactStore::new();
        assert!(store.get(Uuid::new_v4(), RoundId::Publish).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_roundtrip_and_layout() {
        let temp = TempDir::new().unwrap();
        let store = FileArtifactStore::new(temp.path());
        let id = Uuid::new_v4();

        let receipt = store
            .put(id, RoundId::SectionDrafting, json!({"sections": []}))
            .await
            .unwrap();

        let expected = temp
            .path()
            .join(id.to_string())
            .join("artifacts")
            .join("r3.json");
        assert_eq!(receipt.location, expected.display().to_string());
        assert!(expected.exists());

        let artifact = store.get(id, RoundId::SectionDrafting).await.unwrap().unwrap();
        assert_eq!(artifact.checksum, receipt.checksum);
        assert!(store.get(id, RoundId::Polish).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_in_round_order() {
        let store = InMemoryArtifactStore::new();
        let id = Uuid::new_v4();

        store.put(id, RoundId::Metadata, json!({})).await.unwrap();
        store.put(id, RoundId::Trends, json!({})).await.unwrap();
        store.put(Uuid::new_v4(), RoundId::Ideation, json!({})).await.unwrap();

        let rounds: Vec<RoundId> = store.list(id).await.unwrap().iter().map(|a| a.round).collect();
        assert_eq!(rounds, vec![RoundId::Trends, RoundId::Metadata]);
    }
}
