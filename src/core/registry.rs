//! Run registry: the record of in-flight and finished runs.
//!
//! The registry stores run snapshots written by the orchestrator; it never
//! changes a run on its own. Once a run is terminal, further updates are
//! rejected. Each in-flight run also has a cancellation token that
//! external callers can fire through `cancel`. The file registry also
//! records the request on disk, so a `cancel` from another process is seen
//! at the next round boundary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::artifact_store::{write_atomic, StoreError};
use crate::domain::{PipelineRun, RunStatus, Topic};

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Run not found: {0}")]
    NotFound(Uuid),

    #[error("Run {run_id} is already {status} and cannot be updated")]
    Terminal { run_id: Uuid, status: RunStatus },

    #[error("Registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Registry write failed: {0}")]
    Write(#[from] StoreError),
}

/// Writer-of-record for run status
#[async_trait]
pub trait RunRegistry: Send + Sync {
    /// Create a pending run with a fresh id
    async fn create(&self, topic: Topic) -> Result<PipelineRun, RegistryError>;

    /// Store the latest snapshot of a run (last writer wins)
    async fn update_status(&self, run: &PipelineRun) -> Result<(), RegistryError>;

    /// Look up a run; `Ok(None)` if unknown
    async fn get(&self, run_id: Uuid) -> Result<Option<PipelineRun>, RegistryError>;

    /// Most recent runs first
    async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>, RegistryError>;

    /// Request cancellation of an in-flight run
    async fn cancel(&self, run_id: Uuid) -> Result<(), RegistryError>;

    /// Whether cancellation of a run has been requested
    async fn cancel_requested(&self, run_id: Uuid) -> Result<bool, RegistryError>;

    /// Token the orchestrator watches for this run
    fn cancellation_token(&self, run_id: Uuid) -> CancellationToken;

    /// Drop the in-process cancellation handle of a run that stopped executing
    fn release(&self, run_id: Uuid);
}

/// Per-run cancellation tokens, kept in-process
#[derive(Debug, Default)]
struct CancelHandles {
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl CancelHandles {
    fn token(&self, run_id: Uuid) -> CancellationToken {
        let mut tokens = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        tokens.entry(run_id).or_default().clone()
    }

    fn is_cancelled(&self, run_id: Uuid) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        tokens.get(&run_id).is_some_and(CancellationToken::is_cancelled)
    }

    fn release(&self, run_id: Uuid) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        tokens.remove(&run_id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tokens.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

fn check_writable(stored: Option<&PipelineRun>, run_id: Uuid) -> Result<(), RegistryError> {
    match stored {
        None => Err(RegistryError::NotFound(run_id)),
        Some(existing) if existing.is_terminal() => Err(RegistryError::Terminal {
            run_id,
            status: existing.status,
        }),
        Some(_) => Ok(()),
    }
}

/// In-process registry
#[derive(Debug, Default)]
pub struct InMemoryRunRegistry {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
    handles: CancelHandles,
}

impl InMemoryRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRegistry for InMemoryRunRegistry {
    async fn create(&self, topic: Topic) -> Result<PipelineRun, RegistryError> {
        let run = PipelineRun::new(Uuid::new_v4(), topic);
        self.runs.write().await.insert(run.run_id, run.clone());
        self.handles.token(run.run_id);
        Ok(run)
    }

    async fn update_status(&self, run: &PipelineRun) -> Result<(), RegistryError> {
        let mut runs = self.runs.write().await;
        check_writable(runs.get(&run.run_id), run.run_id)?;
        runs.insert(run.run_id, run.clone());
        drop(runs);

        if run.is_terminal() {
            self.handles.release(run.run_id);
        }
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<PipelineRun>, RegistryError> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>, RegistryError> {
        let mut runs: Vec<PipelineRun> = self.runs.read().await.values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn cancel(&self, run_id: Uuid) -> Result<(), RegistryError> {
        let run = self
            .get(run_id)
            .await?
            .ok_or(RegistryError::NotFound(run_id))?;

        if !run.is_terminal() {
            info!(%run_id, "Cancellation requested");
            self.handles.token(run_id).cancel();
        }
        Ok(())
    }

    async fn cancel_requested(&self, run_id: Uuid) -> Result<bool, RegistryError> {
        Ok(self.handles.is_cancelled(run_id))
    }

    fn cancellation_token(&self, run_id: Uuid) -> CancellationToken {
        self.handles.token(run_id)
    }

    fn release(&self, run_id: Uuid) {
        self.handles.release(run_id);
    }
}

/// File-backed registry: `<runs_dir>/<run_id>/run.json`, plus a
/// `cancel.requested` marker next to it once cancellation is asked for
#[derive(Debug)]
pub struct FileRunRegistry {
    runs_dir: PathBuf,
    handles: CancelHandles,
}

impl FileRunRegistry {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
            handles: CancelHandles::default(),
        }
    }

    /// Path of a run's snapshot file
    pub fn run_path(&self, run_id: Uuid) -> PathBuf {
        self.runs_dir.join(run_id.to_string()).join("run.json")
    }

    /// Path of a run's cancellation marker
    pub fn cancel_marker_path(&self, run_id: Uuid) -> PathBuf {
        self.runs_dir.join(run_id.to_string()).join("cancel.requested")
    }

    async fn clear_cancel_marker(&self, run_id: Uuid) {
        let path = self.cancel_marker_path(run_id);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(%run_id, path = %path.display(), error = %e, "Failed to remove cancel marker"),
        }
    }

    async fn write(&self, run: &PipelineRun) -> Result<(), RegistryError> {
        let dir = self.runs_dir.join(run.run_id.to_string());
        fs::create_dir_all(&dir).await?;
        let json = serde_json::to_vec_pretty(run)?;
        write_atomic(&dir, &self.run_path(run.run_id), json).await?;
        Ok(())
    }

    /// All run IDs in the runs directory
    async fn run_ids(&self) -> Result<Vec<Uuid>, RegistryError> {
        if !self.runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.runs_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        ids.push(uuid);
                    }
                }
            }
        }

        Ok(ids)
    }
}

#[async_trait]
impl RunRegistry for FileRunRegistry {
    async fn create(&self, topic: Topic) -> Result<PipelineRun, RegistryError> {
        let run = PipelineRun::new(Uuid::new_v4(), topic);
        self.write(&run).await?;
        self.handles.token(run.run_id);
        Ok(run)
    }

    async fn update_status(&self, run: &PipelineRun) -> Result<(), RegistryError> {
        let stored = self.get(run.run_id).await?;
        check_writable(stored.as_ref(), run.run_id)?;
        self.write(run).await?;

        if run.is_terminal() {
            self.handles.release(run.run_id);
            self.clear_cancel_marker(run.run_id).await;
        }
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<PipelineRun>, RegistryError> {
        let path = self.run_path(run_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>, RegistryError> {
        let mut runs = Vec::new();
        for run_id in self.run_ids().await? {
            // Directories without a readable snapshot are skipped
            if let Ok(Some(run)) = self.get(run_id).await {
                runs.push(run);
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn cancel(&self, run_id: Uuid) -> Result<(), RegistryError> {
        let run = self
            .get(run_id)
            .await?
            .ok_or(RegistryError::NotFound(run_id))?;

        if !run.is_terminal() {
            info!(%run_id, "Cancellation requested");
            let dir = self.runs_dir.join(run_id.to_string());
            let requested_at = chrono::Utc::now().to_rfc3339();
            write_atomic(&dir, &self.cancel_marker_path(run_id), requested_at.into_bytes()).await?;
            self.handles.token(run_id).cancel();
        }
        Ok(())
    }

    async fn cancel_requested(&self, run_id: Uuid) -> Result<bool, RegistryError> {
        if self.handles.is_cancelled(run_id) {
            return Ok(true);
        }
        Ok(fs::try_exists(self.cancel_marker_path(run_id)).await?)
    }

    fn cancellation_token(&self, run_id: Uuid) -> CancellationToken {
        self.handles.token(run_id)
    }

    fn release(&self, run_id: Uuid) {
        self.handles.release(run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = InMemoryRunRegistry::new();
        let run = registry.create(Topic::from("electric bikes")).await.unwrap();

        let stored = registry.get(run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Pending);
        assert!(registry.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_runs_are_immutable() {
        let registry = InMemoryRunRegistry::new();
        let mut run = registry.create(Topic::from("bikes")).await.unwrap();

        run.status = RunStatus::Succeeded;
        registry.update_status(&run).await.unwrap();

        run.status = RunStatus::Running;
        let err = registry.update_status(&run).await.unwrap_err();
        assert!(matches!(err, RegistryError::Terminal { .. }));
        assert_eq!(
            registry.get(run.run_id).await.unwrap().unwrap().status,
            RunStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_update_unknown_run() {
        let registry = InMemoryRunRegistry::new();
        let run = PipelineRun::new(Uuid::new_v4(), Topic::from("x"));
        assert!(matches!(
            registry.update_status(&run).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_fires_token() {
        let registry = InMemoryRunRegistry::new();
        let run = registry.create(Topic::from("bikes")).await.unwrap();
        let token = registry.cancellation_token(run.run_id);

        assert!(!token.is_cancelled());
        registry.cancel(run.run_id).await.unwrap();
        assert!(token.is_cancelled());

        assert!(matches!(
            registry.cancel(Uuid::new_v4()).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_from_another_registry_instance() {
        let temp = TempDir::new().unwrap();
        let owner = FileRunRegistry::new(temp.path());
        let other = FileRunRegistry::new(temp.path());

        let mut run = owner.create(Topic::from("bikes")).await.unwrap();
        let _token = owner.cancellation_token(run.run_id);
        assert!(!owner.cancel_requested(run.run_id).await.unwrap());

        other.cancel(run.run_id).await.unwrap();
        assert!(owner.cancel_marker_path(run.run_id).exists());
        assert!(owner.cancel_requested(run.run_id).await.unwrap());

        run.status = RunStatus::Aborted;
        owner.update_status(&run).await.unwrap();
        assert!(!owner.cancel_marker_path(run.run_id).exists());
        assert_eq!(owner.handles.len(), 0);

        // Cancelling a finished run changes nothing
        other.cancel(run.run_id).await.unwrap();
        assert!(!owner.cancel_marker_path(run.run_id).exists());
    }

    #[tokio::test]
    async fn test_release_drops_handle() {
        let registry = InMemoryRunRegistry::new();
        let run = registry.create(Topic::from("bikes")).await.unwrap();
        assert_eq!(registry.handles.len(), 1);

        registry.release(run.run_id);
        assert_eq!(registry.handles.len(), 0);
        assert!(!registry.cancel_requested(run.run_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_registry_roundtrip() {
        let temp = TempDir::new().unwrap();
        let registry = FileRunRegistry::new(temp.path());

        let mut run = registry.create(Topic::from("bikes")).await.unwrap();
        assert!(registry.run_path(run.run_id).exists());

        run.status = RunStatus::Running;
        registry.update_status(&run).await.unwrap();

        let reopened = FileRunRegistry::new(temp.path());
        let stored = reopened.get(run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);

        let listed = reopened.list(10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
