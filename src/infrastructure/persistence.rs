//! Filesystem `ArtifactWriter` (spec §6 "Persisted artifacts"). Grounded on
//! the teacher's `EventStore`/`TrajectoryRepository` split
//! (`infrastructure/database/*_repo.rs`: a repository struct wrapping one
//! storage handle behind the port trait), but backed by plain JSONL/JSON
//! files instead of a `SqlitePool` since durable cross-restart recovery is
//! an explicit Non-goal (§1).

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ports::artifact_writer::{ArtifactWriter, ExecutionLogEntry};

/// One execution log (`<session_id>.jsonl`, append-only) and one summary
/// file (`<session_id>.summary.json`, overwritten on each call) per round,
/// both under `artifact_dir`.
pub struct FileArtifactWriter {
    log_path: PathBuf,
    summary_path: PathBuf,
    log_file: Mutex<tokio::fs::File>,
}

impl FileArtifactWriter {
    /// Opens (creating if needed) `artifact_dir/<session_id>.jsonl` for
    /// append. `artifact_dir` must already exist; the caller (process
    /// startup) is responsible for creating it from `ProcessConfig`.
    pub async fn create(artifact_dir: impl Into<PathBuf>, session_id: &str) -> CoreResult<Self> {
        let artifact_dir = artifact_dir.into();
        let log_path = artifact_dir.join(format!("{session_id}.jsonl"));
        let summary_path = artifact_dir.join(format!("{session_id}.summary.json"));
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .map_err(|e| CoreError::Io(format!("opening {}: {e}", log_path.display())))?;
        Ok(Self { log_path, summary_path, log_file: Mutex::new(log_file) })
    }

    pub fn log_path(&self) -> &std::path::Path {
        &self.log_path
    }

    pub fn summary_path(&self) -> &std::path::Path {
        &self.summary_path
    }
}

#[async_trait]
impl ArtifactWriter for FileArtifactWriter {
    async fn append_log(&self, entry: &ExecutionLogEntry) -> CoreResult<()> {
        let mut line = serde_json::to_vec(entry).map_err(|e| CoreError::Io(e.to_string()))?;
        line.push(b'\n');
        let mut file = self.log_file.lock().await;
        file.write_all(&line).await.map_err(|e| CoreError::Io(e.to_string()))?;
        file.flush().await.map_err(|e| CoreError::Io(e.to_string()))
    }

    async fn write_summary(&self, summary: serde_json::Value) -> CoreResult<()> {
        let bytes = serde_json::to_vec_pretty(&summary).map_err(|e| CoreError::Io(e.to_string()))?;
        tokio::fs::write(&self.summary_path, bytes)
            .await
            .map_err(|e| CoreError::Io(format!("writing {}: {e}", self.summary_path.display())))
    }
}
