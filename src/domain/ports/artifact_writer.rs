//! Persisted-artifact port (spec §6 "Persisted artifacts"). Durable
//! cross-restart recovery is an explicit Non-goal (§1), so this is a plain
//! append/write contract, not a repository with read-back queries.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::domain::errors::CoreResult;

/// One JSONL execution-log line (spec §6: "one line per completed step, in
/// emission order").
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionLogEntry {
    pub sequence: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub step: serde_json::Value,
}

/// Writes the per-session JSONL execution log and the final summary JSON
/// (spec §6 schema). Grounded on the teacher's `EventStore`/
/// `TrajectoryRepository` port split, but backed by plain files since no
/// durable store is carried (§1 Non-goals).
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    async fn append_log(&self, entry: &ExecutionLogEntry) -> CoreResult<()>;

    /// Callers serialize their summary struct to `Value` first (via
    /// `serde_json::to_value`) so this port stays dyn-compatible.
    async fn write_summary(&self, summary: Value) -> CoreResult<()>;
}

/// Convenience for callers with a concrete `Serialize` summary type.
pub fn to_summary_value(summary: &impl Serialize) -> serde_json::Result<Value> {
    serde_json::to_value(summary)
}
