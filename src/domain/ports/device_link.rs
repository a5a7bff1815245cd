//! Device transport port (spec §6 "Device transport (wire protocol)"). A
//! `DeviceLink` is one open, bidirectional connection to a single device;
//! the registry (`services::device_registry`) owns one per connected
//! device. The real wire transport is out of scope (§1 Non-goals list
//! device-side executors as an excluded collaborator) — `DeviceLink` is the
//! seam a real transport adapter would implement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::errors::CoreResult;

/// `task_request` frame (coordinator→device).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequestFrame {
    pub session_id: String,
    pub constellation_id: String,
    pub task_id: String,
    pub description: String,
    pub tips: Vec<String>,
    pub context: Option<serde_json::Value>,
}

/// `task_reply` frame (device→coordinator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReplyFrame {
    pub task_id: String,
    pub status: TaskReplyStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration: f64,
    pub metrics: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskReplyStatus {
    Completed,
    Failed,
}

/// `register` frame (device→coordinator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterFrame {
    pub device_id: String,
    pub os: String,
    pub capabilities: Vec<String>,
    pub metadata: serde_json::Value,
}

/// One device's open bidirectional channel (spec §4.3, §6). An executor
/// calls `send_task_request` then `await_task_reply`; the registry calls
/// `send_abort` on cancellation.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    fn device_id(&self) -> &str;

    async fn send_task_request(&self, frame: TaskRequestFrame) -> CoreResult<()>;

    /// Awaits the matching `task_reply`, or a `timeout` error if none
    /// arrives within `timeout` (spec §4.3 "Failure semantics").
    async fn await_task_reply(&self, task_id: &str, timeout: Duration) -> CoreResult<TaskReplyFrame>;

    async fn send_abort(&self, task_id: &str) -> CoreResult<()>;

    /// Whether the underlying connection is still believed open. The
    /// registry still relies on heartbeat liveness (§4.3) for the
    /// authoritative DISCONNECTED determination.
    fn is_connected(&self) -> bool;
}
