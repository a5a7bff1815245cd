//! TaskStar domain model.
//!
//! A TaskStar is one atomic unit of work inside a TaskConstellation. It
//! carries the natural-language contract shipped to a device, its place in
//! the dependency DAG (via `TaskStarLine` edges recorded on the
//! constellation, not on the star itself), and the bookkeeping needed to
//! dispatch, retry, and terminate it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a TaskStar in the execution pipeline (see spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        }
    }

    /// Terminal states per I4: a task in one of these is never re-entered
    /// except by explicit planner deletion or by a retry (which resets it
    /// to Pending).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Skipped
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// 1 (HIGH) … 4 (LOW); breaks ties in the ready set (spec §3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TaskPriority {
    High = 1,
    Normal = 2,
    Low3 = 3,
    Low = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// A single atomic unit of work (spec §3 "TaskStar").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStar {
    pub task_id: String,
    pub name: String,
    /// Natural-language contract shipped to the device.
    pub description: String,
    pub tips: Vec<String>,
    pub target_device_id: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<f64>,
    pub ended_at: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl TaskStar {
    pub fn new(task_id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            name: name.into(),
            description: description.into(),
            tips: Vec::new(),
            target_device_id: None,
            status: TaskStatus::default(),
            priority: TaskPriority::default(),
            result: None,
            error: None,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            max_retries: 3,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.target_device_id = Some(device_id.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tips(mut self, tips: Vec<String>) -> Self {
        self.tips = tips;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// I6: whether a structural/field mutation of this task is allowed.
    /// Tasks that are RUNNING or already terminal may not be edited by the
    /// planner (the orchestrator still transitions their status directly).
    pub fn is_modifiable(&self) -> bool {
        !matches!(self.status, TaskStatus::Running) && !self.status.is_terminal()
    }

    /// Whether this task is eligible to be promoted to READY: it has a
    /// device and is currently PENDING. Dependency satisfaction is
    /// evaluated by the constellation, not the task in isolation.
    pub fn can_become_ready(&self) -> bool {
        self.status == TaskStatus::Pending && self.target_device_id.is_some()
    }

    pub fn mark_ready(&mut self) {
        self.status = TaskStatus::Ready;
        self.touch();
    }

    pub fn mark_running(&mut self, now: f64) {
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.touch();
    }

    pub fn mark_completed(&mut self, result: serde_json::Value, now: f64) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.ended_at = Some(now);
        self.touch();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, now: f64) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.result = None;
        self.ended_at = Some(now);
        self.touch();
    }

    pub fn mark_cancelled(&mut self, now: f64) {
        self.status = TaskStatus::Cancelled;
        self.ended_at = Some(now);
        self.touch();
    }

    pub fn mark_skipped(&mut self, now: f64) {
        self.status = TaskStatus::Skipped;
        self.ended_at = Some(now);
        self.touch();
    }

    /// I2: a retry creates a logically new incarnation. Resets to Pending
    /// and increments `retry_count`; the caller is responsible for checking
    /// `retry_count <= max_retries` first.
    pub fn retry(&mut self) {
        self.retry_count += 1;
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.ended_at = None;
        self.result = None;
        self.error = None;
        self.touch();
    }

    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Partial-update patch applied by `update_task` (spec §4.1/§4.7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tips: Option<Vec<String>>,
    pub target_device_id: Option<String>,
    pub priority: Option<TaskPriority>,
    pub max_retries: Option<u32>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.tips.is_none()
            && self.target_device_id.is_none()
            && self.priority.is_none()
            && self.max_retries.is_none()
    }

    /// Apply the patch to a task, bumping `updated_at`. Caller has already
    /// checked modifiability (I6) and non-emptiness (testable property 7).
    pub fn apply(self, task: &mut TaskStar) {
        if let Some(name) = self.name {
            task.name = name;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(tips) = self.tips {
            task.tips = tips;
        }
        if let Some(device) = self.target_device_id {
            task.target_device_id = Some(device);
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(max_retries) = self.max_retries {
            task.max_retries = max_retries;
        }
        task.touch();
    }
}
