//! TaskStarLine domain model — a directed dependency edge between two
//! TaskStars (spec §3).

use serde::{Deserialize, Serialize};

/// How an edge is satisfied by its source task's terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Edge satisfied iff the source reaches COMPLETED. Default.
    Unconditional,
    /// Edge satisfied on any terminal state of the source.
    CompletionOnly,
    /// Wire-compatible synonym of `Unconditional`, reserved for a future
    /// conditional variant. Per spec §9 Open Questions, this must not
    /// branch behavior differently from `Unconditional` today.
    SuccessOnly,
}

impl Default for DependencyType {
    fn default() -> Self {
        Self::Unconditional
    }
}

impl DependencyType {
    /// Whether a source task in `status` satisfies an edge of this type.
    pub fn is_satisfied_by(&self, status: super::task_star::TaskStatus) -> bool {
        use super::task_star::TaskStatus::*;
        match self {
            Self::Unconditional | Self::SuccessOnly => matches!(status, Completed),
            Self::CompletionOnly => status.is_terminal(),
        }
    }
}

/// A directed dependency edge `from_task_id -> to_task_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStarLine {
    pub dependency_id: String,
    pub from_task_id: String,
    pub to_task_id: String,
    pub dependency_type: DependencyType,
    pub condition_description: Option<String>,
    /// Derived; recomputed on source state change by the owning
    /// constellation. Not authoritative on its own — callers must not
    /// mutate this directly outside of `TaskConstellation::recompute_edges`.
    pub satisfied: bool,
}

impl TaskStarLine {
    pub fn new(
        dependency_id: impl Into<String>,
        from_task_id: impl Into<String>,
        to_task_id: impl Into<String>,
        dependency_type: DependencyType,
        condition_description: Option<String>,
    ) -> Self {
        Self {
            dependency_id: dependency_id.into(),
            from_task_id: from_task_id.into(),
            to_task_id: to_task_id.into(),
            dependency_type,
            condition_description,
            satisfied: false,
        }
    }
}
