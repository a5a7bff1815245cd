//! Event taxonomy (spec §4.5). The event bus transport lives in
//! `services::event_bus`; this module only defines the wire shape every
//! event carries, so `domain::ports::EventSink` can depend on it without a
//! `domain -> services` edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SequenceNumber = u64;

/// Mandatory event kinds (spec §4.5 "Event taxonomy").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    ConstellationCreated { constellation_id: String },
    ConstellationEdited { constellation_id: String, summary: String },
    ConstellationCompleted { constellation_id: String },
    ConstellationFailed { constellation_id: String, reason: String },
    ConstellationCancelled { constellation_id: String },

    TaskCreated { task_id: String },
    TaskReady { task_id: String },
    TaskAssigned { task_id: String, device_id: String },
    TaskStarted { task_id: String, device_id: String },
    TaskCompleted { task_id: String, result: serde_json::Value },
    TaskFailed { task_id: String, error: String, kind: String },
    TaskCancelled { task_id: String },
    TaskRetried { task_id: String, retry_count: u32 },

    DependencyAdded { dependency_id: String, from: String, to: String },
    DependencyRemoved { dependency_id: String },
    DependencyUpdated { dependency_id: String },
    DependencySatisfied { dependency_id: String },

    DeviceRegistered { device_id: String },
    DeviceDisconnected { device_id: String },
    DeviceStatusChanged { device_id: String, status: String },

    AgentResponse { round_id: String, thought: String, response: String },
    AgentAction { round_id: String, tool: String, args: serde_json::Value },

    SessionStarted { session_id: String },
    RoundStarted { round_id: String },
    RoundEnded { round_id: String, status: String },
    SessionEnded { session_id: String },

    /// Self-directed notice that a slow subscriber's queue overflowed
    /// (spec §4.5 "Delivery").
    SubscriberOverflow { subscriber: String, dropped: u64 },
}

impl EventPayload {
    /// The dotted event-type string used in the taxonomy table, e.g.
    /// `"task.completed"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConstellationCreated { .. } => "constellation.created",
            Self::ConstellationEdited { .. } => "constellation.edited",
            Self::ConstellationCompleted { .. } => "constellation.completed",
            Self::ConstellationFailed { .. } => "constellation.failed",
            Self::ConstellationCancelled { .. } => "constellation.cancelled",
            Self::TaskCreated { .. } => "task.created",
            Self::TaskReady { .. } => "task.ready",
            Self::TaskAssigned { .. } => "task.assigned",
            Self::TaskStarted { .. } => "task.started",
            Self::TaskCompleted { .. } => "task.completed",
            Self::TaskFailed { .. } => "task.failed",
            Self::TaskCancelled { .. } => "task.cancelled",
            Self::TaskRetried { .. } => "task.retried",
            Self::DependencyAdded { .. } => "dependency.added",
            Self::DependencyRemoved { .. } => "dependency.removed",
            Self::DependencyUpdated { .. } => "dependency.updated",
            Self::DependencySatisfied { .. } => "dependency.satisfied",
            Self::DeviceRegistered { .. } => "device.registered",
            Self::DeviceDisconnected { .. } => "device.disconnected",
            Self::DeviceStatusChanged { .. } => "device.status_changed",
            Self::AgentResponse { .. } => "agent.response",
            Self::AgentAction { .. } => "agent.action",
            Self::SessionStarted { .. } => "session.started",
            Self::RoundStarted { .. } => "round.started",
            Self::RoundEnded { .. } => "round.ended",
            Self::SessionEnded { .. } => "session.ended",
            Self::SubscriberOverflow { .. } => "subscriber_overflow",
        }
    }

    /// The correlation object this event is "about", for the per-object
    /// ordering guarantee in spec §4.5/§5 ("Ordering guarantees").
    pub fn correlation_key(&self) -> Option<&str> {
        match self {
            Self::TaskCreated { task_id }
            | Self::TaskReady { task_id }
            | Self::TaskAssigned { task_id, .. }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskCancelled { task_id }
            | Self::TaskRetried { task_id, .. } => Some(task_id),
            Self::DeviceRegistered { device_id }
            | Self::DeviceDisconnected { device_id }
            | Self::DeviceStatusChanged { device_id, .. } => Some(device_id),
            Self::DependencyAdded { dependency_id, .. }
            | Self::DependencyRemoved { dependency_id }
            | Self::DependencyUpdated { dependency_id }
            | Self::DependencySatisfied { dependency_id } => Some(dependency_id),
            _ => None,
        }
    }
}

/// The envelope every event carries (spec §4.5: "event_type, a monotonic
/// sequence number, timestamp, source_id, and a typed payload").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}
