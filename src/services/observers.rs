//! Mandatory event-bus observers (spec §4.5 "Mandatory observers"): a
//! metrics observer feeding the §6 summary report, and a visualization
//! observer emitting DAG snapshots to any attached presenter.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::event::EventPayload;
use crate::domain::ports::EventSink;

/// Start/end/duration per task, keyed by `task_id` — feeds
/// `session_results.metrics.task_timings` in the persisted summary (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTiming {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Default)]
struct MetricsState {
    task_timings: HashMap<String, TaskTiming>,
    retries: HashMap<String, u32>,
}

/// Accumulates per-task/per-constellation timing statistics (spec §4.5,
/// §6 summary schema's `metrics` block).
pub struct MetricsObserver {
    state: Mutex<MetricsState>,
}

impl Default for MetricsObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self { state: Mutex::new(MetricsState::default()) }
    }

    pub fn task_timings(&self) -> HashMap<String, TaskTiming> {
        self.state.lock().expect("metrics mutex poisoned").task_timings.clone()
    }

    pub fn retry_count(&self, task_id: &str) -> u32 {
        self.state.lock().expect("metrics mutex poisoned").retries.get(task_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl EventSink for MetricsObserver {
    async fn handle(&self, payload: &EventPayload) {
        let mut state = self.state.lock().expect("metrics mutex poisoned");
        match payload {
            EventPayload::TaskStarted { task_id, .. } => {
                state.task_timings.entry(task_id.clone()).or_insert(TaskTiming {
                    start: None,
                    end: None,
                    duration_seconds: None,
                }).start = Some(Utc::now());
            }
            EventPayload::TaskCompleted { task_id, .. } | EventPayload::TaskFailed { task_id, .. } => {
                let entry = state.task_timings.entry(task_id.clone()).or_insert(TaskTiming {
                    start: None,
                    end: None,
                    duration_seconds: None,
                });
                let end = Utc::now();
                entry.end = Some(end);
                if let Some(start) = entry.start {
                    entry.duration_seconds = Some(end.signed_duration_since(start).num_milliseconds() as f64 / 1000.0);
                }
            }
            EventPayload::TaskRetried { task_id, retry_count } => {
                state.retries.insert(task_id.clone(), *retry_count);
            }
            _ => {}
        }
    }

    fn name(&self) -> &str {
        "metrics"
    }
}

/// A DAG snapshot pushed to any attached presenter (terminal/web, out of
/// scope per §1) on every structural or status-affecting event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagSnapshot {
    pub emitted_at: DateTime<Utc>,
    pub event_type: String,
}

/// Emits DAG snapshots for attached presenters (spec §4.5). No presenter
/// ships with the core (§1 excludes terminal/web presenters); this
/// observer only maintains the feed a presenter would subscribe to.
pub struct VisualizationObserver {
    snapshots: Mutex<Vec<DagSnapshot>>,
}

impl Default for VisualizationObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl VisualizationObserver {
    pub fn new() -> Self {
        Self { snapshots: Mutex::new(Vec::new()) }
    }

    pub fn snapshots(&self) -> Vec<DagSnapshot> {
        self.snapshots.lock().expect("visualization mutex poisoned").clone()
    }
}

#[async_trait]
impl EventSink for VisualizationObserver {
    async fn handle(&self, payload: &EventPayload) {
        let relevant = matches!(
            payload,
            EventPayload::ConstellationCreated { .. }
                | EventPayload::ConstellationEdited { .. }
                | EventPayload::TaskStarted { .. }
                | EventPayload::TaskCompleted { .. }
                | EventPayload::TaskFailed { .. }
                | EventPayload::DependencySatisfied { .. }
        );
        if !relevant {
            return;
        }
        self.snapshots.lock().expect("visualization mutex poisoned").push(DagSnapshot {
            emitted_at: Utc::now(),
            event_type: payload.event_type().to_string(),
        });
    }

    fn name(&self) -> &str {
        "visualization"
    }
}
