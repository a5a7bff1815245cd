//! Orchestrator (spec §4.2). Drives one `TaskConstellation` to a terminal
//! state: a single scheduling loop plus N concurrent executors, one per
//! in-flight task, woken by an explicit signal rather than polling — per
//! spec §9 "Unbounded concurrent callbacks", no event is ever published
//! while the constellation's write lock is held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use serde_json::json;
use tokio::sync::{Notify, RwLock};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::domain::errors::CoreError;
use crate::domain::models::config::{RetryConfig, SchedulerConfig};
use crate::domain::models::constellation::{ConstellationState, TaskConstellation};
use crate::domain::models::event::EventPayload;
use crate::domain::models::task_star::TaskStatus;
use crate::domain::ports::device_link::TaskRequestFrame;
use crate::services::device_registry::DeviceRegistry;
use crate::services::event_bus::EventBus;

/// Wakeup reasons (spec §4.2: "the loop blocks on an internal wakeup
/// signal that fires when..."). Kept only for logging context; the
/// scheduler reacts identically to every reason by recomputing
/// `executable_tasks()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    TaskTerminal,
    ConstellationEdited,
    DeviceIdle,
    RetryTimer,
    Cancellation,
}

pub struct Orchestrator {
    session_id: String,
    constellation: Arc<RwLock<TaskConstellation>>,
    registry: Arc<DeviceRegistry>,
    event_bus: Arc<EventBus>,
    scheduler_config: SchedulerConfig,
    retry_config: RetryConfig,
    wake: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        session_id: impl Into<String>,
        constellation: Arc<RwLock<TaskConstellation>>,
        registry: Arc<DeviceRegistry>,
        event_bus: Arc<EventBus>,
        scheduler_config: SchedulerConfig,
        retry_config: RetryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.into(),
            constellation,
            registry,
            event_bus,
            scheduler_config,
            retry_config,
            wake: Arc::new(Notify::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn wake(&self, reason: WakeReason) {
        tracing::debug!(?reason, "orchestrator wakeup");
        self.wake.notify_one();
    }

    /// Drives `self.constellation` to COMPLETED/FAILED/CANCELLED (spec
    /// §4.2 "Termination"). Returns once quiescent: no task RUNNING and
    /// none READY for one full settle window.
    pub async fn run(self: Arc<Self>) {
        {
            let mut c = self.constellation.write().await;
            c.state = ConstellationState::Executing;
        }
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                self.finish_cancelled().await;
                return;
            }

            self.dispatch_ready().await;

            let quiescent = { self.constellation.read().await.is_quiescent() };
            if quiescent {
                let settle = Duration::from_millis(self.scheduler_config.quiescence_window_ms);
                if timeout(settle, self.wake.notified()).await.is_err() {
                    // No wakeup arrived within the settle window: genuinely
                    // quiescent (spec §4.6 "settle window").
                    if self.cancelled.load(Ordering::SeqCst) {
                        self.finish_cancelled().await;
                    } else {
                        self.finish_terminal().await;
                    }
                    return;
                }
                // Something happened during the settle window; loop again.
            } else {
                self.wake.notified().await;
            }
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake(WakeReason::Cancellation);
    }

    async fn finish_terminal(&self) {
        let mut c = self.constellation.write().await;
        let failed = c.any_failed();
        c.state = if failed { ConstellationState::Failed } else { ConstellationState::Completed };
        let constellation_id = c.constellation_id.clone();
        drop(c);
        if failed {
            self.event_bus.publish(EventPayload::ConstellationFailed {
                constellation_id,
                reason: "one or more tasks failed without planner repair".to_string(),
            });
        } else {
            self.event_bus.publish(EventPayload::ConstellationCompleted { constellation_id });
        }
    }

    /// Per-round cancellation (spec §5 "Cancellation semantics"): marks
    /// CANCELLED, cancels in-flight tasks, best-effort aborts devices. The
    /// grace period is the caller's responsibility (this call assumes
    /// in-flight executors have already been given time to unwind).
    async fn finish_cancelled(&self) {
        let mut c = self.constellation.write().await;
        c.state = ConstellationState::Cancelled;
        let running: Vec<(String, Option<String>)> = c
            .tasks()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| (t.task_id.clone(), t.target_device_id.clone()))
            .collect();
        for (task_id, _) in &running {
            if let Some(task) = c.task_mut(task_id) {
                task.mark_cancelled(0.0);
            }
        }
        let constellation_id = c.constellation_id.clone();
        drop(c);
        for (task_id, device_id) in running {
            if let Some(device_id) = device_id {
                if let Some(link) = self.registry.link_for(&device_id).await {
                    let _ = link.send_abort(&task_id).await;
                }
                self.registry.record_failure(&device_id).await;
            }
            self.event_bus.publish(EventPayload::TaskCancelled { task_id });
        }
        self.event_bus.publish(EventPayload::ConstellationCancelled { constellation_id });
    }

    /// One scheduling pass (spec §4.2 steps a–c): recompute the ready set,
    /// atomically assign each ready task a device, launch its executor.
    async fn dispatch_ready(self: &Arc<Self>) {
        let candidates: Vec<(String, String)> = {
            let c = self.constellation.read().await;
            c.executable_tasks()
                .into_iter()
                .filter_map(|t| t.target_device_id.clone().map(|d| (t.task_id.clone(), d)))
                .collect()
        };

        for (task_id, device_id) in candidates {
            let link = match self.registry.try_assign(&device_id, &task_id).await {
                Ok(link) => link,
                Err(CoreError::DeviceUnavailable { reason, .. }) => {
                    warn!(task_id = %task_id, device_id = %device_id, reason, "device unavailable at dispatch");
                    let mut c = self.constellation.write().await;
                    // Returned to PENDING per spec §4.3: "task is returned
                    // to PENDING and the planner is notified via an event."
                    if let Some(task) = c.task_mut(&task_id) {
                        if task.status != TaskStatus::Running {
                            task.status = TaskStatus::Pending;
                        }
                    }
                    drop(c);
                    self.event_bus.publish(EventPayload::DeviceStatusChanged {
                        device_id,
                        status: "unavailable".to_string(),
                    });
                    continue;
                }
                Err(_) => continue,
            };

            let context = self.build_context(&task_id).await;
            {
                let mut c = self.constellation.write().await;
                if let Some(task) = c.task_mut(&task_id) {
                    task.mark_running(monotonic_now());
                }
            }
            self.event_bus.publish(EventPayload::TaskAssigned { task_id: task_id.clone(), device_id: device_id.clone() });
            self.event_bus.publish(EventPayload::TaskStarted { task_id: task_id.clone(), device_id: device_id.clone() });

            let this = Arc::clone(self);
            let link = Arc::clone(&link);
            tokio::spawn(async move {
                this.execute(task_id, device_id, link, context).await;
            });
        }
    }

    /// Serialized parent-task results, for the dispatch frame's optional
    /// `context` field (spec §4.3 task dispatch frame).
    async fn build_context(&self, task_id: &str) -> Option<serde_json::Value> {
        let c = self.constellation.read().await;
        let parents = c.parents(task_id);
        if parents.is_empty() {
            return None;
        }
        let mut map = serde_json::Map::new();
        for parent_id in parents {
            if let Some(parent) = c.task(&parent_id) {
                if let Some(result) = &parent.result {
                    map.insert(parent_id, result.clone());
                }
            }
        }
        if map.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(map))
        }
    }

    /// The executor contract (spec §4.2): dispatch, await reply or
    /// timeout, update task state, free or fail the device, wake the
    /// scheduler. Owns this task's retry lifecycle end to end, including
    /// the exponential backoff sleep between attempts (spec §4.2 "Retry
    /// policy").
    async fn execute(
        self: Arc<Self>,
        task_id: String,
        device_id: String,
        link: Arc<dyn crate::domain::ports::DeviceLink>,
        context: Option<serde_json::Value>,
    ) {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.retry_config.backoff_initial_ms))
            .with_max_interval(Duration::from_millis(self.retry_config.backoff_max_ms))
            .with_max_elapsed_time(None)
            .build();

        let request = TaskRequestFrame {
            session_id: self.session_id.clone(),
            constellation_id: {
                self.constellation.read().await.constellation_id.clone()
            },
            task_id: task_id.clone(),
            description: self.description_of(&task_id).await.unwrap_or_default(),
            tips: self.tips_of(&task_id).await,
            context,
        };

        let task_timeout = Duration::from_secs(self.scheduler_config.task_timeout_seconds);

        if let Err(err) = link.send_task_request(request).await {
            self.handle_transport_failure(&task_id, &device_id, err, &mut backoff).await;
            return;
        }

        match timeout(task_timeout, link.await_task_reply(&task_id, task_timeout)).await {
            Ok(Ok(reply)) => self.handle_reply(&task_id, &device_id, reply).await,
            Ok(Err(err)) => self.handle_transport_failure(&task_id, &device_id, err, &mut backoff).await,
            Err(_) => self.handle_timeout(&task_id, &device_id).await,
        }
    }

    async fn description_of(&self, task_id: &str) -> Option<String> {
        self.constellation.read().await.task(task_id).map(|t| t.description.clone())
    }

    async fn tips_of(&self, task_id: &str) -> Vec<String> {
        self.constellation.read().await.task(task_id).map(|t| t.tips.clone()).unwrap_or_default()
    }

    async fn handle_reply(&self, task_id: &str, device_id: &str, reply: crate::domain::ports::device_link::TaskReplyFrame) {
        use crate::domain::ports::device_link::TaskReplyStatus;
        let now = monotonic_now();
        let mut c = self.constellation.write().await;
        match reply.status {
            TaskReplyStatus::Completed => {
                if let Some(task) = c.task_mut(task_id) {
                    task.mark_completed(reply.result.unwrap_or(json!(null)), now);
                }
                let (satisfied, ready) = c.recompute_outbound_edges(task_id);
                drop(c);
                self.registry.release(device_id).await;
                self.event_bus.publish(EventPayload::TaskCompleted {
                    task_id: task_id.to_string(),
                    result: reply.result.unwrap_or(json!(null)),
                });
                self.publish_edge_events(satisfied, ready);
            }
            TaskReplyStatus::Failed => {
                // Content-level failure: surfaced to the planner, not
                // retried automatically (spec §4.2 "Retry policy").
                if let Some(task) = c.task_mut(task_id) {
                    task.mark_failed(reply.error.clone().unwrap_or_default(), now);
                }
                let (satisfied, ready) = c.recompute_outbound_edges(task_id);
                drop(c);
                self.registry.release(device_id).await;
                self.event_bus.publish(EventPayload::TaskFailed {
                    task_id: task_id.to_string(),
                    error: reply.error.unwrap_or_default(),
                    kind: "device_reported_failure".to_string(),
                });
                self.publish_edge_events(satisfied, ready);
            }
        }
        self.wake(WakeReason::TaskTerminal);
    }

    /// Publishes `dependency.satisfied` for each edge `recompute_outbound_edges`
    /// reports as newly satisfied, then `task.ready` for each downstream task
    /// it reports as newly ready (spec §4.5 taxonomy).
    fn publish_edge_events(&self, satisfied: Vec<String>, ready: Vec<String>) {
        for dependency_id in satisfied {
            self.event_bus.publish(EventPayload::DependencySatisfied { dependency_id });
        }
        for task_id in ready {
            self.event_bus.publish(EventPayload::TaskReady { task_id });
        }
    }

    async fn handle_timeout(&self, task_id: &str, device_id: &str) {
        let now = monotonic_now();
        let mut c = self.constellation.write().await;
        if let Some(task) = c.task_mut(task_id) {
            task.mark_failed("timeout awaiting device reply", now);
        }
        let (satisfied, ready) = c.recompute_outbound_edges(task_id);
        drop(c);
        // Spec §7: a timeout marks the device FAILED outright, not merely
        // DISCONNECTED — unlike a transport error, it isn't gated behind
        // the quarantine counter.
        self.registry.mark_failed(device_id).await;
        self.event_bus.publish(EventPayload::TaskFailed {
            task_id: task_id.to_string(),
            error: "timeout awaiting device reply".to_string(),
            kind: "timeout".to_string(),
        });
        self.publish_edge_events(satisfied, ready);
        self.wake(WakeReason::TaskTerminal);
    }

    async fn handle_transport_failure(
        &self,
        task_id: &str,
        device_id: &str,
        err: CoreError,
        backoff: &mut backoff::ExponentialBackoff,
    ) {
        if !err.is_retryable() {
            self.fail_non_retryable(task_id, device_id, &err).await;
            return;
        }

        // Transport-error retries go straight RUNNING -> PENDING (spec §8
        // S4's trajectory never passes through FAILED for a retried
        // attempt), so eligibility is a plain counter check rather than
        // `TaskStar::can_retry`, which assumes the task is already FAILED.
        let should_retry = {
            let c = self.constellation.read().await;
            c.task(task_id).map(|t| t.retry_count < t.max_retries).unwrap_or(false)
        };

        if !should_retry {
            self.fail_non_retryable(task_id, device_id, &err).await;
            return;
        }

        let delay = backoff.next_backoff().unwrap_or(Duration::from_millis(self.retry_config.backoff_max_ms));
        {
            let mut c = self.constellation.write().await;
            if let Some(task) = c.task_mut(task_id) {
                task.retry();
            }
        }
        self.registry.release(device_id).await;
        let retry_count = { self.constellation.read().await.task(task_id).map(|t| t.retry_count).unwrap_or(0) };
        self.event_bus.publish(EventPayload::TaskRetried { task_id: task_id.to_string(), retry_count });
        info!(task_id = %task_id, delay_ms = delay.as_millis() as u64, "retrying after transport error");

        tokio::time::sleep(delay).await;
        {
            let mut c = self.constellation.write().await;
            if let Some(task) = c.task_mut(task_id) {
                task.mark_ready();
            }
        }
        self.wake(WakeReason::RetryTimer);
    }

    async fn fail_non_retryable(&self, task_id: &str, device_id: &str, err: &CoreError) {
        let now = monotonic_now();
        let mut c = self.constellation.write().await;
        if let Some(task) = c.task_mut(task_id) {
            task.mark_failed(err.to_string(), now);
        }
        let (satisfied, ready) = c.recompute_outbound_edges(task_id);
        drop(c);
        self.registry.record_failure(device_id).await;
        error!(task_id = %task_id, error = %err, "task failed, not retryable");
        self.event_bus.publish(EventPayload::TaskFailed {
            task_id: task_id.to_string(),
            error: err.to_string(),
            kind: err.kind().to_string(),
        });
        self.publish_edge_events(satisfied, ready);
        self.wake(WakeReason::TaskTerminal);
    }
}

fn monotonic_now() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}
