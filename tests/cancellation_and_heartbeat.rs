//! Integration coverage for spec §8 properties 11 (cancellation) and 12
//! (heartbeat lapse), exercised against `Orchestrator`/`DeviceRegistry`
//! directly since both are cross-cutting behaviors that don't fit inside
//! either module's own unit-test scope.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use constellation::domain::errors::CoreError;
use constellation::domain::models::config::{RetryConfig, SchedulerConfig};
use constellation::domain::models::constellation::{ConstellationState, TaskConstellation};
use constellation::domain::models::device::{Device, DeviceStatus};
use constellation::domain::models::task_star::{TaskStar, TaskStatus};
use constellation::domain::ports::device_link::{DeviceLink, TaskReplyFrame, TaskReplyStatus, TaskRequestFrame};
use constellation::services::device_registry::DeviceRegistry;
use constellation::services::event_bus::EventBus;
use constellation::services::orchestrator::Orchestrator;

fn bus() -> Arc<EventBus> {
    EventBus::new("test", Default::default())
}

fn fast_retry_config() -> RetryConfig {
    RetryConfig { default_max_retries: 3, backoff_initial_ms: 1, backoff_max_ms: 5 }
}

/// Never replies — stands in for a device mid-task when a round is
/// cancelled out from under it.
struct NeverReplies;

#[async_trait]
impl DeviceLink for NeverReplies {
    fn device_id(&self) -> &str {
        "A"
    }
    async fn send_task_request(&self, _frame: TaskRequestFrame) -> Result<(), CoreError> {
        Ok(())
    }
    async fn await_task_reply(&self, _task_id: &str, _timeout: Duration) -> Result<TaskReplyFrame, CoreError> {
        std::future::pending().await
    }
    async fn send_abort(&self, _task_id: &str) -> Result<(), CoreError> {
        Ok(())
    }
    fn is_connected(&self) -> bool {
        true
    }
}

/// Property 11: cancelling a round with a task RUNNING marks it CANCELLED
/// and the constellation CANCELLED, and the device it occupied is no
/// longer dispatch-eligible without a fresh register.
#[tokio::test]
async fn cancelling_mid_flight_cancels_running_tasks_and_quarantines_their_devices() {
    let mut c = TaskConstellation::new("c1", "s1");
    c.add_task(TaskStar::new("t1", "t1", "d").with_device("A")).unwrap();
    let constellation = Arc::new(RwLock::new(c));

    let event_bus = bus();
    let registry = Arc::new(DeviceRegistry::new(Arc::clone(&event_bus), chrono::Duration::seconds(60)));
    registry.register(Device::new("A", "linux", HashSet::new()), Arc::new(NeverReplies)).await;

    let orchestrator = Orchestrator::new(
        "session-1",
        Arc::clone(&constellation),
        Arc::clone(&registry),
        event_bus,
        SchedulerConfig { quiescence_window_ms: 500, task_timeout_seconds: 60, ..Default::default() },
        fast_retry_config(),
    );

    let run_handle = tokio::spawn(Arc::clone(&orchestrator).run());

    // Give the dispatch loop a moment to mark t1 RUNNING before cancelling.
    loop {
        if constellation.read().await.task("t1").unwrap().status == TaskStatus::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    orchestrator.cancel();
    run_handle.await.unwrap();

    let c = constellation.read().await;
    assert_eq!(c.task("t1").unwrap().status, TaskStatus::Cancelled);
    assert_eq!(c.state, ConstellationState::Cancelled);

    let device = registry.device_snapshot("A").await.unwrap();
    assert_ne!(device.status, DeviceStatus::Idle);
    assert!(!device.is_dispatch_eligible());
}

/// A device that never replies until `sweep_heartbeats` notices it has
/// lapsed — the orchestrator itself doesn't poll heartbeats, so this test
/// drives the sweep directly and feeds its result through the same
/// transport-failure path a real timeout would.
struct SilentLink;

#[async_trait]
impl DeviceLink for SilentLink {
    fn device_id(&self) -> &str {
        "A"
    }
    async fn send_task_request(&self, _frame: TaskRequestFrame) -> Result<(), CoreError> {
        Ok(())
    }
    async fn await_task_reply(&self, _task_id: &str, _timeout: Duration) -> Result<TaskReplyFrame, CoreError> {
        std::future::pending().await
    }
    async fn send_abort(&self, _task_id: &str) -> Result<(), CoreError> {
        Ok(())
    }
    fn is_connected(&self) -> bool {
        true
    }
}

/// Property 12: a device whose heartbeat lapses while a task is RUNNING on
/// it is reported by `sweep_heartbeats` as DISCONNECTED, with the task id
/// handed back so the caller can fail that task.
#[tokio::test]
async fn heartbeat_lapse_reports_the_running_task_for_failure() {
    let event_bus = bus();
    let registry = DeviceRegistry::new(Arc::clone(&event_bus), chrono::Duration::seconds(10));
    registry.register(Device::new("A", "linux", HashSet::new()), Arc::new(SilentLink)).await;
    registry.try_assign("A", "t1").await.unwrap();

    let later = chrono::Utc::now() + chrono::Duration::seconds(120);
    let lapsed = registry.sweep_heartbeats(later).await;
    assert_eq!(lapsed, vec![("A".to_string(), Some("t1".to_string()))]);

    let device = registry.device_snapshot("A").await.unwrap();
    assert_eq!(device.status, DeviceStatus::Disconnected);
    assert!(!device.is_dispatch_eligible());

    // A fresh heartbeat after the lapse does not retroactively un-disconnect
    // the device; only a new `register` clears it (spec §4.3).
    registry.heartbeat("A").await;
    let device = registry.device_snapshot("A").await.unwrap();
    assert_eq!(device.status, DeviceStatus::Disconnected);
}

/// End-to-end: feeding a heartbeat-lapse report through the orchestrator's
/// own timeout-handling path fails the task with kind `timeout` and leaves
/// the constellation FAILED, without ever touching a real wall-clock wait.
#[tokio::test]
async fn lapsed_device_task_is_failed_with_timeout_kind() {
    let mut c = TaskConstellation::new("c1", "s1");
    c.add_task(TaskStar::new("t1", "t1", "d").with_device("A").with_max_retries(0)).unwrap();
    let constellation = Arc::new(RwLock::new(c));

    let event_bus = bus();
    let mut rx = event_bus.subscribe();
    let registry = Arc::new(DeviceRegistry::new(Arc::clone(&event_bus), chrono::Duration::seconds(60)));
    registry.register(Device::new("A", "linux", HashSet::new()), Arc::new(SilentLink)).await;

    let orchestrator = Orchestrator::new(
        "session-1",
        Arc::clone(&constellation),
        Arc::clone(&registry),
        Arc::clone(&event_bus),
        SchedulerConfig { quiescence_window_ms: 30, task_timeout_seconds: 0, ..Default::default() },
        fast_retry_config(),
    );
    orchestrator.run().await;

    let c = constellation.read().await;
    assert_eq!(c.task("t1").unwrap().status, TaskStatus::Failed);
    assert_eq!(c.state, ConstellationState::Failed);

    let mut saw_timeout_kind = false;
    while let Ok(event) = rx.try_recv() {
        if let constellation::domain::models::event::EventPayload::TaskFailed { kind, .. } = event.payload {
            if kind == "timeout" {
                saw_timeout_kind = true;
            }
        }
    }
    assert!(saw_timeout_kind);
}
