//! End-to-end scenario coverage for spec §8's S2/S3/S5/S6, driven through
//! the public `Orchestrator`/`RoundDriver` surface rather than the
//! lower-level unit tests already living next to those modules.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;

use constellation::domain::errors::CoreError;
use constellation::domain::models::config::{RetryConfig, SchedulerConfig};
use constellation::domain::models::constellation::{ConstellationState, TaskConstellation};
use constellation::domain::models::device::Device;
use constellation::domain::models::task_star::{TaskStar, TaskStatus};
use constellation::domain::models::task_star_line::DependencyType;
use constellation::domain::ports::device_link::{DeviceLink, TaskReplyFrame, TaskReplyStatus, TaskRequestFrame};
use constellation::domain::ports::llm_port::{PlannerResponse, PlannerStatus, ToolCall};
use constellation::domain::ports::ArtifactWriter;
use constellation::infrastructure::ScriptedLlm;
use constellation::services::device_registry::DeviceRegistry;
use constellation::services::event_bus::EventBus;
use constellation::services::orchestrator::Orchestrator;
use constellation::services::session::RoundDriver;

fn bus() -> Arc<EventBus> {
    EventBus::new("test", Default::default())
}

fn fast_retry_config() -> RetryConfig {
    RetryConfig { default_max_retries: 3, backoff_initial_ms: 1, backoff_max_ms: 5 }
}

struct NullArtifacts;

#[async_trait]
impl ArtifactWriter for NullArtifacts {
    async fn append_log(&self, _entry: &constellation::domain::ports::ExecutionLogEntry) -> constellation::domain::errors::CoreResult<()> {
        Ok(())
    }
    async fn write_summary(&self, _summary: serde_json::Value) -> constellation::domain::errors::CoreResult<()> {
        Ok(())
    }
}

/// Always replies COMPLETED, optionally after sleeping `delay_ms` — used to
/// widen the window two concurrently-dispatched tasks are both RUNNING in.
struct DelayedCompletes {
    id: String,
    delay_ms: u64,
}

#[async_trait]
impl DeviceLink for DelayedCompletes {
    fn device_id(&self) -> &str {
        &self.id
    }
    async fn send_task_request(&self, _frame: TaskRequestFrame) -> Result<(), CoreError> {
        Ok(())
    }
    async fn await_task_reply(&self, task_id: &str, _timeout: Duration) -> Result<TaskReplyFrame, CoreError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        Ok(TaskReplyFrame {
            task_id: task_id.to_string(),
            status: TaskReplyStatus::Completed,
            result: Some(json!("ok")),
            error: None,
            duration: 0.01,
            metrics: None,
        })
    }
    async fn send_abort(&self, _task_id: &str) -> Result<(), CoreError> {
        Ok(())
    }
    fn is_connected(&self) -> bool {
        true
    }
}

/// S2: diamond `t1 -> {t2, t3} -> t4`, t2/t3 on distinct devices. Both must
/// be RUNNING at the same instant, t4 only starts once both have finished.
#[tokio::test]
async fn diamond_dispatches_t2_and_t3_in_parallel() {
    let mut constellation = TaskConstellation::new("c1", "s1");
    for (id, dev) in [("t1", "A"), ("t2", "B"), ("t3", "C"), ("t4", "A")] {
        constellation.add_task(TaskStar::new(id, id, "d").with_device(dev)).unwrap();
    }
    constellation.add_dependency("d1", "t1", "t2", DependencyType::Unconditional, None).unwrap();
    constellation.add_dependency("d2", "t1", "t3", DependencyType::Unconditional, None).unwrap();
    constellation.add_dependency("d3", "t2", "t4", DependencyType::Unconditional, None).unwrap();
    constellation.add_dependency("d4", "t3", "t4", DependencyType::Unconditional, None).unwrap();
    let constellation = Arc::new(RwLock::new(constellation));

    let event_bus = bus();
    let mut rx = event_bus.subscribe();
    let registry = Arc::new(DeviceRegistry::new(Arc::clone(&event_bus), chrono::Duration::seconds(60)));
    for (id, delay) in [("A", 0), ("B", 40), ("C", 40)] {
        registry
            .register(Device::new(id, "linux", HashSet::new()), Arc::new(DelayedCompletes { id: id.into(), delay_ms: delay }))
            .await;
    }

    let orchestrator = Orchestrator::new(
        "session-1",
        Arc::clone(&constellation),
        registry,
        Arc::clone(&event_bus),
        SchedulerConfig { quiescence_window_ms: 50, ..Default::default() },
        fast_retry_config(),
    );
    orchestrator.run().await;

    // Both t2 and t3 must have started before either of them finished —
    // that's the actual parallelism claim, not just that both ran at some
    // point (t1 finishing before either starts doesn't count).
    let diamond_middle = ["t2", "t3"];
    let mut timeline: Vec<(&str, String)> = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event.payload {
            constellation::domain::models::event::EventPayload::TaskStarted { task_id, .. }
                if diamond_middle.contains(&task_id.as_str()) =>
            {
                timeline.push(("started", task_id));
            }
            constellation::domain::models::event::EventPayload::TaskCompleted { task_id, .. }
                if diamond_middle.contains(&task_id.as_str()) =>
            {
                timeline.push(("completed", task_id));
            }
            _ => {}
        }
    }
    let first_completed = timeline.iter().position(|(kind, _)| *kind == "completed").unwrap_or(timeline.len());
    let starts_before_any_completion: HashSet<&str> =
        timeline[..first_completed].iter().filter(|(kind, _)| *kind == "started").map(|(_, id)| id.as_str()).collect();
    assert_eq!(starts_before_any_completion, HashSet::from(["t2", "t3"]));

    let c = constellation.read().await;
    assert_eq!(c.state, ConstellationState::Completed);
    for id in ["t1", "t2", "t3", "t4"] {
        assert_eq!(c.task(id).unwrap().status, TaskStatus::Completed);
    }
    let stats = c.get_statistics();
    assert_eq!(stats.max_width, 2);
    assert!(stats.parallelism_ratio > 1.0);
}

/// S3: a planner turn that would close a cycle is rejected wholesale and
/// the live constellation is left untouched, exercised through the editor
/// tool surface rather than the domain model directly.
#[tokio::test]
async fn cyclic_turn_is_rejected_and_constellation_is_untouched() {
    let mut c = TaskConstellation::new("c1", "s1");
    c.add_task(TaskStar::new("t1", "t1", "d")).unwrap();
    c.add_task(TaskStar::new("t2", "t2", "d")).unwrap();
    c.add_dependency("d1", "t1", "t2", DependencyType::Unconditional, None).unwrap();

    let registry = DeviceRegistry::new(bus(), chrono::Duration::seconds(30));
    let event_bus = bus();
    let before = serde_json::to_string(&c).unwrap();

    let calls = vec![ToolCall {
        tool: "add_dependency".into(),
        args: json!({"dep_id": "d2", "from": "t2", "to": "t1"}),
    }];
    let err = constellation::services::editor::apply_turn(&mut c, &registry, &event_bus, &calls).await.unwrap_err();
    assert_eq!(err.kind(), "cycle");
    assert_eq!(serde_json::to_string(&c).unwrap(), before);
}

/// A device that fails content-level for exactly one `task_id`, completing
/// cleanly for every other task — models a device that reports back "this
/// particular task needs something I don't have" (spec §8 S5).
struct FailsOneTask {
    id: String,
    failing_task_id: String,
}

#[async_trait]
impl DeviceLink for FailsOneTask {
    fn device_id(&self) -> &str {
        &self.id
    }
    async fn send_task_request(&self, _frame: TaskRequestFrame) -> Result<(), CoreError> {
        Ok(())
    }
    async fn await_task_reply(&self, task_id: &str, _timeout: Duration) -> Result<TaskReplyFrame, CoreError> {
        if task_id == self.failing_task_id {
            Ok(TaskReplyFrame {
                task_id: task_id.to_string(),
                status: TaskReplyStatus::Failed,
                result: None,
                error: Some("missing auth scope".to_string()),
                duration: 0.01,
                metrics: None,
            })
        } else {
            Ok(TaskReplyFrame {
                task_id: task_id.to_string(),
                status: TaskReplyStatus::Completed,
                result: Some(json!("ok")),
                error: None,
                duration: 0.01,
                metrics: None,
            })
        }
    }
    async fn send_abort(&self, _task_id: &str) -> Result<(), CoreError> {
        Ok(())
    }
    fn is_connected(&self) -> bool {
        true
    }
}

/// S5: a planner-driven repair. The first attempt at `t2` fails for lack
/// of an auth step; the planner removes it and replaces it with an auth
/// task plus a retried `t2`, and the round still reaches COMPLETED.
#[tokio::test]
async fn planner_repairs_a_failed_task_and_round_completes() {
    let event_bus = bus();
    let mut rx = event_bus.subscribe();
    let registry = Arc::new(DeviceRegistry::new(Arc::clone(&event_bus), chrono::Duration::seconds(60)));
    registry
        .register(Device::new("A", "linux", HashSet::new()), Arc::new(FailsOneTask { id: "A".into(), failing_task_id: "t2".into() }))
        .await;
    registry
        .register(
            Device::new("B", "linux", HashSet::new()),
            Arc::new(DelayedCompletes { id: "B".into(), delay_ms: 0 }),
        )
        .await;

    let llm = Arc::new(ScriptedLlm::new(vec![
        PlannerResponse {
            thought: "two tasks, t2 depends on t1".into(),
            response: "creating t1 and t2".into(),
            status: PlannerStatus::Continue,
            tool_calls: vec![
                ToolCall {
                    tool: "add_task".into(),
                    args: json!({"id": "t1", "name": "t1", "description": "d", "device": "B"}),
                },
                ToolCall {
                    tool: "add_task".into(),
                    args: json!({"id": "t2", "name": "t2", "description": "d", "device": "A"}),
                },
                ToolCall {
                    tool: "add_dependency".into(),
                    args: json!({"dep_id": "d1", "from": "t1", "to": "t2"}),
                },
            ],
        },
        PlannerResponse {
            thought: "t2 needs an auth step first".into(),
            response: "repairing".into(),
            status: PlannerStatus::Continue,
            tool_calls: vec![
                ToolCall { tool: "remove_task".into(), args: json!({"id": "t2"}) },
                ToolCall {
                    tool: "add_task".into(),
                    args: json!({"id": "t_auth", "name": "t_auth", "description": "d", "device": "B"}),
                },
                ToolCall {
                    tool: "add_task".into(),
                    args: json!({"id": "t2_retry", "name": "t2_retry", "description": "d", "device": "A"}),
                },
                ToolCall {
                    tool: "add_dependency".into(),
                    args: json!({"dep_id": "d_auth", "from": "t_auth", "to": "t2_retry"}),
                },
            ],
        },
        PlannerResponse {
            thought: "done".into(),
            response: "all set".into(),
            status: PlannerStatus::Finish,
            tool_calls: vec![],
        },
    ]));

    let driver = RoundDriver::new(
        llm,
        registry,
        Arc::clone(&event_bus),
        Arc::new(NullArtifacts),
        SchedulerConfig { round_wall_clock_seconds: 5, quiescence_window_ms: 30, ..Default::default() },
        fast_retry_config(),
    );
    let round = driver.run_round("r1", "c1", "do the auth-gated thing", "system").await;
    assert_eq!(round.status, constellation::domain::models::session::RoundStatus::Completed);

    let mut order = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match &event.payload {
            constellation::domain::models::event::EventPayload::TaskFailed { task_id, .. } if task_id == "t2" => {
                order.push("task.failed(t2)");
            }
            constellation::domain::models::event::EventPayload::ConstellationEdited { .. } => {
                order.push("constellation.edited");
            }
            constellation::domain::models::event::EventPayload::TaskCompleted { task_id, .. } if task_id == "t_auth" => {
                order.push("task.completed(t_auth)");
            }
            constellation::domain::models::event::EventPayload::TaskCompleted { task_id, .. } if task_id == "t2_retry" => {
                order.push("task.completed(t2_retry)");
            }
            _ => {}
        }
    }

    let failed_at = order.iter().position(|e| *e == "task.failed(t2)").expect("t2 failure observed");
    let edited_at = order
        .iter()
        .enumerate()
        .skip(failed_at)
        .find(|(_, e)| **e == "constellation.edited")
        .map(|(i, _)| i)
        .expect("a repair edit follows the failure");
    let auth_done_at = order
        .iter()
        .enumerate()
        .skip(edited_at)
        .find(|(_, e)| **e == "task.completed(t_auth)")
        .map(|(i, _)| i)
        .expect("t_auth completes after the repair");
    let retry_done_at = order
        .iter()
        .enumerate()
        .skip(auth_done_at)
        .find(|(_, e)| **e == "task.completed(t2_retry)")
        .map(|(i, _)| i)
        .expect("t2_retry completes after t_auth");
    assert!(failed_at < edited_at);
    assert!(edited_at < auth_done_at);
    assert!(auth_done_at < retry_done_at);
}

/// A device whose link can be disconnected mid-flight; `await_task_reply`
/// then behaves as if the connection dropped (models S6's concurrent
/// device loss without a real timeout wait).
struct DisconnectableLink {
    id: String,
    connected: AtomicBool,
}

#[async_trait]
impl DeviceLink for DisconnectableLink {
    fn device_id(&self) -> &str {
        &self.id
    }
    async fn send_task_request(&self, _frame: TaskRequestFrame) -> Result<(), CoreError> {
        Ok(())
    }
    async fn await_task_reply(&self, task_id: &str, _timeout: Duration) -> Result<TaskReplyFrame, CoreError> {
        // Give the other device's task a moment to start before this one
        // is severed, so both are genuinely in flight together.
        tokio::time::sleep(Duration::from_millis(20)).await;
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CoreError::TransportError("device link disconnected".to_string()));
        }
        Ok(TaskReplyFrame {
            task_id: task_id.to_string(),
            status: TaskReplyStatus::Completed,
            result: Some(json!("ok")),
            error: None,
            duration: 0.01,
            metrics: None,
        })
    }
    async fn send_abort(&self, _task_id: &str) -> Result<(), CoreError> {
        Ok(())
    }
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// S6: two tasks running on two devices; one device is lost mid-task. Only
/// the affected task fails — the other completes — and the lost device is
/// not handed back out until a fresh `register`.
#[tokio::test]
async fn losing_one_device_mid_flight_only_fails_its_own_task() {
    let mut c = TaskConstellation::new("c1", "s1");
    c.add_task(TaskStar::new("t1", "t1", "d").with_device("A").with_max_retries(0)).unwrap();
    c.add_task(TaskStar::new("t2", "t2", "d").with_device("B").with_max_retries(0)).unwrap();
    let constellation = Arc::new(RwLock::new(c));

    let event_bus = bus();
    let registry = Arc::new(DeviceRegistry::new(Arc::clone(&event_bus), chrono::Duration::seconds(60)));
    let lost_link = Arc::new(DisconnectableLink { id: "A".into(), connected: AtomicBool::new(true) });
    registry.register(Device::new("A", "linux", HashSet::new()), Arc::clone(&lost_link) as Arc<dyn DeviceLink>).await;
    registry
        .register(Device::new("B", "linux", HashSet::new()), Arc::new(DelayedCompletes { id: "B".into(), delay_ms: 30 }))
        .await;
    let registry_handle = Arc::clone(&registry);

    // Sever A shortly after dispatch, well before its reply would land.
    let severed = Arc::clone(&lost_link);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        severed.connected.store(false, Ordering::SeqCst);
    });

    let orchestrator = Orchestrator::new(
        "session-1",
        Arc::clone(&constellation),
        registry,
        event_bus,
        SchedulerConfig { quiescence_window_ms: 50, ..Default::default() },
        fast_retry_config(),
    );
    orchestrator.run().await;

    let c = constellation.read().await;
    assert_eq!(c.task("t1").unwrap().status, TaskStatus::Failed);
    assert_eq!(c.task("t2").unwrap().status, TaskStatus::Completed);
    assert_eq!(c.state, ConstellationState::Failed);
    drop(c);

    let device_a = registry_handle.device_snapshot("A").await.unwrap();
    assert!(!device_a.is_dispatch_eligible());
}
