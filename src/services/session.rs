//! Round driver (spec §4.6 "Session & round"): Notify round-started, run
//! the planner's CREATE turn, attach an orchestrator, and alternate
//! orchestrator passes with planner EDIT turns until the planner reports
//! FINISH/FAIL or either budget (turns, wall clock) is exhausted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::config::{RetryConfig, SchedulerConfig};
use crate::domain::models::constellation::TaskConstellation;
use crate::domain::models::event::EventPayload;
use crate::domain::models::session::{Round, RoundStatus};
use crate::domain::ports::llm_port::PlannerStatus;
use crate::domain::ports::{ArtifactWriter, ExecutionLogEntry, LlmPort};
use crate::services::device_registry::DeviceRegistry;
use crate::services::editor;
use crate::services::event_bus::EventBus;
use crate::services::orchestrator::Orchestrator;
use crate::services::planner_agent::{PlannerAgent, PlannerTurn};

/// Drives one Round end to end against a shared device registry and event
/// bus (both outlive individual rounds within a Session).
pub struct RoundDriver {
    llm: Arc<dyn LlmPort>,
    registry: Arc<DeviceRegistry>,
    event_bus: Arc<EventBus>,
    artifacts: Arc<dyn ArtifactWriter>,
    scheduler_config: SchedulerConfig,
    retry_config: RetryConfig,
}

impl RoundDriver {
    pub fn new(
        llm: Arc<dyn LlmPort>,
        registry: Arc<DeviceRegistry>,
        event_bus: Arc<EventBus>,
        artifacts: Arc<dyn ArtifactWriter>,
        scheduler_config: SchedulerConfig,
        retry_config: RetryConfig,
    ) -> Self {
        Self { llm, registry, event_bus, artifacts, scheduler_config, retry_config }
    }

    /// Runs a round to a terminal status (spec §4.6 steps a-c). Never
    /// panics on planner/orchestrator failure; every failure path finishes
    /// the `Round` with a `failure_kind` instead.
    pub async fn run_round(
        &self,
        round_id: impl Into<String>,
        constellation_id: impl Into<String>,
        request: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Round {
        let round_id = round_id.into();
        let constellation_id = constellation_id.into();
        let request = request.into();
        let system_prompt = system_prompt.into();

        let mut round = Round::start(round_id.clone(), constellation_id.clone(), request.clone());
        self.event_bus.publish(EventPayload::SessionStarted { session_id: round_id.clone() });
        self.event_bus.publish(EventPayload::RoundStarted { round_id: round_id.clone() });

        let constellation = Arc::new(RwLock::new(TaskConstellation::new(constellation_id, request)));
        let mut planner = PlannerAgent::new(Arc::clone(&self.llm), self.scheduler_config.max_planner_turns_per_round);

        let wall_clock = Duration::from_secs(self.scheduler_config.round_wall_clock_seconds);
        let outcome = timeout(
            wall_clock,
            self.drive(&mut round, &constellation, &mut planner, system_prompt),
        )
        .await;

        let stats = constellation.read().await.get_statistics();
        match outcome {
            Ok(Ok(())) => round.finish(RoundStatus::Completed, None, stats),
            Ok(Err(err)) => round.finish(RoundStatus::Failed, Some(err.kind().to_string()), stats),
            Err(_) => {
                warn!(round_id = %round.round_id, "round wall clock exhausted");
                round.finish(RoundStatus::Failed, Some("budget_exhausted".to_string()), stats);
            }
        }

        self.event_bus.publish(EventPayload::RoundEnded {
            round_id: round.round_id.clone(),
            status: round.status.as_str().to_string(),
        });
        self.event_bus.publish(EventPayload::SessionEnded { session_id: round.round_id.clone() });
        round
    }

    async fn drive(
        &self,
        round: &mut Round,
        constellation: &Arc<RwLock<TaskConstellation>>,
        planner: &mut PlannerAgent,
        system_prompt: String,
    ) -> CoreResult<()> {
        let registry_snapshot = self.registry_snapshot().await?;
        let turn = planner.create(system_prompt.clone(), registry_snapshot.clone()).await?;
        round.record_planner_turn();
        self.log_turn(round, "create", &turn.thought).await;
        self.publish_agent_turn(&round.round_id, &turn);

        if !self.apply_turn_with_retry(constellation, planner, &system_prompt, round, turn.tool_calls, turn.status).await? {
            return Ok(());
        }

        loop {
            let orchestrator = Orchestrator::new(
                round.round_id.clone(),
                Arc::clone(constellation),
                Arc::clone(&self.registry),
                Arc::clone(&self.event_bus),
                self.scheduler_config.clone(),
                self.retry_config.clone(),
            );
            orchestrator.run().await;

            let snapshot = serde_json::to_value(&*constellation.read().await)
                .map_err(|e| CoreError::PlannerParseError(e.to_string()))?;
            let registry_snapshot = self.registry_snapshot().await?;
            let turn = planner.edit(system_prompt.clone(), snapshot, registry_snapshot, None).await?;
            round.record_planner_turn();
            self.log_turn(round, "edit", &turn.thought).await;
            self.publish_agent_turn(&round.round_id, &turn);

            if !self
                .apply_turn_with_retry(constellation, planner, &system_prompt, round, turn.tool_calls, turn.status)
                .await?
            {
                return Ok(());
            }
        }
    }

    /// Applies one turn's tool calls, retrying a rejected turn once by
    /// feeding `prior_turn_error` back to the planner (spec §4.4 turn
    /// contract). Returns `Ok(true)` when the round should keep looping
    /// (another orchestrator pass is warranted), `Ok(false)` when the
    /// planner has already reached FINISH and `drive` should return.
    async fn apply_turn_with_retry(
        &self,
        constellation: &Arc<RwLock<TaskConstellation>>,
        planner: &mut PlannerAgent,
        system_prompt: &str,
        round: &mut Round,
        mut tool_calls: Vec<crate::domain::ports::ToolCall>,
        mut status: PlannerStatus,
    ) -> CoreResult<bool> {
        loop {
            if status == PlannerStatus::Fail {
                return Err(CoreError::PlannerParseError("planner reported FAIL".to_string()));
            }

            let mut c = constellation.write().await;
            match editor::apply_turn(&mut c, &self.registry, &self.event_bus, &tool_calls).await {
                Ok(_) => {
                    let constellation_id = c.constellation_id.clone();
                    drop(c);
                    if !tool_calls.is_empty() {
                        let summary = tool_calls.iter().map(|call| call.tool.as_str()).collect::<Vec<_>>().join(",");
                        self.event_bus.publish(EventPayload::ConstellationEdited { constellation_id, summary });
                    }
                    return Ok(status != PlannerStatus::Finish);
                }
                Err(err) => {
                    drop(c);
                    warn!(error = %err, "planner turn rejected, requesting a corrected turn");
                    let snapshot = serde_json::to_value(&*constellation.read().await)
                        .map_err(|e| CoreError::PlannerParseError(e.to_string()))?;
                    let registry_snapshot = self.registry_snapshot().await?;
                    let turn = planner
                        .edit(system_prompt.to_string(), snapshot, registry_snapshot, Some(err.to_string()))
                        .await?;
                    round.record_planner_turn();
                    self.log_turn(round, "edit-retry", &turn.thought).await;
                    self.publish_agent_turn(round.round_id.as_str(), &turn);
                    tool_calls = turn.tool_calls;
                    status = turn.status;
                }
            }
        }
    }

    /// Publishes a planner turn's `AgentResponse` plus one `AgentAction`
    /// per tool call it proposed (spec §4.5 taxonomy), regardless of
    /// whether the editor later accepts those calls.
    fn publish_agent_turn(&self, round_id: &str, turn: &PlannerTurn) {
        self.event_bus.publish(EventPayload::AgentResponse {
            round_id: round_id.to_string(),
            thought: turn.thought.clone(),
            response: turn.response.clone(),
        });
        for call in &turn.tool_calls {
            self.event_bus.publish(EventPayload::AgentAction {
                round_id: round_id.to_string(),
                tool: call.tool.clone(),
                args: call.args.clone(),
            });
        }
    }

    async fn registry_snapshot(&self) -> CoreResult<serde_json::Value> {
        let devices = self.registry.snapshot().await;
        serde_json::to_value(&devices).map_err(|e| CoreError::PlannerParseError(e.to_string()))
    }

    async fn log_turn(&self, round: &Round, kind: &str, thought: &str) {
        let entry = ExecutionLogEntry {
            sequence: round.planner_turns as u64,
            timestamp: chrono::Utc::now(),
            step: serde_json::json!({"kind": kind, "round_id": round.round_id, "thought": thought}),
        };
        if let Err(err) = self.artifacts.append_log(&entry).await {
            warn!(error = %err, "failed to append execution log entry");
        }
    }
}
