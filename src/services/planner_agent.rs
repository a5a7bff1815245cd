//! Planner agent (spec §4.4): the FSM driving a single round's constellation
//! from nothing (CREATE) through whatever EDIT turns the round needs, until
//! it reports FINISH or FAIL. The planner only ever speaks through the
//! editor tool surface (`services::editor`); it never touches a
//! `TaskConstellation` directly.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ports::llm_port::{LlmPort, PlannerRequest, PlannerStatus, ToolCall};

/// States named after spec §4.4's "Modes": `Init` is the pre-CREATE state,
/// `ExecuteWait` is held by the caller (the session/round driver) between
/// planner turns while the orchestrator runs, not by this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerState {
    Init,
    Create,
    Edit,
    Finish,
    Fail,
}

/// Outcome of a single planner turn (CREATE or EDIT): the tool calls to
/// apply, plus the planner's own account of why it stopped there.
#[derive(Debug, Clone)]
pub struct PlannerTurn {
    pub thought: String,
    pub response: String,
    pub status: PlannerStatus,
    pub tool_calls: Vec<ToolCall>,
}

/// Drives the CREATE/EDIT turn cycle against an `LlmPort`, enforcing the
/// round's turn budget (spec §4.4 "Safety guards": `max_turns` exceeded ->
/// FAIL with `budget_exhausted`).
pub struct PlannerAgent {
    llm: Arc<dyn LlmPort>,
    max_turns: u32,
    turns_taken: u32,
    state: PlannerState,
}

impl PlannerAgent {
    pub fn new(llm: Arc<dyn LlmPort>, max_turns: u32) -> Self {
        Self { llm, max_turns, turns_taken: 0, state: PlannerState::Init }
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    pub fn turns_taken(&self) -> u32 {
        self.turns_taken
    }

    fn budget_remaining(&self) -> bool {
        self.turns_taken < self.max_turns
    }

    /// CREATE mode (spec §4.4): the planner's first turn for a round.
    /// Expects a single `build_constellation` tool call on success; any
    /// other shape is passed through as the turn's `tool_calls` unchanged,
    /// since validating tool semantics is the editor's job, not this one's.
    pub async fn create(&mut self, system_prompt: String, registry_snapshot: serde_json::Value) -> CoreResult<PlannerTurn> {
        if !self.budget_remaining() {
            self.state = PlannerState::Fail;
            return Err(CoreError::BudgetExhausted("planner turn budget exhausted before CREATE".into()));
        }
        let request = PlannerRequest {
            system_prompt,
            constellation_snapshot: json!({}),
            registry_snapshot,
            prior_turn_error: None,
        };
        let turn = self.run_turn(request).await?;
        self.state = match turn.status {
            PlannerStatus::Continue => PlannerState::Edit,
            PlannerStatus::Finish => PlannerState::Finish,
            PlannerStatus::Fail => PlannerState::Fail,
        };
        Ok(turn)
    }

    /// EDIT mode (spec §4.4): every subsequent turn, fed the live
    /// constellation/registry snapshots and the previous turn's rejection
    /// (if any), so the planner can course-correct rather than repeat it.
    pub async fn edit(
        &mut self,
        system_prompt: String,
        constellation_snapshot: serde_json::Value,
        registry_snapshot: serde_json::Value,
        prior_turn_error: Option<String>,
    ) -> CoreResult<PlannerTurn> {
        if !self.budget_remaining() {
            self.state = PlannerState::Fail;
            return Err(CoreError::BudgetExhausted(format!(
                "planner turn budget ({}) exhausted",
                self.max_turns
            )));
        }
        let request = PlannerRequest {
            system_prompt,
            constellation_snapshot,
            registry_snapshot,
            prior_turn_error,
        };
        let turn = self.run_turn(request).await?;
        self.state = match turn.status {
            PlannerStatus::Continue => PlannerState::Edit,
            PlannerStatus::Finish => PlannerState::Finish,
            PlannerStatus::Fail => PlannerState::Fail,
        };
        Ok(turn)
    }

    async fn run_turn(&mut self, request: PlannerRequest) -> CoreResult<PlannerTurn> {
        self.turns_taken += 1;
        let response = self.llm.plan(request).await?;
        info!(turn = self.turns_taken, status = ?response.status, "planner turn");
        if response.status == PlannerStatus::Fail {
            warn!(thought = %response.thought, "planner reported FAIL");
        }
        Ok(PlannerTurn {
            thought: response.thought,
            response: response.response,
            status: response.status,
            tool_calls: response.tool_calls,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, PlannerState::Finish | PlannerState::Fail)
    }
}
