//! Planner's LLM port (spec §6 "Planner tool surface", §9 "LLM-as-part-of-
//! the-runtime": the LLM is an external port with a typed request/response
//! schema, and the core must run under a stub that returns scripted turn
//! responses).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::CoreResult;

/// One planner turn's input (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerRequest {
    pub system_prompt: String,
    pub constellation_snapshot: serde_json::Value,
    pub registry_snapshot: serde_json::Value,
    pub prior_turn_error: Option<String>,
}

/// Planner decision at the end of a turn (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlannerStatus {
    Continue,
    Finish,
    Fail,
}

/// One editor tool invocation requested by the planner (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub args: serde_json::Value,
}

/// One planner turn's output (spec §6: `{thought, response, status,
/// tool_calls}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerResponse {
    pub thought: String,
    pub response: String,
    pub status: PlannerStatus,
    pub tool_calls: Vec<ToolCall>,
}

/// The planner's LLM call (spec §9: treat the LLM as an external port).
/// `plan` returns `CoreError::PlannerParseError` when the underlying
/// response cannot be parsed into `PlannerResponse` or reports a status
/// outside {CONTINUE,FINISH,FAIL} — counted against the turn budget per
/// spec §7.
#[async_trait]
pub trait LlmPort: Send + Sync {
    async fn plan(&self, request: PlannerRequest) -> CoreResult<PlannerResponse>;
}
