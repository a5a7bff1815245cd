//! Scripted `LlmPort` adapter (spec §9: "the core must run under a stub
//! that returns scripted turn responses" — this is that stub, promoted out
//! of test-only code so the scenario walkthroughs in spec §8 can be
//! reproduced against the real `RoundDriver`/`PlannerAgent` rather than a
//! throwaway test double). Grounded on the teacher's substrate adapters
//! (`infrastructure/substrates/registry.rs`): a small, swappable
//! implementation of a port trait, selected at wiring time instead of the
//! "real" one.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ports::llm_port::{LlmPort, PlannerRequest, PlannerResponse};

/// Replays a fixed sequence of `PlannerResponse`s, one per `plan()` call,
/// and records every request it was given for post-hoc assertions. Turn
/// `n` of a scenario corresponds to `responses[n]`; exhausting the script
/// is a test-harness bug, not a runtime condition, so it panics rather
/// than returning `CoreError`.
pub struct ScriptedLlm {
    responses: Mutex<std::collections::VecDeque<PlannerResponse>>,
    requests: Mutex<Vec<PlannerRequest>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<PlannerResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request this stub has been asked to `plan`, in call order —
    /// useful for asserting a scenario fed the planner the snapshot it
    /// expected (e.g. `prior_turn_error` set after a rejected turn).
    pub fn requests(&self) -> Vec<PlannerRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmPort for ScriptedLlm {
    async fn plan(&self, request: PlannerRequest) -> CoreResult<PlannerResponse> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CoreError::PlannerParseError("scripted LLM has no more responses queued".to_string()))
    }
}
