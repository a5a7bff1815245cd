//! Core error types (spec §7 "Error Handling Design"). `ConstellationError`
//! (in `domain::models::constellation`) covers the editor tool surface's
//! `invariant_violation`/`unknown_entity` kinds; `CoreError` wraps that and
//! adds the kinds that surface above the constellation model — orchestrator,
//! transport, and session level — mirroring the teacher's split between a
//! single domain error (`domain/errors.rs`) and topic-scoped error enums
//! (`domain/error.rs`).

use thiserror::Error;

use super::models::constellation::ConstellationError;

/// Errors observable anywhere above the constellation model (spec §7).
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error(transparent)]
    Constellation(#[from] ConstellationError),

    #[error("device {device_id} unavailable at dispatch: {reason}")]
    DeviceUnavailable { device_id: String, reason: String },

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("device reported failure: {0}")]
    DeviceReportedFailure(String),

    #[error("planner parse error: {0}")]
    PlannerParseError(String),

    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("cancelled")]
    Cancelled,

    #[error("artifact storage error: {0}")]
    Io(String),
}

impl CoreError {
    /// Machine-readable error kind, matching spec §7's table verbatim.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Constellation(e) => e.kind(),
            Self::DeviceUnavailable { .. } => "device_unavailable",
            Self::TransportError(_) => "transport_error",
            Self::Timeout(_) => "timeout",
            Self::DeviceReportedFailure(_) => "device_reported_failure",
            Self::PlannerParseError(_) => "planner_parse_error",
            Self::BudgetExhausted(_) => "budget_exhausted",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io_error",
        }
    }

    /// Whether the executor's retry policy applies (spec §4.2 "Retry
    /// policy": transport failures are retried up to `max_retries`;
    /// timeouts and content-level device failures are not).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportError(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
