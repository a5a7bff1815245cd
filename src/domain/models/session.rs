//! Session & Round domain model — top-level lifecycle bookkeeping (spec
//! §4.6). The round *loop* itself lives in `services::session`; this module
//! only holds the data each round accumulates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::constellation::ConstellationStats;

/// Outcome of a single Round (spec §4.6, §7 "User-visible failure").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One planner-driven attempt to satisfy a user request (GLOSSARY "Round").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub round_id: String,
    pub constellation_id: String,
    pub request: String,
    pub status: RoundStatus,
    pub planner_turns: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// First FAIL-causing error kind, if any (spec §7).
    pub failure_kind: Option<String>,
    pub final_stats: Option<ConstellationStats>,
}

impl Round {
    pub fn start(round_id: impl Into<String>, constellation_id: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            round_id: round_id.into(),
            constellation_id: constellation_id.into(),
            request: request.into(),
            status: RoundStatus::Running,
            planner_turns: 0,
            started_at: Utc::now(),
            ended_at: None,
            failure_kind: None,
            final_stats: None,
        }
    }

    pub fn record_planner_turn(&mut self) {
        self.planner_turns += 1;
    }

    pub fn finish(&mut self, status: RoundStatus, failure_kind: Option<String>, stats: ConstellationStats) {
        self.status = status;
        self.failure_kind = failure_kind;
        self.final_stats = Some(stats);
        self.ended_at = Some(Utc::now());
    }

    pub fn execution_time(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end.signed_duration_since(self.started_at))
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, RoundStatus::Running)
    }
}

/// Top-level interaction holding the device registry handle, event bus, and
/// a history of Rounds (GLOSSARY "Session").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub session_name: String,
    pub rounds: Vec<Round>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, session_name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            session_name: session_name.into(),
            rounds: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn push_round(&mut self, round: Round) {
        self.rounds.push(round);
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.last()
    }

    pub fn current_round_mut(&mut self) -> Option<&mut Round> {
        self.rounds.last_mut()
    }

    pub fn total_execution_time(&self) -> chrono::Duration {
        self.rounds
            .iter()
            .filter_map(Round::execution_time)
            .fold(chrono::Duration::zero(), |acc, d| acc + d)
    }
}
