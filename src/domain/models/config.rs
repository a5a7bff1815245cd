//! Core configuration schema (spec §6 "Environment/configuration"). Plain
//! data; loading and layering lives in `infrastructure::config`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_max_planner_turns() -> u32 {
    20
}
fn default_round_wall_clock_seconds() -> u64 {
    900
}
fn default_task_timeout_seconds() -> u64 {
    120
}
fn default_quiescence_window_ms() -> u64 {
    250
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_initial_ms() -> u64 {
    200
}
fn default_backoff_max_ms() -> u64 {
    10_000
}
fn default_heartbeat_interval_seconds() -> u64 {
    15
}
fn default_heartbeat_grace_seconds() -> u64 {
    45
}
fn default_max_frame_bytes() -> usize {
    1_048_576
}

/// `max_planner_turns_per_round`, `round_wall_clock_seconds`,
/// `task_timeout_seconds`, `quiescence_window_ms` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_planner_turns")]
    pub max_planner_turns_per_round: u32,
    #[serde(default = "default_round_wall_clock_seconds")]
    pub round_wall_clock_seconds: u64,
    #[serde(default = "default_task_timeout_seconds")]
    pub task_timeout_seconds: u64,
    #[serde(default = "default_quiescence_window_ms")]
    pub quiescence_window_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_planner_turns_per_round: default_max_planner_turns(),
            round_wall_clock_seconds: default_round_wall_clock_seconds(),
            task_timeout_seconds: default_task_timeout_seconds(),
            quiescence_window_ms: default_quiescence_window_ms(),
        }
    }
}

/// `default_max_retries`, `backoff_initial_ms`, `backoff_max_ms` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// `heartbeat_interval_seconds`, `heartbeat_grace_seconds`,
/// `max_frame_bytes` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_heartbeat_grace_seconds")]
    pub heartbeat_grace_seconds: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            heartbeat_grace_seconds: default_heartbeat_grace_seconds(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// One entry of the static device registry bootstrap list (spec §6
/// "Registry: devices: [...]").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfigEntry {
    pub device_id: String,
    pub server_url: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub devices: Vec<DeviceConfigEntry>,
}

/// Process-level knobs that sit alongside the core contract keys (log
/// level/format, artifact output directory) — ambient, not part of the
/// distilled spec's component contracts, but needed to run the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
    /// Path to a JSON file holding the scripted `Vec<PlannerResponse>` the
    /// CLI binary's stub planner (`infrastructure::llm_stub::ScriptedLlm`)
    /// replays in order, one per planner turn — spec §9 runs the core under
    /// a stub rather than a real LLM. `None` leaves the queue empty, so the
    /// very first turn fails with `planner_parse_error`; see `--planner-script`.
    #[serde(default)]
    pub planner_script_path: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_artifact_dir() -> String {
    ".constellation/artifacts".to_string()
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            artifact_dir: default_artifact_dir(),
            planner_script_path: None,
        }
    }
}

/// The whole configuration surface read by the core (spec §6), loaded by
/// `infrastructure::config::ConfigLoader`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retries: RetryConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub process: ProcessConfig,
}
