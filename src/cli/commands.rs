//! Command handlers (spec §6 "CLI surface"): `--request` drives a single
//! round to completion and exits with its status code; `--interactive`
//! loops, running one round per line of stdin. Both wire the same
//! collaborators the way `main.rs` wires services in the teacher.

use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::domain::models::config::CoreConfig;
use crate::domain::models::device::Device;
use crate::domain::models::session::{Round, RoundStatus};
use crate::domain::ports::llm_port::PlannerResponse;
use crate::infrastructure::device_channel::{ChannelDeviceLink, Executor};
use crate::infrastructure::llm_stub::ScriptedLlm;
use crate::infrastructure::persistence::FileArtifactWriter;
use crate::services::device_registry::DeviceRegistry;
use crate::services::event_bus::{EventBus, EventBusConfig};
use crate::services::session::RoundDriver;

const SYSTEM_PROMPT: &str = "You are the planner for a device task constellation. \
Decompose the request into tasks assigned to available devices, wire their \
dependencies, and report FINISH once the constellation can make no further progress.";

/// A device executor that always reports success immediately — the
/// in-process stand-in `device_channel::ChannelDeviceLink` needs some
/// executor to drive, and a real one is out of scope (spec §1 Non-goals
/// exclude device-side executors). Combined with `--planner-script` (or
/// `process.planner_script_path`) to supply the planner's scripted turns,
/// this is enough to exercise `--request` end to end without a real device
/// or LLM attached; without a script the stub's turn queue is empty and
/// the round fails on its first planner turn.
fn echo_executor() -> Executor {
    Arc::new(|frame| {
        Ok(crate::domain::ports::device_link::TaskReplyFrame {
            task_id: frame.task_id,
            status: crate::domain::ports::device_link::TaskReplyStatus::Completed,
            result: Some(serde_json::json!({"echo": frame.description})),
            error: None,
            duration: 0.05,
            metrics: None,
        })
    })
}

async fn build_driver(config: &CoreConfig, session_id: &str) -> Result<RoundDriver> {
    let event_bus = EventBus::new("constellation-cli", EventBusConfig::default());
    let registry = Arc::new(DeviceRegistry::new(
        Arc::clone(&event_bus),
        chrono::Duration::seconds(config.transport.heartbeat_grace_seconds as i64),
    ));

    for entry in &config.registry.devices {
        if !entry.auto_connect {
            continue;
        }
        let device = Device::new(
            entry.device_id.clone(),
            "unknown",
            entry.capabilities.iter().cloned().collect::<HashSet<_>>(),
        );
        let link = ChannelDeviceLink::new(entry.device_id.clone(), echo_executor());
        registry.register(device, link).await;
    }

    let artifact_dir = std::path::PathBuf::from(&config.process.artifact_dir);
    tokio::fs::create_dir_all(&artifact_dir)
        .await
        .with_context(|| format!("creating artifact directory {}", artifact_dir.display()))?;
    let artifacts = Arc::new(FileArtifactWriter::create(artifact_dir, session_id).await?);

    let llm = Arc::new(ScriptedLlm::new(load_planner_script(config).await?));

    Ok(RoundDriver::new(
        llm,
        registry,
        event_bus,
        artifacts,
        config.scheduler.clone(),
        config.retries.clone(),
    ))
}

/// Loads the scripted planner turns named by `process.planner_script_path`,
/// if any — a JSON array of `PlannerResponse` replayed in order by
/// `ScriptedLlm`. Returns an empty queue (round fails on first turn) when
/// the config sets no path at all.
async fn load_planner_script(config: &CoreConfig) -> Result<Vec<PlannerResponse>> {
    let Some(path) = &config.process.planner_script_path else {
        return Ok(Vec::new());
    };
    let raw = tokio::fs::read_to_string(path).await.with_context(|| format!("reading planner script {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing planner script {path} as a JSON array of planner turns"))
}

/// Exit code for a round's terminal status (spec §6 CLI surface).
pub fn exit_code_for(round: &Round) -> i32 {
    match round.status {
        RoundStatus::Completed => 0,
        RoundStatus::Failed => match round.failure_kind.as_deref() {
            Some("budget_exhausted") => 2,
            Some("transport_error") => 3,
            _ => 1,
        },
        RoundStatus::Cancelled | RoundStatus::Running => 1,
    }
}

fn round_spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()));
    bar.enable_steady_tick(std::time::Duration::from_millis(100));
    bar.set_message("running round");
    bar
}

pub async fn handle_request(config: &CoreConfig, request: &str, json: bool) -> Result<i32> {
    let session_id = format!("session-{}", request.len());
    let driver = build_driver(config, &session_id).await?;
    let spinner = round_spinner();
    let round = driver
        .run_round(session_id.clone(), format!("{session_id}-constellation"), request.to_string(), SYSTEM_PROMPT)
        .await;
    spinner.finish_and_clear();
    render_round(&round, json);
    Ok(exit_code_for(&round))
}

pub async fn handle_interactive(config: &CoreConfig, json: bool) -> Result<i32> {
    println!("{}", style("constellation interactive session — one request per line, Ctrl-D to exit").bold());
    let stdin = io::stdin();
    let mut last_exit = 0;
    for (i, line) in stdin.lock().lines().enumerate() {
        let line = line.context("reading stdin")?;
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        let session_id = format!("session-{i}");
        let driver = build_driver(config, &session_id).await?;
        let spinner = round_spinner();
        let round = driver
            .run_round(session_id.clone(), format!("{session_id}-constellation"), request.to_string(), SYSTEM_PROMPT)
            .await;
        spinner.finish_and_clear();
        render_round(&round, json);
        last_exit = exit_code_for(&round);
        io::stdout().flush().ok();
    }
    Ok(last_exit)
}

fn render_round(round: &Round, json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(round).unwrap_or_default());
        return;
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL).set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Round").add_attribute(Attribute::Bold),
        Cell::new("Status").add_attribute(Attribute::Bold),
        Cell::new("Planner turns").add_attribute(Attribute::Bold),
        Cell::new("Failure kind").add_attribute(Attribute::Bold),
    ]);
    let status_cell = match round.status {
        RoundStatus::Completed => Cell::new("completed").fg(Color::Green),
        RoundStatus::Failed => Cell::new("failed").fg(Color::Red),
        RoundStatus::Cancelled => Cell::new("cancelled").fg(Color::Yellow),
        RoundStatus::Running => Cell::new("running").fg(Color::Blue),
    };
    table.add_row(vec![
        Cell::new(&round.round_id),
        status_cell,
        Cell::new(round.planner_turns),
        Cell::new(round.failure_kind.as_deref().unwrap_or("-")),
    ]);
    println!("{table}");

    if let Some(stats) = &round.final_stats {
        println!(
            "{} tasks, {} dependencies, critical path {:.1}, parallelism {:.2}",
            stats.total_tasks, stats.total_dependencies, stats.critical_path_length, stats.parallelism_ratio
        );
    }
}
