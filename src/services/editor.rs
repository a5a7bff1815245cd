//! Editor tool surface (spec §4.7). The sole path by which the planner
//! mutates a constellation: translates a typed `ToolCall` into one of the
//! constellation's mutation primitives, consulting the device registry
//! where the primitive itself cannot (device existence). A full turn is
//! applied atomically (spec §4.4 "Turn contract"): every call in the turn
//! runs against a scratch clone, and only commits to the live constellation
//! if every call in the sequence succeeds.

use serde::Deserialize;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::constellation::{ConstellationConfig, ConstellationError, TaskConstellation};
use crate::domain::models::event::EventPayload;
use crate::domain::models::task_star::{TaskPatch, TaskPriority, TaskStar};
use crate::domain::models::task_star_line::{DependencyType, TaskStarLine};
use crate::domain::ports::llm_port::ToolCall;
use crate::services::device_registry::DeviceRegistry;
use crate::services::event_bus::EventBus;

#[derive(Debug, Deserialize)]
struct AddTaskArgs {
    id: String,
    name: String,
    description: String,
    #[serde(default)]
    device: Option<String>,
    #[serde(default)]
    tips: Vec<String>,
    #[serde(default)]
    priority: Option<TaskPriority>,
    #[serde(default)]
    max_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RemoveTaskArgs {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UpdateTaskArgs {
    id: String,
    #[serde(flatten)]
    patch: TaskPatch,
}

#[derive(Debug, Deserialize)]
struct AddDependencyArgs {
    dep_id: String,
    from: String,
    to: String,
    #[serde(default)]
    dependency_type: DependencyType,
    #[serde(default)]
    desc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoveDependencyArgs {
    dep_id: String,
}

#[derive(Debug, Deserialize)]
struct UpdateDependencyArgs {
    dep_id: String,
    #[serde(default)]
    desc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BuildConstellationArgs {
    tasks: Vec<AddTaskArgs>,
    #[serde(default)]
    deps: Vec<AddDependencyArgs>,
    #[serde(default)]
    clear: bool,
}

fn parse<T: serde::de::DeserializeOwned>(args: &serde_json::Value) -> CoreResult<T> {
    serde_json::from_value(args.clone()).map_err(|e| CoreError::PlannerParseError(e.to_string()))
}

async fn validate_device(registry: &DeviceRegistry, device_id: &str) -> CoreResult<()> {
    if registry.device_snapshot(device_id).await.is_none() {
        return Err(CoreError::Constellation(ConstellationError::UnknownDevice(device_id.to_string())));
    }
    Ok(())
}

/// Applies one tool call to `constellation` in place, pushing the taxonomy
/// event(s) it produces onto `events` rather than publishing them directly
/// — `apply_one` runs against a scratch clone that may still be discarded
/// if a later call in the same turn fails (see `apply_turn`), so nothing it
/// does is real until the whole turn commits.
pub async fn apply_one(
    constellation: &mut TaskConstellation,
    registry: &DeviceRegistry,
    call: &ToolCall,
    events: &mut Vec<EventPayload>,
) -> CoreResult<()> {
    match call.tool.as_str() {
        "add_task" => {
            let args: AddTaskArgs = parse(&call.args)?;
            if let Some(device) = &args.device {
                validate_device(registry, device).await?;
            }
            let task_id = args.id.clone();
            let mut task = TaskStar::new(args.id, args.name, args.description).with_tips(args.tips);
            if let Some(device) = args.device {
                task = task.with_device(device);
            }
            if let Some(priority) = args.priority {
                task = task.with_priority(priority);
            }
            if let Some(max_retries) = args.max_retries {
                task = task.with_max_retries(max_retries);
            }
            constellation.add_task(task)?;
            events.push(EventPayload::TaskCreated { task_id });
            Ok(())
        }
        "remove_task" => {
            let args: RemoveTaskArgs = parse(&call.args)?;
            constellation.remove_task(&args.id)?;
            Ok(())
        }
        "update_task" => {
            let args: UpdateTaskArgs = parse(&call.args)?;
            if let Some(device) = &args.patch.target_device_id {
                validate_device(registry, device).await?;
            }
            constellation.update_task(&args.id, args.patch)?;
            Ok(())
        }
        "add_dependency" => {
            let args: AddDependencyArgs = parse(&call.args)?;
            constellation.add_dependency(args.dep_id.clone(), &args.from, &args.to, args.dependency_type, args.desc)?;
            events.push(EventPayload::DependencyAdded { dependency_id: args.dep_id, from: args.from, to: args.to });
            Ok(())
        }
        "remove_dependency" => {
            let args: RemoveDependencyArgs = parse(&call.args)?;
            constellation.remove_dependency(&args.dep_id)?;
            events.push(EventPayload::DependencyRemoved { dependency_id: args.dep_id });
            Ok(())
        }
        "update_dependency" => {
            let args: UpdateDependencyArgs = parse(&call.args)?;
            constellation.update_dependency(&args.dep_id, args.desc)?;
            events.push(EventPayload::DependencyUpdated { dependency_id: args.dep_id });
            Ok(())
        }
        "build_constellation" => {
            let args: BuildConstellationArgs = parse(&call.args)?;
            for task in &args.tasks {
                if let Some(device) = &task.device {
                    validate_device(registry, device).await?;
                }
            }
            let task_ids: Vec<String> = args.tasks.iter().map(|t| t.id.clone()).collect();
            let dep_infos: Vec<(String, String, String)> =
                args.deps.iter().map(|d| (d.dep_id.clone(), d.from.clone(), d.to.clone())).collect();
            let config = ConstellationConfig {
                tasks: args
                    .tasks
                    .into_iter()
                    .map(|a| {
                        let mut t = TaskStar::new(a.id, a.name, a.description).with_tips(a.tips);
                        if let Some(device) = a.device {
                            t = t.with_device(device);
                        }
                        if let Some(priority) = a.priority {
                            t = t.with_priority(priority);
                        }
                        if let Some(max_retries) = a.max_retries {
                            t = t.with_max_retries(max_retries);
                        }
                        t
                    })
                    .collect(),
                dependencies: args
                    .deps
                    .into_iter()
                    .map(|d| TaskStarLine::new(d.dep_id, d.from, d.to, d.dependency_type, d.desc))
                    .collect(),
            };
            let clear = args.clear;
            constellation.build_from_config(config, clear)?;
            if clear {
                events.push(EventPayload::ConstellationCreated { constellation_id: constellation.constellation_id.clone() });
            }
            events.extend(task_ids.into_iter().map(|task_id| EventPayload::TaskCreated { task_id }));
            events.extend(
                dep_infos.into_iter().map(|(dependency_id, from, to)| EventPayload::DependencyAdded { dependency_id, from, to }),
            );
            Ok(())
        }
        other => Err(CoreError::PlannerParseError(format!("unknown editor tool: {other}"))),
    }
}

/// Applies a full planner turn atomically (spec §4.4): every call runs
/// against a scratch clone; only on full success is the clone swapped in
/// for the live constellation, and only then are the turn's taxonomy
/// events published — a turn that fails partway produces no events at all.
/// Returns the serialized post-turn snapshot on success, or the first
/// rejection's error with the live constellation left untouched.
pub async fn apply_turn(
    constellation: &mut TaskConstellation,
    registry: &DeviceRegistry,
    event_bus: &EventBus,
    calls: &[ToolCall],
) -> CoreResult<serde_json::Value> {
    let mut scratch = constellation.clone();
    let mut events = Vec::new();
    for call in calls {
        apply_one(&mut scratch, registry, call, &mut events).await?;
    }
    *constellation = scratch;
    for event in events {
        event_bus.publish(event);
    }
    serde_json::to_value(&*constellation).map_err(|e| CoreError::PlannerParseError(e.to_string()))
}
