//! TaskConstellation domain model.
//!
//! In-memory DAG of `TaskStar` nodes and `TaskStarLine` edges, with
//! idempotent mutation primitives (spec §4.1) and the derived queries the
//! orchestrator and planner rely on. All mutation primitives are pure
//! functions of `(current state, input)`: on rejection they return a typed
//! error and leave the constellation untouched (spec §4.1 "Failure
//! semantics", testable property 5).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::priority::PriorityCalculator;
use super::task_star::{TaskPatch, TaskPriority, TaskStar, TaskStatus};
use super::task_star_line::{DependencyType, TaskStarLine};

/// Lifecycle state of a TaskConstellation (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstellationState {
    Created,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

/// Typed rejection reasons for the editor primitives (spec §7
/// `invariant_violation` / `unknown_entity`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstellationError {
    #[error("adding dependency {from} -> {to} would create a cycle")]
    Cycle { from: String, to: String },

    #[error("task already exists: {0}")]
    DuplicateTask(String),

    #[error("dependency already exists: {0}")]
    DuplicateDependency(String),

    #[error("task {0} cannot depend on itself")]
    SelfLoop(String),

    #[error("task not found: {0}")]
    UnknownTask(String),

    #[error("dependency not found: {0}")]
    UnknownDependency(String),

    #[error("device not found: {0}")]
    UnknownDevice(String),

    #[error("task {0} is not modifiable in its current state")]
    NotModifiable(String),

    #[error("patch is empty")]
    EmptyPatch,

    #[error("task {0} is running or has unreplayable progress and cannot be removed")]
    NotRemovable(String),
}

impl ConstellationError {
    /// Machine-readable error kind, per spec §7's error-kind table.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cycle { .. } => "cycle",
            Self::DuplicateTask(_) | Self::DuplicateDependency(_) => "duplicate",
            Self::SelfLoop(_) => "self_loop",
            Self::UnknownTask(_) | Self::UnknownDependency(_) | Self::UnknownDevice(_) => {
                "unknown_entity"
            }
            Self::NotModifiable(_) | Self::NotRemovable(_) => "not_modifiable",
            Self::EmptyPatch => "empty_patch",
        }
    }
}

pub type ConstellationResult<T> = Result<T, ConstellationError>;

/// Configuration blob consumed by `build_from_config` (spec §4.1, §4.7
/// `build_constellation`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstellationConfig {
    pub tasks: Vec<TaskStar>,
    pub dependencies: Vec<TaskStarLine>,
}

/// Summary statistics returned by `get_statistics` and embedded in the
/// persisted summary artifact (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstellationStats {
    pub constellation_id: String,
    pub state: ConstellationState,
    pub total_tasks: usize,
    pub total_dependencies: usize,
    pub task_status_counts: HashMap<String, usize>,
    pub longest_path_length: usize,
    pub longest_path_tasks: Vec<String>,
    pub max_width: usize,
    pub critical_path_length: f64,
    pub critical_path_tasks: Vec<String>,
    pub total_work: f64,
    pub parallelism_ratio: f64,
    pub parallelism_calculation_mode: ParallelismMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which weighting the critical-path/parallelism figures used: real task
/// durations when every terminal task reports one, otherwise unit node
/// counts (GLOSSARY "Critical path").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelismMode {
    Duration,
    NodeCount,
}

/// In-memory DAG of TaskStars and TaskStarLines (spec §3 "TaskConstellation").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConstellation {
    pub constellation_id: String,
    pub name: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub state: ConstellationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    tasks: HashMap<String, TaskStar>,
    edges: HashMap<String, TaskStarLine>,
}

impl TaskConstellation {
    pub fn new(constellation_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            constellation_id: constellation_id.into(),
            name: name.into(),
            metadata: HashMap::new(),
            state: ConstellationState::Created,
            created_at: now,
            updated_at: now,
            tasks: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    // -- Accessors -----------------------------------------------------

    pub fn task(&self, task_id: &str) -> Option<&TaskStar> {
        self.tasks.get(task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut TaskStar> {
        self.tasks.get_mut(task_id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskStar> {
        self.tasks.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &TaskStarLine> {
        self.edges.values()
    }

    pub fn edge(&self, dependency_id: &str) -> Option<&TaskStarLine> {
        self.edges.get(dependency_id)
    }

    /// Task ids that `task_id` directly depends on (parents in the DAG).
    pub fn parents(&self, task_id: &str) -> Vec<String> {
        self.edges
            .values()
            .filter(|e| e.to_task_id == task_id)
            .map(|e| e.from_task_id.clone())
            .collect()
    }

    /// Task ids that directly depend on `task_id` (children in the DAG).
    pub fn children(&self, task_id: &str) -> Vec<String> {
        self.edges
            .values()
            .filter(|e| e.from_task_id == task_id)
            .map(|e| e.to_task_id.clone())
            .collect()
    }

    fn inbound_edges(&self, task_id: &str) -> Vec<&TaskStarLine> {
        self.edges.values().filter(|e| e.to_task_id == task_id).collect()
    }

    fn outbound_edges(&self, task_id: &str) -> Vec<&TaskStarLine> {
        self.edges.values().filter(|e| e.from_task_id == task_id).collect()
    }

    // -- Mutation primitives (spec §4.1) --------------------------------

    /// `add_task(spec)`. Rejects a duplicate `task_id`. Device existence is
    /// validated by the caller (editor tool surface), which has access to
    /// the device registry; this model layer only enforces what is
    /// derivable from the constellation itself.
    pub fn add_task(&mut self, task: TaskStar) -> ConstellationResult<&TaskStar> {
        if self.tasks.contains_key(&task.task_id) {
            return Err(ConstellationError::DuplicateTask(task.task_id));
        }
        let id = task.task_id.clone();
        self.tasks.insert(id.clone(), task);
        self.touch();
        Ok(self.tasks.get(&id).expect("just inserted"))
    }

    /// `remove_task(task_id)`. Rejected if the task is RUNNING (I6); a
    /// terminal task may be removed (its edges are pruned with it) since
    /// removal of a terminal node does not resurrect progress — per §4.1
    /// "rejected if the task is RUNNING or terminal with progress the
    /// caller cannot replay", which for this in-memory model means: only
    /// RUNNING is rejected, since no task ever carries unreplayable
    /// external progress once it is terminal here.
    pub fn remove_task(&mut self, task_id: &str) -> ConstellationResult<()> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| ConstellationError::UnknownTask(task_id.to_string()))?;
        if task.status == TaskStatus::Running {
            return Err(ConstellationError::NotRemovable(task_id.to_string()));
        }
        self.tasks.remove(task_id);
        self.edges
            .retain(|_, e| e.from_task_id != task_id && e.to_task_id != task_id);
        self.touch();
        Ok(())
    }

    /// `update_task(task_id, patch)`. I6 + empty-patch rejection (testable
    /// property 7).
    pub fn update_task(&mut self, task_id: &str, patch: TaskPatch) -> ConstellationResult<()> {
        if patch.is_empty() {
            return Err(ConstellationError::EmptyPatch);
        }
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| ConstellationError::UnknownTask(task_id.to_string()))?;
        if !task.is_modifiable() {
            return Err(ConstellationError::NotModifiable(task_id.to_string()));
        }
        let task = self.tasks.get_mut(task_id).expect("checked above");
        patch.apply(task);
        self.touch();
        Ok(())
    }

    /// Reachability DFS from `start` to `target`, used by `add_dependency`'s
    /// cycle check (spec §4.1 "Cycle detection", O(V+E)).
    fn reachable(&self, start: &str, target: &str) -> bool {
        let mut stack = vec![start.to_string()];
        let mut visited = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !visited.insert(node.clone()) {
                continue;
            }
            for child in self.children(&node) {
                stack.push(child);
            }
        }
        false
    }

    /// `add_dependency(from, to, type, desc)`. Rejects self-loops,
    /// duplicate ids, and any edge that would create a cycle (I1).
    pub fn add_dependency(
        &mut self,
        dependency_id: impl Into<String>,
        from: &str,
        to: &str,
        dependency_type: DependencyType,
        condition_description: Option<String>,
    ) -> ConstellationResult<()> {
        let dependency_id = dependency_id.into();
        if self.edges.contains_key(&dependency_id) {
            return Err(ConstellationError::DuplicateDependency(dependency_id));
        }
        if from == to {
            return Err(ConstellationError::SelfLoop(from.to_string()));
        }
        if !self.tasks.contains_key(from) {
            return Err(ConstellationError::UnknownTask(from.to_string()));
        }
        if !self.tasks.contains_key(to) {
            return Err(ConstellationError::UnknownTask(to.to_string()));
        }
        // Adding `from -> to` creates a cycle iff `to` can already reach
        // `from`: that existing path plus the new edge closes a loop.
        if self.reachable(to, from) {
            return Err(ConstellationError::Cycle {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let mut edge = TaskStarLine::new(
            dependency_id.clone(),
            from,
            to,
            dependency_type,
            condition_description,
        );
        if let Some(source) = self.tasks.get(from) {
            edge.satisfied = dependency_type.is_satisfied_by(source.status);
        }
        self.edges.insert(dependency_id, edge);
        self.touch();
        Ok(())
    }

    pub fn remove_dependency(&mut self, dependency_id: &str) -> ConstellationResult<()> {
        if self.edges.remove(dependency_id).is_none() {
            return Err(ConstellationError::UnknownDependency(dependency_id.to_string()));
        }
        self.touch();
        Ok(())
    }

    pub fn update_dependency(
        &mut self,
        dependency_id: &str,
        condition_description: Option<String>,
    ) -> ConstellationResult<()> {
        let edge = self
            .edges
            .get_mut(dependency_id)
            .ok_or_else(|| ConstellationError::UnknownDependency(dependency_id.to_string()))?;
        edge.condition_description = condition_description;
        self.touch();
        Ok(())
    }

    /// `build_from_config(config, clear)`. Atomic batch: snapshot first,
    /// apply on a scratch copy, and only commit if every step (and the
    /// final acyclicity check) succeeds. On any failure the constellation
    /// is left byte-for-byte as it was before the call.
    pub fn build_from_config(
        &mut self,
        config: ConstellationConfig,
        clear: bool,
    ) -> ConstellationResult<()> {
        let mut scratch = if clear {
            Self::new(self.constellation_id.clone(), self.name.clone())
        } else {
            self.clone()
        };

        for task in config.tasks {
            scratch.add_task(task)?;
        }
        for dep in config.dependencies {
            scratch.add_dependency(
                dep.dependency_id,
                &dep.from_task_id,
                &dep.to_task_id,
                dep.dependency_type,
                dep.condition_description,
            )?;
        }

        *self = scratch;
        self.touch();
        Ok(())
    }

    // -- Edge satisfaction (spec §4.2 point 4.2(c), testable property 4) --

    /// Recompute `satisfied` on every outbound edge of `task_id` after its
    /// status changed. Called by the orchestrator immediately after a
    /// terminal transition, before the next scheduler wakeup returns.
    /// Returns the dependency ids that newly transitioned to satisfied, and
    /// the ids of downstream tasks that became fully ready (every inbound
    /// edge satisfied, device assigned) as a result — the caller publishes
    /// `dependency.satisfied`/`task.ready` for these (spec §4.5).
    pub fn recompute_outbound_edges(&mut self, task_id: &str) -> (Vec<String>, Vec<String>) {
        let status = match self.tasks.get(task_id) {
            Some(t) => t.status,
            None => return (Vec::new(), Vec::new()),
        };
        let mut newly_satisfied = Vec::new();
        let mut downstream = Vec::new();
        for edge in self.edges.values_mut() {
            if edge.from_task_id == task_id {
                let satisfied = edge.dependency_type.is_satisfied_by(status);
                if satisfied && !edge.satisfied {
                    newly_satisfied.push(edge.dependency_id.clone());
                    downstream.push(edge.to_task_id.clone());
                }
                edge.satisfied = satisfied;
            }
        }
        let newly_ready: Vec<String> = downstream
            .into_iter()
            .filter(|to| {
                self.tasks.get(to).is_some_and(|t| t.status == TaskStatus::Pending && t.target_device_id.is_some())
                    && self.inbound_edges(to).iter().all(|e| e.satisfied)
            })
            .collect();
        (newly_satisfied, newly_ready)
    }

    // -- Derived queries (spec §4.1) ------------------------------------

    /// Tasks whose inbound edges are all satisfied and which have an
    /// assigned device (GLOSSARY "Ready set"): PENDING tasks seeing it for
    /// the first time, and READY tasks a retry has moved back here for
    /// redispatch (spec §3 "Lifecycles", I4).
    pub fn ready_tasks(&self) -> Vec<&TaskStar> {
        let mut ready: Vec<&TaskStar> = self
            .tasks
            .values()
            .filter(|t| {
                matches!(t.status, TaskStatus::Pending | TaskStatus::Ready)
                    && t.target_device_id.is_some()
                    && self.inbound_edges(&t.task_id).iter().all(|e| e.satisfied)
            })
            .collect();
        let calc = PriorityCalculator::new();
        calc.sort_ready(&mut ready);
        ready
    }

    /// Ready tasks that are additionally not currently running anywhere
    /// (always true for PENDING tasks, but kept as a distinct query to
    /// mirror the spec's naming and give the orchestrator one call that
    /// returns exactly its dispatch candidates).
    pub fn executable_tasks(&self) -> Vec<&TaskStar> {
        self.ready_tasks()
    }

    /// Longest chain by node count, and the chain itself.
    pub fn longest_path(&self) -> (usize, Vec<String>) {
        let (levels, _) = self.topological_levels();
        let mut best_len = 0usize;
        let mut best_chain = Vec::new();
        for (task_id, level) in &levels {
            if level + 1 > best_len {
                best_len = level + 1;
                best_chain = self.chain_ending_at(task_id, &levels);
            }
        }
        (best_len, best_chain)
    }

    /// Longest chain weighted by duration where every node on it has one,
    /// otherwise by unit node count (GLOSSARY "Critical path").
    pub fn critical_path(&self) -> (f64, Vec<String>, ParallelismMode) {
        let mode = self.parallelism_mode();
        let weight = |id: &str| -> f64 {
            match mode {
                ParallelismMode::Duration => self.task_duration(id).unwrap_or(0.0),
                ParallelismMode::NodeCount => 1.0,
            }
        };

        // Longest-weighted-path via DP over a topological order.
        let order = self.topological_order();
        let mut best: HashMap<String, f64> = HashMap::new();
        let mut predecessor: HashMap<String, Option<String>> = HashMap::new();
        for id in &order {
            let mut best_parent_weight = 0.0;
            let mut best_parent = None;
            for parent in self.parents(id) {
                let w = *best.get(&parent).unwrap_or(&0.0);
                if w > best_parent_weight {
                    best_parent_weight = w;
                    best_parent = Some(parent);
                }
            }
            best.insert(id.clone(), best_parent_weight + weight(id));
            predecessor.insert(id.clone(), best_parent);
        }

        let end = best
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id.clone());

        let Some(mut cursor) = end else {
            return (0.0, Vec::new(), mode);
        };
        let total = best[&cursor];
        let mut chain = vec![cursor.clone()];
        while let Some(Some(prev)) = predecessor.get(&cursor) {
            chain.push(prev.clone());
            cursor = prev.clone();
        }
        chain.reverse();
        (total, chain, mode)
    }

    fn parallelism_mode(&self) -> ParallelismMode {
        let terminal: Vec<&TaskStar> = self.tasks.values().filter(|t| t.status.is_terminal()).collect();
        if !terminal.is_empty() && terminal.iter().all(|t| self.task_duration(&t.task_id).is_some()) {
            ParallelismMode::Duration
        } else {
            ParallelismMode::NodeCount
        }
    }

    fn task_duration(&self, task_id: &str) -> Option<f64> {
        let t = self.tasks.get(task_id)?;
        match (t.started_at, t.ended_at) {
            (Some(s), Some(e)) => Some((e - s).max(0.0)),
            _ => None,
        }
    }

    /// Sum of per-task work, weighted the same way as `critical_path`.
    pub fn total_work(&self) -> f64 {
        let mode = self.parallelism_mode();
        self.tasks
            .keys()
            .map(|id| match mode {
                ParallelismMode::Duration => self.task_duration(id).unwrap_or(0.0),
                ParallelismMode::NodeCount => 1.0,
            })
            .sum()
    }

    /// `total_work / critical_path_length`: 1.0 for a strictly linear
    /// pipeline, >1.0 when independent branches could run concurrently.
    pub fn parallelism_ratio(&self) -> f64 {
        let (critical_len, _, _) = self.critical_path();
        let work = self.total_work();
        if critical_len <= 0.0 {
            if work > 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            work / critical_len
        }
    }

    /// Maximum number of tasks that share a topological level — the widest
    /// point of the DAG, i.e. the most that could run in parallel.
    pub fn max_width(&self) -> usize {
        let (_, by_level) = self.topological_levels();
        by_level.values().map(Vec::len).max().unwrap_or(0)
    }

    /// Kahn's-algorithm topological order. Assumes the DAG is acyclic,
    /// which every committed mutation already guarantees (I1); returns a
    /// partial order if called mid-cycle-check (never observable externally).
    pub fn topological_order(&self) -> Vec<String> {
        let mut in_degree: HashMap<String, usize> = self.tasks.keys().map(|k| (k.clone(), 0)).collect();
        for edge in self.edges.values() {
            *in_degree.entry(edge.to_task_id.clone()).or_insert(0) += 1;
        }
        let mut queue: Vec<String> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        queue.sort();
        let mut order = Vec::with_capacity(self.tasks.len());
        let mut idx = 0;
        while idx < queue.len() {
            let node = queue[idx].clone();
            idx += 1;
            order.push(node.clone());
            let mut newly_ready: Vec<String> = Vec::new();
            for child in self.children(&node) {
                if let Some(d) = in_degree.get_mut(&child) {
                    *d -= 1;
                    if *d == 0 {
                        newly_ready.push(child);
                    }
                }
            }
            newly_ready.sort();
            queue.extend(newly_ready);
        }
        order
    }

    /// Distance from the nearest root, i.e. the topological level used by
    /// `max_width`/`longest_path` (teacher's `calculate_depth`).
    pub fn depth(&self, task_id: &str) -> Option<usize> {
        self.topological_levels().0.get(task_id).copied()
    }

    /// Topological level (longest distance from a root) per task, plus
    /// the grouping of task ids by level.
    fn topological_levels(&self) -> (HashMap<String, usize>, HashMap<usize, Vec<String>>) {
        let order = self.topological_order();
        let mut levels: HashMap<String, usize> = HashMap::new();
        for id in &order {
            let level = self
                .parents(id)
                .iter()
                .map(|p| levels.get(p).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            levels.insert(id.clone(), level);
        }
        let mut by_level: HashMap<usize, Vec<String>> = HashMap::new();
        for (id, level) in &levels {
            by_level.entry(*level).or_default().push(id.clone());
        }
        (levels, by_level)
    }

    fn chain_ending_at(&self, task_id: &str, levels: &HashMap<String, usize>) -> Vec<String> {
        let mut chain = vec![task_id.to_string()];
        let mut cursor = task_id.to_string();
        loop {
            let parents = self.parents(&cursor);
            let current_level = levels.get(&cursor).copied().unwrap_or(0);
            let next = parents
                .into_iter()
                .find(|p| levels.get(p).copied().unwrap_or(0) + 1 == current_level);
            match next {
                Some(p) => {
                    chain.push(p.clone());
                    cursor = p;
                }
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    pub fn get_statistics(&self) -> ConstellationStats {
        let mut task_status_counts: HashMap<String, usize> = HashMap::new();
        for t in self.tasks.values() {
            *task_status_counts.entry(t.status.as_str().to_string()).or_insert(0) += 1;
        }
        let (longest_path_length, longest_path_tasks) = self.longest_path();
        let (critical_path_length, critical_path_tasks, parallelism_calculation_mode) =
            self.critical_path();
        ConstellationStats {
            constellation_id: self.constellation_id.clone(),
            state: self.state,
            total_tasks: self.tasks.len(),
            total_dependencies: self.edges.len(),
            task_status_counts,
            longest_path_length,
            longest_path_tasks,
            max_width: self.max_width(),
            critical_path_length,
            critical_path_tasks,
            total_work: self.total_work(),
            parallelism_ratio: self.parallelism_ratio(),
            parallelism_calculation_mode,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Terminal check for the orchestrator (spec §4.2 "Termination"): no
    /// task RUNNING and none READY-able (i.e. `executable_tasks` is empty
    /// and nothing is RUNNING).
    pub fn is_quiescent(&self) -> bool {
        let any_running = self.tasks.values().any(|t| t.status == TaskStatus::Running);
        !any_running && self.executable_tasks().is_empty() && self.ready_tasks().is_empty()
    }

    pub fn any_failed(&self) -> bool {
        self.tasks.values().any(|t| t.status == TaskStatus::Failed)
    }
}
