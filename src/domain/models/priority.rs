//! Ready-set ordering (spec §4.1 "Ordering and tie-breaks"). Grounded on
//! the teacher's `QueueItem`/`TaskQueue` `Ord`-based priority pattern in
//! `domain/models/queue.rs`, adapted into a dedicated, independently
//! testable key type rather than an inline sort closure, so the total
//! order §4.1 requires is enforced by the type system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task_star::{TaskPriority, TaskStar};

/// `(priority ascending, created_at ascending, task_id lexicographic)` —
/// the exact total order spec §4.1 names. `TaskPriority`'s `#[repr(u8)]`
/// discriminants already put HIGH before LOW, so deriving `Ord` on the
/// tuple gives the right order for free.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReadyKey(pub TaskPriority, pub DateTime<Utc>, pub String);

#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityCalculator;

impl PriorityCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn ready_key(&self, task: &TaskStar) -> ReadyKey {
        ReadyKey(task.priority, task.created_at, task.task_id.clone())
    }

    /// Sorts `tasks` in place by the ready-set total order.
    pub fn sort_ready<'a>(&self, tasks: &mut [&'a TaskStar]) {
        tasks.sort_by(|a, b| self.ready_key(a).cmp(&self.ready_key(b)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, priority: TaskPriority) -> TaskStar {
        TaskStar::new(id, id, "d").with_priority(priority)
    }

    #[test]
    fn high_priority_sorts_before_low() {
        let calc = PriorityCalculator::new();
        let high = task("a", TaskPriority::High);
        let low = task("b", TaskPriority::Low);
        assert!(calc.ready_key(&high) < calc.ready_key(&low));
    }

    #[test]
    fn equal_priority_breaks_tie_by_creation_then_id() {
        let calc = PriorityCalculator::new();
        let mut first = task("bbb", TaskPriority::Normal);
        let mut second = task("aaa", TaskPriority::Normal);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        let mut refs = vec![&second, &first];
        calc.sort_ready(&mut refs);
        assert_eq!(refs[0].task_id, "bbb");
        assert_eq!(refs[1].task_id, "aaa");

        first.created_at = second.created_at;
        let mut refs2 = vec![&second, &first];
        calc.sort_ready(&mut refs2);
        assert_eq!(refs2[0].task_id, "aaa");
        assert_eq!(refs2[1].task_id, "bbb");
    }
}
