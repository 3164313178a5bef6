//! Cooperative scheduler: periodic and one-shot tasks driven by the host tick.
//!
//! Tasks carry a typed payload instead of a closure; the owner dispatches the
//! payloads returned by a pass, so callbacks never run concurrently and never
//! preempt each other.

use crate::Millis;

/// Handle returned by [`Scheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

#[derive(Debug)]
struct Task<T> {
    id: TaskId,
    payload: T,
    interval: Millis,
    last_run: Millis,
    repeat: bool,
    active: bool,
}

impl<T> Task<T> {
    fn is_due(&self, now: Millis) -> bool {
        self.active && now >= self.last_run.saturating_add(self.interval)
    }
}

/// Ordered task list. A pass is `due` (snapshot), `fire` per id, then `compact`.
#[derive(Debug)]
pub struct Scheduler<T> {
    tasks: Vec<Task<T>>,
    next_id: u64,
}

impl<T: Clone> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 0,
        }
    }

    /// Schedule `payload` to fire `delay` ms after `now`; repeating tasks then fire every `delay` ms.
    pub fn schedule(&mut self, payload: T, delay: Millis, repeat: bool, now: Millis) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.push(Task {
            id,
            payload,
            interval: delay,
            last_run: now,
            repeat,
            active: true,
        });
        id
    }

    /// Deactivate a task. Unknown or already inactive ids are ignored.
    pub fn cancel(&mut self, id: TaskId) {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
            task.active = false;
        }
    }

    pub fn is_active(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|t| t.id == id && t.active)
    }

    /// Snapshot of due task ids, in insertion order. Tasks added after this call are not part of the pass.
    pub fn due(&self, now: Millis) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.is_due(now))
            .map(|t| t.id)
            .collect()
    }

    /// Fire one task from a `due` snapshot. Returns None if it was cancelled since the snapshot.
    pub fn fire(&mut self, id: TaskId, now: Millis) -> Option<T> {
        let task = self.tasks.iter_mut().find(|t| t.id == id)?;
        if !task.is_due(now) {
            return None;
        }
        task.last_run = now;
        if !task.repeat {
            task.active = false;
        }
        Some(task.payload.clone())
    }

    /// Drop inactive tasks. Call once at the end of a pass.
    pub fn compact(&mut self) {
        self.tasks.retain(|t| t.active);
    }

    /// Run a whole pass and return the fired payloads in order.
    /// Only for owners whose dispatch does not touch the scheduler.
    pub fn tick(&mut self, now: Millis) -> Vec<T> {
        let fired = self
            .due(now)
            .into_iter()
            .filter_map(|id| self.fire(id, now))
            .collect();
        self.compact();
        fired
    }

    /// Number of tasks held, inactive ones included until the next compaction.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<T: Clone> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once_then_removed() {
        let mut s = Scheduler::new();
        s.schedule("a", 100, false, 0);
        assert!(s.tick(99).is_empty());
        assert_eq!(s.tick(100), vec!["a"]);
        assert!(s.is_empty());
        assert!(s.tick(1000).is_empty());
    }

    #[test]
    fn repeating_rearms_from_fire_time() {
        let mut s = Scheduler::new();
        s.schedule("r", 100, true, 0);
        assert_eq!(s.tick(150), vec!["r"]);
        // last_run is now 150, so 200 is too early.
        assert!(s.tick(200).is_empty());
        assert_eq!(s.tick(250), vec!["r"]);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn fires_in_insertion_order() {
        let mut s = Scheduler::new();
        s.schedule(1, 50, false, 0);
        s.schedule(2, 10, false, 0);
        s.schedule(3, 30, false, 0);
        assert_eq!(s.tick(60), vec![1, 2, 3]);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut s: Scheduler<u8> = Scheduler::new();
        let id = s.schedule(1, 10, true, 0);
        s.cancel(id);
        s.cancel(id);
        s.cancel(TaskId(999));
        assert!(!s.is_active(id));
        assert!(s.tick(100).is_empty());
        assert!(s.is_empty());
    }

    #[test]
    fn cancelled_mid_pass_does_not_fire() {
        let mut s = Scheduler::new();
        let _a = s.schedule("a", 10, false, 0);
        let b = s.schedule("b", 10, false, 0);
        let due = s.due(10);
        assert_eq!(due.len(), 2);
        assert_eq!(s.fire(due[0], 10), Some("a"));
        // "a"'s handler cancels "b".
        s.cancel(b);
        assert_eq!(s.fire(due[1], 10), None);
        s.compact();
        assert!(s.is_empty());
    }

    #[test]
    fn scheduled_mid_pass_waits_for_next_tick() {
        let mut s = Scheduler::new();
        s.schedule("a", 0, false, 0);
        let due = s.due(5);
        let mut fired = Vec::new();
        for id in due {
            if let Some(p) = s.fire(id, 5) {
                fired.push(p);
                s.schedule("late", 0, false, 5);
            }
        }
        s.compact();
        assert_eq!(fired, vec!["a"]);
        assert_eq!(s.tick(5), vec!["late"]);
    }
}
