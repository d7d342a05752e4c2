//! Time-ordered queue of tagged closures.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::num::NonZeroU64;
use std::time::Instant;

/// Opaque owner key attached to scheduled work so it can be cancelled later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskTag(NonZeroU64);

impl TaskTag {
    pub(crate) fn from_raw(raw: NonZeroU64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TaskTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag#{}", self.0)
    }
}

/// A unit of work waiting in a [`TaskQueue`].
pub struct Task {
    tag: Option<TaskTag>,
    run: Box<dyn FnOnce() + Send>,
}

impl Task {
    pub fn new(tag: Option<TaskTag>, run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            tag,
            run: Box::new(run),
        }
    }

    #[must_use]
    pub fn tag(&self) -> Option<TaskTag> {
        self.tag
    }

    /// Consumes the task and executes its closure.
    pub fn run(self) {
        (self.run)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("tag", &self.tag).finish_non_exhaustive()
    }
}

/// Queue of tasks ordered by run time.
///
/// Front-inserted tasks always precede every timed task and keep FIFO order
/// among themselves. Timed tasks with equal run times keep insertion order.
#[derive(Debug, Default)]
pub struct TaskQueue {
    front: VecDeque<Task>,
    timed: BTreeMap<(Instant, u64), Task>,
    seq: u64,
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a task to run at `run_at`.
    pub fn push(&mut self, run_at: Instant, task: Task) {
        self.seq = self.seq.wrapping_add(1);
        self.timed.insert((run_at, self.seq), task);
    }

    /// Inserts a task ahead of every queued entry.
    pub fn push_front(&mut self, task: Task) {
        self.front.push_back(task);
    }

    /// Removes and returns the earliest task whose run time is at or before `now`.
    pub fn pop_ready(&mut self, now: Instant) -> Option<Task> {
        if let Some(task) = self.front.pop_front() {
            return Some(task);
        }
        let key = *self.timed.keys().next()?;
        if key.0 <= now {
            self.timed.remove(&key)
        } else {
            None
        }
    }

    /// Run time of the next task, or `None` when empty.
    ///
    /// Front entries are always due, so `now` is returned for them.
    #[must_use]
    pub fn next_run_time(&self, now: Instant) -> Option<Instant> {
        if !self.front.is_empty() {
            return Some(now);
        }
        self.timed.keys().next().map(|(at, _)| *at)
    }

    /// Removes every queued task carrying `tag` and returns how many were removed.
    pub fn remove(&mut self, tag: TaskTag) -> usize {
        let before = self.len();
        self.front.retain(|task| task.tag != Some(tag));
        self.timed.retain(|_, task| task.tag != Some(tag));
        before - self.len()
    }

    #[must_use]
    pub fn contains(&self, tag: TaskTag) -> bool {
        self.front.iter().any(|task| task.tag == Some(tag))
            || self.timed.values().any(|task| task.tag == Some(tag))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.front.len() + self.timed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.front.is_empty() && self.timed.is_empty()
    }
}
