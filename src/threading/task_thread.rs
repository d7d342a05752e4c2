//! Single worker thread draining a [`TaskQueue`].

use std::any::Any;
use std::num::NonZeroU64;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, mpsc};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace};

use super::task_queue::{Task, TaskQueue, TaskTag};
use crate::error::AgentError;

struct State {
    queue: TaskQueue,
    running: bool,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    next_tag: AtomicU64,
    worker: OnceLock<ThreadId>,
}

/// Cloneable handle used to post work onto a [`TaskThread`].
#[derive(Clone)]
pub struct TaskScheduler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler").finish_non_exhaustive()
    }
}

impl TaskScheduler {
    /// Allocates a fresh tag for grouping scheduled work.
    #[must_use]
    pub fn allocate_tag(&self) -> TaskTag {
        let raw = self.shared.next_tag.fetch_add(1, Ordering::Relaxed);
        // The counter starts at 1 and a u64 does not wrap in practice.
        TaskTag::from_raw(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Schedules `f` to run after `delay`.
    pub fn schedule(
        &self,
        f: impl FnOnce() + Send + 'static,
        delay: Duration,
        tag: Option<TaskTag>,
    ) {
        let run_at = Instant::now() + delay;
        self.enqueue(|queue| queue.push(run_at, Task::new(tag, f)));
    }

    /// Schedules `f` ahead of everything already queued.
    pub fn schedule_front(&self, f: impl FnOnce() + Send + 'static, tag: Option<TaskTag>) {
        self.enqueue(|queue| queue.push_front(Task::new(tag, f)));
    }

    /// Removes every pending task carrying `tag`.
    pub fn unschedule(&self, tag: TaskTag) {
        let removed = self.shared.state.lock().queue.remove(tag);
        if removed > 0 {
            trace!(%tag, removed, "unscheduled tasks");
            self.shared.wake.notify_one();
        }
    }

    #[must_use]
    pub fn is_scheduled(&self, tag: TaskTag) -> bool {
        self.shared.state.lock().queue.contains(tag)
    }

    /// True when called from the worker thread itself.
    #[must_use]
    pub fn is_worker_thread(&self) -> bool {
        self.shared.worker.get() == Some(&thread::current().id())
    }

    /// Runs `f` on the worker thread and blocks until it returns.
    ///
    /// Runs inline when already on the worker thread. `immediate` places the
    /// work ahead of everything queued; otherwise it waits behind queued work.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Unexpected`] if `f` panicked and
    /// [`AgentError::NoService`] if the thread stopped before running it.
    pub fn sched_block<T, F>(&self, f: F, immediate: bool) -> Result<T, AgentError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_worker_thread() {
            return run_catching(f);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let task = move || {
            // Receiver gone means the caller stopped waiting; nothing to report.
            let _ = tx.send(run_catching(f));
        };
        if immediate {
            self.schedule_front(task, None);
        } else {
            self.schedule(task, Duration::ZERO, None);
        }
        rx.recv().map_err(|_| AgentError::NoService)?
    }

    fn enqueue(&self, insert: impl FnOnce(&mut TaskQueue)) {
        let mut state = self.shared.state.lock();
        if !state.running {
            debug!("task thread stopped; dropping scheduled task");
            return;
        }
        insert(&mut state.queue);
        drop(state);
        self.shared.wake.notify_one();
    }
}

/// Dedicated worker thread that executes scheduled closures in time order.
///
/// All download state mutation happens on this thread. Panics inside tasks
/// are caught and logged; they never stop the worker.
pub struct TaskThread {
    scheduler: TaskScheduler,
    handle: Option<JoinHandle<()>>,
}

impl TaskThread {
    /// Spawns the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Unexpected`] if the OS refuses to spawn the thread.
    pub fn spawn(name: &str) -> Result<Self, AgentError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: TaskQueue::new(),
                running: true,
            }),
            wake: Condvar::new(),
            next_tag: AtomicU64::new(1),
            worker: OnceLock::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(&worker_shared))
            .map_err(|e| AgentError::unexpected(format!("failed to spawn {name}: {e}")))?;
        let _ = shared.worker.set(handle.thread().id());

        Ok(Self {
            scheduler: TaskScheduler { shared },
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Stops the worker after the task currently running, dropping queued work,
    /// and joins it.
    pub fn shutdown(&mut self) {
        let dropped = {
            let mut state = self.scheduler.shared.state.lock();
            state.running = false;
            std::mem::take(&mut state.queue)
        };
        // Dropped outside the lock: a task may own the last reference to
        // something that schedules work when dropped.
        drop(dropped);
        self.scheduler.shared.wake.notify_all();

        if let Some(handle) = self.handle.take() {
            if self.scheduler.is_worker_thread() {
                // Cannot join ourselves; the loop exits once this task returns.
                return;
            }
            if handle.join().is_err() {
                error!("task thread terminated abnormally");
            }
        }
    }
}

impl std::ops::Deref for TaskThread {
    type Target = TaskScheduler;

    fn deref(&self) -> &TaskScheduler {
        &self.scheduler
    }
}

impl Drop for TaskThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    debug!("task thread started");
    let mut state = shared.state.lock();
    while state.running {
        let now = Instant::now();
        if let Some(task) = state.queue.pop_ready(now) {
            MutexGuard::unlocked(&mut state, || run_task(task));
            continue;
        }
        match state.queue.next_run_time(now) {
            Some(deadline) => {
                let _ = shared.wake.wait_until(&mut state, deadline);
            }
            None => shared.wake.wait(&mut state),
        }
    }
    debug!("task thread exiting");
}

fn run_task(task: Task) {
    let tag = task.tag();
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        error!(
            tag = ?tag,
            panic = %panic_message(payload.as_ref()),
            "scheduled task panicked"
        );
    }
}

fn run_catching<T>(f: impl FnOnce() -> T) -> Result<T, AgentError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!(panic = %message, "blocking task panicked");
        AgentError::unexpected(format!("task panicked: {message}"))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
