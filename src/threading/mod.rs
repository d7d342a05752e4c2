//! Cooperative single-worker scheduler.
//!
//! Every mutation of download state is funnelled through one [`TaskThread`].
//! Work is posted as closures, optionally delayed, and optionally tagged with
//! a [`TaskTag`] so an owner can cancel everything it queued when it goes away.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use download_agent::threading::TaskThread;
//!
//! # fn main() -> Result<(), download_agent::AgentError> {
//! let thread = TaskThread::spawn("example-tasks")?;
//! let tag = thread.allocate_tag();
//! thread.schedule(|| println!("later"), Duration::from_secs(60), Some(tag));
//! thread.unschedule(tag);
//!
//! let answer = thread.sched_block(|| 40 + 2, true)?;
//! assert_eq!(answer, 42);
//! # Ok(())
//! # }
//! ```

mod task_queue;
mod task_thread;

pub use task_queue::{Task, TaskQueue, TaskTag};
pub use task_thread::{TaskScheduler, TaskThread};
