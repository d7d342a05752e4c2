//! Background download agent.
//!
//! Downloads files over HTTP on behalf of local clients, preferring a
//! configured cache host and falling back to the origin server when the
//! cache host misbehaves or a deadline passes.
//!
//! # Architecture
//!
//! - [`threading`] - single-worker task scheduler; all download state changes run on it
//! - [`transport`] - transfer engine multiplexing concurrent HTTP requests
//! - [`download`] - per-download state machine, progress tracking, proxy rotation
//! - [`mcc`] - cache host selection and ban bookkeeping
//! - [`config`] - cache host configuration sources
//! - [`network`] - connectivity probe
//! - [`context`] - collaborators and timings handed to the manager
//!
//! [`DownloadManager`] ties these together behind a synchronous, thread-safe API.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod context;
pub mod download;
pub mod error;
mod manager;
pub mod mcc;
pub mod network;
pub mod threading;
pub mod transport;

// Re-export commonly used types
pub use config::{AgentConfig, CacheFallback, ConfigSource, JsonFileConfig, MemoryConfig};
pub use context::{AgentContext, DownloadTimings, IdGenerator, UuidGenerator};
pub use download::{DownloadId, DownloadProperty, DownloadState, DownloadStatus};
pub use error::{AgentError, ErrorCode};
pub use manager::DownloadManager;
pub use network::{FixedProbe, InterfaceProbe, NetworkProbe};
