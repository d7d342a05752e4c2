//! Per-download state machine and its helpers.
//!
//! # Overview
//!
//! - [`Download`] drives one URL to one file through the states Created,
//!   Transferring, Transferred, Paused, Finalized and Aborted
//! - [`ProgressTracker`] detects stalls and computes retry backoff
//! - [`ConnectionPolicy`] alternates between the cache host and the origin
//! - [`ProxyList`] rotates through discovered proxies
//!
//! Downloads are created and driven by the
//! [`DownloadManager`](crate::DownloadManager); nothing here spawns threads.

mod connection;
#[allow(clippy::module_inception)]
mod download;
mod progress;
mod proxy;
mod state;

pub use connection::{ConnectionPolicy, ConnectionType};
pub use download::{Download, DownloadServices, SharedDownload};
pub use progress::{ProgressTracker, max_no_progress_intervals};
pub use proxy::{EnvProxyResolver, ProxyList, ProxyResolver, StaticProxyResolver};
pub use state::{DownloadId, DownloadProperty, DownloadState, DownloadStatus};
