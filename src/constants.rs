//! Constants for scheduling, retry, and transport timing.

use std::time::Duration;

/// How often a transferring download checks whether bytes moved (10 seconds).
pub const PROGRESS_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive no-progress checks tolerated when no timeout override is set.
pub const DEFAULT_MAX_NO_PROGRESS_INTERVALS: u32 = 30;

/// First retry delay after a transient failure.
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for the doubling retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// How long an unresponsive cache host stays banned (5 minutes).
pub const CACHE_HOST_BAN_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How often a download waiting for connectivity re-probes the network.
pub const NO_NETWORK_RECHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Connect timeout when talking to a cache host.
pub const CACHE_HOST_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Connect timeout when talking to the origin server.
pub const ORIGIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Window over which a transfer's throughput is measured for stall detection.
pub const STALL_WINDOW: Duration = Duration::from_secs(20);

/// Minimum sustained throughput before a transfer is considered stalled.
pub const STALL_MIN_BYTES_PER_SEC: u64 = 4096;

/// Longest the transfer engine waits before servicing queued add/remove requests.
pub const ENGINE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Ceiling on how long removing a transfer waits for it to detach (30 minutes).
pub const REMOVE_WAIT_CEILING: Duration = Duration::from_secs(30 * 60);

/// Consecutive failed attempts on one connection type before switching to the other.
pub const ATTEMPTS_BEFORE_HOST_SWITCH: u32 = 2;

/// Query parameter carrying the original host when a request is routed via a cache host.
pub const CACHE_HOST_ORIGIN_QUERY_KEY: &str = "cacheHostOrigin";

/// User-Agent sent with every transfer.
pub const USER_AGENT: &str = concat!("download-agent/", env!("CARGO_PKG_VERSION"));
