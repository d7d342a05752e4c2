//! Shared helpers for integration tests.
//!
//! Manager calls block, so tests run on plain threads and drive wiremock
//! through a separate tokio runtime.

#![allow(dead_code)]

pub mod socket_guard;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use download_agent::download::StaticProxyResolver;
use download_agent::transport::EngineSettings;
use download_agent::{
    AgentConfig, AgentContext, DownloadManager, DownloadStatus, DownloadTimings, FixedProbe,
    MemoryConfig,
};
use tokio::runtime::Runtime;
use wiremock::MockServer;

/// Upper bound for any single wait in these tests.
pub const WAIT_LIMIT: Duration = Duration::from_secs(15);

#[must_use]
pub fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Starts a mock server, or `None` when localhost sockets are unavailable.
#[track_caller]
pub fn mock_server(rt: &Runtime) -> Option<MockServer> {
    if socket_guard::should_skip_socket_bound_test() {
        return None;
    }
    Some(rt.block_on(MockServer::start()))
}

/// Timings short enough for tests; retries and re-probes happen within milliseconds.
#[must_use]
pub fn fast_timings() -> DownloadTimings {
    DownloadTimings {
        progress_check_interval: Duration::from_millis(100),
        initial_retry_delay: Duration::from_millis(10),
        max_retry_delay: Duration::from_millis(50),
        cache_host_ban_interval: Duration::from_secs(60),
        no_network_recheck_interval: Duration::from_millis(50),
        cache_host_connect_timeout: Duration::from_secs(2),
        origin_connect_timeout: Duration::from_secs(2),
    }
}

#[must_use]
pub fn fast_engine() -> EngineSettings {
    EngineSettings {
        poll_interval: Duration::from_millis(50),
        remove_timeout: Duration::from_secs(5),
        ..EngineSettings::default()
    }
}

/// Context with fixed connectivity, no proxies and short timings.
#[must_use]
pub fn test_context(config: AgentConfig, network: Arc<FixedProbe>) -> AgentContext {
    AgentContext::default()
        .with_config(Arc::new(MemoryConfig::new(config)))
        .with_network(network)
        .with_proxies(Arc::new(StaticProxyResolver::direct()))
        .with_timings(fast_timings())
        .with_engine_settings(fast_engine())
}

#[must_use]
pub fn online_manager(config: AgentConfig) -> DownloadManager {
    DownloadManager::new(test_context(config, Arc::new(FixedProbe::new(true)))).unwrap()
}

/// Polls the status until `done` holds, panicking after [`WAIT_LIMIT`].
pub fn wait_for_status(
    manager: &DownloadManager,
    id: &str,
    done: impl Fn(&DownloadStatus) -> bool,
) -> DownloadStatus {
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        let status = manager.get_status(id).unwrap();
        if done(&status) {
            return status;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for download {id}; last status {status:?}"
        );
        thread::sleep(Duration::from_millis(20));
    }
}
