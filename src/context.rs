//! Explicitly constructed collaborators shared by every download.
//!
//! Nothing in the agent reaches for process-wide state: configuration,
//! connectivity, proxy discovery, id generation and timing tunables all come
//! from an [`AgentContext`] handed to the
//! [`DownloadManager`](crate::DownloadManager).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use download_agent::config::MemoryConfig;
//! use download_agent::context::AgentContext;
//! use download_agent::network::FixedProbe;
//!
//! let ctx = AgentContext::default()
//!     .with_config(Arc::new(MemoryConfig::default()))
//!     .with_network(Arc::new(FixedProbe::new(true)));
//! assert_eq!(ctx.timings.progress_check_interval.as_secs(), 10);
//! ```

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::{ConfigSource, MemoryConfig};
use crate::constants::{
    CACHE_HOST_BAN_INTERVAL, CACHE_HOST_CONNECT_TIMEOUT, INITIAL_RETRY_DELAY, MAX_RETRY_DELAY,
    NO_NETWORK_RECHECK_INTERVAL, ORIGIN_CONNECT_TIMEOUT, PROGRESS_CHECK_INTERVAL,
};
use crate::download::{DownloadId, EnvProxyResolver, ProxyResolver};
use crate::network::{InterfaceProbe, NetworkProbe};
use crate::transport::EngineSettings;

/// Produces a fresh id for every new download.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> DownloadId;
}

/// Random UUID v4 ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> DownloadId {
        DownloadId::from(Uuid::new_v4().to_string())
    }
}

/// Timing tunables for downloads. Defaults match production behaviour;
/// tests shorten them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadTimings {
    /// Cadence of the no-progress check.
    pub progress_check_interval: Duration,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// How long a misbehaving cache host stays banned.
    pub cache_host_ban_interval: Duration,
    /// How often connectivity is re-probed while the network is down.
    pub no_network_recheck_interval: Duration,
    pub cache_host_connect_timeout: Duration,
    pub origin_connect_timeout: Duration,
}

impl Default for DownloadTimings {
    fn default() -> Self {
        Self {
            progress_check_interval: PROGRESS_CHECK_INTERVAL,
            initial_retry_delay: INITIAL_RETRY_DELAY,
            max_retry_delay: MAX_RETRY_DELAY,
            cache_host_ban_interval: CACHE_HOST_BAN_INTERVAL,
            no_network_recheck_interval: NO_NETWORK_RECHECK_INTERVAL,
            cache_host_connect_timeout: CACHE_HOST_CONNECT_TIMEOUT,
            origin_connect_timeout: ORIGIN_CONNECT_TIMEOUT,
        }
    }
}

/// Collaborators and tunables for a [`DownloadManager`](crate::DownloadManager).
#[derive(Clone)]
pub struct AgentContext {
    pub config: Arc<dyn ConfigSource>,
    pub network: Arc<dyn NetworkProbe>,
    pub proxies: Arc<dyn ProxyResolver>,
    pub ids: Arc<dyn IdGenerator>,
    pub timings: DownloadTimings,
    pub engine: EngineSettings,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("timings", &self.timings)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Default for AgentContext {
    /// Empty in-memory configuration, OS interface probe, proxies from the
    /// environment, UUID ids.
    fn default() -> Self {
        Self {
            config: Arc::new(MemoryConfig::default()),
            network: Arc::new(InterfaceProbe),
            proxies: Arc::new(EnvProxyResolver),
            ids: Arc::new(UuidGenerator),
            timings: DownloadTimings::default(),
            engine: EngineSettings::default(),
        }
    }
}

impl AgentContext {
    #[must_use]
    pub fn with_config(mut self, config: Arc<dyn ConfigSource>) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_network(mut self, network: Arc<dyn NetworkProbe>) -> Self {
        self.network = network;
        self
    }

    #[must_use]
    pub fn with_proxies(mut self, proxies: Arc<dyn ProxyResolver>) -> Self {
        self.proxies = proxies;
        self
    }

    #[must_use]
    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    #[must_use]
    pub fn with_timings(mut self, timings: DownloadTimings) -> Self {
        self.timings = timings;
        self
    }

    #[must_use]
    pub fn with_engine_settings(mut self, engine: EngineSettings) -> Self {
        self.engine = engine;
        self
    }
}
