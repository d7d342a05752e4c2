//! Agent configuration: cache host selection and fallback policy.
//!
//! Values come from two JSON documents, read on every query so that edits
//! take effect without a restart:
//!
//! - the admin config (`DOCacheHost`, `DODelayCacheServerFallbackBackground`,
//!   `DODelayCacheServerFallbackForeground`)
//! - the SDK config (`ADUC_IoTConnectionString`), whose `GatewayHostName=`
//!   field names a cache host when `DOCacheHost` is unset
//!
//! # Example
//!
//! ```
//! use download_agent::config::{AgentConfig, CacheFallback, ConfigSource, MemoryConfig};
//!
//! let config = MemoryConfig::new(AgentConfig {
//!     cache_host: Some("cache.local:8080".to_string()),
//!     fallback_delay_background_secs: Some(-1),
//!     ..AgentConfig::default()
//! });
//! assert_eq!(config.cache_host_server().as_deref(), Some("cache.local:8080"));
//! assert_eq!(config.cache_host_fallback_delay(), CacheFallback::Never);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Connection-string field naming the IoT gateway host.
const GATEWAY_HOST_KEY: &str = "gatewayhostname=";

/// Raw configuration values, using the key names existing deployments write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Cache host, optionally `host:port`. A comma-separated list uses its first entry.
    #[serde(rename = "DOCacheHost", default, skip_serializing_if = "Option::is_none")]
    pub cache_host: Option<String>,

    /// Seconds after start before falling back from the cache host to the origin.
    #[serde(
        rename = "DODelayCacheServerFallbackBackground",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub fallback_delay_background_secs: Option<i64>,

    /// Consulted when the background delay is absent.
    #[serde(
        rename = "DODelayCacheServerFallbackForeground",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub fallback_delay_foreground_secs: Option<i64>,

    #[serde(
        rename = "ADUC_IoTConnectionString",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub iot_connection_string: Option<String>,
}

impl AgentConfig {
    /// Configured fallback delay in seconds; background wins over foreground.
    #[must_use]
    pub fn fallback_delay_secs(&self) -> Option<i64> {
        self.fallback_delay_background_secs
            .or(self.fallback_delay_foreground_secs)
    }

    /// Cache host from `DOCacheHost`, else from the IoT connection string.
    #[must_use]
    pub fn resolved_cache_host(&self) -> Option<String> {
        let configured = self
            .cache_host
            .as_deref()
            .and_then(|hosts| hosts.split(',').map(str::trim).find(|h| !h.is_empty()));
        if let Some(host) = configured {
            return Some(host.to_string());
        }
        self.iot_connection_string
            .as_deref()
            .and_then(gateway_host_from_connection_string)
    }
}

/// Extracts the `GatewayHostName=` value (case-insensitive key) from an IoT
/// connection string such as `HostName=hub;DeviceId=dev;GatewayHostName=10.0.0.2`.
#[must_use]
pub fn gateway_host_from_connection_string(connection: &str) -> Option<String> {
    let lower = connection.to_ascii_lowercase();
    let start = lower.find(GATEWAY_HOST_KEY)? + GATEWAY_HOST_KEY.len();
    let rest = &connection[start..];
    let host = rest.split(';').next().unwrap_or_default().trim();
    if host.is_empty() {
        debug!("GatewayHostName present but empty");
        None
    } else {
        Some(host.to_string())
    }
}

/// When a download may abandon the cache host for the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFallback {
    /// Fallback allowed once this much time has passed since the download started.
    After(Duration),
    /// The origin must never be contacted while a cache host is configured.
    Never,
}

impl CacheFallback {
    /// Absent means immediate fallback; any negative value means never.
    #[must_use]
    pub fn from_seconds(seconds: Option<i64>) -> Self {
        match seconds {
            None => Self::After(Duration::ZERO),
            Some(secs) if secs < 0 => Self::Never,
            Some(secs) => Self::After(Duration::from_secs(secs.unsigned_abs())),
        }
    }
}

/// Source of configuration values consulted by downloads.
pub trait ConfigSource: Send + Sync {
    /// Current configuration snapshot.
    fn load(&self) -> AgentConfig;

    fn cache_host_fallback_delay(&self) -> CacheFallback {
        CacheFallback::from_seconds(self.load().fallback_delay_secs())
    }

    fn cache_host_server(&self) -> Option<String> {
        self.load().resolved_cache_host()
    }
}

/// Configuration held in memory; can be changed at runtime.
#[derive(Debug, Default)]
pub struct MemoryConfig {
    inner: RwLock<AgentConfig>,
}

impl MemoryConfig {
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    /// Replaces the current values.
    pub fn set(&self, config: AgentConfig) {
        *self.inner.write() = config;
    }
}

impl ConfigSource for MemoryConfig {
    fn load(&self) -> AgentConfig {
        self.inner.read().clone()
    }
}

/// Configuration read from JSON files on every query.
///
/// A missing file contributes nothing. A malformed file is logged and
/// ignored, so a bad edit degrades to defaults instead of failing downloads.
#[derive(Debug, Clone)]
pub struct JsonFileConfig {
    admin_path: PathBuf,
    sdk_path: Option<PathBuf>,
}

impl JsonFileConfig {
    pub fn new(admin_path: impl Into<PathBuf>) -> Self {
        Self {
            admin_path: admin_path.into(),
            sdk_path: None,
        }
    }

    /// Adds the SDK document. Only its IoT connection string is read, and
    /// only when the admin file has none.
    #[must_use]
    pub fn with_sdk_config(mut self, sdk_path: impl Into<PathBuf>) -> Self {
        self.sdk_path = Some(sdk_path.into());
        self
    }

    fn read(path: &Path) -> AgentConfig {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return AgentConfig::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read config file");
                return AgentConfig::default();
            }
        };
        if content.trim().is_empty() {
            return AgentConfig::default();
        }
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring malformed config file");
            AgentConfig::default()
        })
    }
}

impl ConfigSource for JsonFileConfig {
    fn load(&self) -> AgentConfig {
        let mut config = Self::read(&self.admin_path);
        if config.iot_connection_string.is_none() {
            if let Some(sdk_path) = &self.sdk_path {
                config.iot_connection_string = Self::read(sdk_path).iot_connection_string;
            }
        }
        config
    }
}
