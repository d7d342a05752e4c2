//! Cache host (MCC) selection and banning.
//!
//! A cache host sits in front of the origin server. Requests are redirected
//! to it by swapping the URL's host and recording the original host in the
//! `cacheHostOrigin` query parameter. Hosts that misbehave are banned for a
//! while, either for every origin or only for the origin that failed.

mod ban_list;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

pub use ban_list::BanList;

use crate::config::{CacheFallback, ConfigSource};
use crate::constants::CACHE_HOST_ORIGIN_QUERY_KEY;
use crate::transport::TransportError;

/// Resolves the cache host to use and tracks banned hosts.
///
/// One instance is shared by every download of a manager; it is only touched
/// from the task thread.
pub struct MccManager {
    config: Arc<dyn ConfigSource>,
    bans: BanList,
    ban_interval: Duration,
}

impl std::fmt::Debug for MccManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MccManager")
            .field("bans", &self.bans)
            .field("ban_interval", &self.ban_interval)
            .finish_non_exhaustive()
    }
}

impl MccManager {
    pub fn new(config: Arc<dyn ConfigSource>, ban_interval: Duration) -> Self {
        Self {
            config,
            bans: BanList::new(),
            ban_interval,
        }
    }

    /// Current fallback policy from configuration.
    #[must_use]
    pub fn fallback(&self) -> CacheFallback {
        self.config.cache_host_fallback_delay()
    }

    /// Configured cache host for `original`, unless it is banned for that origin.
    pub fn next_host(&mut self, original: &Url) -> Option<String> {
        let host = self.config.cache_host_server()?;
        if self.bans.is_banned(&host, original.host_str()) {
            debug!(host, origin = ?original.host_str(), "cache host is banned");
            return None;
        }
        Some(host)
    }

    /// Bans `host` for all origins.
    pub fn ban(&mut self, host: &str) {
        self.bans.ban(host, self.ban_interval);
    }

    /// Bans `host` only for content from `origin_host`.
    pub fn ban_for_original_host(&mut self, host: &str, origin_host: &str) {
        self.bans.ban_for_origin(host, origin_host, self.ban_interval);
    }

    pub fn is_banned(&mut self, host: &str, original: &Url) -> bool {
        self.bans.is_banned(host, original.host_str())
    }

    /// Applies the ban policy after a failed request to `host`.
    ///
    /// Nothing is banned when fallback is disabled, since the origin may not
    /// be contacted anyway. Client errors ban the host for this origin only;
    /// unresponsive or fatal failures ban it everywhere. Server errors do not
    /// ban. Returns whether a ban was applied.
    pub fn report_host_error(
        &mut self,
        host: &str,
        original: &Url,
        error: &TransportError,
    ) -> bool {
        if self.fallback() == CacheFallback::Never {
            debug!(host, error = %error, "fallback disabled; not banning cache host");
            return false;
        }
        if error.is_client_error() {
            let Some(origin_host) = original.host_str() else {
                return false;
            };
            warn!(host, origin_host, error = %error, "cache host rejected request; banning for origin");
            self.ban_for_original_host(host, origin_host);
            true
        } else if error.is_unresponsive() || error.is_fatal() {
            warn!(host, error = %error, "cache host unresponsive; banning");
            self.ban(host);
            true
        } else {
            false
        }
    }
}

/// Rewrites `original` to be served by `cache_host` (`host` or `host:port`).
///
/// The port is replaced only when the cache host names a non-default one.
///
/// # Errors
///
/// Returns [`TransportError::InvalidUrl`] if `cache_host` is not a valid authority.
pub fn cache_host_url(original: &Url, cache_host: &str) -> Result<Url, TransportError> {
    let authority = Url::parse(&format!("http://{cache_host}"))
        .map_err(|_| TransportError::invalid_url(cache_host))?;
    let host = authority
        .host_str()
        .ok_or_else(|| TransportError::invalid_url(cache_host))?;

    let mut url = original.clone();
    url.set_host(Some(host))
        .map_err(|_| TransportError::invalid_url(cache_host))?;
    if let Some(port) = authority.port() {
        url.set_port(Some(port))
            .map_err(|()| TransportError::invalid_url(cache_host))?;
    }
    if let Some(origin_host) = original.host_str() {
        url.query_pairs_mut()
            .append_pair(CACHE_HOST_ORIGIN_QUERY_KEY, origin_host);
    }
    info!(cache_url = %url, "redirected request to cache host");
    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, MemoryConfig};

    fn manager(config: AgentConfig) -> MccManager {
        MccManager::new(Arc::new(MemoryConfig::new(config)), Duration::from_secs(300))
    }

    fn origin() -> Url {
        Url::parse("http://download.origin.com/pkg/file.bin?sig=abc").unwrap()
    }

    // ==================== URL rewriting ====================

    #[test]
    fn test_cache_host_url_swaps_host_and_records_origin() {
        let url = cache_host_url(&origin(), "10.0.0.5").unwrap();
        assert_eq!(
            url.as_str(),
            "http://10.0.0.5/pkg/file.bin?sig=abc&cacheHostOrigin=download.origin.com"
        );
    }

    #[test]
    fn test_cache_host_url_uses_explicit_port() {
        let url = cache_host_url(&origin(), "cache.local:8080").unwrap();
        assert_eq!(url.host_str(), Some("cache.local"));
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn test_cache_host_url_keeps_port_when_default() {
        let original = Url::parse("http://origin.com:9000/a").unwrap();
        let url = cache_host_url(&original, "cache.local:80").unwrap();
        assert_eq!(url.port(), Some(9000));
    }

    #[test]
    fn test_cache_host_url_rejects_garbage() {
        assert!(cache_host_url(&origin(), "bad host/").is_err());
    }

    // ==================== Host selection ====================

    #[test]
    fn test_next_host_none_without_config() {
        let mut mcc = manager(AgentConfig::default());
        assert_eq!(mcc.next_host(&origin()), None);
    }

    #[test]
    fn test_next_host_skips_banned_host() {
        let mut mcc = manager(AgentConfig {
            cache_host: Some("cache.local".to_string()),
            ..AgentConfig::default()
        });
        assert_eq!(mcc.next_host(&origin()).as_deref(), Some("cache.local"));

        mcc.ban_for_original_host("cache.local", "download.origin.com");
        assert_eq!(mcc.next_host(&origin()), None);

        let other = Url::parse("http://other.com/x").unwrap();
        assert_eq!(mcc.next_host(&other).as_deref(), Some("cache.local"));
    }

    // ==================== Ban policy ====================

    #[test]
    fn test_client_error_bans_for_origin_only() {
        let mut mcc = manager(AgentConfig {
            cache_host: Some("cache.local".to_string()),
            ..AgentConfig::default()
        });
        assert!(mcc.report_host_error("cache.local", &origin(), &TransportError::http_status(404)));
        assert!(mcc.is_banned("cache.local", &origin()));
        assert!(!mcc.is_banned("cache.local", &Url::parse("http://other.com/").unwrap()));
    }

    #[test]
    fn test_unresponsive_error_bans_everywhere() {
        let mut mcc = manager(AgentConfig::default());
        let err = TransportError::Timeout {
            url: "http://cache.local/".to_string(),
        };
        assert!(mcc.report_host_error("cache.local", &origin(), &err));
        assert!(mcc.is_banned("cache.local", &Url::parse("http://other.com/").unwrap()));
    }

    #[test]
    fn test_server_error_does_not_ban() {
        let mut mcc = manager(AgentConfig::default());
        assert!(!mcc.report_host_error("cache.local", &origin(), &TransportError::http_status(503)));
        assert!(!mcc.is_banned("cache.local", &origin()));
    }

    #[test]
    fn test_no_ban_when_fallback_disabled() {
        let mut mcc = manager(AgentConfig {
            fallback_delay_background_secs: Some(-1),
            ..AgentConfig::default()
        });
        assert!(!mcc.report_host_error("cache.local", &origin(), &TransportError::http_status(404)));
        assert!(!mcc.is_banned("cache.local", &origin()));
    }
}
