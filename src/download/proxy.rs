//! Proxy discovery and rotation.

use tracing::debug;
use url::Url;

use crate::transport::redact_credentials;

/// Discovers proxies that may be used to reach a URL.
pub trait ProxyResolver: Send + Sync {
    /// Ordered candidates; empty means connect directly.
    fn resolve_proxies(&self, url: &Url) -> Vec<String>;
}

/// Resolves proxies from the conventional environment variables.
///
/// Scheme-specific variables (`HTTPS_PROXY`/`HTTP_PROXY`) take precedence
/// over `ALL_PROXY`; upper-case names win over lower-case ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvProxyResolver;

impl ProxyResolver for EnvProxyResolver {
    fn resolve_proxies(&self, url: &Url) -> Vec<String> {
        env_proxy_for_scheme(url.scheme()).into_iter().collect()
    }
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    match scheme {
        "https" => find_first_proxy_var(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]),
        "http" => find_first_proxy_var(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]),
        _ => None,
    }
}

fn find_first_proxy_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Fixed proxy list, independent of the URL.
#[derive(Debug, Default, Clone)]
pub struct StaticProxyResolver {
    proxies: Vec<String>,
}

impl StaticProxyResolver {
    #[must_use]
    pub fn new(proxies: Vec<String>) -> Self {
        Self { proxies }
    }

    /// Resolver that always connects directly.
    #[must_use]
    pub fn direct() -> Self {
        Self::default()
    }
}

impl ProxyResolver for StaticProxyResolver {
    fn resolve_proxies(&self, _url: &Url) -> Vec<String> {
        self.proxies.clone()
    }
}

/// Round-robin over the proxies discovered for a download's URL.
#[derive(Debug, Default, Clone)]
pub struct ProxyList {
    proxies: Vec<String>,
    cursor: usize,
}

impl ProxyList {
    /// Re-discovers proxies for `url` and restarts the rotation.
    ///
    /// `direct://` entries are dropped; an empty list means direct connection.
    pub fn refresh(&mut self, resolver: &dyn ProxyResolver, url: &Url) {
        self.proxies = resolver
            .resolve_proxies(url)
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("direct://"))
            .collect();
        self.cursor = 0;
        debug!(
            proxies = ?self.proxies.iter().map(|p| redact_credentials(p)).collect::<Vec<_>>(),
            "proxy list refreshed"
        );
    }

    /// Next proxy in rotation, or `None` for a direct connection.
    pub fn next(&mut self) -> Option<&str> {
        if self.proxies.is_empty() {
            return None;
        }
        let index = self.cursor % self.proxies.len();
        self.cursor = (index + 1) % self.proxies.len();
        self.proxies.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
