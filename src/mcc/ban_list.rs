//! Time-bounded bans on cache hosts.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Default)]
struct BanRecord {
    /// Banned for every origin until this instant.
    unban_at: Option<Instant>,
    /// Banned only for the listed origin hosts.
    per_origin: HashMap<String, Instant>,
}

impl BanRecord {
    fn prune(&mut self, now: Instant) {
        if self.unban_at.is_some_and(|at| at <= now) {
            self.unban_at = None;
        }
        self.per_origin.retain(|_, at| *at > now);
    }

    fn is_empty(&self) -> bool {
        self.unban_at.is_none() && self.per_origin.is_empty()
    }
}

/// Hosts temporarily excluded from use.
///
/// Expired entries are dropped lazily when queried. Re-banning a host
/// replaces its unban time.
#[derive(Debug, Default)]
pub struct BanList {
    records: HashMap<String, BanRecord>,
}

impl BanList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bans `host` for all origins.
    pub fn ban(&mut self, host: &str, duration: Duration) {
        self.ban_at(host, duration, Instant::now());
    }

    /// Bans `host` only when serving content from `origin_host`.
    pub fn ban_for_origin(&mut self, host: &str, origin_host: &str, duration: Duration) {
        let unban_at = Instant::now() + duration;
        debug!(host, origin_host, ?duration, "banning cache host for origin");
        self.records
            .entry(host.to_ascii_lowercase())
            .or_default()
            .per_origin
            .insert(origin_host.to_ascii_lowercase(), unban_at);
    }

    /// True while `host` is banned, universally or for `origin_host`.
    pub fn is_banned(&mut self, host: &str, origin_host: Option<&str>) -> bool {
        self.is_banned_at(host, origin_host, Instant::now())
    }

    fn ban_at(&mut self, host: &str, duration: Duration, now: Instant) {
        debug!(host, ?duration, "banning cache host");
        self.records
            .entry(host.to_ascii_lowercase())
            .or_default()
            .unban_at = Some(now + duration);
    }

    fn is_banned_at(&mut self, host: &str, origin_host: Option<&str>, now: Instant) -> bool {
        let key = host.to_ascii_lowercase();
        let Some(record) = self.records.get_mut(&key) else {
            return false;
        };
        record.prune(now);
        let banned = record.unban_at.is_some()
            || origin_host
                .is_some_and(|origin| record.per_origin.contains_key(&origin.to_ascii_lowercase()));
        if record.is_empty() {
            self.records.remove(&key);
        }
        banned
    }

    /// Number of hosts with a live or not-yet-pruned ban.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
