//! Choice between the cache host and the origin for each request.
//!
//! The cache host is opportunistic and the origin is authoritative, so the
//! rules are deliberately lopsided:
//!
//! - every fresh start (Start, resume, recovery) prefers the cache host
//! - after [`ATTEMPTS_BEFORE_HOST_SWITCH`] consecutive failed attempts without
//!   progress the other type is tried; leaving the cache host for an origin
//!   that was never tried happens without waiting
//! - once the configured fallback deadline passes, the cache host is
//!   abandoned for the rest of the download
//! - with fallback disabled the cache host is never left on its own accord

use std::fmt;
use std::time::Instant;

use crate::config::CacheFallback;
use crate::constants::ATTEMPTS_BEFORE_HOST_SWITCH;

/// Where a request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    CacheHost,
    Origin,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheHost => f.write_str("cache-host"),
            Self::Origin => f.write_str("origin"),
        }
    }
}

/// Per-download connection selection state.
#[derive(Debug, Clone)]
pub struct ConnectionPolicy {
    fallback: CacheFallback,
    deadline: Option<Instant>,
    cache_host_allowed: bool,
    current: Option<ConnectionType>,
    preferred: ConnectionType,
    attempts: u32,
    origin_tried: bool,
    switch_after: u32,
}

impl ConnectionPolicy {
    /// Policy for a download started at `started`.
    #[must_use]
    pub fn new(fallback: CacheFallback, started: Instant) -> Self {
        let deadline = match fallback {
            CacheFallback::After(delay) => Some(started + delay),
            CacheFallback::Never => None,
        };
        Self {
            fallback,
            deadline,
            cache_host_allowed: true,
            current: None,
            preferred: ConnectionType::CacheHost,
            attempts: 0,
            origin_tried: false,
            switch_after: ATTEMPTS_BEFORE_HOST_SWITCH,
        }
    }

    /// Begins a new round of attempts, preferring the cache host again.
    pub fn restart(&mut self) {
        self.current = None;
        self.preferred = ConnectionType::CacheHost;
        self.attempts = 0;
    }

    /// Picks the type for the next request.
    ///
    /// `cache_host_usable` tells whether a cache host is configured and not
    /// banned for this origin.
    pub fn select(&mut self, cache_host_usable: bool) -> ConnectionType {
        let chosen = if self.preferred == ConnectionType::CacheHost
            && self.cache_host_allowed
            && cache_host_usable
        {
            ConnectionType::CacheHost
        } else {
            ConnectionType::Origin
        };

        if self.current == Some(chosen) {
            self.attempts += 1;
        } else {
            self.current = Some(chosen);
            self.attempts = 1;
        }
        if chosen == ConnectionType::Origin {
            self.origin_tried = true;
        }
        chosen
    }

    /// Records a failed request and decides the next preference.
    ///
    /// Returns `true` when the retry should be sent without delay because the
    /// cache host is being abandoned.
    pub fn on_failure(&mut self, made_progress: bool, now: Instant) -> bool {
        if made_progress {
            self.attempts = 0;
        }
        let on_cache_host = self.current == Some(ConnectionType::CacheHost);

        if self.cache_host_allowed && self.deadline.is_some_and(|deadline| now >= deadline) {
            self.cache_host_allowed = false;
            self.preferred = ConnectionType::Origin;
            return on_cache_host;
        }

        match self.current {
            Some(ConnectionType::CacheHost) => {
                if self.fallback == CacheFallback::Never || self.attempts < self.switch_after {
                    self.preferred = ConnectionType::CacheHost;
                    return false;
                }
                self.preferred = ConnectionType::Origin;
                !self.origin_tried
            }
            Some(ConnectionType::Origin) => {
                self.preferred = if self.attempts >= self.switch_after && self.cache_host_allowed {
                    ConnectionType::CacheHost
                } else {
                    ConnectionType::Origin
                };
                false
            }
            None => false,
        }
    }

    /// Whether client errors (4xx) end the download instead of being retried.
    #[must_use]
    pub fn fail_fast(&self) -> bool {
        match self.current {
            Some(ConnectionType::Origin) => true,
            Some(ConnectionType::CacheHost) => self.fallback == CacheFallback::Never,
            None => false,
        }
    }

    /// Consecutive attempts on the current type.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn cache_host_allowed(&self) -> bool {
        self.cache_host_allowed
    }
}
