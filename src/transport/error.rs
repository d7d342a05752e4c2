//! Error types for the transfer engine.

use std::time::Duration;

use thiserror::Error;

use super::TransferHandle;
use crate::error::ErrorCode;

/// Why a transfer (or an attempt to start one) failed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
    },

    /// A ranged request was answered with something other than 206.
    #[error("server ignored range request (HTTP {status})")]
    RangeNotSupported {
        /// The status actually returned.
        status: u16,
    },

    /// TCP/TLS connection could not be established.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        /// Target URL.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server did not respond in time.
    #[error("timeout talking to {url}")]
    Timeout {
        /// Target URL.
        url: String,
    },

    /// Throughput stayed below the stall threshold for a whole window.
    #[error("transfer stalled: {bytes} bytes received in {window:?}")]
    Stalled {
        /// Bytes received during the window.
        bytes: u64,
        /// Length of the measurement window.
        window: Duration,
    },

    /// Any other network failure while the transfer was in flight.
    #[error("network error on {url}: {source}")]
    Network {
        /// Target URL.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The body length differs from what the server announced.
    #[error("response body length mismatch: announced {expected} bytes, received {received}")]
    BodyLengthMismatch {
        /// Announced body length.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },

    /// The data consumer rejected a chunk.
    #[error("data sink rejected chunk: {code}")]
    Sink {
        /// Error reported by the consumer.
        code: ErrorCode,
    },

    /// The URL is not an absolute http(s) URL with a host.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The rejected URL string.
        url: String,
    },

    /// The proxy URL could not be used.
    #[error("invalid proxy {proxy}: {source}")]
    InvalidProxy {
        /// Proxy URL with credentials removed.
        proxy: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The engine's async runtime could not be created.
    #[error("failed to start transfer runtime: {source}")]
    Runtime {
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A transfer with this handle is already registered.
    #[error("transfer {handle} already registered")]
    AlreadyExists {
        /// The duplicate handle.
        handle: TransferHandle,
    },

    /// The engine has shut down.
    #[error("transfer engine stopped")]
    EngineStopped,

    /// The transfer task panicked.
    #[error("transfer task panicked")]
    Panicked,
}

impl TransportError {
    /// Creates an HTTP status error.
    #[must_use]
    pub fn http_status(status: u16) -> Self {
        Self::HttpStatus { status }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Classifies a reqwest error raised while talking to `url`.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else if source.is_connect() {
            Self::Connect { url, source }
        } else {
            Self::Network { url, source }
        }
    }

    /// HTTP status carried by this error, if the server answered at all.
    #[must_use]
    pub fn http_status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status } | Self::RangeNotSupported { status } => Some(*status),
            _ => None,
        }
    }

    /// True for an HTTP 4xx answer.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::HttpStatus { status } if (400..500).contains(status))
    }

    /// True when the remote end never gave a usable answer
    /// (connect failure, timeout, stall, or transport-level network error).
    #[must_use]
    pub fn is_unresponsive(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Timeout { .. } | Self::Stalled { .. } | Self::Network { .. }
        )
    }

    /// True for failures that retrying cannot fix.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Sink { .. }
                | Self::InvalidUrl { .. }
                | Self::InvalidProxy { .. }
                | Self::RangeNotSupported { .. }
                | Self::Client { .. }
                | Self::Runtime { .. }
                | Self::AlreadyExists { .. }
                | Self::EngineStopped
                | Self::Panicked
        ) || matches!(self.code(), ErrorCode::OutOfMemory | ErrorCode::WriteFailure)
    }

    /// Stable classification of this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::HttpStatus { status } => {
                ErrorCode::from_http_status(*status).unwrap_or(ErrorCode::HttpUnexpected)
            }
            Self::RangeNotSupported { .. } => ErrorCode::InsufficientRangeSupport,
            Self::Connect { .. } | Self::Network { .. } => ErrorCode::ConnectFailure,
            Self::Timeout { .. } | Self::Stalled { .. } => ErrorCode::Timeout,
            Self::BodyLengthMismatch { .. } => ErrorCode::BlockSizeMismatch,
            Self::Sink { code } => *code,
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::InvalidProxy { .. } => ErrorCode::InvalidArgument,
            Self::Client { .. } | Self::Runtime { .. } | Self::Panicked => ErrorCode::Unexpected,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::EngineStopped => ErrorCode::NoService,
        }
    }
}
