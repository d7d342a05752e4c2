//! Error types shared by every public operation of the agent.
//!
//! Two layers exist:
//!
//! - [`ErrorCode`] is a small `Copy` value with a stable numeric wire value.
//!   It is what gets recorded on a download's status and what REST clients
//!   compare against.
//! - [`AgentError`] is the rich error returned synchronously by the
//!   [`DownloadManager`](crate::DownloadManager) API. Every variant maps to an
//!   [`ErrorCode`] through [`AgentError::code`].

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::download::DownloadState;
use crate::transport::TransportError;

/// Stable, caller-visible error classification.
///
/// The numeric values are part of the wire contract with existing clients
/// and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidArgument,
    InvalidState,
    NotFound,
    ReadOnlyProperty,
    UnknownProperty,
    NoUri,
    NoDestination,
    InvalidUrl,
    NoService,
    AlreadyExists,
    AccessDenied,
    OutOfMemory,
    NoProgress,
    NoNetwork,
    InsufficientRangeSupport,
    InvalidRange,
    BlockSizeMismatch,
    WriteFailure,
    ConnectFailure,
    Timeout,
    /// HTTP 3xx that was not followed.
    HttpRedirection,
    HttpBadRequest,
    HttpDenied,
    HttpForbidden,
    HttpNotFound,
    HttpNoneAcceptable,
    HttpProxyAuthRequired,
    HttpRequestTimeout,
    HttpRequestTooLarge,
    HttpServerError,
    HttpNotSupported,
    HttpBadGateway,
    HttpUnexpected,
    Unexpected,
}

impl ErrorCode {
    /// Numeric wire value of this code.
    #[must_use]
    pub const fn value(self) -> u32 {
        match self {
            Self::InvalidArgument => 0x8007_0057,
            Self::InvalidState => 0x80D0_2013,
            Self::NotFound => 0x80D0_2003,
            Self::ReadOnlyProperty => 0x80D0_2012,
            Self::UnknownProperty => 0x80D0_2011,
            Self::NoUri => 0x80D0_2200,
            Self::NoDestination => 0x80D0_2018,
            Self::InvalidUrl => 0x800C_0002,
            Self::NoService => 0x80D0_1001,
            Self::AlreadyExists => 0x8007_00B7,
            Self::AccessDenied => 0x8007_0005,
            Self::OutOfMemory => 0x8007_000E,
            Self::NoProgress => 0x80D0_2002,
            Self::NoNetwork => 0x80D0_3805,
            Self::InsufficientRangeSupport => 0x80D0_5011,
            Self::InvalidRange => 0x80D0_5010,
            Self::BlockSizeMismatch => 0x80D0_5001,
            Self::WriteFailure => 0x8007_001D,
            Self::ConnectFailure => 0x8007_2EFD,
            Self::Timeout => 0x8007_2EE2,
            Self::HttpRedirection => 0x8019_0003,
            Self::HttpBadRequest => 0x8019_0190,
            Self::HttpDenied => 0x8019_0191,
            Self::HttpForbidden => 0x8019_0193,
            Self::HttpNotFound => 0x8019_0194,
            Self::HttpNoneAcceptable => 0x8019_0196,
            Self::HttpProxyAuthRequired => 0x8019_0197,
            Self::HttpRequestTimeout => 0x8019_0198,
            Self::HttpRequestTooLarge => 0x8019_019D,
            Self::HttpServerError => 0x8019_01F4,
            Self::HttpNotSupported => 0x8019_01F5,
            Self::HttpBadGateway => 0x8019_01F6,
            Self::HttpUnexpected => 0x8019_0001,
            Self::Unexpected => 0x8000_FFFF,
        }
    }

    /// Classifies an HTTP status code.
    ///
    /// Returns `None` for the statuses a transfer treats as success
    /// (200, 201, 202, 203, 204, 206).
    #[must_use]
    pub fn from_http_status(status: u16) -> Option<Self> {
        let code = match status {
            200 | 201 | 202 | 203 | 204 | 206 => return None,
            300 | 500 | 503 => Self::HttpServerError,
            301..=303 => Self::HttpRedirection,
            404 | 410 => Self::HttpNotFound,
            305 | 502 | 504 => Self::HttpBadGateway,
            400 | 405 | 409 | 411 | 412 | 414 | 415 => Self::HttpBadRequest,
            401 => Self::HttpDenied,
            403 => Self::HttpForbidden,
            406 => Self::HttpNoneAcceptable,
            407 => Self::HttpProxyAuthRequired,
            408 => Self::HttpRequestTimeout,
            413 => Self::HttpRequestTooLarge,
            501 | 505 => Self::HttpNotSupported,
            _ => Self::HttpUnexpected,
        };
        Some(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} (0x{:08X})", self.value())
    }
}

/// Errors returned by the public download API.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A caller-supplied value was rejected.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Why the value was rejected.
        reason: String,
    },

    /// The requested transition or mutation is not allowed from the current state.
    #[error("operation not allowed while download is {state}")]
    InvalidState {
        /// State the download was in when the request arrived.
        state: DownloadState,
    },

    /// No download is registered under the given id.
    #[error("download {id} not found")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// Attempted to set a property that can only be read.
    #[error("property {property} is read-only")]
    ReadOnlyProperty {
        /// Property name.
        property: String,
    },

    /// Property name not recognised.
    #[error("unknown property {name}")]
    UnknownProperty {
        /// The name as supplied by the caller.
        name: String,
    },

    /// The download was started without a URL.
    #[error("download has no URL")]
    NoUri,

    /// The download was started without a destination path.
    #[error("download has no destination path")]
    NoDestination,

    /// The URL is not an absolute http(s) URL with a host.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The rejected URL string.
        url: String,
    },

    /// The manager is shutting down and accepts no new downloads.
    #[error("download service is shutting down")]
    NoService,

    /// Something that must be unique already exists.
    #[error("{what} already exists")]
    AlreadyExists {
        /// Description of the duplicate.
        what: String,
    },

    /// File system error on the destination file.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path being operated on.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The transport rejected a request before it was sent.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Unclassifiable failure, including panics caught on the task thread.
    #[error("unexpected failure: {reason}")]
    Unexpected {
        /// Description of what went wrong.
        reason: String,
    },
}

impl AgentError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Creates an invalid state error.
    #[must_use]
    pub fn invalid_state(state: DownloadState) -> Self {
        Self::InvalidState { state }
    }

    /// Creates a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a duplicate error.
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an unexpected error.
    pub fn unexpected(reason: impl Into<String>) -> Self {
        Self::Unexpected {
            reason: reason.into(),
        }
    }

    /// Stable classification of this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::InvalidState { .. } => ErrorCode::InvalidState,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::ReadOnlyProperty { .. } => ErrorCode::ReadOnlyProperty,
            Self::UnknownProperty { .. } => ErrorCode::UnknownProperty,
            Self::NoUri => ErrorCode::NoUri,
            Self::NoDestination => ErrorCode::NoDestination,
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::NoService => ErrorCode::NoService,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::Io { source, .. } => io_error_code(source),
            Self::Transport(err) => err.code(),
            Self::Unexpected { .. } => ErrorCode::Unexpected,
        }
    }
}

/// Maps an IO error from the destination file to an [`ErrorCode`].
#[must_use]
pub fn io_error_code(err: &io::Error) -> ErrorCode {
    match err.kind() {
        io::ErrorKind::AlreadyExists => ErrorCode::AlreadyExists,
        io::ErrorKind::PermissionDenied => ErrorCode::AccessDenied,
        io::ErrorKind::NotFound => ErrorCode::NoDestination,
        io::ErrorKind::OutOfMemory => ErrorCode::OutOfMemory,
        _ => ErrorCode::WriteFailure,
    }
}
