//! Download identity, lifecycle state, status snapshots, and property keys.

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{AgentError, ErrorCode};

/// Opaque unique identifier of a download.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DownloadId(String);

impl DownloadId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DownloadId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DownloadId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for DownloadId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Deref for DownloadId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DownloadState {
    Created,
    Transferring,
    Transferred,
    Paused,
    Finalized,
    Aborted,
}

impl DownloadState {
    /// Finalized and Aborted accept no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Aborted)
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Transferring => "Transferring",
            Self::Transferred => "Transferred",
            Self::Paused => "Paused",
            Self::Finalized => "Finalized",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// Point-in-time snapshot of a download's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatus {
    pub state: DownloadState,
    /// Total size; 0 until the server reports it.
    pub bytes_total: u64,
    pub bytes_transferred: u64,
    pub error: Option<ErrorCode>,
    pub extended_error: Option<ErrorCode>,
}

impl DownloadStatus {
    /// No primary error but a recorded cause: the download is waiting to recover.
    #[must_use]
    pub fn is_transient_error(&self) -> bool {
        self.error.is_none() && self.extended_error.is_some()
    }
}

/// Property keys accepted by get/set property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadProperty {
    /// Read-only.
    Id,
    Uri,
    LocalPath,
    NoProgressTimeoutSeconds,
}

impl DownloadProperty {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "Id",
            Self::Uri => "Uri",
            Self::LocalPath => "LocalPath",
            Self::NoProgressTimeoutSeconds => "NoProgressTimeoutSeconds",
        }
    }
}

impl fmt::Display for DownloadProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DownloadProperty {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Id,
            Self::Uri,
            Self::LocalPath,
            Self::NoProgressTimeoutSeconds,
        ]
        .into_iter()
        .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| AgentError::UnknownProperty {
            name: s.to_string(),
        })
    }
}
