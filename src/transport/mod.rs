//! Asynchronous HTTP transport.
//!
//! A single [`TransferEngine`] multiplexes the transfers of every download.
//! Each download talks to it through its own [`HttpAgent`], which keeps at
//! most one transfer in flight, and receives progress through the
//! [`TransferEvents`] callbacks.
//!
//! # Features
//!
//! - Ranged GETs for resuming partially downloaded files
//! - Per-request proxy and connect timeout
//! - Stall detection (throughput floor over a sliding window)
//! - HTTP status classification into stable [`ErrorCode`](crate::ErrorCode)s

mod agent;
mod engine;
mod error;

pub use agent::HttpAgent;
pub use engine::{
    ByteRange, EngineSettings, ResponseHeaders, TransferEngine, TransferEvents, TransferHandle,
    TransferRequest,
};
pub use error::TransportError;

/// Replaces any userinfo in a URL so it can be logged.
#[must_use]
pub fn redact_credentials(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) => {
            if !url.username().is_empty() || url.password().is_some() {
                let _ = url.set_username("***");
                let _ = url.set_password(None);
            }
            url.to_string()
        }
        Err(_) => "<unparseable url>".to_string(),
    }
}
