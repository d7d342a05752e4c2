//! Per-download view of the transfer engine.

use std::sync::Arc;

use tracing::{debug, instrument};
use url::Url;

use super::engine::{TransferEngine, TransferEvents, TransferHandle, TransferRequest};
use super::error::TransportError;
use super::redact_credentials;

/// Issues at most one transfer at a time on behalf of a single download.
pub struct HttpAgent {
    engine: Arc<TransferEngine>,
    events: Arc<dyn TransferEvents>,
    active: Option<TransferHandle>,
}

impl std::fmt::Debug for HttpAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAgent")
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl HttpAgent {
    #[must_use]
    pub fn new(engine: Arc<TransferEngine>, events: Arc<dyn TransferEvents>) -> Self {
        Self {
            engine,
            events,
            active: None,
        }
    }

    /// Parses and checks that `raw` is an absolute http(s) URL with a host.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] otherwise.
    pub fn validate_url(raw: &str) -> Result<Url, TransportError> {
        let url = Url::parse(raw).map_err(|_| TransportError::invalid_url(raw))?;
        let has_host = url.host_str().is_some_and(|host| !host.is_empty());
        if matches!(url.scheme(), "http" | "https") && has_host {
            Ok(url)
        } else {
            Err(TransportError::invalid_url(raw))
        }
    }

    /// Starts a GET, cancelling any transfer this agent still has in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not http(s) or the engine refuses the transfer.
    #[instrument(skip(self, request), fields(url = %request.url, proxy = ?request.proxy.as_deref().map(redact_credentials)))]
    pub fn send_request(
        &mut self,
        request: TransferRequest,
    ) -> Result<TransferHandle, TransportError> {
        self.close();
        Self::validate_url(request.url.as_str())?;

        let handle = self.engine.allocate_handle();
        self.engine.add(handle, request, Arc::clone(&self.events))?;
        debug!(%handle, "request submitted");
        self.active = Some(handle);
        Ok(handle)
    }

    /// Cancels the in-flight transfer and waits until its callbacks have drained.
    pub fn close(&mut self) {
        if let Some(handle) = self.active.take() {
            self.engine.remove(handle);
        }
    }

    /// Handle of the transfer most recently sent, until [`close`](Self::close).
    #[must_use]
    pub fn active_handle(&self) -> Option<TransferHandle> {
        self.active
    }
}

impl Drop for HttpAgent {
    fn drop(&mut self) {
        self.close();
    }
}
