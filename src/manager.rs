//! Thread-safe registry of downloads.
//!
//! # Overview
//!
//! [`DownloadManager`] is the public face of the agent. It owns the task
//! thread, the transfer engine and every [`Download`]. Each call looks the
//! download up and runs the operation on the task thread, blocking until it
//! finishes, so callers on any thread see a synchronous API while all state
//! mutation stays on one thread.
//!
//! # Example
//!
//! ```no_run
//! use download_agent::{AgentContext, DownloadManager, DownloadState};
//!
//! # fn main() -> Result<(), download_agent::AgentError> {
//! let manager = DownloadManager::new(AgentContext::default())?;
//! let id = manager.create_download("http://example.com/update.bin", "/tmp/update.bin")?;
//! manager.start_download(&id)?;
//! while manager.get_status(&id)?.state == DownloadState::Transferring {
//!     std::thread::sleep(std::time::Duration::from_millis(200));
//! }
//! manager.finalize_download(&id)?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::context::AgentContext;
use crate::download::{
    Download, DownloadId, DownloadProperty, DownloadServices, DownloadStatus, SharedDownload,
};
use crate::error::AgentError;
use crate::mcc::MccManager;
use crate::threading::TaskThread;
use crate::transport::{TransferEngine, redact_credentials};

/// Registry mapping download ids to downloads.
pub struct DownloadManager {
    downloads: DashMap<DownloadId, SharedDownload>,
    /// Cleared by [`is_idle`](Self::is_idle) once the registry empties.
    accepting: Mutex<bool>,
    services: DownloadServices,
    // Declared last so it outlives everything that schedules onto it.
    thread: TaskThread,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("downloads", &self.downloads.len())
            .field("accepting", &*self.accepting.lock())
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// Starts the task thread and the transfer engine.
    ///
    /// # Errors
    ///
    /// Fails if either worker thread cannot be started.
    pub fn new(context: AgentContext) -> Result<Self, AgentError> {
        let thread = TaskThread::spawn("download-tasks")?;
        let engine = Arc::new(TransferEngine::new(context.engine.clone())?);
        let mcc = Arc::new(Mutex::new(MccManager::new(
            Arc::clone(&context.config),
            context.timings.cache_host_ban_interval,
        )));
        let services = DownloadServices {
            context: Arc::new(context),
            engine,
            mcc,
            scheduler: thread.scheduler().clone(),
        };
        debug!("download manager started");
        Ok(Self {
            downloads: DashMap::new(),
            accepting: Mutex::new(true),
            services,
            thread,
        })
    }

    /// Registers a new download in the Created state.
    ///
    /// `url` may be empty and set later through [`DownloadProperty::Uri`].
    ///
    /// # Errors
    ///
    /// - [`AgentError::NoService`] once the manager stopped accepting work
    /// - [`AgentError::InvalidUrl`] for a malformed non-empty URL
    /// - [`AgentError::AlreadyExists`] if the id generator repeats itself
    #[instrument(skip(self, url, path), fields(url = %redact_credentials(url)))]
    pub fn create_download(
        &self,
        url: &str,
        path: impl Into<PathBuf>,
    ) -> Result<DownloadId, AgentError> {
        let accepting = self.accepting.lock();
        if !*accepting {
            return Err(AgentError::NoService);
        }

        let id = self.services.context.ids.next_id();
        let download = Download::create(
            id.clone(),
            url.to_string(),
            path.into(),
            self.services.clone(),
        )?;
        match self.downloads.entry(id.clone()) {
            Entry::Occupied(_) => Err(AgentError::already_exists(format!("download {id}"))),
            Entry::Vacant(slot) => {
                slot.insert(download);
                info!(id = %id, "download created");
                Ok(id)
            }
        }
    }

    /// # Errors
    ///
    /// [`AgentError::NotFound`] for an unknown id, otherwise whatever the
    /// transition reports.
    #[instrument(skip(self))]
    pub fn start_download(&self, id: &str) -> Result<(), AgentError> {
        self.run_on(id, true, Download::start)?
    }

    /// # Errors
    ///
    /// [`AgentError::NotFound`] for an unknown id, otherwise whatever the
    /// transition reports.
    #[instrument(skip(self))]
    pub fn pause_download(&self, id: &str) -> Result<(), AgentError> {
        self.run_on(id, true, Download::pause)?
    }

    /// Finalizes a transferred download and removes it from the registry.
    ///
    /// # Errors
    ///
    /// [`AgentError::NotFound`] for an unknown id; [`AgentError::InvalidState`]
    /// unless the download is Transferred, in which case it stays registered.
    #[instrument(skip(self))]
    pub fn finalize_download(&self, id: &str) -> Result<(), AgentError> {
        self.run_on(id, true, Download::finalize)??;
        self.downloads.remove(id);
        info!(id, "download finalized");
        Ok(())
    }

    /// Aborts a download and removes it from the registry, even when the
    /// transition itself fails.
    ///
    /// # Errors
    ///
    /// [`AgentError::NotFound`] for an unknown id, otherwise whatever the
    /// transition reports.
    #[instrument(skip(self))]
    pub fn abort_download(&self, id: &str) -> Result<(), AgentError> {
        let result = self.run_on(id, true, Download::abort);
        if matches!(result, Err(AgentError::NotFound { .. })) {
            return result.and_then(|r| r);
        }
        self.downloads.remove(id);
        info!(id, "download aborted");
        result.and_then(|r| r)
    }

    /// # Errors
    ///
    /// [`AgentError::NotFound`] for an unknown id; validation errors from the download.
    #[instrument(skip(self, value))]
    pub fn set_property(
        &self,
        id: &str,
        property: DownloadProperty,
        value: &str,
    ) -> Result<(), AgentError> {
        let value = value.to_string();
        self.run_on(id, true, move |d| d.set_property(property, &value))?
    }

    /// # Errors
    ///
    /// [`AgentError::NotFound`] for an unknown id.
    #[instrument(skip(self))]
    pub fn get_property(&self, id: &str, property: DownloadProperty) -> Result<String, AgentError> {
        self.run_on(id, true, move |d| d.get_property(property))
    }

    /// Status snapshot, taken after every operation already queued.
    ///
    /// # Errors
    ///
    /// [`AgentError::NotFound`] for an unknown id.
    pub fn get_status(&self, id: &str) -> Result<DownloadStatus, AgentError> {
        self.run_on(id, false, |d| d.status())
    }

    /// True when no downloads are registered.
    ///
    /// Also stops accepting new downloads while idle, so a caller shutting
    /// down on idleness cannot race a concurrent create.
    pub fn is_idle(&self) -> bool {
        let mut accepting = self.accepting.lock();
        let idle = self.downloads.is_empty();
        *accepting = !idle;
        idle
    }

    /// Ids of every registered download.
    #[must_use]
    pub fn download_ids(&self) -> Vec<DownloadId> {
        self.downloads.iter().map(|entry| entry.key().clone()).collect()
    }

    fn get(&self, id: &str) -> Result<SharedDownload, AgentError> {
        // Clone the Arc so the map shard is unlocked before blocking.
        self.downloads
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AgentError::not_found(id))
    }

    fn run_on<T, F>(&self, id: &str, immediate: bool, f: F) -> Result<T, AgentError>
    where
        F: FnOnce(&mut Download) -> T + Send + 'static,
        T: Send + 'static,
    {
        let download = self.get(id)?;
        self.thread
            .sched_block(move || f(&mut *download.lock()), immediate)
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        let downloads: Vec<SharedDownload> = self
            .downloads
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        if downloads.is_empty() {
            return;
        }
        debug!(count = downloads.len(), "closing downloads");
        let closed = self.thread.sched_block(
            move || {
                for download in downloads {
                    download.lock().close();
                }
            },
            true,
        );
        if let Err(e) = closed {
            warn!(error = %e, "failed to close downloads on shutdown");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::context::IdGenerator;
    use crate::download::DownloadState;
    use crate::error::ErrorCode;

    struct RepeatingIds;

    impl IdGenerator for RepeatingIds {
        fn next_id(&self) -> DownloadId {
            DownloadId::from("same-id")
        }
    }

    fn manager() -> DownloadManager {
        DownloadManager::new(AgentContext::default()).unwrap()
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let manager = manager();
        let calls: Vec<Result<(), AgentError>> = vec![
            manager.start_download("missing"),
            manager.pause_download("missing"),
            manager.finalize_download("missing"),
            manager.abort_download("missing"),
            manager.set_property("missing", DownloadProperty::Uri, "http://a.com/"),
            manager.get_property("missing", DownloadProperty::Uri).map(|_| ()),
            manager.get_status("missing").map(|_| ()),
        ];
        for result in calls {
            assert_eq!(result.unwrap_err().code(), ErrorCode::NotFound);
        }
    }

    #[test]
    fn test_create_registers_download_in_created_state() {
        let manager = manager();
        let temp = TempDir::new().unwrap();
        let id = manager
            .create_download("http://example.com/file", temp.path().join("file"))
            .unwrap();
        let status = manager.get_status(&id).unwrap();
        assert_eq!(status.state, DownloadState::Created);
        assert_eq!(status.bytes_transferred, 0);
        assert_eq!(manager.download_ids(), vec![id.clone()]);
        assert_eq!(
            manager.get_property(&id, DownloadProperty::Id).unwrap(),
            id.to_string()
        );
    }

    #[test]
    fn test_create_rejects_invalid_url() {
        let manager = manager();
        let err = manager.create_download("invalidurihttp", "/tmp/x").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidUrl);
        assert!(manager.download_ids().is_empty());
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let manager =
            DownloadManager::new(AgentContext::default().with_ids(Arc::new(RepeatingIds))).unwrap();
        manager.create_download("", "/tmp/a").unwrap();
        let err = manager.create_download("", "/tmp/b").unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
    }

    #[test]
    fn test_is_idle_stops_accepting_until_work_exists() {
        let manager = manager();
        assert!(manager.is_idle());
        let err = manager.create_download("", "/tmp/a").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoService);
    }

    #[test]
    fn test_is_idle_false_with_downloads() {
        let manager = manager();
        manager.create_download("", "/tmp/a").unwrap();
        assert!(!manager.is_idle());
        assert!(manager.create_download("", "/tmp/b").is_ok());
    }

    #[test]
    fn test_abort_removes_even_created_download() {
        let manager = manager();
        let id = manager.create_download("", "/tmp/a").unwrap();
        manager.abort_download(&id).unwrap();
        assert_eq!(
            manager.get_status(&id).unwrap_err().code(),
            ErrorCode::NotFound
        );
    }

    #[test]
    fn test_finalize_from_created_keeps_registration() {
        let manager = manager();
        let id = manager.create_download("", "/tmp/a").unwrap();
        let err = manager.finalize_download(&id).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
        assert!(manager.get_status(&id).is_ok());
    }
}
