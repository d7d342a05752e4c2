//! One download: lifecycle state machine and transfer orchestration.
//!
//! A [`Download`] is only ever mutated on the task thread. Transport
//! callbacks arrive on the engine thread; the event sink appends body bytes
//! to the destination file there and posts a `DownloadEvent` back to the
//! task thread for everything else. Scheduled work holds a weak reference,
//! so a download removed from the registry simply stops.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::connection::{ConnectionPolicy, ConnectionType};
use super::progress::{ProgressTracker, max_no_progress_intervals};
use super::proxy::ProxyList;
use super::state::{DownloadId, DownloadProperty, DownloadState, DownloadStatus};
use crate::config::CacheFallback;
use crate::constants::DEFAULT_MAX_NO_PROGRESS_INTERVALS;
use crate::context::AgentContext;
use crate::error::{AgentError, ErrorCode, io_error_code};
use crate::mcc::{MccManager, cache_host_url};
use crate::threading::{TaskScheduler, TaskTag};
use crate::transport::{
    ByteRange, HttpAgent, ResponseHeaders, TransferEngine, TransferEvents, TransferHandle,
    TransferRequest, TransportError,
};

/// Download shared between the registry and scheduled work.
pub type SharedDownload = Arc<Mutex<Download>>;

/// Everything a download needs from its manager.
#[derive(Clone)]
pub struct DownloadServices {
    pub context: Arc<AgentContext>,
    pub engine: Arc<TransferEngine>,
    pub mcc: Arc<Mutex<MccManager>>,
    pub scheduler: TaskScheduler,
}

/// Destination file, written from the engine thread.
#[derive(Debug, Default)]
struct DestinationFile {
    handle: Option<File>,
    /// Bytes in the file, counting from offset 0.
    written: u64,
}

type SharedFile = Arc<Mutex<DestinationFile>>;

/// Transport progress handed from the engine thread to the task thread.
#[derive(Debug)]
enum DownloadEvent {
    Headers {
        handle: TransferHandle,
        headers: ResponseHeaders,
    },
    Data {
        /// Absolute size of the destination file after the write.
        bytes_written: u64,
    },
    Complete {
        handle: TransferHandle,
        result: Result<(), TransportError>,
    },
}

/// Receives transport callbacks for one download.
struct DownloadEventSink {
    scheduler: TaskScheduler,
    target: Weak<Mutex<Download>>,
    tag: TaskTag,
    file: SharedFile,
}

impl DownloadEventSink {
    fn post(&self, event: DownloadEvent) {
        let target = self.target.clone();
        self.scheduler.schedule(
            move || {
                if let Some(download) = target.upgrade() {
                    download.lock().handle_event(event);
                }
            },
            Duration::ZERO,
            Some(self.tag),
        );
    }
}

impl TransferEvents for DownloadEventSink {
    fn on_headers_available(&self, handle: TransferHandle, headers: &ResponseHeaders) {
        self.post(DownloadEvent::Headers {
            handle,
            headers: *headers,
        });
    }

    fn on_data(&self, _handle: TransferHandle, chunk: &[u8]) -> Result<(), ErrorCode> {
        let bytes_written = {
            let mut file = self.file.lock();
            let Some(handle) = file.handle.as_mut() else {
                return Err(ErrorCode::WriteFailure);
            };
            handle.write_all(chunk).map_err(|e| io_error_code(&e))?;
            file.written += chunk.len() as u64;
            file.written
        };
        self.post(DownloadEvent::Data { bytes_written });
        Ok(())
    }

    fn on_complete(&self, handle: TransferHandle, result: Result<(), TransportError>) {
        self.post(DownloadEvent::Complete { handle, result });
    }
}

/// What a requested state change does from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    NoOp,
    Start,
    Resume,
    Pause,
    Finalize,
    Abort,
}

/// Looks up the transition table.
///
/// # Errors
///
/// Returns [`AgentError::InvalidState`] for every pair the table does not allow.
pub(crate) fn plan_transition(
    from: DownloadState,
    requested: DownloadState,
) -> Result<Transition, AgentError> {
    use DownloadState::{Aborted, Created, Finalized, Paused, Transferred, Transferring};

    if from == requested {
        return Ok(Transition::NoOp);
    }
    match (from, requested) {
        (Created, Transferring) => Ok(Transition::Start),
        (Created, Paused) => Ok(Transition::NoOp),
        (Transferring, Paused) => Ok(Transition::Pause),
        (Transferred, Finalized) => Ok(Transition::Finalize),
        (Paused, Transferring) => Ok(Transition::Resume),
        (Created | Transferring | Transferred | Paused, Aborted) => Ok(Transition::Abort),
        _ => Err(AgentError::invalid_state(from)),
    }
}

/// A single download request.
pub struct Download {
    id: DownloadId,
    url: String,
    path: PathBuf,
    state: DownloadState,
    bytes_total: u64,
    bytes_transferred: u64,
    error: Option<ErrorCode>,
    extended_error: Option<ErrorCode>,
    http_status: Option<u16>,
    no_progress_timeout: Option<Duration>,

    services: DownloadServices,
    this: Weak<Mutex<Download>>,
    /// Tags events, retries and network re-probes.
    tag: TaskTag,
    progress_tag: TaskTag,

    file: SharedFile,
    file_created: bool,
    agent: Option<HttpAgent>,
    request_active: bool,
    progress: ProgressTracker,
    proxies: ProxyList,
    policy: ConnectionPolicy,
    /// Cache host serving the current or last request.
    cache_host: Option<String>,
    attempt_start_bytes: u64,
    transfer_started: Option<Instant>,
    transfer_elapsed: Duration,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("path", &self.path)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Download {
    /// Creates a download in the Created state.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidUrl`] if `url` is non-empty but not an
    /// absolute http(s) URL.
    pub fn create(
        id: DownloadId,
        url: String,
        path: PathBuf,
        services: DownloadServices,
    ) -> Result<SharedDownload, AgentError> {
        if !url.is_empty() {
            HttpAgent::validate_url(&url).map_err(|_| AgentError::invalid_url(&url))?;
        }
        let timings = services.context.timings;
        let tag = services.scheduler.allocate_tag();
        let progress_tag = services.scheduler.allocate_tag();
        info!(id = %id, url = %url, path = %path.display(), "new download");

        Ok(Arc::new_cyclic(|this| {
            Mutex::new(Self {
                id,
                url,
                path,
                state: DownloadState::Created,
                bytes_total: 0,
                bytes_transferred: 0,
                error: None,
                extended_error: None,
                http_status: None,
                no_progress_timeout: None,
                services,
                this: this.clone(),
                tag,
                progress_tag,
                file: Arc::new(Mutex::new(DestinationFile::default())),
                file_created: false,
                agent: None,
                request_active: false,
                progress: ProgressTracker::new(timings.initial_retry_delay, timings.max_retry_delay),
                proxies: ProxyList::default(),
                policy: ConnectionPolicy::new(CacheFallback::After(Duration::ZERO), Instant::now()),
                cache_host: None,
                attempt_start_bytes: 0,
                transfer_started: None,
                transfer_elapsed: Duration::ZERO,
            })
        }))
    }

    #[must_use]
    pub fn id(&self) -> &DownloadId {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> DownloadState {
        self.state
    }

    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        DownloadStatus {
            state: self.state,
            bytes_total: self.bytes_total,
            bytes_transferred: self.bytes_transferred,
            error: self.error,
            extended_error: self.extended_error,
        }
    }

    /// Time spent with a request in flight, across all attempts.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.transfer_elapsed + self.transfer_started.map_or(Duration::ZERO, |s| s.elapsed())
    }

    /// Requests Transferring: starts or resumes.
    ///
    /// # Errors
    ///
    /// Fails on an illegal transition or if the first request cannot be issued.
    pub fn start(&mut self) -> Result<(), AgentError> {
        self.change_state(DownloadState::Transferring)
    }

    /// # Errors
    ///
    /// Fails with [`AgentError::InvalidState`] from Transferred, Finalized or Aborted.
    pub fn pause(&mut self) -> Result<(), AgentError> {
        self.change_state(DownloadState::Paused)
    }

    /// # Errors
    ///
    /// Fails with [`AgentError::InvalidState`] unless Transferred.
    pub fn finalize(&mut self) -> Result<(), AgentError> {
        self.change_state(DownloadState::Finalized)
    }

    /// # Errors
    ///
    /// Fails with [`AgentError::InvalidState`] once Finalized.
    pub fn abort(&mut self) -> Result<(), AgentError> {
        self.change_state(DownloadState::Aborted)
    }

    #[instrument(skip(self), fields(id = %self.id, from = %self.state))]
    fn change_state(&mut self, requested: DownloadState) -> Result<(), AgentError> {
        match plan_transition(self.state, requested)? {
            Transition::NoOp => {
                if self.state == DownloadState::Paused && self.is_waiting_for_network() {
                    debug!("explicit pause cancels network wait");
                    self.services.scheduler.unschedule(self.tag);
                    self.extended_error = None;
                }
            }
            Transition::Start => self.do_start()?,
            Transition::Resume => self.do_resume()?,
            Transition::Pause => {
                self.teardown();
                self.enter_paused(None, None);
            }
            Transition::Finalize => {
                self.teardown();
                self.agent = None;
                self.state = DownloadState::Finalized;
            }
            Transition::Abort => self.do_abort(),
        }
        debug!(to = %self.state, "state change complete");
        Ok(())
    }

    fn do_start(&mut self) -> Result<(), AgentError> {
        if self.url.is_empty() {
            return Err(AgentError::NoUri);
        }
        if self.path.as_os_str().is_empty() {
            return Err(AgentError::NoDestination);
        }
        let url = HttpAgent::validate_url(&self.url).map_err(|_| AgentError::invalid_url(&self.url))?;

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| AgentError::io(&self.path, e))?;
        *self.file.lock() = DestinationFile {
            handle: Some(file),
            written: 0,
        };
        self.file_created = true;

        self.agent = Some(self.new_agent());
        self.proxies
            .refresh(self.services.context.proxies.as_ref(), &url);
        let fallback = self.services.mcc.lock().fallback();
        self.policy = ConnectionPolicy::new(fallback, Instant::now());
        self.progress.reset();

        if let Err(e) = self.send_request() {
            warn!(id = %self.id, error = %e, "start failed; rolling back");
            self.agent = None;
            self.close_file();
            self.delete_file();
            return Err(e);
        }
        self.state = DownloadState::Transferring;
        Ok(())
    }

    fn do_resume(&mut self) -> Result<(), AgentError> {
        // Drop a pending network re-probe; this resume supersedes it.
        self.services.scheduler.unschedule(self.tag);
        self.reopen_file()?;
        if self.complete_if_all_bytes_present() {
            return Ok(());
        }

        if self.agent.is_none() {
            self.agent = Some(self.new_agent());
        }
        self.policy.restart();
        if let Err(e) = self.send_request() {
            self.close_file();
            return Err(e);
        }
        self.state = DownloadState::Transferring;
        Ok(())
    }

    /// Moves straight to Transferred when every byte is already on disk,
    /// since a range starting at the total size cannot be satisfied.
    fn complete_if_all_bytes_present(&mut self) -> bool {
        if self.bytes_total == 0 || self.bytes_transferred < self.bytes_total {
            return false;
        }
        info!(
            id = %self.id,
            bytes = self.bytes_transferred,
            "already transferred; completing without a request"
        );
        self.services.scheduler.unschedule(self.progress_tag);
        self.stop_timer();
        self.close_file();
        self.error = None;
        self.extended_error = None;
        self.state = DownloadState::Transferred;
        true
    }

    fn do_abort(&mut self) {
        self.teardown();
        self.agent = None;
        // Only a file this download created is ours to delete.
        self.delete_file();
        self.state = DownloadState::Aborted;
    }

    /// Releases the transfer and file and cancels scheduled work without
    /// changing state. Used when the owning manager shuts down.
    pub fn close(&mut self) {
        self.teardown();
        self.agent = None;
    }

    fn new_agent(&self) -> HttpAgent {
        let sink = DownloadEventSink {
            scheduler: self.services.scheduler.clone(),
            target: self.this.clone(),
            tag: self.tag,
            file: Arc::clone(&self.file),
        };
        HttpAgent::new(Arc::clone(&self.services.engine), Arc::new(sink))
    }

    /// Issues the next request: picks proxy and host, then asks for the
    /// remaining bytes.
    fn send_request(&mut self) -> Result<(), AgentError> {
        let origin =
            HttpAgent::validate_url(&self.url).map_err(|_| AgentError::invalid_url(&self.url))?;
        let proxy = self.proxies.next().map(str::to_string);

        let candidate = if self.policy.cache_host_allowed() {
            let host = self.services.mcc.lock().next_host(&origin);
            host.and_then(|host| match cache_host_url(&origin, &host) {
                Ok(url) => Some((host, url)),
                Err(e) => {
                    warn!(id = %self.id, host, error = %e, "ignoring unusable cache host");
                    None
                }
            })
        } else {
            None
        };

        let timings = self.services.context.timings;
        let connection = self.policy.select(candidate.is_some());
        let (url, cache_host, connect_timeout) = match (connection, candidate) {
            (ConnectionType::CacheHost, Some((host, url))) => {
                (url, Some(host), timings.cache_host_connect_timeout)
            }
            _ => (origin, None, timings.origin_connect_timeout),
        };

        if self.state != DownloadState::Created && cache_host != self.cache_host {
            debug!(id = %self.id, "connection host changed; resetting progress tracker");
            self.progress.reset();
        }

        let range = (self.bytes_transferred > 0).then(|| ByteRange {
            start: self.bytes_transferred,
            end: (self.bytes_total > 0).then(|| self.bytes_total - 1),
        });

        if self.agent.is_none() {
            self.agent = Some(self.new_agent());
        }
        let agent = self
            .agent
            .as_mut()
            .ok_or_else(|| AgentError::unexpected("transport agent missing"))?;
        let handle = agent.send_request(TransferRequest {
            url,
            proxy,
            range,
            connect_timeout,
        })?;

        info!(
            id = %self.id,
            %handle,
            %connection,
            attempt = self.policy.attempts(),
            range = ?range.map(|r| r.header_value()),
            "request sent"
        );
        self.request_active = true;
        self.cache_host = cache_host;
        self.error = None;
        self.extended_error = None;
        self.attempt_start_bytes = self.bytes_transferred;
        self.start_timer();
        self.schedule_progress_check();
        Ok(())
    }

    fn is_current_request(&self, handle: TransferHandle) -> bool {
        self.state == DownloadState::Transferring
            && self.request_active
            && self.agent.as_ref().and_then(HttpAgent::active_handle) == Some(handle)
    }

    fn handle_event(&mut self, event: DownloadEvent) {
        match event {
            DownloadEvent::Data { bytes_written } => {
                if self.state == DownloadState::Transferring {
                    let mut transferred = self.bytes_transferred.max(bytes_written);
                    if self.bytes_total != 0 {
                        transferred = transferred.min(self.bytes_total);
                    }
                    self.bytes_transferred = transferred;
                }
            }
            DownloadEvent::Headers { handle, headers } => {
                if !self.is_current_request(handle) {
                    return;
                }
                self.http_status = Some(headers.status);
                if let Some(total) = headers.content_length {
                    self.bytes_total = total;
                }
                debug!(
                    id = %self.id,
                    status = headers.status,
                    bytes_total = self.bytes_total,
                    "headers received"
                );
            }
            DownloadEvent::Complete { handle, result } => {
                if !self.is_current_request(handle) {
                    debug!(id = %self.id, %handle, "ignoring completion of stale request");
                    return;
                }
                self.request_active = false;
                self.stop_timer();
                match result {
                    Ok(()) => self.on_transfer_complete(),
                    Err(e) => self.on_transfer_failed(&e),
                }
            }
        }
    }

    fn on_transfer_complete(&mut self) {
        self.close_file();
        if self.bytes_total == 0 {
            self.bytes_total = self.bytes_transferred;
        }
        self.state = DownloadState::Transferred;
        info!(
            id = %self.id,
            bytes = self.bytes_transferred,
            elapsed_ms = self.elapsed().as_millis(),
            "download transferred"
        );
    }

    fn on_transfer_failed(&mut self, err: &TransportError) {
        if let Some(status) = err.http_status_code() {
            self.http_status = Some(status);
        }
        let code = err.code();

        if !self.services.context.network.has_viable_interface() {
            self.wait_for_network();
            return;
        }

        if err.is_fatal() || (err.is_client_error() && self.policy.fail_fast()) {
            warn!(id = %self.id, error = %err, http_status = ?self.http_status, "fatal transfer failure");
            self.teardown();
            self.enter_paused(Some(code), None);
            return;
        }

        self.error = Some(code);
        if let Some(host) = self.cache_host.as_deref() {
            if let Ok(origin) = Url::parse(&self.url) {
                self.services
                    .mcc
                    .lock()
                    .report_host_error(host, &origin, err);
            }
        }

        self.progress.on_failure();
        let mut delay = self.progress.next_retry_delay();
        let made_progress = self.bytes_transferred > self.attempt_start_bytes;
        if self.policy.on_failure(made_progress, Instant::now()) {
            delay = Duration::ZERO;
            self.progress.reset();
        }
        info!(
            id = %self.id,
            error = %err,
            retry_in_ms = delay.as_millis(),
            "transfer failed; will retry"
        );
        self.schedule_retry(delay);
    }

    fn schedule_retry(&self, delay: Duration) {
        let target = self.this.clone();
        self.services.scheduler.schedule(
            move || {
                if let Some(download) = target.upgrade() {
                    download.lock().retry();
                }
            },
            delay,
            Some(self.tag),
        );
    }

    fn retry(&mut self) {
        // A pause/resume cycle may already have issued a fresh request.
        if self.state != DownloadState::Transferring || self.request_active {
            return;
        }
        if self.complete_if_all_bytes_present() {
            return;
        }
        if let Err(e) = self.send_request() {
            warn!(id = %self.id, error = %e, "retry could not be sent");
            self.teardown();
            self.enter_paused(Some(e.code()), None);
        }
    }

    fn is_waiting_for_network(&self) -> bool {
        self.error.is_none() && self.extended_error == Some(ErrorCode::NoNetwork)
    }

    /// Parks the download until connectivity returns.
    fn wait_for_network(&mut self) {
        info!(id = %self.id, "no network connectivity; waiting");
        self.teardown();
        self.enter_paused(None, Some(ErrorCode::NoNetwork));
        self.schedule_network_recheck();
    }

    fn schedule_network_recheck(&self) {
        let target = self.this.clone();
        self.services.scheduler.schedule(
            move || {
                if let Some(download) = target.upgrade() {
                    download.lock().recheck_network();
                }
            },
            self.services.context.timings.no_network_recheck_interval,
            Some(self.tag),
        );
    }

    fn recheck_network(&mut self) {
        if self.state != DownloadState::Paused || !self.is_waiting_for_network() {
            return;
        }
        if !self.services.context.network.has_viable_interface() {
            self.schedule_network_recheck();
            return;
        }
        info!(id = %self.id, "network is back; resuming");
        if let Err(e) = self.do_resume() {
            warn!(id = %self.id, error = %e, "resume after network recovery failed");
            self.enter_paused(Some(e.code()), None);
        }
    }

    fn schedule_progress_check(&self) {
        if self.services.scheduler.is_scheduled(self.progress_tag) {
            return;
        }
        let target = self.this.clone();
        self.services.scheduler.schedule(
            move || {
                if let Some(download) = target.upgrade() {
                    download.lock().check_progress();
                }
            },
            self.services.context.timings.progress_check_interval,
            Some(self.progress_tag),
        );
    }

    fn check_progress(&mut self) {
        if self.state != DownloadState::Transferring {
            return;
        }
        let max = self.max_no_progress_intervals();
        if self.progress.check_progress(self.bytes_transferred, max) {
            let last_error = self.error;
            warn!(
                id = %self.id,
                bytes = self.bytes_transferred,
                last_error = ?last_error,
                "no progress; pausing"
            );
            self.teardown();
            self.enter_paused(Some(ErrorCode::NoProgress), last_error);
        } else {
            self.schedule_progress_check();
        }
    }

    fn max_no_progress_intervals(&self) -> u32 {
        max_no_progress_intervals(
            self.no_progress_timeout,
            self.services.context.timings.progress_check_interval,
            DEFAULT_MAX_NO_PROGRESS_INTERVALS,
        )
    }

    /// Closes the transfer (waiting for callbacks), the file and all scheduled work.
    fn teardown(&mut self) {
        if let Some(agent) = self.agent.as_mut() {
            agent.close();
        }
        self.request_active = false;
        self.stop_timer();
        self.close_file();
        self.cancel_tasks();
    }

    fn enter_paused(&mut self, error: Option<ErrorCode>, extended_error: Option<ErrorCode>) {
        self.state = DownloadState::Paused;
        self.error = error;
        self.extended_error = extended_error;
        info!(
            id = %self.id,
            bytes = self.bytes_transferred,
            error = ?error,
            extended_error = ?extended_error,
            "download paused"
        );
    }

    fn cancel_tasks(&self) {
        self.services.scheduler.unschedule(self.tag);
        self.services.scheduler.unschedule(self.progress_tag);
    }

    /// Closes the destination file and adopts its length as the byte count.
    fn close_file(&mut self) {
        let mut file = self.file.lock();
        if file.handle.take().is_some() {
            self.bytes_transferred = file.written;
            if self.bytes_total != 0 {
                self.bytes_transferred = self.bytes_transferred.min(self.bytes_total);
            }
        }
    }

    fn reopen_file(&mut self) -> Result<(), AgentError> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| AgentError::io(&self.path, e))?;
        let len = file
            .metadata()
            .map_err(|e| AgentError::io(&self.path, e))?
            .len();
        if len > self.bytes_transferred {
            file.set_len(self.bytes_transferred)
                .map_err(|e| AgentError::io(&self.path, e))?;
        } else if len < self.bytes_transferred {
            warn!(
                id = %self.id,
                expected = self.bytes_transferred,
                found = len,
                "destination file shrank; resuming from its length"
            );
            self.bytes_transferred = len;
        }
        *self.file.lock() = DestinationFile {
            handle: Some(file),
            written: self.bytes_transferred,
        };
        Ok(())
    }

    fn delete_file(&mut self) {
        if !self.file_created {
            return;
        }
        self.file_created = false;
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(id = %self.id, path = %self.path.display(), error = %e, "failed to delete destination file");
            }
        }
    }

    fn start_timer(&mut self) {
        if self.transfer_started.is_none() {
            self.transfer_started = Some(Instant::now());
        }
    }

    fn stop_timer(&mut self) {
        if let Some(started) = self.transfer_started.take() {
            self.transfer_elapsed += started.elapsed();
        }
    }

    /// # Errors
    ///
    /// Rejects read-only properties, malformed values and changes not
    /// allowed in the current state.
    #[instrument(skip(self), fields(id = %self.id, state = %self.state))]
    pub fn set_property(&mut self, property: DownloadProperty, value: &str) -> Result<(), AgentError> {
        match property {
            DownloadProperty::Id => Err(AgentError::ReadOnlyProperty {
                property: property.to_string(),
            }),
            DownloadProperty::Uri => self.set_url(value),
            DownloadProperty::LocalPath => self.set_path(value),
            DownloadProperty::NoProgressTimeoutSeconds => {
                let seconds: u64 = value.trim().parse().map_err(|_| {
                    AgentError::invalid_argument(format!("not a number of seconds: {value:?}"))
                })?;
                let timeout = Duration::from_secs(seconds);
                let interval = self.services.context.timings.progress_check_interval;
                if timeout < interval {
                    return Err(AgentError::invalid_argument(format!(
                        "no-progress timeout must be at least {}s",
                        interval.as_secs()
                    )));
                }
                self.no_progress_timeout = Some(timeout);
                Ok(())
            }
        }
    }

    fn set_url(&mut self, value: &str) -> Result<(), AgentError> {
        if value.is_empty() {
            return Err(AgentError::invalid_argument("Uri must not be empty"));
        }
        let url = HttpAgent::validate_url(value).map_err(|_| AgentError::invalid_url(value))?;
        match self.state {
            DownloadState::Created => {}
            DownloadState::Paused => {
                if value != self.url {
                    self.progress.reset();
                    self.proxies
                        .refresh(self.services.context.proxies.as_ref(), &url);
                }
            }
            state => return Err(AgentError::invalid_state(state)),
        }
        info!(id = %self.id, url = %value, "url changed");
        self.url = value.to_string();
        Ok(())
    }

    fn set_path(&mut self, value: &str) -> Result<(), AgentError> {
        if value.is_empty() {
            return Err(AgentError::invalid_argument("LocalPath must not be empty"));
        }
        let path = PathBuf::from(value);
        match self.state {
            DownloadState::Created => {}
            DownloadState::Paused => {
                if self.file_created && path != self.path {
                    if path.exists() {
                        return Err(AgentError::already_exists(path.display().to_string()));
                    }
                    fs::rename(&self.path, &path).map_err(|e| AgentError::io(&path, e))?;
                }
            }
            state => return Err(AgentError::invalid_state(state)),
        }
        info!(id = %self.id, path = %path.display(), "destination changed");
        self.path = path;
        Ok(())
    }

    #[must_use]
    pub fn get_property(&self, property: DownloadProperty) -> String {
        match property {
            DownloadProperty::Id => self.id.to_string(),
            DownloadProperty::Uri => self.url.clone(),
            DownloadProperty::LocalPath => self.path.display().to_string(),
            DownloadProperty::NoProgressTimeoutSeconds => {
                let timeout = self.no_progress_timeout.unwrap_or_else(|| {
                    self.services.context.timings.progress_check_interval
                        * DEFAULT_MAX_NO_PROGRESS_INTERVALS
                });
                timeout.as_secs().to_string()
            }
        }
    }
}

impl Drop for Download {
    fn drop(&mut self) {
        self.cancel_tasks();
    }
}
