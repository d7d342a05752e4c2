//! Multiplexed HTTP transfer engine.
//!
//! One dedicated OS thread owns a current-thread tokio runtime. Every active
//! transfer is a task in a [`JoinSet`] on that runtime, so a single readiness
//! loop drives all of them. Other threads never touch the runtime directly:
//! they queue add/remove requests under a lock and wake the loop, which applies
//! them before its next poll pass.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use futures_util::{FutureExt, StreamExt};
use parking_lot::{Condvar, Mutex};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, trace, warn};
use url::Url;

use super::error::TransportError;
use super::redact_credentials;
use crate::constants::{
    ENGINE_POLL_INTERVAL, REMOVE_WAIT_CEILING, STALL_MIN_BYTES_PER_SEC, STALL_WINDOW, USER_AGENT,
};
use crate::error::ErrorCode;

/// Identifies one transfer registered with a [`TransferEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferHandle(u64);

impl fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer#{}", self.0)
    }
}

/// Inclusive byte range for a ranged GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Last byte requested; `None` means "to the end".
    pub end: Option<u64>,
}

impl ByteRange {
    /// Range covering everything from `start` onwards.
    #[must_use]
    pub fn from_offset(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Value for the `Range` request header.
    #[must_use]
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{end}", self.start),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Everything needed to issue one GET.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: Url,
    /// Proxy URL; `None` connects directly.
    pub proxy: Option<String>,
    pub range: Option<ByteRange>,
    pub connect_timeout: Duration,
}

/// Response metadata delivered before any body bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub status: u16,
    /// Total resource size: `Content-Length` on 200, the `Content-Range`
    /// total on 206, `None` otherwise or when absent.
    pub content_length: Option<u64>,
}

/// Receives the progress of a transfer.
///
/// Callbacks run on the engine thread and must not block on work that
/// itself waits for the engine (such as [`TransferEngine::remove`]).
pub trait TransferEvents: Send + Sync {
    /// Response status and size are known.
    fn on_headers_available(&self, handle: TransferHandle, headers: &ResponseHeaders);

    /// A body chunk arrived. Returning an error aborts the transfer.
    ///
    /// # Errors
    ///
    /// The returned code is reported through [`TransportError::Sink`].
    fn on_data(&self, handle: TransferHandle, chunk: &[u8]) -> Result<(), ErrorCode>;

    /// The transfer finished. Called exactly once per transfer that was not removed.
    fn on_complete(&self, handle: TransferHandle, result: Result<(), TransportError>);
}

/// Tunables for a [`TransferEngine`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Longest the loop sleeps before servicing queued requests.
    pub poll_interval: Duration,
    /// Ceiling on how long [`TransferEngine::remove`] waits for detachment.
    pub remove_timeout: Duration,
    /// Window over which throughput is measured.
    pub stall_window: Duration,
    /// Minimum average throughput over one window.
    pub stall_min_bytes_per_sec: u64,
    pub user_agent: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: ENGINE_POLL_INTERVAL,
            remove_timeout: REMOVE_WAIT_CEILING,
            stall_window: STALL_WINDOW,
            stall_min_bytes_per_sec: STALL_MIN_BYTES_PER_SEC,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

struct PendingAdd {
    handle: TransferHandle,
    request: TransferRequest,
    events: Arc<dyn TransferEvents>,
}

#[derive(Default)]
struct Pending {
    adds: Vec<PendingAdd>,
    removes: Vec<TransferHandle>,
    shutdown: bool,
}

/// Signalled once a transfer has been detached from the engine.
#[derive(Default)]
struct Detached {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Detached {
    fn signal(&self) {
        *self.done.lock() = true;
        self.cv.notify_all();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.cv.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}

/// Clients are keyed by everything the builder is configured with.
type ClientKey = (Option<String>, Duration);

/// One pooled `reqwest::Client` per proxy and connect timeout.
struct ClientCache {
    user_agent: String,
    clients: Mutex<HashMap<ClientKey, reqwest::Client>>,
}

impl ClientCache {
    fn new(user_agent: String) -> Self {
        Self {
            user_agent,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, request: &TransferRequest) -> Result<reqwest::Client, TransportError> {
        let key = (request.proxy.clone(), request.connect_timeout);
        if let Some(client) = self.clients.lock().get(&key) {
            return Ok(client.clone());
        }
        let client = build_client(request, &self.user_agent)?;
        self.clients.lock().insert(key, client.clone());
        Ok(client)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.clients.lock().len()
    }
}

struct Shared {
    pending: Mutex<Pending>,
    wake: Notify,
    registered: Mutex<HashMap<TransferHandle, Arc<Detached>>>,
    next_handle: AtomicU64,
    worker: OnceLock<ThreadId>,
    clients: Arc<ClientCache>,
    settings: EngineSettings,
}

impl Shared {
    fn is_registered(&self, handle: TransferHandle) -> bool {
        self.registered.lock().contains_key(&handle)
    }

    fn detach(&self, handle: TransferHandle) {
        if let Some(signal) = self.registered.lock().remove(&handle) {
            signal.signal();
        }
    }

    fn detach_all(&self) {
        for (_, signal) in self.registered.lock().drain() {
            signal.signal();
        }
    }
}

/// Runs many HTTP transfers concurrently on one worker thread.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use download_agent::transport::{EngineSettings, TransferEngine};
///
/// # fn main() -> Result<(), download_agent::transport::TransportError> {
/// let engine = Arc::new(TransferEngine::new(EngineSettings::default())?);
/// assert_eq!(engine.active_count(), 0);
/// # Ok(())
/// # }
/// ```
pub struct TransferEngine {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferEngine")
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl TransferEngine {
    /// Starts the engine thread.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Runtime`] if the runtime or thread cannot be created.
    pub fn new(settings: EngineSettings) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| TransportError::Runtime { source })?;

        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::default()),
            wake: Notify::new(),
            registered: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            worker: OnceLock::new(),
            clients: Arc::new(ClientCache::new(settings.user_agent.clone())),
            settings,
        });

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("transfer-engine".to_string())
            .spawn(move || runtime.block_on(event_loop(&worker)))
            .map_err(|source| TransportError::Runtime { source })?;
        let _ = shared.worker.set(handle.thread().id());

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    #[must_use]
    pub fn allocate_handle(&self) -> TransferHandle {
        TransferHandle(self.shared.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of transfers registered and not yet detached.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared.registered.lock().len()
    }

    #[must_use]
    pub fn is_engine_thread(&self) -> bool {
        self.shared.worker.get() == Some(&thread::current().id())
    }

    /// Registers a transfer; it starts on the engine's next loop pass.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyExists`] for a handle that is still
    /// registered and [`TransportError::EngineStopped`] after shutdown.
    pub fn add(
        &self,
        handle: TransferHandle,
        request: TransferRequest,
        events: Arc<dyn TransferEvents>,
    ) -> Result<(), TransportError> {
        let mut pending = self.shared.pending.lock();
        if pending.shutdown {
            return Err(TransportError::EngineStopped);
        }
        {
            let mut registered = self.shared.registered.lock();
            if registered.contains_key(&handle) {
                return Err(TransportError::AlreadyExists { handle });
            }
            registered.insert(handle, Arc::new(Detached::default()));
        }
        trace!(%handle, url = %request.url, "queued transfer");
        pending.adds.push(PendingAdd {
            handle,
            request,
            events,
        });
        drop(pending);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Cancels a transfer and waits until the engine has detached it.
    ///
    /// Unknown handles are ignored. Once this returns no further callbacks
    /// for `handle` will start. When called on the engine thread itself the
    /// removal is queued without waiting.
    pub fn remove(&self, handle: TransferHandle) {
        let Some(signal) = self.shared.registered.lock().get(&handle).cloned() else {
            return;
        };
        {
            let mut pending = self.shared.pending.lock();
            if pending.shutdown {
                return;
            }
            pending.removes.push(handle);
        }
        self.shared.wake.notify_one();

        if self.is_engine_thread() {
            return;
        }
        if !signal.wait(self.shared.settings.remove_timeout) {
            warn!(%handle, "timed out waiting for transfer to detach");
        }
    }

    /// Stops the loop, aborting every transfer, and joins the engine thread.
    pub fn shutdown(&self) {
        self.shared.pending.lock().shutdown = true;
        self.shared.wake.notify_one();
        if let Some(handle) = self.thread.lock().take() {
            if self.is_engine_thread() {
                return;
            }
            if handle.join().is_err() {
                error!("transfer engine thread terminated abnormally");
            }
        }
    }
}

impl Drop for TransferEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

type TransferOutcome = (
    TransferHandle,
    Result<Result<(), TransportError>, Box<dyn std::any::Any + Send>>,
);

async fn event_loop(shared: &Shared) {
    debug!("transfer engine started");
    let mut transfers: JoinSet<TransferOutcome> = JoinSet::new();
    let mut running: HashMap<TransferHandle, (AbortHandle, Arc<dyn TransferEvents>)> =
        HashMap::new();

    loop {
        let (adds, removes, shutdown) = {
            let mut pending = shared.pending.lock();
            (
                std::mem::take(&mut pending.adds),
                std::mem::take(&mut pending.removes),
                pending.shutdown,
            )
        };

        for handle in removes {
            if let Some((abort, _)) = running.remove(&handle) {
                abort.abort();
                debug!(%handle, "transfer removed");
            }
            shared.detach(handle);
        }

        if shutdown {
            transfers.abort_all();
            running.clear();
            shared.detach_all();
            break;
        }

        for add in adds {
            // Removed before it ever started.
            if !shared.is_registered(add.handle) {
                continue;
            }
            let handle = add.handle;
            let transfer = run_transfer(
                handle,
                add.request,
                Arc::clone(&add.events),
                Arc::clone(&shared.clients),
                shared.settings.clone(),
            );
            let abort = transfers.spawn(async move {
                let outcome = AssertUnwindSafe(transfer).catch_unwind().await;
                (handle, outcome)
            });
            running.insert(handle, (abort, add.events));
        }

        tokio::select! {
            () = shared.wake.notified() => {}
            Some(joined) = transfers.join_next() => {
                // A join error means the task was aborted by a removal.
                if let Ok((handle, outcome)) = joined {
                    if let Some((_, events)) = running.remove(&handle) {
                        let result = outcome.unwrap_or_else(|_| {
                            error!(%handle, "transfer task panicked");
                            Err(TransportError::Panicked)
                        });
                        complete(events.as_ref(), handle, result);
                        shared.detach(handle);
                    }
                }
            }
            () = tokio::time::sleep(shared.settings.poll_interval) => {}
        }
    }
    debug!("transfer engine stopped");
}

fn complete(events: &dyn TransferEvents, handle: TransferHandle, result: Result<(), TransportError>) {
    match &result {
        Ok(()) => debug!(%handle, "transfer complete"),
        Err(e) => debug!(%handle, error = %e, "transfer failed"),
    }
    if std::panic::catch_unwind(AssertUnwindSafe(|| events.on_complete(handle, result))).is_err() {
        error!(%handle, "completion callback panicked");
    }
}

async fn run_transfer(
    handle: TransferHandle,
    request: TransferRequest,
    events: Arc<dyn TransferEvents>,
    clients: Arc<ClientCache>,
    settings: EngineSettings,
) -> Result<(), TransportError> {
    let client = clients.client_for(&request)?;
    let url = request.url.to_string();

    let mut builder = client.get(request.url.clone());
    if let Some(range) = request.range {
        builder = builder.header(RANGE, range.header_value());
    }

    debug!(%handle, url = %url, range = ?request.range, "sending request");
    let response = tokio::time::timeout(request.connect_timeout + settings.stall_window, builder.send())
        .await
        .map_err(|_| TransportError::Timeout { url: url.clone() })?
        .map_err(|e| TransportError::from_reqwest(url.clone(), e))?;

    let status = response.status().as_u16();
    let headers = ResponseHeaders {
        status,
        content_length: derive_content_length(status, response.headers()),
    };
    trace!(%handle, status, content_length = ?headers.content_length, "headers available");
    events.on_headers_available(handle, &headers);

    if ErrorCode::from_http_status(status).is_some() {
        return Err(TransportError::http_status(status));
    }
    if request.range.is_some() && status != 206 {
        return Err(TransportError::RangeNotSupported { status });
    }

    let expected = response.content_length();
    let mut stream = response.bytes_stream();
    let mut stall = StallDetector::new(
        settings.stall_window,
        settings.stall_min_bytes_per_sec,
        Instant::now(),
    );
    let mut received: u64 = 0;

    loop {
        let deadline = tokio::time::Instant::from_std(stall.deadline());
        let chunk = match tokio::time::timeout_at(deadline, stream.next()).await {
            Err(_) => {
                stall.check(Instant::now())?;
                continue;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => return Err(TransportError::from_reqwest(url, e)),
            Ok(Some(Ok(chunk))) => chunk,
        };

        let len = chunk.len() as u64;
        received += len;
        if let Some(expected) = expected {
            if received > expected {
                return Err(TransportError::BodyLengthMismatch { expected, received });
            }
        }
        events
            .on_data(handle, &chunk)
            .map_err(|code| TransportError::Sink { code })?;
        stall.record(len);
        stall.check(Instant::now())?;
    }

    if let Some(expected) = expected {
        if received != expected {
            return Err(TransportError::BodyLengthMismatch { expected, received });
        }
    }
    Ok(())
}

fn build_client(
    request: &TransferRequest,
    user_agent: &str,
) -> Result<reqwest::Client, TransportError> {
    let builder = reqwest::Client::builder()
        .connect_timeout(request.connect_timeout)
        .user_agent(user_agent);

    let builder = match request.proxy.as_deref() {
        Some(proxy) => {
            let proxy_config =
                reqwest::Proxy::all(proxy).map_err(|source| TransportError::InvalidProxy {
                    proxy: redact_credentials(proxy),
                    source,
                })?;
            builder.proxy(proxy_config)
        }
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|source| TransportError::Client { source })
}

/// Total resource size from response headers.
fn derive_content_length(status: u16, headers: &HeaderMap) -> Option<u64> {
    match status {
        200 => headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok()),
        206 => headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total),
        _ => None,
    }
}

/// Parses the complete length from `bytes 0-99/1234`. `*` yields `None`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse::<u64>().ok()
}

/// Aborts transfers whose throughput stays under a floor for a whole window.
#[derive(Debug)]
struct StallDetector {
    window: Duration,
    min_bytes: u64,
    window_start: Instant,
    window_bytes: u64,
}

impl StallDetector {
    fn new(window: Duration, min_bytes_per_sec: u64, now: Instant) -> Self {
        let millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        Self {
            window,
            min_bytes: min_bytes_per_sec.saturating_mul(millis) / 1000,
            window_start: now,
            window_bytes: 0,
        }
    }

    fn deadline(&self) -> Instant {
        self.window_start + self.window
    }

    fn record(&mut self, bytes: u64) {
        self.window_bytes = self.window_bytes.saturating_add(bytes);
    }

    /// Closes the current window if it has elapsed.
    fn check(&mut self, now: Instant) -> Result<(), TransportError> {
        if now < self.deadline() {
            return Ok(());
        }
        if self.window_bytes < self.min_bytes {
            return Err(TransportError::Stalled {
                bytes: self.window_bytes,
                window: self.window,
            });
        }
        self.window_start = now;
        self.window_bytes = 0;
        Ok(())
    }
}
