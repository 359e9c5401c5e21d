//! Streaming transport with supersession, timeouts and bounded retry.
//!
//! [`StreamClient`] owns at most one logical streaming session at a time.
//! Every session is tagged with a [`Generation`]; all of its output flows
//! through one channel as [`TransportEvent`]s carrying that tag, so a consumer
//! can drop anything produced by a superseded session.
//!
//! # Lifecycle of one session
//!
//! 1. `start` cancels the previous session and spawns a worker
//! 2. each attempt arms a warmup timer (advisory) and a response timeout;
//!    both are disarmed once the response headers arrive
//! 3. the response body is decoded frame by frame and forwarded immediately
//! 4. `[DONE]` or end of body completes the session
//! 5. retryable failures restart the attempt after a fixed backoff until the
//!    retry budget is spent, but only while no frame has been forwarded;
//!    everything else is reported once as `Failed`
//!
//! # Example
//!
//! ```rust,no_run
//! use sara_stream::transport::{ApiClient, FeedRequest, RunRequest, StreamClient, TransportSettings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let api = ApiClient::new("http://localhost:8000", "http://localhost:8080")?;
//! let (client, mut events) = StreamClient::new(api, TransportSettings::default());
//! let generation = client.start(FeedRequest::Run(RunRequest {
//!     task_id: "task1".into(),
//!     prompt: "What's the MRN of Peter Stafford?".into(),
//!     context: String::new(),
//! }));
//! while let Some(event) = events.recv().await {
//!     if client.is_current(event.generation) {
//!         println!("{:?}", event.kind);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;

pub use client::{ApiClient, FeedRequest, Question, RunRequest};

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransportError};
use crate::feed::{RawFrame, SseDecoder, is_end_of_stream};

/// Delay before the cold-start indicator is raised.
pub const DEFAULT_WARMUP_AFTER: Duration = Duration::from_secs(5);

/// Deadline for the response headers of one attempt. Cold starts can take 30-60s.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Automatic restarts after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Fixed backoff between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Session tag used for supersession checks.
pub type Generation = u64;

/// Timer and retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub warmup_after: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            warmup_after: DEFAULT_WARMUP_AFTER,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Output of a streaming session.
#[derive(Debug)]
pub struct TransportEvent {
    /// Session that produced this event.
    pub generation: Generation,
    pub kind: TransportEventKind,
}

#[derive(Debug)]
pub enum TransportEventKind {
    /// Response headers arrived; the cold-start indicator can be cleared.
    Connected,
    /// No response yet after the warmup delay.
    WarmingUp,
    /// One decoded frame, in stream order.
    Frame(RawFrame),
    /// A retryable failure occurred and the request is being restarted.
    Retrying {
        /// 1-based retry number.
        attempt: u32,
        reason: String,
    },
    /// The stream ended normally (`[DONE]` or end of body).
    Completed,
    /// Terminal transport failure.
    Failed(TransportError),
}

#[derive(Debug)]
struct ActiveSession {
    generation: Generation,
    cancel: CancellationToken,
}

/// Owner of the single active streaming session.
#[derive(Debug)]
pub struct StreamClient {
    api: ApiClient,
    settings: TransportSettings,
    tx: mpsc::UnboundedSender<TransportEvent>,
    current: Arc<AtomicU64>,
    active: Mutex<Option<ActiveSession>>,
}

impl StreamClient {
    /// Create a client and the receiving end of its event channel.
    #[must_use]
    pub fn new(
        api: ApiClient,
        settings: TransportSettings,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            api,
            settings,
            tx,
            current: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
        };
        (client, rx)
    }

    /// Access the underlying API client.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Start a new session, superseding any previous one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, request: FeedRequest) -> Generation {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = active.take() {
            tracing::debug!(generation = previous.generation, "Superseding active stream");
            previous.cancel.cancel();
        }

        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let worker = Worker {
            api: self.api.clone(),
            settings: self.settings.clone(),
            request,
            emitter: Emitter {
                generation,
                current: Arc::clone(&self.current),
                cancel: cancel.clone(),
                tx: self.tx.clone(),
            },
        };

        tracing::info!(generation, "Starting stream");
        tokio::spawn(worker.run());
        *active = Some(ActiveSession { generation, cancel });
        generation
    }

    /// Cancel the active session. No further events are emitted for it.
    pub fn stop(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        // Bumping the counter also invalidates events already sitting in the channel.
        self.current.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = active.take() {
            tracing::info!(generation = previous.generation, "Stopping stream");
            previous.cancel.cancel();
        }
    }

    /// Whether events tagged `generation` still belong to the live session.
    #[must_use]
    pub fn is_current(&self, generation: Generation) -> bool {
        self.current.load(Ordering::SeqCst) == generation
    }

    /// Whether a session is currently running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|session| !session.cancel.is_cancelled())
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if let Some(session) = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            session.cancel.cancel();
        }
    }
}

/// Sends events for one generation until it is cancelled or superseded.
#[derive(Debug)]
struct Emitter {
    generation: Generation,
    current: Arc<AtomicU64>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl Emitter {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && self.current.load(Ordering::SeqCst) == self.generation
    }

    fn emit(&self, kind: TransportEventKind) -> bool {
        if !self.is_live() {
            return false;
        }
        self.tx
            .send(TransportEvent {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

enum Attempt {
    Finished,
    Cancelled,
}

#[derive(Debug)]
struct Worker {
    api: ApiClient,
    settings: TransportSettings,
    request: FeedRequest,
    emitter: Emitter,
}

impl Worker {
    #[tracing::instrument(skip_all, fields(generation = self.emitter.generation))]
    async fn run(self) {
        let retry_budget = if self.request.allows_retry() {
            self.settings.max_retries
        } else {
            0
        };
        let mut attempt = 0;
        let mut delivered = false;

        loop {
            match self.attempt(&mut delivered).await {
                Ok(Attempt::Finished) => {
                    tracing::info!(attempt, "Stream completed");
                    self.emitter.emit(TransportEventKind::Completed);
                    return;
                }
                Ok(Attempt::Cancelled) => {
                    tracing::debug!(attempt, "Stream cancelled");
                    return;
                }
                Err(err) if delivered && err.is_retryable() => {
                    // A restart would replay frames already forwarded.
                    tracing::error!(attempt, error = %err, "Stream broke after frames were delivered");
                    self.emitter.emit(TransportEventKind::Failed(err));
                    return;
                }
                Err(err) if err.is_retryable() && attempt < retry_budget => {
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries = retry_budget,
                        error = %err,
                        "Stream attempt failed, retrying"
                    );
                    let reason = err.to_string();
                    if !self
                        .emitter
                        .emit(TransportEventKind::Retrying { attempt, reason })
                    {
                        return;
                    }
                    tokio::select! {
                        () = self.emitter.cancel.cancelled() => return,
                        () = sleep(self.settings.retry_delay) => {}
                    }
                }
                Err(err) => {
                    tracing::error!(attempt, error = %err, "Stream failed");
                    self.emitter.emit(TransportEventKind::Failed(err));
                    return;
                }
            }
        }
    }

    /// One request. The timeout only covers the wait for the response;
    /// `delivered` is set once a frame has been forwarded.
    async fn attempt(&self, delivered: &mut bool) -> Result<Attempt> {
        let cancel = &self.emitter.cancel;
        let timeout = sleep(self.settings.request_timeout);
        tokio::pin!(timeout);
        let warmup = sleep(self.settings.warmup_after);
        tokio::pin!(warmup);
        let open = self.api.open(&self.request);
        tokio::pin!(open);
        let mut warming = false;

        let response = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(Attempt::Cancelled),
                () = &mut timeout => return Err(TransportError::Timeout(self.settings.request_timeout)),
                response = &mut open => break response?,
                () = &mut warmup, if !warming => {
                    warming = true;
                    tracing::info!("No response yet, backend is warming up");
                    self.emitter.emit(TransportEventKind::WarmingUp);
                }
            }
        };
        self.emitter.emit(TransportEventKind::Connected);

        let body = response.bytes_stream();
        futures::pin_mut!(body);
        let mut decoder = SseDecoder::new();
        let mut buf = BytesMut::new();

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(Attempt::Cancelled),
                chunk = body.next() => chunk,
            };

            let Some(chunk) = chunk else {
                while let Some(frame) = decoder.decode_eof(&mut buf)? {
                    if self.deliver(frame, delivered).is_break() {
                        break;
                    }
                }
                return Ok(Attempt::Finished);
            };

            buf.extend_from_slice(&chunk?);
            while let Some(frame) = decoder.decode(&mut buf)? {
                if self.deliver(frame, delivered).is_break() {
                    return Ok(Attempt::Finished);
                }
            }
        }
    }

    fn deliver(&self, frame: RawFrame, delivered: &mut bool) -> ControlFlow<()> {
        if is_end_of_stream(&frame) {
            tracing::debug!("End-of-stream sentinel received");
            return ControlFlow::Break(());
        }
        *delivered = true;
        self.emitter.emit(TransportEventKind::Frame(frame));
        ControlFlow::Continue(())
    }
}
