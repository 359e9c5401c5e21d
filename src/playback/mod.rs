//! Paced playback of buffered frames.
//!
//! Frames are queued as they arrive and revealed one at a time, each followed
//! by a dwell derived from its semantic weight, so that a human can follow the
//! agent's progress. The queue is owned by a [`Sequencer`]; [`drive`] is the
//! scheduler loop that pops frames, hands them to a [`PlaybackSink`] and waits
//! out the dwell.
//!
//! ```text
//! Idle ──enqueue──▶ Playing ──queue empty──▶ Idle
//!                      │
//!                      └─terminal revealed, frames left──▶ Draining ──▶ Idle
//! ```

pub mod legacy;

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::feed::DomainEvent;
use crate::transport::TransportEvent;

/// Dwell after an outbound model request.
pub const DEFAULT_REQUEST_DWELL: Duration = Duration::from_secs(6);

/// Dwell after any other frame.
pub const DEFAULT_DWELL: Duration = Duration::from_secs(3);

/// Dwell after a lifecycle status frame.
pub const DEFAULT_STATUS_DWELL: Duration = Duration::from_secs(1);

/// Dwell durations by semantic weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub request_dwell: Duration,
    pub default_dwell: Duration,
    pub status_dwell: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            request_dwell: DEFAULT_REQUEST_DWELL,
            default_dwell: DEFAULT_DWELL,
            status_dwell: DEFAULT_STATUS_DWELL,
        }
    }
}

/// A frame that can be played back.
pub trait Paced {
    /// How long playback pauses after this frame is revealed.
    fn dwell(&self, pacing: &Pacing) -> Duration;

    /// Whether this frame ends the session.
    fn is_terminal(&self) -> bool;
}

impl Paced for DomainEvent {
    fn dwell(&self, pacing: &Pacing) -> Duration {
        match self {
            Self::Status { .. } => pacing.status_dwell,
            Self::Thinking { .. } => pacing.request_dwell,
            _ => pacing.default_dwell,
        }
    }

    fn is_terminal(&self) -> bool {
        DomainEvent::is_terminal(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Playing,
    /// A terminal frame was revealed; the remaining queue is flushed out.
    Draining,
}

/// A frame taken off the queue.
#[derive(Debug)]
pub struct Reveal<F> {
    pub frame: F,
    /// `None` when playback stops right after this frame.
    pub dwell: Option<Duration>,
}

/// What a transport failure did to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// No terminal frame was ever queued: the queue was flushed.
    Flushed,
    /// A terminal frame is on its way: the error is swallowed.
    Suppressed,
}

/// FIFO queue of frames plus the playback phase.
#[derive(Debug)]
pub struct Sequencer<F> {
    queue: VecDeque<F>,
    phase: Phase,
    terminal_enqueued: bool,
    pacing: Pacing,
}

impl<F: Paced> Sequencer<F> {
    #[must_use]
    pub fn new(pacing: Pacing) -> Self {
        Self {
            queue: VecDeque::new(),
            phase: Phase::Idle,
            terminal_enqueued: false,
            pacing,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether a terminal frame was ever queued in this run.
    #[must_use]
    pub fn terminal_enqueued(&self) -> bool {
        self.terminal_enqueued
    }

    /// Queue an arriving frame. Frames are never dropped.
    pub fn enqueue(&mut self, frame: F) {
        if frame.is_terminal() {
            self.terminal_enqueued = true;
        }
        self.queue.push_back(frame);
        if self.phase == Phase::Idle {
            self.phase = Phase::Playing;
        }
    }

    /// Pop the next frame and compute the pause that follows it.
    pub fn advance(&mut self) -> Option<Reveal<F>> {
        let Some(frame) = self.queue.pop_front() else {
            self.phase = Phase::Idle;
            return None;
        };

        let dwell = if frame.is_terminal() {
            if self.queue.is_empty() {
                self.phase = Phase::Idle;
                None
            } else {
                self.phase = Phase::Draining;
                Some(frame.dwell(&self.pacing))
            }
        } else {
            Some(frame.dwell(&self.pacing))
        };

        Some(Reveal { frame, dwell })
    }

    /// React to a transport failure.
    pub fn fail(&mut self) -> FailureOutcome {
        if self.terminal_enqueued {
            return FailureOutcome::Suppressed;
        }
        self.queue.clear();
        self.phase = Phase::Idle;
        FailureOutcome::Flushed
    }
}

/// Input of the playback loop.
#[derive(Debug)]
pub enum FeedInput<F> {
    Frame(F),
    /// The source ended normally.
    Ended,
    /// The source failed.
    Failed(TransportError),
}

/// How a playback run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Failed,
    Cancelled,
}

/// Receiver of revealed frames.
#[async_trait::async_trait]
pub trait PlaybackSink<F: Send + 'static>: Send {
    /// Apply a frame whose turn has come.
    async fn reveal(&mut self, frame: F);

    /// The source failed before any terminal frame was queued.
    async fn failed(&mut self, error: TransportError);

    /// Playback finished normally.
    async fn ended(&mut self) {}
}

/// Scheduler loop: reveal queued frames one by one, honouring their dwell.
///
/// Stops accepting input once a terminal frame has been revealed, and returns
/// when the queue is drained after the input ended, on an unsuppressed
/// failure, or on cancellation.
pub async fn drive<F, S>(
    mut input: mpsc::UnboundedReceiver<FeedInput<F>>,
    sequencer: &mut Sequencer<F>,
    sink: &mut S,
    cancel: &CancellationToken,
) -> PlaybackOutcome
where
    F: Paced + Send + 'static,
    S: PlaybackSink<F> + ?Sized,
{
    let mut ready_at: Option<Instant> = None;
    let mut input_open = true;

    loop {
        if ready_at.is_none() {
            if let Some(reveal) = sequencer.advance() {
                let terminal = reveal.frame.is_terminal();
                sink.reveal(reveal.frame).await;
                if terminal && input_open {
                    tracing::debug!(queued = sequencer.len(), "Terminal frame revealed, closing input");
                    input.close();
                    input_open = false;
                }
                match reveal.dwell {
                    Some(dwell) => ready_at = Some(Instant::now() + dwell),
                    None => break,
                }
                continue;
            }
            if !input_open {
                break;
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return PlaybackOutcome::Cancelled,
            () = sleep_until(ready_at.unwrap_or_else(Instant::now)), if ready_at.is_some() => {
                ready_at = None;
            }
            received = input.recv(), if input_open => match received {
                Some(FeedInput::Frame(frame)) => sequencer.enqueue(frame),
                Some(FeedInput::Ended) | None => input_open = false,
                Some(FeedInput::Failed(error)) => match sequencer.fail() {
                    FailureOutcome::Flushed => {
                        tracing::warn!(error = %error, "Feed failed, playback flushed");
                        sink.failed(error).await;
                        return PlaybackOutcome::Failed;
                    }
                    FailureOutcome::Suppressed => {
                        tracing::debug!(error = %error, "Feed failed after terminal frame, finishing playback");
                        input_open = false;
                    }
                },
            },
        }
    }

    sink.ended().await;
    PlaybackOutcome::Finished
}

/// Forward transport events into the playback input until the source ends,
/// playback stops listening, or `cancel` fires.
///
/// `route` maps each transport event to a playback input, or `None` to drop it.
pub async fn pump<F, R, Fut>(
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    input: mpsc::UnboundedSender<FeedInput<F>>,
    mut route: R,
    cancel: &CancellationToken,
) where
    R: FnMut(TransportEvent) -> Fut,
    Fut: Future<Output = Option<FeedInput<F>>>,
{
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = input.closed() => return,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            return;
        };
        let Some(routed) = route(event).await else {
            continue;
        };
        let last = !matches!(routed, FeedInput::Frame(_));
        if input.send(routed).is_err() || last {
            return;
        }
    }
}

/// Run [`pump`] and [`drive`] together for one session.
pub async fn play<F, S, R, Fut>(
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    route: R,
    sequencer: &mut Sequencer<F>,
    sink: &mut S,
    cancel: &CancellationToken,
) -> PlaybackOutcome
where
    F: Paced + Send + 'static,
    S: PlaybackSink<F> + ?Sized,
    R: FnMut(TransportEvent) -> Fut,
    Fut: Future<Output = Option<FeedInput<F>>>,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let ((), outcome) = tokio::join!(
        pump(events, tx, route, cancel),
        drive(rx, sequencer, sink, cancel)
    );
    outcome
}
