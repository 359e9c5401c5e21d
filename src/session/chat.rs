//! The chat session driver.

use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::reconcile::Reconciler;
use super::state::ChatState;
use crate::error::TransportError;
use crate::feed::{DomainEvent, Parsed, parse_frame};
use crate::playback::{FeedInput, Pacing, PlaybackOutcome, PlaybackSink, Sequencer, play};
use crate::transport::{
    ApiClient, FeedRequest, Generation, RunRequest, StreamClient, TransportEvent,
    TransportEventKind, TransportSettings,
};

/// Owns one chat session: its state, its transport and its reconciler.
///
/// All state mutation goes through the internal mutex, and every transport
/// event is checked against the live generation before it touches state.
/// Consumers observe changes through [`ChatSession::subscribe`].
#[derive(Debug)]
pub struct ChatSession {
    state: Mutex<ChatState>,
    client: StreamClient,
    reconciler: Reconciler,
    updates: watch::Sender<ChatState>,
}

impl ChatSession {
    /// Create a session and the transport event receiver that feeds it.
    #[must_use]
    pub fn new(
        api: ApiClient,
        settings: TransportSettings,
        reconciler: Reconciler,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (client, events) = StreamClient::new(api, settings);
        let (updates, _) = watch::channel(ChatState::new());
        let session = Self {
            state: Mutex::new(ChatState::new()),
            client,
            reconciler,
            updates,
        };
        (session, events)
    }

    /// Watch state snapshots as they change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.updates.subscribe()
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> ChatState {
        self.state.lock().await.clone()
    }

    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    fn publish(&self, state: &ChatState) {
        self.updates.send_replace(state.clone());
    }

    /// Start a fresh conversation: clear state, add the question and stream.
    pub async fn start(&self, request: RunRequest) -> Generation {
        let mut state = self.state.lock().await;
        *state = ChatState::new();
        self.open(&mut state, request)
    }

    /// Ask a follow-up in the current conversation.
    pub async fn send_message(&self, request: RunRequest) -> Generation {
        let mut state = self.state.lock().await;
        self.open(&mut state, request)
    }

    fn open(&self, state: &mut ChatState, request: RunRequest) -> Generation {
        self.reconciler.user_message(state, request.prompt.clone());
        let generation = self.client.start(FeedRequest::Run(request));
        tracing::info!(generation, "Session stream started");
        self.publish(state);
        generation
    }

    /// Stop streaming and clear all state.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        self.client.stop();
        *state = ChatState::new();
        self.publish(&state);
    }

    /// Stop streaming, keeping state.
    pub fn stop(&self) {
        self.client.stop();
    }

    /// Drop stale events, apply lifecycle signals and extract feed input.
    fn classify(
        &self,
        state: &mut ChatState,
        event: TransportEvent,
    ) -> Option<FeedInput<DomainEvent>> {
        if !self.client.is_current(event.generation) {
            tracing::debug!(generation = event.generation, "Dropping stale transport event");
            return None;
        }

        match event.kind {
            TransportEventKind::Connected => {
                self.reconciler.connected(state);
                self.publish(state);
                None
            }
            TransportEventKind::WarmingUp => {
                self.reconciler.warming_up(state);
                self.publish(state);
                None
            }
            TransportEventKind::Retrying { attempt, reason } => {
                tracing::info!(generation = event.generation, attempt, reason = %reason, "Stream retrying");
                None
            }
            TransportEventKind::Frame(frame) => match parse_frame(&frame) {
                Parsed::Event(domain) => {
                    if domain.is_terminal() {
                        // Nothing after a terminal event matters; a late
                        // network failure must not retry or surface.
                        self.client.stop();
                    }
                    Some(FeedInput::Frame(domain))
                }
                Parsed::EndOfStream | Parsed::Skipped => None,
            },
            TransportEventKind::Completed => Some(FeedInput::Ended),
            TransportEventKind::Failed(error) => Some(FeedInput::Failed(error)),
        }
    }

    /// Apply one transport event immediately.
    ///
    /// Returns `true` once the stream is over for this session.
    pub async fn handle(&self, event: TransportEvent) -> bool {
        let mut state = self.state.lock().await;
        let Some(input) = self.classify(&mut state, event) else {
            return false;
        };
        let finished = match input {
            FeedInput::Frame(domain) => {
                let terminal = domain.is_terminal();
                self.reconciler.apply(&mut state, domain);
                terminal
            }
            FeedInput::Ended => {
                self.reconciler.stream_ended(&mut state);
                true
            }
            FeedInput::Failed(error) => {
                self.reconciler.stream_failed(&mut state, &error);
                true
            }
        };
        self.publish(&state);
        finished
    }

    /// Classify an event for paced delivery.
    pub async fn route(&self, event: TransportEvent) -> Option<FeedInput<DomainEvent>> {
        let mut state = self.state.lock().await;
        self.classify(&mut state, event)
    }

    /// Consume transport events with immediate delivery until the stream is
    /// over or `cancel` fires.
    pub async fn run(
        &self,
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
        cancel: &CancellationToken,
    ) -> ChatState {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.stop();
                    break;
                }
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            if self.handle(event).await {
                break;
            }
        }
        self.snapshot().await
    }

    /// Consume transport events with paced delivery.
    pub async fn run_paced(
        &self,
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
        pacing: Pacing,
        cancel: &CancellationToken,
    ) -> PlaybackOutcome {
        let mut sequencer = Sequencer::new(pacing);
        let mut sink = self;
        let outcome = play(
            events,
            move |event| self.route(event),
            &mut sequencer,
            &mut sink,
            cancel,
        )
        .await;
        if outcome == PlaybackOutcome::Cancelled {
            self.stop();
        }
        outcome
    }
}

#[async_trait::async_trait]
impl<'a> PlaybackSink<DomainEvent> for &'a ChatSession {
    async fn reveal(&mut self, frame: DomainEvent) {
        let mut state = self.state.lock().await;
        self.reconciler.apply(&mut state, frame);
        self.publish(&state);
    }

    async fn failed(&mut self, error: TransportError) {
        let mut state = self.state.lock().await;
        self.reconciler.stream_failed(&mut state, &error);
        self.publish(&state);
    }

    async fn ended(&mut self) {
        let mut state = self.state.lock().await;
        self.reconciler.stream_ended(&mut state);
        self.publish(&state);
    }
}
