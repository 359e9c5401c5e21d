//! The legacy navigator feed and its board.
//!
//! The legacy backend streams unnamed frames whose payload is a JSON object
//! `{request, destination, event, final, data}`. Each frame describes one hop
//! between the agent, the FHIR server and the model. The [`LegacyBoard`] is
//! the display model that playback reveals those hops on.

use std::collections::VecDeque;
use std::future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{FeedInput, Paced, Pacing, PlaybackOutcome, PlaybackSink, Sequencer, play};
use crate::error::TransportError;
use crate::transport::{FeedRequest, Generation, StreamClient, TransportEvent, TransportEventKind};

/// Destination of hops to the FHIR server.
pub const DESTINATION_FHIR: &str = "FHIR";

/// Destination of hops to the model.
pub const DESTINATION_LLM: &str = "LLM";

/// Log line for a failed connection.
pub const CONNECTION_ERROR_TEXT: &str = "Error connecting to the agent.";

/// Short string payloads are echoed into the log line.
const INLINE_DATA_LIMIT: usize = 30;

/// One frame of the legacy feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyFrame {
    /// Outbound (`true`) or inbound hop.
    pub request: bool,
    /// `"FHIR"`, `"LLM"` or anything else for local steps.
    pub destination: String,
    /// Short label for the log.
    pub event: String,
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Intermediate data, or the answer on the final frame.
    pub data: Value,
}

impl Paced for LegacyFrame {
    fn dwell(&self, pacing: &Pacing) -> Duration {
        if self.destination == DESTINATION_LLM && self.request {
            pacing.request_dwell
        } else {
            pacing.default_dwell
        }
    }

    fn is_terminal(&self) -> bool {
        self.is_final
    }
}

/// Which connections are currently animated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlowCues {
    pub fhir_active: bool,
    pub fhir_reversed: bool,
    pub llm_active: bool,
    pub llm_reversed: bool,
    pub llm_working: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub id: u64,
    pub text: String,
}

/// Display model of one legacy run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LegacyBoard {
    log: VecDeque<LogEntry>,
    next_id: u64,
    intermediate: String,
    answer: String,
    running: bool,
    flow: FlowCues,
}

impl LegacyBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new run.
    pub fn start(&mut self) {
        *self = Self {
            running: true,
            ..Self::default()
        };
    }

    /// Log entries, newest first.
    pub fn log(&self) -> impl Iterator<Item = &LogEntry> {
        self.log.iter()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&LogEntry> {
        self.log.front()
    }

    #[must_use]
    pub fn intermediate(&self) -> &str {
        &self.intermediate
    }

    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn flow(&self) -> FlowCues {
        self.flow
    }

    fn push_log(&mut self, text: String) {
        self.log.push_front(LogEntry {
            id: self.next_id,
            text,
        });
        self.next_id += 1;
    }

    /// Show one revealed frame.
    pub fn apply(&mut self, frame: LegacyFrame) {
        self.flow = match frame.destination.as_str() {
            DESTINATION_FHIR => FlowCues {
                fhir_active: true,
                fhir_reversed: !frame.request,
                llm_reversed: self.flow.llm_reversed,
                ..FlowCues::default()
            },
            DESTINATION_LLM => FlowCues {
                llm_active: true,
                llm_reversed: !frame.request,
                llm_working: frame.request,
                fhir_reversed: self.flow.fhir_reversed,
                ..FlowCues::default()
            },
            _ => FlowCues {
                fhir_reversed: self.flow.fhir_reversed,
                llm_reversed: self.flow.llm_reversed,
                ..FlowCues::default()
            },
        };

        if frame.is_final {
            self.push_log(frame.event);
            self.answer = match frame.data {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            self.intermediate.clear();
            self.running = false;
            self.flow.llm_working = false;
            return;
        }

        match frame.data {
            Value::String(text) => {
                let line = if !text.is_empty() && text.chars().count() < INLINE_DATA_LIMIT {
                    format!("{}: {text}", frame.event)
                } else {
                    frame.event
                };
                self.push_log(line);
                self.intermediate = text;
            }
            Value::Null => {
                self.push_log(frame.event);
                self.intermediate.clear();
            }
            structured => {
                let pretty =
                    serde_json::to_string_pretty(&structured).unwrap_or_else(|_| structured.to_string());
                self.intermediate = format!("```json\n{pretty}\n```");
                self.push_log(format!("{}: Received structured data.", frame.event));
            }
        }
    }

    /// The connection failed before a final frame arrived.
    pub fn fail(&mut self) {
        self.push_log(CONNECTION_ERROR_TEXT.to_string());
        self.running = false;
        self.flow.llm_working = false;
    }

    /// Playback finished.
    pub fn finish(&mut self) {
        self.running = false;
        self.flow.llm_working = false;
    }
}

#[async_trait::async_trait]
impl PlaybackSink<LegacyFrame> for LegacyBoard {
    async fn reveal(&mut self, frame: LegacyFrame) {
        self.apply(frame);
    }

    async fn failed(&mut self, error: TransportError) {
        tracing::warn!(error = %error, "Legacy feed failed");
        self.fail();
    }

    async fn ended(&mut self) {
        self.finish();
    }
}

/// Map a transport event of `generation` to playback input.
#[must_use]
pub fn route(generation: Generation, event: TransportEvent) -> Option<FeedInput<LegacyFrame>> {
    if event.generation != generation {
        return None;
    }
    match event.kind {
        TransportEventKind::Frame(frame) => match serde_json::from_str(&frame.data) {
            Ok(parsed) => Some(FeedInput::Frame(parsed)),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed legacy frame");
                None
            }
        },
        TransportEventKind::Completed => Some(FeedInput::Ended),
        TransportEventKind::Failed(error) => Some(FeedInput::Failed(error)),
        TransportEventKind::Connected
        | TransportEventKind::WarmingUp
        | TransportEventKind::Retrying { .. } => None,
    }
}

/// Replay the legacy feed for `question_id` into `sink` with paced delivery.
///
/// The connection is closed once playback ends.
pub async fn replay<S>(
    client: &StreamClient,
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    question_id: impl Into<String>,
    sink: &mut S,
    pacing: Pacing,
    cancel: &CancellationToken,
) -> PlaybackOutcome
where
    S: PlaybackSink<LegacyFrame> + ?Sized,
{
    let question_id = question_id.into();
    tracing::info!(question_id = %question_id, "Replaying legacy feed");
    let generation = client.start(FeedRequest::Legacy { question_id });
    let mut sequencer = Sequencer::new(pacing);
    let outcome = play(
        events,
        move |event| future::ready(route(generation, event)),
        &mut sequencer,
        sink,
        cancel,
    )
    .await;
    client.stop();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::RawFrame;
    use serde_json::json;

    fn frame(destination: &str, request: bool, event: &str, data: Value) -> LegacyFrame {
        LegacyFrame {
            request,
            destination: destination.to_string(),
            event: event.to_string(),
            is_final: false,
            data,
        }
    }

    #[test]
    fn test_frame_parses_final_field() {
        let parsed: LegacyFrame = serde_json::from_value(json!({
            "request": false,
            "destination": "",
            "event": "Answer",
            "final": true,
            "data": "42"
        }))
        .unwrap();
        assert!(parsed.is_final);
        assert!(parsed.is_terminal());
    }

    #[test]
    fn test_llm_request_dwells_longer() {
        let pacing = Pacing::default();
        assert_eq!(
            frame(DESTINATION_LLM, true, "Ask", Value::Null).dwell(&pacing),
            pacing.request_dwell
        );
        assert_eq!(
            frame(DESTINATION_LLM, false, "Reply", Value::Null).dwell(&pacing),
            pacing.default_dwell
        );
        assert_eq!(
            frame(DESTINATION_FHIR, true, "Fetch", Value::Null).dwell(&pacing),
            pacing.default_dwell
        );
    }

    #[test]
    fn test_board_flow_cues() {
        let mut board = LegacyBoard::new();
        board.start();
        board.apply(frame(DESTINATION_FHIR, false, "Patient fetched", Value::Null));
        let flow = board.flow();
        assert!(flow.fhir_active && flow.fhir_reversed);
        assert!(!flow.llm_active);

        board.apply(frame(DESTINATION_LLM, true, "Planning", Value::Null));
        let flow = board.flow();
        assert!(flow.llm_active && flow.llm_working && !flow.llm_reversed);
        assert!(!flow.fhir_active);
    }

    #[test]
    fn test_board_log_and_intermediate() {
        let mut board = LegacyBoard::new();
        board.start();
        board.apply(frame("", false, "Short", json!("ok")));
        assert_eq!(board.latest().unwrap().text, "Short: ok");
        assert_eq!(board.intermediate(), "ok");

        board.apply(frame("", false, "Long", json!("a".repeat(40))));
        assert_eq!(board.latest().unwrap().text, "Long");

        board.apply(frame("", false, "Facts", json!({"k": 1})));
        assert_eq!(board.latest().unwrap().text, "Facts: Received structured data.");
        assert!(board.intermediate().starts_with("```json\n"));
        assert!(board.intermediate().ends_with("\n```"));

        let texts: Vec<_> = board.log().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, ["Facts: Received structured data.", "Long", "Short: ok"]);
    }

    #[test]
    fn test_board_final_and_failure() {
        let mut board = LegacyBoard::new();
        board.start();
        assert!(board.is_running());
        let mut last = frame(DESTINATION_LLM, false, "Final answer", json!("MRN S6227720"));
        last.is_final = true;
        board.apply(last);
        assert_eq!(board.answer(), "MRN S6227720");
        assert!(board.intermediate().is_empty());
        assert!(!board.is_running());
        assert!(!board.flow().llm_working);

        board.start();
        board.fail();
        assert_eq!(board.latest().unwrap().text, CONNECTION_ERROR_TEXT);
        assert!(!board.is_running());
    }

    #[test]
    fn test_route_filters_generation() {
        let event = |generation, kind| TransportEvent { generation, kind };
        let data = r#"{"event":"Start","data":"go"}"#;
        assert!(route(1, event(2, TransportEventKind::Frame(RawFrame::new(None, data)))).is_none());
        assert!(matches!(
            route(1, event(1, TransportEventKind::Frame(RawFrame::new(None, data)))),
            Some(FeedInput::Frame(_))
        ));
        assert!(route(1, event(1, TransportEventKind::Frame(RawFrame::new(None, "nope")))).is_none());
        assert!(matches!(
            route(1, event(1, TransportEventKind::Completed)),
            Some(FeedInput::Ended)
        ));
        assert!(route(1, event(1, TransportEventKind::WarmingUp)).is_none());
    }
}
