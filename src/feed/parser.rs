//! Frame → domain event translation.

use serde_json::Value;

use super::codec::RawFrame;
use super::events::DomainEvent;

/// Literal payload that marks the end of the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Event name assumed for frames without an `event:` field.
pub const DEFAULT_EVENT: &str = "status";

/// Outcome of parsing one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// A well-formed domain event.
    Event(DomainEvent),
    /// The end-of-stream sentinel; not an error.
    EndOfStream,
    /// Malformed or unrecognised frame, dropped without affecting the session.
    Skipped,
}

/// Whether the frame carries the end-of-stream sentinel.
#[must_use]
pub fn is_end_of_stream(frame: &RawFrame) -> bool {
    frame.data.trim() == DONE_SENTINEL
}

/// Translate a raw frame into a [`DomainEvent`].
///
/// Pure and stateless. Payloads that are not JSON, or whose shape does not
/// fit the named event, are skipped.
#[must_use]
pub fn parse_frame(frame: &RawFrame) -> Parsed {
    if is_end_of_stream(frame) {
        return Parsed::EndOfStream;
    }

    let kind = frame
        .event
        .as_deref()
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_EVENT);

    let payload: Value = match serde_json::from_str(&frame.data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(event = kind, error = %e, "Skipping frame with invalid JSON");
            return Parsed::Skipped;
        }
    };

    match serde_json::from_value(serde_json::json!({ "type": kind, "data": payload })) {
        Ok(event) => Parsed::Event(event),
        Err(e) => {
            tracing::debug!(event = kind, error = %e, "Skipping frame that does not fit its event type");
            Parsed::Skipped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_sentinel() {
        assert_eq!(parse_frame(&RawFrame::new(None, "[DONE]")), Parsed::EndOfStream);
        assert_eq!(
            parse_frame(&RawFrame::new(Some("complete"), "[DONE]")),
            Parsed::EndOfStream
        );
    }

    #[test]
    fn test_missing_event_name_defaults_to_status() {
        let parsed = parse_frame(&RawFrame::new(None, r#"{"status":"thinking"}"#));
        assert_eq!(parsed, Parsed::Event(DomainEvent::status("thinking")));
    }

    #[test]
    fn test_invalid_json_is_skipped() {
        assert_eq!(
            parse_frame(&RawFrame::new(Some("thinking"), "{not json")),
            Parsed::Skipped
        );
    }

    #[test]
    fn test_unknown_event_is_skipped() {
        assert_eq!(
            parse_frame(&RawFrame::new(Some("heartbeat"), "{}")),
            Parsed::Skipped
        );
    }

    #[test]
    fn test_tool_result_frame() {
        let parsed = parse_frame(&RawFrame::new(
            Some("tool_result"),
            r#"{"id":"1","result":{"resourceType":"Patient","id":"abc"}}"#,
        ));
        match parsed {
            Parsed::Event(DomainEvent::ToolResult { id, result, status }) => {
                assert_eq!(id, "1");
                assert_eq!(result["resourceType"], "Patient");
                assert!(status.is_none());
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn test_wrongly_typed_payload_is_skipped() {
        assert_eq!(
            parse_frame(&RawFrame::new(Some("thinking"), r#"{"content":42}"#)),
            Parsed::Skipped
        );
    }
}
