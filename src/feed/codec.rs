//! Incremental Server-Sent Events framing.
//!
//! [`SseDecoder`] turns an arbitrarily chunked byte stream into discrete
//! [`RawFrame`]s. It keeps only the bytes of the current, unterminated line
//! plus the fields of the frame being assembled, so frames are handed out as
//! soon as their terminating blank line arrives.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// A single decoded event-stream frame: an optional event name plus the
/// (possibly multi-line) data payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    /// Value of the `event:` field, if the frame carried one.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// Last seen `id:` value.
    pub id: Option<String>,
}

impl RawFrame {
    /// Build a frame by hand (used by fixtures and replay).
    #[must_use]
    pub fn new(event: Option<&str>, data: impl Into<String>) -> Self {
        Self {
            event: event.map(ToOwned::to_owned),
            data: data.into(),
            id: None,
        }
    }
}

/// Event-stream decoder usable with `tokio_util::codec` or driven by hand.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: String,
    has_data: bool,
    last_id: Option<String>,
}

impl SseDecoder {
    /// Create a decoder with empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn process_line(&mut self, line: &str) -> Option<RawFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "id" if !value.contains('\0') => self.last_id = Some(value.to_owned()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<RawFrame> {
        let event = self.event.take().filter(|name| !name.is_empty());
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(RawFrame {
            event,
            data: std::mem::take(&mut self.data),
            id: self.last_id.clone(),
        })
    }
}

/// Split the next complete line off `buf`.
///
/// A trailing `\r` is held back until the following byte shows whether it is
/// half of a `\r\n` pair, unless the stream has ended.
fn take_line(buf: &mut BytesMut, eof: bool) -> Option<String> {
    match buf.iter().position(|&b| b == b'\n' || b == b'\r') {
        Some(pos) => {
            let terminator = if buf[pos] == b'\r' {
                match buf.get(pos + 1) {
                    Some(b'\n') => 2,
                    Some(_) => 1,
                    None if eof => 1,
                    None => return None,
                }
            } else {
                1
            };
            let line = buf.split_to(pos);
            buf.advance(terminator);
            Some(String::from_utf8_lossy(&line).into_owned())
        }
        None if eof && !buf.is_empty() => {
            let line = buf.split_to(buf.len());
            Some(String::from_utf8_lossy(&line).into_owned())
        }
        None => None,
    }
}

impl Decoder for SseDecoder {
    type Item = RawFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(line) = take_line(src, false) {
            if let Some(frame) = self.process_line(&line) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(line) = take_line(src, true) {
            if let Some(frame) = self.process_line(&line) {
                return Ok(Some(frame));
            }
        }
        Ok(self.dispatch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(chunks: &[&str]) -> Vec<RawFrame> {
        let mut decoder = SseDecoder::new();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            buf.extend_from_slice(chunk.as_bytes());
            while let Some(frame) = decoder.decode(&mut buf).unwrap() {
                frames.push(frame);
            }
        }
        while let Some(frame) = decoder.decode_eof(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_single_frame() {
        let frames = decode_all(&["event: status\ndata: {\"status\":\"thinking\"}\n\n"]);
        assert_eq!(
            frames,
            vec![RawFrame::new(Some("status"), r#"{"status":"thinking"}"#)]
        );
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let frames = decode_all(&["event: tool_c", "all\ndata: {\"to", "ol\":\"x\"}\n", "\n"]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("tool_call"));
        assert_eq!(frames[0].data, r#"{"tool":"x"}"#);
    }

    #[test]
    fn test_crlf_split_between_chunks() {
        let frames = decode_all(&["data: a\r", "\n\r\n", "data: b\r\n\r\n"]);
        let data: Vec<_> = frames.iter().map(|f| f.data.as_str()).collect();
        assert_eq!(data, vec!["a", "b"]);
    }

    #[test]
    fn test_multiline_data_and_comments() {
        let frames = decode_all(&[": keep-alive\n\ndata: line1\ndata:line2\nretry: 10\n\n"]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "line1\nline2");
        assert!(frames[0].event.is_none());
    }

    #[test]
    fn test_event_without_data_is_not_dispatched() {
        let frames = decode_all(&["event: ping\n\nevent: complete\ndata: {}\n\n"]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("complete"));
    }

    #[test]
    fn test_unterminated_frame_flushed_at_eof() {
        let frames = decode_all(&["data: [DONE]"]);
        assert_eq!(frames, vec![RawFrame::new(None, "[DONE]")]);
    }

    #[test]
    fn test_id_is_carried_forward() {
        let frames = decode_all(&["id: 7\ndata: a\n\ndata: b\n\n"]);
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(frames[1].id.as_deref(), Some("7"));
    }
}
