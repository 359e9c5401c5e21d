//! Typed domain events of the agent feed.
//!
//! The backend names each frame with an SSE `event:` field and sends the
//! payload as a JSON object in `data:`. [`DomainEvent`] uses the same
//! adjacently tagged layout (`{"type": ..., "data": {...}}`) so a frame can be
//! lifted into an event with a single `serde_json::from_value`.
//!
//! # Example
//!
//! ```rust
//! use sara_stream::feed::DomainEvent;
//!
//! let event: DomainEvent = serde_json::from_value(serde_json::json!({
//!     "type": "complete",
//!     "data": { "response": "MRN S6227720" }
//! }))
//! .unwrap();
//! assert!(event.is_terminal());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle value of a `status` event that opens the thinking indicator.
pub const STATUS_THINKING: &str = "thinking";

/// Result status value that marks a failed tool invocation.
pub const RESULT_STATUS_ERROR: &str = "error";

/// One parsed unit of the streaming protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Lifecycle signal (e.g. `"thinking"`).
    Status {
        #[serde(default)]
        status: String,
    },

    /// Extended reasoning text for the live thinking entry.
    Thinking {
        #[serde(default)]
        content: Option<String>,
    },

    /// The agent starts invoking an external operation.
    ToolCall {
        /// Correlation key for the matching `tool_result`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Tool name.
        #[serde(default)]
        tool: String,
        /// Tool arguments; `method` and `endpoint` are read when present.
        #[serde(default)]
        args: Value,
    },

    /// Completion or failure of a previously announced call.
    ToolResult {
        #[serde(default)]
        id: String,
        #[serde(default)]
        result: Value,
        /// `"error"` marks failure; anything else is success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },

    /// Terminal success.
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answer: Option<String>,
    },

    /// Terminal failure.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl DomainEvent {
    /// `status{status}` event.
    #[must_use]
    pub fn status(status: impl Into<String>) -> Self {
        Self::Status {
            status: status.into(),
        }
    }

    /// `thinking{content}` event.
    #[must_use]
    pub fn thinking(content: impl Into<String>) -> Self {
        Self::Thinking {
            content: Some(content.into()),
        }
    }

    /// `tool_call{id, tool, args}` event.
    #[must_use]
    pub fn tool_call(id: impl Into<String>, tool: impl Into<String>, args: Value) -> Self {
        Self::ToolCall {
            id: Some(id.into()),
            tool: tool.into(),
            args,
        }
    }

    /// Successful `tool_result{id, result}` event.
    #[must_use]
    pub fn tool_result(id: impl Into<String>, result: Value) -> Self {
        Self::ToolResult {
            id: id.into(),
            result,
            status: None,
        }
    }

    /// Failed `tool_result{id, result, status: "error"}` event.
    #[must_use]
    pub fn tool_error(id: impl Into<String>, result: Value) -> Self {
        Self::ToolResult {
            id: id.into(),
            result,
            status: Some(RESULT_STATUS_ERROR.to_string()),
        }
    }

    /// `complete{response}` event.
    #[must_use]
    pub fn complete(response: impl Into<String>) -> Self {
        Self::Complete {
            response: Some(response.into()),
            answer: None,
        }
    }

    /// `error{message}` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: Some(message.into()),
            error: None,
        }
    }

    /// Wire name of this event (the SSE `event:` field).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// `complete` and `error` end a session.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}
