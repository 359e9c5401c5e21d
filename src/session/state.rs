//! Session state: transcript, workflow timeline and artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Prefix of generated workflow step ids.
const STEP_ID_PREFIX: &str = "step-";

/// Generate a fresh message or artifact id.
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a fresh workflow step id.
#[must_use]
pub fn new_step_id() -> String {
    format!("{STEP_ID_PREFIX}{}", Uuid::new_v4())
}

/// Transcript entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    ToolCall,
    Thinking,
}

/// Progress of a tool invocation or workflow step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    #[default]
    Running,
    Complete,
    Error,
}

impl StepStatus {
    /// `complete` and `error` are final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// Tool invocation attached to a `tool_call` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub id: String,
    pub tool: String,
    pub status: StepStatus,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallInfo>,
}

impl Message {
    fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            kind,
            content: content.into(),
            timestamp: Utc::now(),
            tool_call: None,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageKind::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Assistant, content)
    }

    #[must_use]
    pub fn thinking(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Thinking, content)
    }

    /// A running `tool_call` entry for `tool`, correlated by `id`.
    #[must_use]
    pub fn tool_call(id: impl Into<String>, tool: impl Into<String>, args: Value) -> Self {
        let tool = tool.into();
        let mut message = Self::new(MessageKind::ToolCall, format!("Calling {tool}..."));
        message.tool_call = Some(ToolCallInfo {
            id: id.into(),
            tool,
            status: StepStatus::Running,
            args,
            result: None,
        });
        message
    }

    /// Correlation id of the attached tool call, if any.
    #[must_use]
    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call.as_ref().map(|call| call.id.as_str())
    }
}

/// One entry of the workflow timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    /// Raw action, e.g. `GET /Patient?name=Peter`.
    pub action: String,
    /// Human-readable description; dedup key for retries.
    pub description: String,
    pub status: StepStatus,
    pub timestamp: DateTime<Utc>,
}

/// A structured result retained for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Artifact {
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            id: new_id(),
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Everything a consumer renders for one chat session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatState {
    pub messages: Vec<Message>,
    pub workflow_steps: Vec<WorkflowStep>,
    pub artifacts: Vec<Artifact>,
    pub is_complete: bool,
    pub final_answer: Option<String>,
    pub is_warming_up: bool,
}

impl ChatState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The live thinking entry, if one exists.
    #[must_use]
    pub fn thinking(&self) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.kind == MessageKind::Thinking)
    }

    pub(crate) fn thinking_mut(&mut self) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.kind == MessageKind::Thinking)
    }

    /// Drop the thinking indicator.
    pub(crate) fn remove_thinking(&mut self) {
        self.messages.retain(|m| m.kind != MessageKind::Thinking);
    }

    /// `tool_call` message correlated with `id`.
    pub(crate) fn tool_message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.kind == MessageKind::ToolCall && m.tool_call_id() == Some(id))
    }

    pub(crate) fn step_mut(&mut self, id: &str) -> Option<&mut WorkflowStep> {
        self.workflow_steps.iter_mut().find(|s| s.id == id)
    }

    /// Last assistant message, i.e. the answer or the error text.
    #[must_use]
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.kind == MessageKind::Assistant)
    }
}
