//! The reducer that folds domain events into [`ChatState`].
//!
//! Every transition is total: any event applied to any state yields a valid
//! state. Once the session is complete, further feed events are ignored until
//! a new user message reopens it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::artifact;
use super::state::{Artifact, ChatState, Message, StepStatus, WorkflowStep, new_step_id};
use super::workflow::{action_for, describe_action};
use crate::error::TransportError;
use crate::feed::DomainEvent;
use crate::feed::events::{RESULT_STATUS_ERROR, STATUS_THINKING};

/// Initial text of the thinking indicator.
pub const THINKING_TEXT: &str = "Thinking...";

/// Thinking text when a `thinking` event carries no content.
pub const PROCESSING_TEXT: &str = "Processing...";

/// Thinking text while the backend is cold-starting.
pub const WARMING_UP_TEXT: &str = "Connecting to Sara... (server warming up)";

/// Transcript text for a transport timeout.
pub const TIMEOUT_TEXT: &str = "The server is taking longer than expected. Please try again.";

/// Fallback text of an `error` event without a message.
pub const DEFAULT_ERROR_TEXT: &str = "An error occurred";

/// How a failed `tool_result` is folded into state.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ToolErrorPolicy {
    /// Keep the step running and store the error payload on the message.
    /// The agent commonly recovers and retries.
    #[default]
    Tolerant,
    /// Mark the step and its message as failed.
    Strict,
}

impl ToolErrorPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tolerant => "tolerant",
            Self::Strict => "strict",
        }
    }
}

/// Applies domain events and lifecycle signals to a [`ChatState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    policy: ToolErrorPolicy,
}

impl Reconciler {
    #[must_use]
    pub fn new(policy: ToolErrorPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> ToolErrorPolicy {
        self.policy
    }

    /// Apply a sequence of events in order.
    pub fn fold(&self, state: &mut ChatState, events: impl IntoIterator<Item = DomainEvent>) {
        for event in events {
            self.apply(state, event);
        }
    }

    /// Apply one domain event.
    pub fn apply(&self, state: &mut ChatState, event: DomainEvent) {
        if state.is_complete {
            tracing::debug!(event = event.kind(), "Ignoring event for completed session");
            return;
        }

        match event {
            DomainEvent::Status { status } => {
                if status == STATUS_THINKING && state.thinking().is_none() {
                    state.messages.push(Message::thinking(THINKING_TEXT));
                }
            }
            DomainEvent::Thinking { content } => {
                if let Some(message) = state.thinking_mut() {
                    message.content = content
                        .filter(|c| !c.is_empty())
                        .unwrap_or_else(|| PROCESSING_TEXT.to_string());
                }
            }
            DomainEvent::ToolCall { id, tool, args } => {
                state.remove_thinking();
                let id = id.filter(|id| !id.is_empty()).unwrap_or_else(new_step_id);
                tool_call(state, id, tool, args);
            }
            DomainEvent::ToolResult { id, result, status } => {
                state.remove_thinking();
                let failed = status.as_deref() == Some(RESULT_STATUS_ERROR);
                self.tool_result(state, &id, result, failed);
            }
            DomainEvent::Complete { response, answer } => {
                state.remove_thinking();
                let text = response
                    .filter(|r| !r.is_empty())
                    .or_else(|| answer.filter(|a| !a.is_empty()));
                state
                    .messages
                    .push(Message::assistant(text.clone().unwrap_or_default()));
                state.final_answer = text;
                state.is_complete = true;
            }
            DomainEvent::Error { message, error } => {
                state.remove_thinking();
                let text = message
                    .filter(|m| !m.is_empty())
                    .or_else(|| error.filter(|e| !e.is_empty()))
                    .unwrap_or_else(|| DEFAULT_ERROR_TEXT.to_string());
                state.messages.push(Message::assistant(format!("Error: {text}")));
                state.is_complete = true;
            }
        }
    }

    fn tool_result(&self, state: &mut ChatState, id: &str, result: Value, failed: bool) {
        let Some(message) = state.tool_message_mut(id) else {
            tracing::debug!(tool_id = id, "Ignoring uncorrelated tool result");
            return;
        };
        let Some(call) = message.tool_call.as_mut() else {
            return;
        };
        if call.status.is_terminal() {
            tracing::debug!(tool_id = id, "Ignoring duplicate tool result");
            return;
        }
        let tool = call.tool.clone();

        if failed {
            match self.policy {
                ToolErrorPolicy::Tolerant => {
                    tracing::debug!(tool = %tool, tool_id = id, "Tool failed, keeping step running");
                    call.result = Some(result);
                }
                ToolErrorPolicy::Strict => {
                    tracing::debug!(tool = %tool, tool_id = id, "Tool failed");
                    call.status = StepStatus::Error;
                    call.result = Some(result);
                    message.content = format!("{tool} failed");
                    if let Some(step) = state.step_mut(id) {
                        step.status = StepStatus::Error;
                    }
                }
            }
            return;
        }

        call.status = StepStatus::Complete;
        call.result = Some(result.clone());
        message.content = format!("{tool} completed");
        if let Some(step) = state.step_mut(id) {
            step.status = StepStatus::Complete;
        }
        if let Some(kind) = artifact::admit(&result, &tool) {
            tracing::debug!(tool = %tool, artifact_type = %kind, "Artifact admitted");
            state.artifacts.push(Artifact::new(kind, result));
        }
    }

    /// A user message reopens the session.
    pub fn user_message(&self, state: &mut ChatState, content: impl Into<String>) {
        state.messages.push(Message::user(content));
        state.is_complete = false;
    }

    /// No response yet after the warmup delay.
    pub fn warming_up(&self, state: &mut ChatState) {
        state.is_warming_up = true;
        if let Some(message) = state.thinking_mut() {
            message.content = WARMING_UP_TEXT.to_string();
        }
    }

    /// Response headers arrived.
    pub fn connected(&self, state: &mut ChatState) {
        state.is_warming_up = false;
    }

    /// The stream ended without a transport error.
    pub fn stream_ended(&self, state: &mut ChatState) {
        state.remove_thinking();
        state.is_complete = true;
    }

    /// The transport gave up.
    pub fn stream_failed(&self, state: &mut ChatState, error: &TransportError) {
        if state.is_complete {
            tracing::debug!(error = %error, "Ignoring transport failure after completion");
            return;
        }
        state.remove_thinking();
        let text = if error.is_timeout() {
            TIMEOUT_TEXT.to_string()
        } else {
            format!("Connection error: {error}")
        };
        state.messages.push(Message::assistant(text));
        state.is_complete = true;
        state.is_warming_up = false;
    }
}

fn tool_call(state: &mut ChatState, id: String, tool: String, args: Value) {
    // A call id is announced once; a replayed call must not open a second step.
    if state.workflow_steps.iter().any(|s| s.id == id)
        || state.messages.iter().any(|m| m.tool_call_id() == Some(id.as_str()))
    {
        tracing::debug!(tool = %tool, step_id = %id, "Ignoring repeated tool call");
        return;
    }

    let action = action_for(&tool, &args);
    let description = describe_action(&action);

    let retried = state
        .workflow_steps
        .iter_mut()
        .find(|s| s.description == description && !s.status.is_terminal());

    if let Some(step) = retried {
        let previous = std::mem::replace(&mut step.id, id.clone());
        step.action = action;
        step.status = StepStatus::Running;
        step.timestamp = Utc::now();
        tracing::debug!(tool = %tool, step_id = %id, previous_id = %previous, "Retrying workflow step");

        if let Some(message) = state.tool_message_mut(&previous) {
            message.content = format!("Calling {tool}...");
            if let Some(call) = message.tool_call.as_mut() {
                call.id = id;
                call.status = StepStatus::Running;
                call.args = args;
                call.result = None;
            }
        } else {
            state.messages.push(Message::tool_call(id, tool, args));
        }
        return;
    }

    tracing::debug!(tool = %tool, step_id = %id, action = %action, "New workflow step");
    state.workflow_steps.push(WorkflowStep {
        id: id.clone(),
        action,
        description: description.to_string(),
        status: StepStatus::Running,
        timestamp: Utc::now(),
    });
    state.messages.push(Message::tool_call(id, tool, args));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::state::MessageKind;
    use serde_json::json;
    use std::time::Duration;

    fn fold(events: Vec<DomainEvent>) -> ChatState {
        let mut state = ChatState::new();
        Reconciler::default().fold(&mut state, events);
        state
    }

    fn patient_args() -> Value {
        json!({"method": "GET", "endpoint": "/Patient?name=Peter"})
    }

    #[test]
    fn test_thinking_is_idempotent() {
        let state = fold(vec![
            DomainEvent::status("thinking"),
            DomainEvent::status("thinking"),
            DomainEvent::status("thinking"),
        ]);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, THINKING_TEXT);
    }

    #[test]
    fn test_thinking_content_updates_in_place() {
        let state = fold(vec![
            DomainEvent::status("thinking"),
            DomainEvent::thinking("Looking up the patient"),
        ]);
        assert_eq!(state.thinking().unwrap().content, "Looking up the patient");

        let state = fold(vec![
            DomainEvent::status("thinking"),
            DomainEvent::Thinking { content: None },
        ]);
        assert_eq!(state.thinking().unwrap().content, PROCESSING_TEXT);
    }

    #[test]
    fn test_thinking_without_indicator_is_noop() {
        let state = fold(vec![DomainEvent::thinking("orphan")]);
        assert!(state.messages.is_empty());
    }

    #[test]
    fn test_other_status_keeps_thinking() {
        let state = fold(vec![
            DomainEvent::status("thinking"),
            DomainEvent::status("working"),
        ]);
        assert!(state.thinking().is_some());
    }

    #[test]
    fn test_tool_call_and_result_correlate() {
        let state = fold(vec![
            DomainEvent::status("thinking"),
            DomainEvent::tool_call("1", "get_patient", patient_args()),
            DomainEvent::tool_result("1", json!({"resourceType": "Patient", "id": "abc"})),
        ]);
        assert!(state.thinking().is_none());
        assert_eq!(state.workflow_steps.len(), 1);
        let step = &state.workflow_steps[0];
        assert_eq!(step.id, "1");
        assert_eq!(step.action, "GET /Patient?name=Peter");
        assert_eq!(step.description, "Searching patient records");
        assert_eq!(step.status, StepStatus::Complete);

        let message = &state.messages[0];
        assert_eq!(message.kind, MessageKind::ToolCall);
        assert_eq!(message.content, "get_patient completed");
        let call = message.tool_call.as_ref().unwrap();
        assert_eq!(call.status, StepStatus::Complete);
        assert_eq!(call.result.as_ref().unwrap()["id"], "abc");

        assert_eq!(state.artifacts.len(), 1);
        assert_eq!(state.artifacts[0].kind, "Patient");
    }

    #[test]
    fn test_retry_mutates_existing_step() {
        let state = fold(vec![
            DomainEvent::tool_call("1", "get_patient", patient_args()),
            DomainEvent::tool_error("1", json!({"error": "timeout"})),
            DomainEvent::tool_call("2", "get_patient", patient_args()),
            DomainEvent::tool_result("2", json!({"resourceType": "Patient", "id": "abc"})),
        ]);
        assert_eq!(state.workflow_steps.len(), 1);
        assert_eq!(state.workflow_steps[0].id, "2");
        assert_eq!(state.workflow_steps[0].status, StepStatus::Complete);

        let tool_messages: Vec<_> = state
            .messages
            .iter()
            .filter(|m| m.kind == MessageKind::ToolCall)
            .collect();
        assert_eq!(tool_messages.len(), 1);
        assert_eq!(tool_messages[0].tool_call_id(), Some("2"));
        assert_eq!(state.artifacts.len(), 1);
    }

    #[test]
    fn test_completed_step_is_not_deduplicated() {
        let state = fold(vec![
            DomainEvent::tool_call("1", "get_patient", patient_args()),
            DomainEvent::tool_result("1", json!({"resourceType": "Patient"})),
            DomainEvent::tool_call("2", "get_patient", patient_args()),
        ]);
        assert_eq!(state.workflow_steps.len(), 2);
    }

    #[test]
    fn test_replayed_call_and_result_are_idempotent() {
        let call = || DomainEvent::tool_call("1", "get_patient", patient_args());
        let result = || DomainEvent::tool_result("1", json!({"resourceType": "Patient", "id": "abc"}));
        let state = fold(vec![call(), result(), call(), result()]);

        assert_eq!(state.workflow_steps.len(), 1);
        assert_eq!(state.workflow_steps[0].status, StepStatus::Complete);
        let tool_messages = state
            .messages
            .iter()
            .filter(|m| m.kind == MessageKind::ToolCall)
            .count();
        assert_eq!(tool_messages, 1);
        assert_eq!(state.artifacts.len(), 1);
    }

    #[test]
    fn test_tolerant_tool_error() {
        let state = fold(vec![
            DomainEvent::tool_call("1", "get_patient", patient_args()),
            DomainEvent::tool_error("1", json!({"error": "boom"})),
        ]);
        assert_eq!(state.workflow_steps[0].status, StepStatus::Running);
        let call = state.messages[0].tool_call.as_ref().unwrap();
        assert_eq!(call.status, StepStatus::Running);
        assert_eq!(call.result.as_ref().unwrap()["error"], "boom");
        assert!(state.artifacts.is_empty());
    }

    #[test]
    fn test_strict_tool_error() {
        let mut state = ChatState::new();
        Reconciler::new(ToolErrorPolicy::Strict).fold(
            &mut state,
            vec![
                DomainEvent::tool_call("1", "get_patient", patient_args()),
                DomainEvent::tool_error("1", json!({"error": "boom"})),
            ],
        );
        assert_eq!(state.workflow_steps[0].status, StepStatus::Error);
        assert_eq!(state.messages[0].content, "get_patient failed");
        assert_eq!(
            state.messages[0].tool_call.as_ref().unwrap().status,
            StepStatus::Error
        );
    }

    #[test]
    fn test_uncorrelated_result_is_noop() {
        let state = fold(vec![
            DomainEvent::tool_call("1", "get_patient", patient_args()),
            DomainEvent::tool_result("99", json!({"resourceType": "Patient"})),
        ]);
        assert_eq!(state.workflow_steps[0].status, StepStatus::Running);
        assert!(state.artifacts.is_empty());
    }

    #[test]
    fn test_tool_call_without_id_gets_step_id() {
        let state = fold(vec![DomainEvent::ToolCall {
            id: None,
            tool: "search".to_string(),
            args: Value::Null,
        }]);
        assert!(state.workflow_steps[0].id.starts_with("step-"));
        assert_eq!(
            state.messages[0].tool_call_id(),
            Some(state.workflow_steps[0].id.as_str())
        );
        assert_eq!(state.workflow_steps[0].action, "GET /search");
    }

    #[test]
    fn test_complete_prefers_response_then_answer() {
        let state = fold(vec![DomainEvent::Complete {
            response: Some(String::new()),
            answer: Some("S6227720".to_string()),
        }]);
        assert!(state.is_complete);
        assert_eq!(state.final_answer.as_deref(), Some("S6227720"));
        assert_eq!(state.messages[0].content, "S6227720");

        let state = fold(vec![DomainEvent::Complete {
            response: None,
            answer: None,
        }]);
        assert!(state.is_complete);
        assert!(state.final_answer.is_none());
        assert_eq!(state.messages[0].content, "");
    }

    #[test]
    fn test_error_event_text() {
        let state = fold(vec![DomainEvent::status("thinking"), DomainEvent::error("bad")]);
        assert!(state.is_complete);
        assert!(state.final_answer.is_none());
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "Error: bad");

        let state = fold(vec![DomainEvent::Error {
            message: None,
            error: None,
        }]);
        assert_eq!(state.messages[0].content, "Error: An error occurred");
    }

    #[test]
    fn test_only_one_terminal_applies() {
        let state = fold(vec![
            DomainEvent::complete("first"),
            DomainEvent::error("late"),
            DomainEvent::complete("second"),
        ]);
        let assistants = state
            .messages
            .iter()
            .filter(|m| m.kind == MessageKind::Assistant)
            .count();
        assert_eq!(assistants, 1);
        assert_eq!(state.final_answer.as_deref(), Some("first"));
    }

    #[test]
    fn test_user_message_reopens_session() {
        let reconciler = Reconciler::default();
        let mut state = fold(vec![DomainEvent::complete("done")]);
        reconciler.user_message(&mut state, "follow up");
        assert!(!state.is_complete);
        reconciler.apply(&mut state, DomainEvent::status("thinking"));
        assert!(state.thinking().is_some());
    }

    #[test]
    fn test_warming_up_and_connected() {
        let reconciler = Reconciler::default();
        let mut state = fold(vec![DomainEvent::status("thinking")]);
        reconciler.warming_up(&mut state);
        assert!(state.is_warming_up);
        assert_eq!(state.thinking().unwrap().content, WARMING_UP_TEXT);
        reconciler.connected(&mut state);
        assert!(!state.is_warming_up);
    }

    #[test]
    fn test_stream_failed_timeout_text() {
        let reconciler = Reconciler::default();
        let mut state = fold(vec![DomainEvent::status("thinking")]);
        reconciler.warming_up(&mut state);
        reconciler.stream_failed(&mut state, &TransportError::Timeout(Duration::from_secs(180)));
        assert!(state.is_complete);
        assert!(!state.is_warming_up);
        assert!(state.thinking().is_none());
        assert_eq!(state.messages[0].content, TIMEOUT_TEXT);
    }

    #[test]
    fn test_stream_failed_after_complete_is_ignored() {
        let reconciler = Reconciler::default();
        let mut state = fold(vec![DomainEvent::complete("done")]);
        reconciler.stream_failed(
            &mut state,
            &TransportError::Status {
                status: 500,
                body: String::new(),
            },
        );
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_stream_failed_connection_text() {
        let reconciler = Reconciler::default();
        let mut state = ChatState::new();
        reconciler.stream_failed(
            &mut state,
            &TransportError::Status {
                status: 502,
                body: String::new(),
            },
        );
        assert_eq!(
            state.messages[0].content,
            "Connection error: API request failed: 502"
        );
    }

    #[test]
    fn test_stream_ended_marks_complete() {
        let reconciler = Reconciler::default();
        let mut state = fold(vec![DomainEvent::status("thinking")]);
        reconciler.stream_ended(&mut state);
        assert!(state.is_complete);
        assert!(state.messages.is_empty());
    }
}
