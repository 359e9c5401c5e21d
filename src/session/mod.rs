//! Chat session state and its reconciliation.
//!
//! - [`state`]: transcript, workflow timeline and artifacts ([`ChatState`])
//! - [`workflow`]: action strings and their descriptions
//! - [`artifact`]: which tool results become artifacts
//! - [`reconcile`]: the [`Reconciler`] that folds domain events into state
//! - [`chat`]: the [`ChatSession`] driver tying transport and state together
//!
//! # Example
//!
//! ```rust
//! use sara_stream::feed::DomainEvent;
//! use sara_stream::session::{ChatState, Reconciler};
//! use serde_json::json;
//!
//! let mut state = ChatState::new();
//! Reconciler::default().fold(
//!     &mut state,
//!     vec![
//!         DomainEvent::status("thinking"),
//!         DomainEvent::tool_call("1", "get_patient", json!({"endpoint": "/Patient?name=Peter"})),
//!         DomainEvent::tool_result("1", json!({"resourceType": "Patient", "id": "abc"})),
//!         DomainEvent::complete("MRN S6227720"),
//!     ],
//! );
//! assert!(state.is_complete);
//! assert_eq!(state.artifacts.len(), 1);
//! ```

pub mod artifact;
pub mod chat;
pub mod reconcile;
pub mod state;
pub mod workflow;

pub use chat::ChatSession;
pub use reconcile::{Reconciler, ToolErrorPolicy};
pub use state::{Artifact, ChatState, Message, MessageKind, StepStatus, ToolCallInfo, WorkflowStep};
