//! Sara Stream
//!
//! Streaming ingestion and state reconciliation for an agentic clinical chat.
//! A long-lived event feed describing an agent's reasoning and FHIR tool calls
//! is turned into one consistent, monotonically advancing view: a transcript,
//! a workflow timeline and a set of artifacts.
//!
//! # Architecture
//!
//! - **Transport**: one outbound streaming request at a time, with warmup
//!   signal, overall timeout, cancellation and bounded retry
//! - **Frame Parser**: raw event-stream frames to typed domain events
//! - **Reconciler**: folds domain events into session state
//! - **Playback**: optional paced re-emission of buffered frames
//!
//! # Modules
//!
//! - [`feed`]: SSE framing, domain events and the frame parser
//! - [`transport`]: HTTP client and the generation-tagged stream client
//! - [`session`]: session state, reconciliation and the session driver
//! - [`playback`]: sequencer, scheduler loop and the legacy board
//! - [`tasks`]: the built-in task catalog
//! - [`config`]: CLI and layered configuration

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod feed;
pub mod playback;
pub mod session;
pub mod tasks;
pub mod telemetry;
pub mod transport;

pub use error::{Result, TransportError};
