//! Wire-level feed handling: event-stream framing, typed domain events and
//! the frame parser that connects them.
//!
//! - [`codec`]: incremental SSE decoder producing [`RawFrame`]s
//! - [`events`]: the closed [`DomainEvent`] set
//! - [`parser`]: pure `RawFrame → DomainEvent` translation

pub mod codec;
pub mod events;
pub mod parser;

pub use codec::{RawFrame, SseDecoder};
pub use events::DomainEvent;
pub use parser::{Parsed, is_end_of_stream, parse_frame};
