//! Shared domain types for the AMA service: identifiers and the envelopes
//! pushed to live room subscribers.

pub mod envelope;
pub mod ids;

pub use envelope::{Envelope, MessageAnswered, MessageCreated, ReactionCount, RoomEvent};
pub use ids::{MessageId, RoomId};
