//! Envelopes delivered to room subscribers.
//!
//! On the wire an envelope is `{"kind": "<tag>", "value": {...}}`. The room
//! it belongs to travels alongside for routing and is never serialized.

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RoomId};

/// Payload of a `message_created` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCreated {
    pub id: MessageId,
    pub message: String,
}

/// Payload of the reaction events: the message and its reaction count after
/// the change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionCount {
    pub id: MessageId,
    pub count: i64,
}

/// Payload of a `message_answered` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAnswered {
    pub id: MessageId,
}

/// Everything a room subscriber can be told about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RoomEvent {
    MessageCreated(MessageCreated),
    MessageReactionIncreased(ReactionCount),
    MessageReactionDecreased(ReactionCount),
    MessageAnswered(MessageAnswered),
}

impl RoomEvent {
    /// Wire tag for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageCreated(_) => "message_created",
            Self::MessageReactionIncreased(_) => "message_reaction_increased",
            Self::MessageReactionDecreased(_) => "message_reaction_decreased",
            Self::MessageAnswered(_) => "message_answered",
        }
    }
}

/// A room event plus the room it is routed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub room: RoomId,
    pub event: RoomEvent,
}

impl Envelope {
    pub fn new(room: RoomId, event: RoomEvent) -> Self {
        Self { room, event }
    }

    pub fn message_created(room: RoomId, id: MessageId, message: impl Into<String>) -> Self {
        Self::new(
            room,
            RoomEvent::MessageCreated(MessageCreated {
                id,
                message: message.into(),
            }),
        )
    }

    pub fn reaction_increased(room: RoomId, id: MessageId, count: i64) -> Self {
        Self::new(room, RoomEvent::MessageReactionIncreased(ReactionCount { id, count }))
    }

    pub fn reaction_decreased(room: RoomId, id: MessageId, count: i64) -> Self {
        Self::new(room, RoomEvent::MessageReactionDecreased(ReactionCount { id, count }))
    }

    pub fn answered(room: RoomId, id: MessageId) -> Self {
        Self::new(room, RoomEvent::MessageAnswered(MessageAnswered { id }))
    }

    pub fn kind(&self) -> &'static str {
        self.event.kind()
    }

    /// Serialize the wire form. The room is routing metadata and is left out.
    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.event)
    }
}
