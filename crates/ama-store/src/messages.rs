use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::Serialize;
use tracing::instrument;

use ama_core::{MessageId, RoomId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, get_id};

#[derive(Clone, Debug, Serialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub room_id: RoomId,
    pub message: String,
    pub reaction_count: i64,
    pub answered: bool,
    pub created_at: String,
}

const SELECT_MESSAGE: &str =
    "SELECT id, room_id, message, reaction_count, answered, created_at FROM messages";

fn map_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, StoreError> {
    Ok(MessageRow {
        id: get_id(row, 0, "messages", "id")?,
        room_id: get_id(row, 1, "messages", "room_id")?,
        message: get(row, 2, "messages", "message")?,
        reaction_count: get(row, 3, "messages", "reaction_count")?,
        answered: get(row, 4, "messages", "answered")?,
        created_at: get(row, 5, "messages", "created_at")?,
    })
}

#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a message in a room and return its id.
    #[instrument(skip(self, message), fields(room_id = %room_id))]
    pub fn save(&self, room_id: &RoomId, message: &str) -> Result<MessageId, StoreError> {
        self.db.with_conn(|conn| {
            let id = MessageId::new();
            conn.execute(
                "INSERT INTO messages (id, room_id, message, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    id.to_string(),
                    room_id.to_string(),
                    message,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(id)
        })
    }

    #[instrument(skip(self), fields(room_id = %room_id, message_id = %id))]
    pub fn find(&self, room_id: &RoomId, id: &MessageId) -> Result<MessageRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("{SELECT_MESSAGE} WHERE id = ?1 AND room_id = ?2"),
                [id.to_string(), room_id.to_string()],
                |row| Ok(map_message(row)),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("message {id}")))?
        })
    }

    /// Messages of a room, oldest first.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn list_for_room(&self, room_id: &RoomId) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MESSAGE} WHERE room_id = ?1 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map([room_id.to_string()], |row| Ok(map_message(row)))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }

    /// Add one reaction. Returns the new count.
    #[instrument(skip(self), fields(room_id = %room_id, message_id = %id))]
    pub fn react(&self, room_id: &RoomId, id: &MessageId) -> Result<i64, StoreError> {
        self.update_count(
            "UPDATE messages SET reaction_count = reaction_count + 1
             WHERE id = ?1 AND room_id = ?2 RETURNING reaction_count",
            room_id,
            id,
        )
    }

    /// Remove one reaction, never going below zero. Returns the new count.
    #[instrument(skip(self), fields(room_id = %room_id, message_id = %id))]
    pub fn remove_reaction(&self, room_id: &RoomId, id: &MessageId) -> Result<i64, StoreError> {
        self.update_count(
            "UPDATE messages SET reaction_count = MAX(reaction_count - 1, 0)
             WHERE id = ?1 AND room_id = ?2 RETURNING reaction_count",
            room_id,
            id,
        )
    }

    #[instrument(skip(self), fields(room_id = %room_id, message_id = %id))]
    pub fn mark_answered(&self, room_id: &RoomId, id: &MessageId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET answered = 1 WHERE id = ?1 AND room_id = ?2",
                [id.to_string(), room_id.to_string()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("message {id}")));
            }
            Ok(())
        })
    }

    fn update_count(&self, sql: &str, room_id: &RoomId, id: &MessageId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(sql, [id.to_string(), room_id.to_string()], |row| row.get(0))
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("message {id}")))
        })
    }
}
