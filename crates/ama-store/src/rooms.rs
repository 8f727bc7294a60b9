use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::Serialize;
use tracing::instrument;

use ama_core::RoomId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, get_id};

#[derive(Clone, Debug, Serialize)]
pub struct RoomRow {
    pub id: RoomId,
    pub theme: String,
    pub created_at: String,
}

fn map_room(row: &rusqlite::Row<'_>) -> Result<RoomRow, StoreError> {
    Ok(RoomRow {
        id: get_id(row, 0, "rooms", "id")?,
        theme: get(row, 1, "rooms", "theme")?,
        created_at: get(row, 2, "rooms", "created_at")?,
    })
}

#[derive(Clone)]
pub struct RoomRepo {
    db: Database,
}

impl RoomRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a room and return its id.
    #[instrument(skip(self))]
    pub fn save(&self, theme: &str) -> Result<RoomId, StoreError> {
        self.db.with_conn(|conn| {
            let id = RoomId::new();
            conn.execute(
                "INSERT INTO rooms (id, theme, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.to_string(), theme, Utc::now().to_rfc3339()],
            )?;
            Ok(id)
        })
    }

    /// Insert a room with a caller-chosen id.
    #[instrument(skip(self), fields(room_id = %id))]
    pub fn save_with_id(&self, id: RoomId, theme: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, theme, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.to_string(), theme, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Look up a room. `StoreError::NotFound` if it does not exist.
    #[instrument(skip(self), fields(room_id = %id))]
    pub fn find(&self, id: &RoomId) -> Result<RoomRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, theme, created_at FROM rooms WHERE id = ?1",
                [id.to_string()],
                |row| Ok(map_room(row)),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("room {id}")))?
        })
    }

    /// All rooms, newest first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<RoomRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, theme, created_at FROM rooms ORDER BY created_at DESC, id DESC")?;
            let rows = stmt.query_map([], |row| Ok(map_room(row)))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RoomRepo {
        RoomRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn save_and_find() {
        let repo = repo();
        let id = repo.save("rust async").unwrap();
        let room = repo.find(&id).unwrap();
        assert_eq!(room.id, id);
        assert_eq!(room.theme, "rust async");
    }

    #[test]
    fn find_missing_is_not_found() {
        let repo = repo();
        let err = repo.find(&RoomId::new()).unwrap_err();
        assert!(err.is_not_found(), "got: {err}");
    }

    #[test]
    fn save_with_fixed_id() {
        let repo = repo();
        let id = RoomId::parse("11111111-1111-1111-1111-111111111111").unwrap();
        repo.save_with_id(id, "fixed").unwrap();
        assert_eq!(repo.find(&id).unwrap().theme, "fixed");
    }

    #[test]
    fn duplicate_id_fails() {
        let repo = repo();
        let id = RoomId::new();
        repo.save_with_id(id, "a").unwrap();
        assert!(repo.save_with_id(id, "b").is_err());
    }

    #[test]
    fn list_rooms() {
        let repo = repo();
        assert!(repo.list().unwrap().is_empty());
        repo.save("a").unwrap();
        repo.save("b").unwrap();
        assert_eq!(repo.list().unwrap().len(), 2);
    }
}
