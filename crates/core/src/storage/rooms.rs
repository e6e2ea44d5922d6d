//! Room storage operations

use rusqlite::{params, Connection, Row};
use tracing::instrument;

use super::parse::{parse_datetime, parse_status, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::Room;

const ROOM_COLUMNS: &str = "id, code, owner_id, status, current_participants, max_participants,
     last_activity_at, created_at, updated_at";

pub struct RoomStore<'a> {
    conn: &'a Connection,
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        code: row.get(1)?,
        owner_id: parse_uuid(2, &row.get::<_, String>(2)?)?,
        status: parse_status(3, &row.get::<_, String>(3)?)?,
        current_participants: row.get(4)?,
        max_participants: row.get(5)?,
        last_activity_at: parse_datetime(6, &row.get::<_, String>(6)?)?,
        created_at: parse_datetime(7, &row.get::<_, String>(7)?)?,
        updated_at: parse_datetime(8, &row.get::<_, String>(8)?)?,
    })
}

impl<'a> RoomStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a new room
    #[instrument(skip(self, room), fields(code = %room.code))]
    pub fn create(&self, room: &Room) -> Result<()> {
        self.conn.execute(
            "INSERT INTO rooms (id, code, owner_id, status, current_participants, max_participants,
                                last_activity_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                room.id.to_string(),
                room.code,
                room.owner_id.to_string(),
                room.status.as_str(),
                room.current_participants,
                room.max_participants,
                room.last_activity_at.to_rfc3339(),
                room.created_at.to_rfc3339(),
                room.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find a room by code
    #[instrument(skip(self))]
    pub fn find_by_code(&self, code: &str) -> Result<Option<Room>> {
        let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE code = ?1");
        let room = self
            .conn
            .query_row(&sql, params![code], room_from_row)
            .optional()?;
        Ok(room)
    }

    /// Update the mutable columns of a room
    #[instrument(skip(self, room), fields(code = %room.code, status = %room.status))]
    pub fn update(&self, room: &Room) -> Result<()> {
        self.conn.execute(
            "UPDATE rooms SET status = ?1, current_participants = ?2, max_participants = ?3,
                              last_activity_at = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                room.status.as_str(),
                room.current_participants,
                room.max_participants,
                room.last_activity_at.to_rfc3339(),
                room.updated_at.to_rfc3339(),
                room.id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Active rooms with no active participant row
    #[instrument(skip(self))]
    pub fn list_orphaned(&self) -> Result<Vec<Room>> {
        let sql = format!(
            "SELECT {ROOM_COLUMNS} FROM rooms r
             WHERE r.status = 'active'
               AND NOT EXISTS (
                   SELECT 1 FROM participants p WHERE p.room_id = r.id AND p.is_active = 1
               )
             ORDER BY r.created_at"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rooms = stmt
            .query_map([], room_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rooms)
    }
}
