//! Participant ledger storage operations

use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_datetime_opt, parse_role, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::Participant;

const PARTICIPANT_COLUMNS: &str =
    "id, room_id, user_id, role, is_active, joined_at, left_at, created_at";

pub struct ParticipantStore<'a> {
    conn: &'a Connection,
}

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        room_id: parse_uuid(1, &row.get::<_, String>(1)?)?,
        user_id: parse_uuid(2, &row.get::<_, String>(2)?)?,
        role: parse_role(3, &row.get::<_, String>(3)?)?,
        is_active: row.get::<_, i32>(4)? != 0,
        joined_at: parse_datetime(5, &row.get::<_, String>(5)?)?,
        left_at: parse_datetime_opt(6, row.get::<_, Option<String>>(6)?)?,
        created_at: parse_datetime(7, &row.get::<_, String>(7)?)?,
    })
}

impl<'a> ParticipantStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append a membership row
    #[instrument(skip(self, participant), fields(room_id = %participant.room_id, user_id = %participant.user_id, role = %participant.role))]
    pub fn create(&self, participant: &Participant) -> Result<()> {
        self.conn.execute(
            "INSERT INTO participants (id, room_id, user_id, role, is_active, joined_at, left_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                participant.id.to_string(),
                participant.room_id.to_string(),
                participant.user_id.to_string(),
                participant.role.as_str(),
                participant.is_active as i32,
                participant.joined_at.to_rfc3339(),
                participant.left_at.map(|t| t.to_rfc3339()),
                participant.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Update the active flag and leave time of a row
    #[instrument(skip(self, participant), fields(participant_id = %participant.id, is_active = participant.is_active))]
    pub fn update(&self, participant: &Participant) -> Result<()> {
        self.conn.execute(
            "UPDATE participants SET is_active = ?1, left_at = ?2 WHERE id = ?3",
            params![
                participant.is_active as i32,
                participant.left_at.map(|t| t.to_rfc3339()),
                participant.id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Active row of a user in a room
    #[instrument(skip(self))]
    pub fn find_active(&self, room_id: Uuid, user_id: Uuid) -> Result<Option<Participant>> {
        let sql = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants
             WHERE room_id = ?1 AND user_id = ?2 AND is_active = 1
             ORDER BY joined_at DESC LIMIT 1"
        );
        let participant = self
            .conn
            .query_row(
                &sql,
                params![room_id.to_string(), user_id.to_string()],
                participant_from_row,
            )
            .optional()?;
        Ok(participant)
    }

    /// Most recent row of a user in a room
    #[instrument(skip(self))]
    pub fn find_latest(&self, room_id: Uuid, user_id: Uuid) -> Result<Option<Participant>> {
        let sql = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants
             WHERE room_id = ?1 AND user_id = ?2
             ORDER BY joined_at DESC, rowid DESC LIMIT 1"
        );
        let participant = self
            .conn
            .query_row(
                &sql,
                params![room_id.to_string(), user_id.to_string()],
                participant_from_row,
            )
            .optional()?;
        Ok(participant)
    }

    /// Count active rows of a room
    #[instrument(skip(self))]
    pub fn count_active(&self, room_id: Uuid) -> Result<u32> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM participants WHERE room_id = ?1 AND is_active = 1",
            params![room_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Rows of a room, optionally only the active ones
    #[instrument(skip(self))]
    pub fn list_for_room(&self, room_id: Uuid, active_only: bool) -> Result<Vec<Participant>> {
        let sql = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants
             WHERE room_id = ?1 AND (?2 = 0 OR is_active = 1)
             ORDER BY joined_at, rowid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let participants = stmt
            .query_map(
                params![room_id.to_string(), active_only as i32],
                participant_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(participants)
    }
}
