//! SQLite storage layer for Lobby

mod migrations;
mod parse;
mod participants;
mod rooms;
mod traits;

use rusqlite::Connection;
use std::path::Path;
use tracing::instrument;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Participant, Room};

pub use participants::ParticipantStore;
pub use rooms::RoomStore;
pub use traits::RoomRepository;

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Get current schema version
    pub fn schema_version(&self) -> Result<u32> {
        migrations::get_current_version(&self.conn)
    }

    /// Get room store
    pub fn rooms(&self) -> RoomStore<'_> {
        RoomStore::new(&self.conn)
    }

    /// Get participant ledger store
    pub fn participants(&self) -> ParticipantStore<'_> {
        ParticipantStore::new(&self.conn)
    }
}

impl RoomRepository for Database {
    fn get_room_by_code(&self, code: &str) -> Result<Option<Room>> {
        self.rooms().find_by_code(code)
    }

    fn insert_room(&self, room: &Room) -> Result<()> {
        self.rooms().create(room)
    }

    fn update_room(&self, room: &Room) -> Result<()> {
        self.rooms().update(room)
    }

    fn get_active_participant(&self, room_id: Uuid, user_id: Uuid) -> Result<Option<Participant>> {
        self.participants().find_active(room_id, user_id)
    }

    fn find_latest_participant(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>> {
        self.participants().find_latest(room_id, user_id)
    }

    fn insert_participant(&self, participant: &Participant) -> Result<()> {
        self.participants().create(participant)
    }

    fn update_participant(&self, participant: &Participant) -> Result<()> {
        self.participants().update(participant)
    }

    fn count_active_participants(&self, room_id: Uuid) -> Result<u32> {
        self.participants().count_active(room_id)
    }

    fn list_active_participants(&self, room_id: Uuid) -> Result<Vec<Participant>> {
        self.participants().list_for_room(room_id, true)
    }

    fn list_participants(&self, room_id: Uuid) -> Result<Vec<Participant>> {
        self.participants().list_for_room(room_id, false)
    }

    fn list_orphaned_rooms(&self) -> Result<Vec<Room>> {
        self.rooms().list_orphaned()
    }

    fn in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        // Dropping the transaction without commit rolls it back
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }
}
