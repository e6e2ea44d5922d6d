//! Storage repository traits
//!
//! The lifecycle coordinator only talks to storage through these traits,
//! so any transactional backend (SQLite, mock, remote) can sit behind it.

use uuid::Uuid;

use crate::error::Result;
use crate::models::{Participant, Room};

/// Room and participant repository operations
pub trait RoomRepository {
    /// Find a room by its shareable code, regardless of status
    fn get_room_by_code(&self, code: &str) -> Result<Option<Room>>;

    /// Insert a new room
    fn insert_room(&self, room: &Room) -> Result<()>;

    /// Persist status, counters and timestamps of a room
    fn update_room(&self, room: &Room) -> Result<()>;

    /// Active membership row of a user in a room, if any
    fn get_active_participant(&self, room_id: Uuid, user_id: Uuid) -> Result<Option<Participant>>;

    /// Most recent membership row of a user in a room, active or not
    fn find_latest_participant(&self, room_id: Uuid, user_id: Uuid)
        -> Result<Option<Participant>>;

    /// Append a membership row
    fn insert_participant(&self, participant: &Participant) -> Result<()>;

    /// Persist the active flag and leave time of a membership row
    fn update_participant(&self, participant: &Participant) -> Result<()>;

    /// Count active membership rows of a room
    fn count_active_participants(&self, room_id: Uuid) -> Result<u32>;

    /// Active membership rows of a room, oldest first
    fn list_active_participants(&self, room_id: Uuid) -> Result<Vec<Participant>>;

    /// Full membership ledger of a room, oldest first
    fn list_participants(&self, room_id: Uuid) -> Result<Vec<Participant>>;

    /// Active rooms without any active membership row
    fn list_orphaned_rooms(&self) -> Result<Vec<Room>>;

    /// Run `f` atomically: every write it makes is committed together or
    /// rolled back when it returns an error.
    fn in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>;
}
