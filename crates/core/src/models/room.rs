//! Room model - the capacity-bounded session participants join

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted room status. There is no persisted grace state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Active,
    /// Terminal for this code
    Inactive,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Active => "active",
            RoomStatus::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A room that participants join and leave
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    /// Human-shareable unique code
    pub code: String,
    /// User who created the room
    pub owner_id: Uuid,
    pub status: RoomStatus,
    /// Denormalized count of active participant rows
    pub current_participants: u32,
    pub max_participants: u32,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// A fresh active room whose only participant is its owner
    pub fn new(code: String, owner_id: Uuid, max_participants: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            code,
            owner_id,
            status: RoomStatus::Active,
            current_participants: 1,
            max_participants,
            last_activity_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RoomStatus::Active
    }

    pub fn is_full(&self) -> bool {
        self.current_participants >= self.max_participants
    }

    /// Bump activity and modification timestamps
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.last_activity_at = now;
        self.updated_at = now;
    }
}

/// Options accepted when creating a room
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomOptions {
    /// Capacity; falls back to the configured default
    pub max_participants: Option<u32>,
    /// Explicit code instead of a generated one
    pub code: Option<String>,
}

impl RoomOptions {
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_max_participants(mut self, max: u32) -> Self {
        self.max_participants = Some(max);
        self
    }
}
