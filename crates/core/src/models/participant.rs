//! Participant membership ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role assigned once, when the membership row is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// Elevated privileges; departure triggers closure evaluation
    Host,
    Participant,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Host => "host",
            ParticipantRole::Participant => "participant",
        }
    }

    pub fn is_host(&self) -> bool {
        *self == ParticipantRole::Host
    }
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One join of a user into a room. Rows are never deleted; a leave only
/// deactivates the row and a rejoin appends a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(room_id: Uuid, user_id: Uuid, role: ParticipantRole) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            room_id,
            user_id,
            role,
            is_active: true,
            joined_at: now,
            left_at: None,
            created_at: now,
        }
    }

    /// Mark the row as departed
    pub fn mark_left(&mut self, at: DateTime<Utc>) {
        self.is_active = false;
        self.left_at = Some(at);
    }
}
