//! Gateway protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire.

use chrono::{DateTime, Utc};
use lobby_core::{Participant, ParticipantRole, Room, RoomStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Room state as broadcast to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub code: String,
    pub owner_id: Uuid,
    pub status: RoomStatus,
    pub current_participants: u32,
    pub max_participants: u32,
}

impl From<&Room> for RoomSnapshot {
    fn from(room: &Room) -> Self {
        Self {
            code: room.code.clone(),
            owner_id: room.owner_id,
            status: room.status,
            current_participants: room.current_participants,
            max_participants: room.max_participants,
        }
    }
}

/// An active participant as broadcast to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
}

impl From<&Participant> for ParticipantInfo {
    fn from(participant: &Participant) -> Self {
        Self {
            user_id: participant.user_id,
            role: participant.role,
            joined_at: participant.joined_at,
        }
    }
}

/// Why a request failed, as reported to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    RoomFull,
    Forbidden,
    Conflict,
    Invalid,
    Internal,
}

impl From<&lobby_core::Error> for FailureKind {
    fn from(error: &lobby_core::Error) -> Self {
        use lobby_core::Error;
        match error {
            Error::NotFound(_) => FailureKind::NotFound,
            Error::RoomFull(_) => FailureKind::RoomFull,
            Error::PermissionDenied(_) => FailureKind::Forbidden,
            Error::Conflict(_) => FailureKind::Conflict,
            Error::InvalidOperation(_) => FailureKind::Invalid,
            _ => FailureKind::Internal,
        }
    }
}

/// Gateway protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// First message on every connection
    Hello { user_id: Uuid },

    /// Create a room hosted by the connected user
    CreateRoom { max_participants: Option<u32> },

    JoinRoom { code: String },

    LeaveRoom { code: String },

    /// Close a room immediately (host only)
    DeleteRoom { code: String },

    Ping,

    /// Server accepted the Hello
    Welcome { user_id: Uuid },

    /// Sent to the creating or joining connection
    RoomJoined { room: RoomSnapshot, is_host: bool },

    RoomLeft { code: String },

    /// Broadcast when a room is deleted
    RoomClosed { code: String },

    /// Broadcast to a room after each membership change
    ParticipantList {
        code: String,
        participants: Vec<ParticipantInfo>,
    },

    /// A request was rejected
    Failed { kind: FailureKind, message: String },

    Pong,
}

impl Message {
    pub fn failed(error: &lobby_core::Error) -> Self {
        Message::Failed {
            kind: FailureKind::from(error),
            message: error.to_string(),
        }
    }
}
