//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use uuid::Uuid;

use crate::models::{Participant, Room, RoomStatus};

/// Validate that a room's state is internally consistent
pub fn assert_room_invariants(room: &Room) {
    debug_assert!(
        !room.code.trim().is_empty(),
        "Room {} has empty code",
        room.id
    );

    debug_assert!(
        room.max_participants > 0,
        "Room {} has zero capacity",
        room.code
    );

    debug_assert!(
        room.current_participants <= room.max_participants,
        "Room {} holds {} participants over capacity {}",
        room.code,
        room.current_participants,
        room.max_participants
    );

    debug_assert!(
        room.owner_id != Uuid::nil(),
        "Room {} has nil owner",
        room.code
    );

    debug_assert!(
        room.updated_at >= room.created_at,
        "Room {} updated before it was created",
        room.code
    );
}

/// Validate a room that has just been closed
pub fn assert_closed_room(room: &Room) {
    debug_assert!(
        room.status == RoomStatus::Inactive,
        "Room {} expected inactive but is {}",
        room.code,
        room.status
    );

    debug_assert!(
        room.current_participants == 0,
        "Closed room {} still counts {} participants",
        room.code,
        room.current_participants
    );
}

/// Validate that a membership row is valid
pub fn assert_participant_invariants(participant: &Participant) {
    debug_assert!(
        participant.user_id != Uuid::nil(),
        "Participant {} has nil user_id",
        participant.id
    );

    debug_assert!(
        participant.room_id != Uuid::nil(),
        "Participant {} has nil room_id",
        participant.id
    );

    // left_at is stamped exactly when the row is deactivated
    debug_assert!(
        participant.is_active == participant.left_at.is_none(),
        "Participant {} is_active={} but left_at={:?}",
        participant.id,
        participant.is_active,
        participant.left_at
    );
}
