//! Room lifecycle coordination
//!
//! Owns membership transitions (create, join, leave, delete) against a
//! [`RoomRepository`] and decides when an emptied room enters its grace
//! period. Every join cancels the pending grace period for its room; when
//! a grace period expires the room is re-read and only closed if it is
//! still active and still empty.
//!
//! The repository lock is held across both the membership writes and the
//! matching scheduler call, so for one room the last join/leave processed
//! decides whether a timer is armed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ClosureTrigger, LifecycleConfig};
use crate::error::{Error, Result};
use crate::invariants::{assert_closed_room, assert_participant_invariants, assert_room_invariants};
use crate::models::{Participant, ParticipantRole, Room, RoomOptions, RoomStatus};
use crate::scheduler::GracePeriodScheduler;
use crate::storage::RoomRepository;

/// Characters used in generated room codes (no 0/O or 1/I lookalikes)
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A user's membership as seen right after create or join
#[derive(Debug, Clone)]
pub struct RoomSession {
    pub room: Room,
    pub participant: Participant,
    pub is_host: bool,
    /// The user was already an active participant; nothing was written
    pub already_member: bool,
}

/// Result of a leave
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub room: Room,
    pub participant: Participant,
    pub grace_period_started: bool,
}

/// What an expired grace period did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Room was empty and is now inactive
    Closed,
    /// No room with this code exists
    Missing,
    /// Room had already been closed, e.g. by an explicit delete
    AlreadyClosed,
    /// Someone joined without the grace period being cancelled
    StillOccupied(u32),
}

/// Uppercase and trim a user-supplied room code
pub fn normalize_code(code: &str) -> Result<String> {
    let code = code.trim().to_ascii_uppercase();
    if code.is_empty() {
        return Err(Error::InvalidOperation("room code must not be empty".into()));
    }
    Ok(code)
}

/// Random room code of `length` characters
pub fn generate_room_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

fn room_not_found(code: &str) -> Error {
    Error::NotFound(format!("room {code}"))
}

pub struct RoomLifecycleCoordinator<R> {
    repo: Arc<Mutex<R>>,
    scheduler: GracePeriodScheduler,
    config: LifecycleConfig,
}

impl<R> Clone for RoomLifecycleCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            scheduler: self.scheduler.clone(),
            config: self.config.clone(),
        }
    }
}

impl<R> RoomLifecycleCoordinator<R>
where
    R: RoomRepository + Send + 'static,
{
    /// Coordinator with its own scheduler using the configured grace period
    pub fn new(repo: R, config: LifecycleConfig) -> Self {
        let scheduler = GracePeriodScheduler::new(config.grace_period());
        Self::with_scheduler(Arc::new(Mutex::new(repo)), scheduler, config)
    }

    pub fn with_scheduler(
        repo: Arc<Mutex<R>>,
        scheduler: GracePeriodScheduler,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            repo,
            scheduler,
            config,
        }
    }

    pub fn scheduler(&self) -> &GracePeriodScheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Shared handle to the repository
    pub fn repository(&self) -> Arc<Mutex<R>> {
        self.repo.clone()
    }

    /// Whether the room is currently inside its grace window
    pub fn has_grace_period(&self, code: &str) -> bool {
        normalize_code(code).is_ok_and(|code| self.scheduler.has(&code))
    }

    /// Grace period for rooms that empty from now on
    pub fn set_grace_period(&self, duration: Duration) {
        self.scheduler.set_duration(duration);
    }

    /// Create an active room with `owner_id` as its host
    pub async fn create_room(&self, owner_id: Uuid, options: RoomOptions) -> Result<RoomSession> {
        let max_participants = options
            .max_participants
            .unwrap_or(self.config.default_max_participants);
        if max_participants == 0 {
            return Err(Error::InvalidOperation(
                "max_participants must be at least 1".into(),
            ));
        }
        let requested = options.code.as_deref().map(normalize_code).transpose()?;

        let repo = self.repo.lock().await;
        let session = repo.in_transaction(|repo| {
            let code = match requested {
                Some(code) => {
                    if repo.get_room_by_code(&code)?.is_some() {
                        return Err(Error::Conflict(format!("room code {code} is taken")));
                    }
                    code
                }
                None => self.allocate_code(repo)?,
            };

            let room = Room::new(code, owner_id, max_participants);
            repo.insert_room(&room)?;
            let host = Participant::new(room.id, owner_id, ParticipantRole::Host);
            repo.insert_participant(&host)?;

            Ok(RoomSession {
                room,
                participant: host,
                is_host: true,
                already_member: false,
            })
        })?;
        drop(repo);

        assert_room_invariants(&session.room);
        info!(
            code = %session.room.code,
            owner_id = %owner_id,
            max_participants,
            "Room created"
        );
        Ok(session)
    }

    fn allocate_code(&self, repo: &R) -> Result<String> {
        for attempt in 1..=self.config.max_code_attempts {
            let code = generate_room_code(self.config.code_length);
            if repo.get_room_by_code(&code)?.is_none() {
                return Ok(code);
            }
            debug!(code = %code, attempt, "Room code collision");
        }
        Err(Error::Conflict(format!(
            "no free room code after {} attempts",
            self.config.max_code_attempts
        )))
    }

    /// Join an active room. Joining while already active is a no-op.
    /// Any successful join cancels the room's pending grace period.
    pub async fn join_room(&self, user_id: Uuid, code: &str) -> Result<RoomSession> {
        let code = normalize_code(code)?;

        let repo = self.repo.lock().await;
        let session = repo.in_transaction(|repo| {
            let mut room = repo
                .get_room_by_code(&code)?
                .filter(Room::is_active)
                .ok_or_else(|| room_not_found(&code))?;

            if let Some(existing) = repo.get_active_participant(room.id, user_id)? {
                return Ok(RoomSession {
                    is_host: existing.role.is_host(),
                    participant: existing,
                    room,
                    already_member: true,
                });
            }

            if room.is_full() {
                return Err(Error::RoomFull(format!(
                    "room {code} has {}/{} participants",
                    room.current_participants, room.max_participants
                )));
            }

            // Hosts keep their role across reconnects
            let was_host = room.owner_id == user_id
                || repo
                    .find_latest_participant(room.id, user_id)?
                    .is_some_and(|previous| previous.role.is_host());
            let role = if was_host {
                ParticipantRole::Host
            } else {
                ParticipantRole::Participant
            };

            let participant = Participant::new(room.id, user_id, role);
            repo.insert_participant(&participant)?;
            room.current_participants += 1;
            room.touch();
            repo.update_room(&room)?;

            Ok(RoomSession {
                room,
                is_host: role.is_host(),
                participant,
                already_member: false,
            })
        })?;

        if self.scheduler.cancel(&code) {
            info!(code = %code, user_id = %user_id, "Join cancelled pending room closure");
        }
        drop(repo);

        assert_room_invariants(&session.room);
        assert_participant_invariants(&session.participant);
        if session.already_member {
            debug!(code = %code, user_id = %user_id, "Duplicate join ignored");
        } else {
            info!(
                code = %code,
                user_id = %user_id,
                role = %session.participant.role,
                participants = session.room.current_participants,
                "Participant joined"
            );
        }
        Ok(session)
    }

    /// Leave a room. When the room is left empty by a departure that the
    /// closure trigger counts, a grace period starts instead of closing it.
    pub async fn leave_room(&self, user_id: Uuid, code: &str) -> Result<LeaveOutcome> {
        let code = normalize_code(code)?;
        let trigger = self.config.closure_trigger;

        let repo = self.repo.lock().await;
        let (room, participant, remaining) = repo.in_transaction(|repo| {
            let mut room = repo
                .get_room_by_code(&code)?
                .ok_or_else(|| room_not_found(&code))?;
            let mut participant = repo
                .get_active_participant(room.id, user_id)?
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "user {user_id} is not an active participant of room {code}"
                    ))
                })?;

            participant.mark_left(Utc::now());
            repo.update_participant(&participant)?;
            room.current_participants = room.current_participants.saturating_sub(1);
            room.touch();
            repo.update_room(&room)?;

            let evaluate = match trigger {
                ClosureTrigger::HostDeparture => participant.role.is_host(),
                ClosureTrigger::LastDeparture => true,
            };
            let remaining = if evaluate && room.is_active() {
                Some(repo.count_active_participants(room.id)?)
            } else {
                None
            };
            Ok((room, participant, remaining))
        })?;

        let grace_period_started = remaining == Some(0);
        if grace_period_started {
            self.start_grace_period(&code);
        }
        drop(repo);

        assert_room_invariants(&room);
        assert_participant_invariants(&participant);
        info!(
            code = %code,
            user_id = %user_id,
            role = %participant.role,
            participants = room.current_participants,
            grace_period_started,
            "Participant left"
        );
        if room.current_participants == 0 && !grace_period_started && room.is_active() {
            warn!(code = %code, "Room emptied by a non-host and stays active");
        }

        Ok(LeaveOutcome {
            room,
            participant,
            grace_period_started,
        })
    }

    /// Close a room immediately. Only its host may do this.
    ///
    /// A pending grace period is left to expire; its finalize step finds the
    /// room already closed and writes nothing.
    pub async fn delete_room(&self, user_id: Uuid, code: &str) -> Result<Room> {
        let code = normalize_code(code)?;

        let repo = self.repo.lock().await;
        let (room, evicted) = repo.in_transaction(|repo| {
            let mut room = repo
                .get_room_by_code(&code)?
                .filter(Room::is_active)
                .ok_or_else(|| room_not_found(&code))?;
            let active = repo.list_active_participants(room.id)?;

            let is_host = room.owner_id == user_id
                || active
                    .iter()
                    .any(|p| p.user_id == user_id && p.role.is_host());
            if !is_host {
                return Err(Error::PermissionDenied(format!(
                    "only the host can delete room {code}"
                )));
            }

            let now = Utc::now();
            let evicted = active.len();
            for mut participant in active {
                participant.mark_left(now);
                repo.update_participant(&participant)?;
            }

            room.status = RoomStatus::Inactive;
            room.current_participants = 0;
            room.touch();
            repo.update_room(&room)?;
            Ok((room, evicted))
        })?;
        drop(repo);

        assert_closed_room(&room);
        info!(code = %code, user_id = %user_id, evicted, "Room deleted");
        Ok(room)
    }

    /// Load a room by code, whatever its status
    pub async fn get_room(&self, code: &str) -> Result<Room> {
        let code = normalize_code(code)?;
        let repo = self.repo.lock().await;
        repo.get_room_by_code(&code)?
            .ok_or_else(|| room_not_found(&code))
    }

    /// Active participants of a room, in join order
    pub async fn active_participants(&self, code: &str) -> Result<Vec<Participant>> {
        let code = normalize_code(code)?;
        let repo = self.repo.lock().await;
        let room = repo
            .get_room_by_code(&code)?
            .ok_or_else(|| room_not_found(&code))?;
        repo.list_active_participants(room.id)
    }

    /// Full membership ledger of a room, including departed rows
    pub async fn list_participants(&self, code: &str) -> Result<Vec<Participant>> {
        let code = normalize_code(code)?;
        let repo = self.repo.lock().await;
        let room = repo
            .get_room_by_code(&code)?
            .ok_or_else(|| room_not_found(&code))?;
        repo.list_participants(room.id)
    }

    /// Arm a fresh grace period for every active room without an active
    /// participant. Timers do not survive a restart, so rooms that were
    /// waiting to close are picked up again here.
    pub async fn recover_orphaned_rooms(&self) -> Result<usize> {
        let repo = self.repo.lock().await;
        let orphaned = repo.list_orphaned_rooms()?;

        let mut armed = 0;
        for room in &orphaned {
            if !self.scheduler.has(&room.code) {
                self.start_grace_period(&room.code);
                armed += 1;
            }
        }
        drop(repo);

        if armed > 0 {
            info!(armed, "Recovered orphaned rooms");
        }
        Ok(armed)
    }

    /// Run the expiry check for a room now
    pub async fn finalize(&self, code: &str) -> Result<FinalizeOutcome> {
        finalize_room(self.repo.clone(), normalize_code(code)?).await
    }

    /// Abandon all pending grace periods, returning how many there were
    pub fn shutdown(&self) -> usize {
        let abandoned = self.scheduler.cancel_all();
        if abandoned > 0 {
            warn!(abandoned, "Pending grace periods abandoned on shutdown");
        }
        abandoned
    }

    fn start_grace_period(&self, code: &str) {
        let repo = self.repo.clone();
        self.scheduler.start(code, move |code| async move {
            finalize_room(repo, code).await.map(|_| ())
        });
    }
}

/// Close the room if it is still active and empty. State is re-read from
/// the repository, never taken from when the grace period started.
async fn finalize_room<R>(repo: Arc<Mutex<R>>, code: String) -> Result<FinalizeOutcome>
where
    R: RoomRepository + Send + 'static,
{
    let repo = repo.lock().await;
    let outcome = repo.in_transaction(|repo| {
        let Some(mut room) = repo.get_room_by_code(&code)? else {
            return Ok(FinalizeOutcome::Missing);
        };
        if !room.is_active() {
            return Ok(FinalizeOutcome::AlreadyClosed);
        }

        let active = repo.count_active_participants(room.id)?;
        if active > 0 {
            return Ok(FinalizeOutcome::StillOccupied(active));
        }

        room.status = RoomStatus::Inactive;
        room.current_participants = 0;
        room.touch();
        repo.update_room(&room)?;
        assert_closed_room(&room);
        Ok(FinalizeOutcome::Closed)
    })?;
    drop(repo);

    match outcome {
        FinalizeOutcome::Closed => info!(code = %code, "Room closed after grace period"),
        FinalizeOutcome::Missing | FinalizeOutcome::AlreadyClosed => {
            debug!(code = %code, outcome = ?outcome, "Grace period expired for closed room")
        }
        FinalizeOutcome::StillOccupied(active) => {
            warn!(code = %code, active, "Grace period expired but room is occupied, keeping it active")
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    fn coordinator() -> RoomLifecycleCoordinator<Database> {
        RoomLifecycleCoordinator::new(
            Database::open_in_memory().unwrap(),
            LifecycleConfig::default(),
        )
    }

    #[test]
    fn test_generated_codes_use_alphabet() {
        let code = generate_room_code(6);
        assert_eq!(code.len(), 6);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  abc123 ").unwrap(), "ABC123");
        assert!(normalize_code("   ").is_err());
    }

    #[tokio::test]
    async fn test_create_room_makes_owner_host() {
        let coordinator = coordinator();
        let owner = Uuid::new_v4();

        let session = coordinator
            .create_room(owner, RoomOptions::default())
            .await
            .unwrap();

        assert!(session.is_host);
        assert_eq!(session.room.status, RoomStatus::Active);
        assert_eq!(session.room.current_participants, 1);
        assert_eq!(session.room.max_participants, 8);
        assert_eq!(session.room.code.len(), 6);
        assert_eq!(session.participant.role, ParticipantRole::Host);

        let active = coordinator
            .active_participants(&session.room.code)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].user_id, owner);
    }

    #[tokio::test]
    async fn test_create_room_with_taken_code() {
        let coordinator = coordinator();
        let options = RoomOptions::default().with_code("ABC123");
        coordinator
            .create_room(Uuid::new_v4(), options.clone())
            .await
            .unwrap();

        let err = coordinator
            .create_room(Uuid::new_v4(), options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_join_unknown_room() {
        let coordinator = coordinator();
        let err = coordinator
            .join_room(Uuid::new_v4(), "NOPE00")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_join_full_room() {
        let coordinator = coordinator();
        let options = RoomOptions::default()
            .with_code("FULL02")
            .with_max_participants(2);
        let host = Uuid::new_v4();
        coordinator.create_room(host, options).await.unwrap();

        let guest = Uuid::new_v4();
        coordinator.join_room(guest, "FULL02").await.unwrap();
        let err = coordinator
            .join_room(Uuid::new_v4(), "FULL02")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoomFull(_)));

        // An active member re-sending its join is still accepted
        let again = coordinator.join_room(guest, "full02").await.unwrap();
        assert!(again.already_member);
        assert_eq!(again.room.current_participants, 2);
    }

    #[tokio::test]
    async fn test_duplicate_join_is_idempotent() {
        let coordinator = coordinator();
        coordinator
            .create_room(Uuid::new_v4(), RoomOptions::default().with_code("DUPJ01"))
            .await
            .unwrap();
        let guest = Uuid::new_v4();

        let first = coordinator.join_room(guest, "DUPJ01").await.unwrap();
        let second = coordinator.join_room(guest, "DUPJ01").await.unwrap();

        assert!(!first.already_member);
        assert!(second.already_member);
        assert_eq!(second.participant.id, first.participant.id);
        assert_eq!(second.room.current_participants, 2);
        assert_eq!(coordinator.list_participants("DUPJ01").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejoin_appends_ledger_row_and_keeps_host_role() {
        let coordinator = coordinator();
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        coordinator
            .create_room(host, RoomOptions::default().with_code("LEDGR1"))
            .await
            .unwrap();
        coordinator.join_room(guest, "LEDGR1").await.unwrap();

        coordinator.leave_room(host, "LEDGR1").await.unwrap();
        let rejoined = coordinator.join_room(host, "LEDGR1").await.unwrap();

        assert!(rejoined.is_host);
        assert_eq!(rejoined.room.current_participants, 2);
        let ledger = coordinator.list_participants("LEDGR1").await.unwrap();
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.iter().filter(|p| p.is_active).count(), 2);
        assert!(ledger.iter().filter(|p| !p.is_active).all(|p| p.left_at.is_some()));
    }

    #[tokio::test]
    async fn test_leave_without_membership_is_not_found() {
        let coordinator = coordinator();
        let host = Uuid::new_v4();
        coordinator
            .create_room(host, RoomOptions::default().with_code("NOTIN1"))
            .await
            .unwrap();

        let err = coordinator
            .leave_room(Uuid::new_v4(), "NOTIN1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.is_client_error());
        assert!(!coordinator.has_grace_period("NOTIN1"));

        let room = coordinator.get_room("NOTIN1").await.unwrap();
        assert_eq!(room.current_participants, 1);
    }

    #[tokio::test]
    async fn test_non_host_cannot_delete() {
        let coordinator = coordinator();
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        coordinator
            .create_room(host, RoomOptions::default().with_code("GUARD1"))
            .await
            .unwrap();
        coordinator.join_room(guest, "GUARD1").await.unwrap();

        let err = coordinator.delete_room(guest, "GUARD1").await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        let room = coordinator.delete_room(host, "GUARD1").await.unwrap();
        assert_eq!(room.status, RoomStatus::Inactive);
        assert_eq!(room.current_participants, 0);
        assert!(coordinator
            .active_participants("GUARD1")
            .await
            .unwrap()
            .is_empty());

        let err = coordinator.join_room(guest, "GUARD1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_finalize_keeps_occupied_room_active() {
        let coordinator = coordinator();
        coordinator
            .create_room(Uuid::new_v4(), RoomOptions::default().with_code("BUSY01"))
            .await
            .unwrap();

        let outcome = coordinator.finalize("BUSY01").await.unwrap();
        assert_eq!(outcome, FinalizeOutcome::StillOccupied(1));
        let room = coordinator.get_room("BUSY01").await.unwrap();
        assert_eq!(room.status, RoomStatus::Active);

        assert_eq!(
            coordinator.finalize("GONE00").await.unwrap(),
            FinalizeOutcome::Missing
        );
    }
}
