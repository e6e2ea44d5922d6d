//! Lobby Core Library
//!
//! Room and participant models, SQLite storage, grace-period scheduling and
//! the room lifecycle coordinator for the Lobby platform.

pub mod config;
pub mod error;
pub mod invariants;
pub mod lifecycle;
pub mod models;
pub mod scheduler;
pub mod storage;

pub use config::{ClosureTrigger, LifecycleConfig, LobbyConfig, ServerConfig, StorageConfig};
pub use error::{Error, Result};
pub use lifecycle::{
    generate_room_code, normalize_code, FinalizeOutcome, LeaveOutcome, RoomLifecycleCoordinator,
    RoomSession,
};
pub use models::*;
pub use scheduler::{GracePeriodScheduler, DEFAULT_GRACE_PERIOD};
pub use storage::{Database, RoomRepository};
