//! Data models for Lobby

mod participant;
mod room;

pub use participant::*;
pub use room::*;
