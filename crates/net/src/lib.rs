//! Lobby Network Library
//!
//! TCP gateway that turns client connections into room lifecycle calls.
//!
//! # Architecture
//!
//! - **Gateway**: accepts connections, maps commands and disconnects onto
//!   the [`lobby_core::RoomLifecycleCoordinator`], broadcasts room state
//! - **Client**: connects to a gateway (tests and tooling)
//! - **Protocol**: length-prefixed JSON messages

pub mod client;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;

pub use client::GatewayClient;
pub use error::{Error, Result};
pub use protocol::{FailureKind, Message, ParticipantInfo, RoomSnapshot};
pub use server::Gateway;
