//! Gateway error types

use std::io;

/// Gateway result type
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request failed ({kind:?}): {message}")]
    Failed {
        kind: crate::protocol::FailureKind,
        message: String,
    },

    #[error(transparent)]
    Core(#[from] lobby_core::Error),
}
