//! Bridge-level errors
//!
//! Anything surfacing as `BridgeError` during startup aborts the process.

use crate::chain::ChainError;
use crate::identity::StoreError;
use crate::matrix::{MatrixError, RoomId};

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Every candidate username was taken
    #[error("Registration impossible: username taken on all {attempts} attempts")]
    RegistrationExhausted { attempts: u32 },

    #[error("Matrix error: {0}")]
    Matrix(#[from] MatrixError),

    #[error("Wallet error: {0}")]
    Chain(#[from] ChainError),

    #[error("Identity store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to join {room}: {source}")]
    RoomJoin {
        room: String,
        #[source]
        source: MatrixError,
    },

    #[error("Broadcast to {room} failed: {source}")]
    Broadcast {
        room: RoomId,
        #[source]
        source: MatrixError,
    },

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
