//! Matrix Integration Module
//!
//! Client-server API transport, the sync poll loop, the joined-room registry
//! and the typing heartbeat.

pub mod client;
pub mod listener;
pub mod mock;
pub mod rooms;
pub mod traits;
pub mod typing;

pub use client::HttpMatrixClient;
pub use listener::{BackoffPolicy, ErrorHandler, SyncHandler, SyncListener};
pub use mock::MockMatrixClient;
pub use rooms::RoomRegistry;
pub use traits::{
    ChatClient, ChatEvent, ChatIdentity, MatrixError, MatrixResult, RoomId, SyncBatch, UserId,
};
pub use typing::run_typing_heartbeat;
