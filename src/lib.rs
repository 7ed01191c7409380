//! ethmatrix - Matrix chat bridge with Ethereum-signed identities
//!
//! Participants prove control of an Ethereum account by signing their chat
//! messages and display names:
//!
//! - `identity`: binds a Matrix login to an account and publishes a signed
//!   display name
//! - `verifier`: checks inbound messages against the sender's identity
//! - `sender`: signs payloads and broadcasts them to every joined room
//! - `api`: local HTTP surface (`POST /send`, `GET /block`)
//!
//! The Matrix homeserver and the Ethereum node sit behind traits
//! (`matrix::ChatClient`, `chain::Wallet`) with in-memory mocks for tests.

pub mod api;
pub mod bridge;
pub mod chain;
pub mod error;
pub mod identity;
pub mod matrix;
pub mod sender;
pub mod signed_text;
pub mod verifier;

pub use bridge::{Bridge, BridgeSettings};
pub use error::{BridgeError, BridgeResult};
pub use verifier::{Verdict, VerificationMode};
