//! Matrix Client Trait Abstractions
//!
//! These traits let the bridge core run against MockMatrixClient.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

pub use reqwest::Method;

/// Matrix user identifier (e.g. `@0xabc...:example.org`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Matrix room identifier (e.g. `!opaque:example.org`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Login identity on a homeserver
///
/// Persisted per account under `[matrix.user."<account>"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatIdentity {
    pub user_id: UserId,
    pub access_token: String,
    pub home_server: String,
}

/// Event type of room messages
pub const MESSAGE_EVENT: &str = "m.room.message";

/// Msgtype of plain text messages
pub const TEXT_MSGTYPE: &str = "m.text";

/// A timeline event received from sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub room_id: RoomId,
    pub event_type: String,
    pub msgtype: Option<String>,
    pub sender: UserId,
    pub body: Option<String>,
}

impl ChatEvent {
    /// Plain text room message (the only kind the bridge inspects)
    pub fn text(room_id: RoomId, sender: UserId, body: impl Into<String>) -> Self {
        Self {
            room_id,
            event_type: MESSAGE_EVENT.to_string(),
            msgtype: Some(TEXT_MSGTYPE.to_string()),
            sender,
            body: Some(body.into()),
        }
    }

    pub fn is_text_message(&self) -> bool {
        self.event_type == MESSAGE_EVENT && self.msgtype.as_deref() == Some(TEXT_MSGTYPE)
    }
}

/// One long-poll round trip worth of changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncBatch {
    pub next_batch: String,
    pub events: Vec<ChatEvent>,
    /// Rooms the user is joined to in this batch
    pub joined: Vec<RoomId>,
    /// Rooms the user was invited to
    pub invited: Vec<RoomId>,
    /// Rooms the user left or was removed from
    pub left: Vec<RoomId>,
}

/// Result type for Matrix operations
pub type MatrixResult<T> = Result<T, MatrixError>;

/// Matrix client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatrixError {
    /// Homeserver answered with a non-success status
    #[error("HTTP {status} {errcode}: {message}")]
    Http {
        status: u16,
        errcode: String,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not logged in")]
    NotLoggedIn,
}

impl MatrixError {
    pub fn http(status: u16, errcode: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            errcode: errcode.into(),
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 403, e.g. unknown user or wrong password on login
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }

    /// 400, e.g. username already taken on register
    pub fn is_bad_request(&self) -> bool {
        self.status() == Some(400)
    }

    /// 5xx; transient, worth retrying
    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| s >= 500)
    }
}

/// Matrix client abstraction
///
/// Login and register store the resulting session in the client, mirroring
/// how homeserver SDKs behave; every later call is authenticated with it.
#[async_trait]
pub trait ChatClient: Clone + Send + Sync + 'static {
    /// Log in with a password
    async fn login(&self, username: &str, password: &str) -> MatrixResult<ChatIdentity>;

    /// Register a new user with a password
    async fn register(&self, username: &str, password: &str) -> MatrixResult<ChatIdentity>;

    /// Reuse a previously persisted session
    async fn restore_session(&self, identity: ChatIdentity);

    /// Current session, if logged in
    async fn session(&self) -> Option<ChatIdentity>;

    /// Join a room by alias or ID, returning its room ID
    async fn join_room(&self, room: &str) -> MatrixResult<RoomId>;

    /// Rooms the user is currently joined to
    async fn joined_rooms(&self) -> MatrixResult<Vec<RoomId>>;

    /// Canonical alias of a room, if set
    async fn canonical_alias(&self, room: &RoomId) -> MatrixResult<Option<String>>;

    /// All aliases known for a room
    async fn room_aliases(&self, room: &RoomId) -> MatrixResult<Vec<String>>;

    /// Set the canonical alias of a room
    async fn set_canonical_alias(&self, room: &RoomId, alias: &str) -> MatrixResult<()>;

    /// Send a plain text message to a room
    async fn send_text(&self, room: &RoomId, text: &str) -> MatrixResult<()>;

    /// Set a user's display name
    async fn set_display_name(&self, user: &UserId, name: &str) -> MatrixResult<()>;

    /// Fetch a user's display name
    async fn display_name(&self, user: &UserId) -> MatrixResult<Option<String>>;

    /// Long-poll for new events
    ///
    /// Blocks server-side for up to `timeout` when nothing happens.
    async fn sync(&self, since: Option<&str>, timeout: Duration) -> MatrixResult<SyncBatch>;

    /// Raw client-server API call for endpoints without a dedicated method
    ///
    /// `path` segments are appended to the client API prefix and escaped
    /// individually.
    async fn api_call(
        &self,
        method: Method,
        path: &[&str],
        body: Option<Value>,
    ) -> MatrixResult<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(MatrixError::http(403, "M_FORBIDDEN", "bad password").is_forbidden());
        assert!(MatrixError::http(400, "M_USER_IN_USE", "taken").is_bad_request());
        assert!(MatrixError::http(502, "", "bad gateway").is_server_error());
        assert!(MatrixError::http(500, "", "oops").is_server_error());
        assert!(!MatrixError::http(429, "M_LIMIT_EXCEEDED", "slow down").is_server_error());
        assert!(!MatrixError::Network("refused".into()).is_server_error());
        assert!(!MatrixError::NotLoggedIn.is_forbidden());
    }

    #[test]
    fn test_text_event_classification() {
        let room = RoomId("!r:hs".into());
        let sender = UserId("@u:hs".into());
        let event = ChatEvent::text(room.clone(), sender.clone(), "hi");
        assert!(event.is_text_message());

        let notice = ChatEvent {
            msgtype: Some("m.notice".into()),
            ..event.clone()
        };
        assert!(!notice.is_text_message());

        let member = ChatEvent {
            event_type: "m.room.member".into(),
            ..event
        };
        assert!(!member.is_text_message());
    }

    #[test]
    fn test_identity_serde() {
        let identity = ChatIdentity {
            user_id: UserId("@0xabc:hs".into()),
            access_token: "token".into(),
            home_server: "hs".into(),
        };
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["user_id"], "@0xabc:hs");
        assert_eq!(json["access_token"], "token");
        assert_eq!(json["home_server"], "hs");
    }
}
