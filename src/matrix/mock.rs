//! Mock Matrix Client for Testing
//!
//! An in-memory homeserver: accounts, rooms, aliases, display names and a
//! scripted sync queue.

use super::traits::*;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Delay returned by an idle sync so polling loops do not spin
const IDLE_SYNC_DELAY: Duration = Duration::from_millis(5);

/// Mock Matrix client for testing
#[derive(Clone)]
pub struct MockMatrixClient {
    state: Arc<Mutex<MockState>>,
    server_name: String,
}

#[derive(Default)]
struct MockState {
    accounts: HashMap<String, String>,
    session: Option<ChatIdentity>,
    login_attempts: Vec<String>,
    register_attempts: Vec<String>,
    login_error: Option<MatrixError>,
    register_error: Option<MatrixError>,
    aliases: BTreeMap<String, RoomId>,
    rooms: HashMap<RoomId, MockRoom>,
    joined: BTreeSet<RoomId>,
    failing_rooms: HashSet<RoomId>,
    sent: Vec<SentMessage>,
    display_names: HashMap<UserId, String>,
    display_name_lookups: Vec<UserId>,
    sync_queue: VecDeque<MatrixResult<SyncBatch>>,
    sync_calls: u64,
    api_calls: Vec<ApiCall>,
}

#[derive(Default, Clone)]
struct MockRoom {
    aliases: Vec<String>,
    canonical_alias: Option<String>,
}

/// A message accepted by the mock homeserver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub room: RoomId,
    pub body: String,
}

/// A raw API call recorded by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub method: Method,
    pub path: Vec<String>,
    pub body: Option<Value>,
}

impl MockMatrixClient {
    /// Create new mock homeserver named `server_name`
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            server_name: server_name.into(),
        }
    }

    /// User ID the mock assigns to `username`
    pub fn user_id_for(&self, username: &str) -> UserId {
        UserId(format!("@{}:{}", username, self.server_name))
    }

    /// Pre-register an account (e.g. to simulate a taken username)
    pub fn add_account(&self, username: &str, password: &str) {
        self.state
            .lock()
            .unwrap()
            .accounts
            .insert(username.to_string(), password.to_string());
    }

    /// Make every login fail with `error`
    pub fn fail_login(&self, error: MatrixError) {
        self.state.lock().unwrap().login_error = Some(error);
    }

    /// Make every registration fail with `error`
    pub fn fail_register(&self, error: MatrixError) {
        self.state.lock().unwrap().register_error = Some(error);
    }

    /// Usernames tried with login, in order
    pub fn login_attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().login_attempts.clone()
    }

    /// Usernames tried with register, in order
    pub fn register_attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().register_attempts.clone()
    }

    /// Create a room reachable through `aliases`
    pub fn add_room(&self, room: RoomId, aliases: &[&str], canonical_alias: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        for alias in aliases {
            state.aliases.insert(alias.to_string(), room.clone());
        }
        state.rooms.insert(
            room,
            MockRoom {
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
                canonical_alias: canonical_alias.map(str::to_string),
            },
        );
    }

    /// Make sends to `room` fail with a 500
    pub fn fail_sends_to(&self, room: &RoomId) {
        self.state.lock().unwrap().failing_rooms.insert(room.clone());
    }

    pub fn is_joined(&self, room: &RoomId) -> bool {
        self.state.lock().unwrap().joined.contains(room)
    }

    /// Canonical alias as currently stored (no session needed)
    pub fn stored_canonical_alias(&self, room: &RoomId) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .rooms
            .get(room)
            .and_then(|r| r.canonical_alias.clone())
    }

    /// Messages accepted so far
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Set another user's display name directly
    pub fn put_display_name(&self, user: &UserId, name: &str) {
        self.state
            .lock()
            .unwrap()
            .display_names
            .insert(user.clone(), name.to_string());
    }

    /// Users whose display name was fetched, in order
    pub fn display_name_lookups(&self) -> Vec<UserId> {
        self.state.lock().unwrap().display_name_lookups.clone()
    }

    /// Queue a sync result
    pub fn push_sync(&self, result: MatrixResult<SyncBatch>) {
        self.state.lock().unwrap().sync_queue.push_back(result);
    }

    pub fn sync_calls(&self) -> u64 {
        self.state.lock().unwrap().sync_calls
    }

    /// Raw API calls recorded so far
    pub fn api_calls(&self) -> Vec<ApiCall> {
        self.state.lock().unwrap().api_calls.clone()
    }

    fn require_session(state: &MockState) -> MatrixResult<ChatIdentity> {
        state.session.clone().ok_or(MatrixError::NotLoggedIn)
    }

    fn identity_for(&self, username: &str) -> ChatIdentity {
        ChatIdentity {
            user_id: self.user_id_for(username),
            access_token: format!("token-{}", username),
            home_server: self.server_name.clone(),
        }
    }

    fn resolve(state: &MockState, room: &str) -> Option<RoomId> {
        if room.starts_with('#') {
            state.aliases.get(room).cloned()
        } else {
            let id = RoomId(room.to_string());
            state.rooms.contains_key(&id).then_some(id)
        }
    }
}

#[async_trait]
impl ChatClient for MockMatrixClient {
    async fn login(&self, username: &str, password: &str) -> MatrixResult<ChatIdentity> {
        let mut state = self.state.lock().unwrap();
        state.login_attempts.push(username.to_string());

        if let Some(err) = state.login_error.clone() {
            return Err(err);
        }

        match state.accounts.get(username) {
            Some(expected) if expected == password => {
                let identity = self.identity_for(username);
                state.session = Some(identity.clone());
                Ok(identity)
            }
            _ => Err(MatrixError::http(403, "M_FORBIDDEN", "Invalid username or password")),
        }
    }

    async fn register(&self, username: &str, password: &str) -> MatrixResult<ChatIdentity> {
        let mut state = self.state.lock().unwrap();
        state.register_attempts.push(username.to_string());

        if let Some(err) = state.register_error.clone() {
            return Err(err);
        }

        if state.accounts.contains_key(username) {
            return Err(MatrixError::http(400, "M_USER_IN_USE", "User ID already taken."));
        }

        state
            .accounts
            .insert(username.to_string(), password.to_string());
        let identity = self.identity_for(username);
        state.session = Some(identity.clone());
        Ok(identity)
    }

    async fn restore_session(&self, identity: ChatIdentity) {
        self.state.lock().unwrap().session = Some(identity);
    }

    async fn session(&self) -> Option<ChatIdentity> {
        self.state.lock().unwrap().session.clone()
    }

    async fn join_room(&self, room: &str) -> MatrixResult<RoomId> {
        let mut state = self.state.lock().unwrap();
        Self::require_session(&state)?;

        let id = Self::resolve(&state, room)
            .ok_or_else(|| MatrixError::http(404, "M_NOT_FOUND", format!("No room {}", room)))?;
        state.joined.insert(id.clone());
        Ok(id)
    }

    async fn joined_rooms(&self) -> MatrixResult<Vec<RoomId>> {
        let state = self.state.lock().unwrap();
        Self::require_session(&state)?;
        Ok(state.joined.iter().cloned().collect())
    }

    async fn canonical_alias(&self, room: &RoomId) -> MatrixResult<Option<String>> {
        let state = self.state.lock().unwrap();
        Self::require_session(&state)?;
        Ok(state.rooms.get(room).and_then(|r| r.canonical_alias.clone()))
    }

    async fn room_aliases(&self, room: &RoomId) -> MatrixResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        Self::require_session(&state)?;
        Ok(state
            .rooms
            .get(room)
            .map(|r| r.aliases.clone())
            .unwrap_or_default())
    }

    async fn set_canonical_alias(&self, room: &RoomId, alias: &str) -> MatrixResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::require_session(&state)?;
        let entry = state
            .rooms
            .get_mut(room)
            .ok_or_else(|| MatrixError::http(404, "M_NOT_FOUND", "Unknown room"))?;
        entry.canonical_alias = Some(alias.to_string());
        Ok(())
    }

    async fn send_text(&self, room: &RoomId, text: &str) -> MatrixResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::require_session(&state)?;

        if state.failing_rooms.contains(room) {
            return Err(MatrixError::http(500, "M_UNKNOWN", "Internal server error"));
        }
        if !state.joined.contains(room) {
            return Err(MatrixError::http(403, "M_FORBIDDEN", "User not in room"));
        }

        state.sent.push(SentMessage {
            room: room.clone(),
            body: text.to_string(),
        });
        Ok(())
    }

    async fn set_display_name(&self, user: &UserId, name: &str) -> MatrixResult<()> {
        let mut state = self.state.lock().unwrap();
        let session = Self::require_session(&state)?;
        if &session.user_id != user {
            return Err(MatrixError::http(403, "M_FORBIDDEN", "Cannot set another user's name"));
        }
        state.display_names.insert(user.clone(), name.to_string());
        Ok(())
    }

    async fn display_name(&self, user: &UserId) -> MatrixResult<Option<String>> {
        let mut state = self.state.lock().unwrap();
        Self::require_session(&state)?;
        state.display_name_lookups.push(user.clone());
        Ok(state.display_names.get(user).cloned())
    }

    async fn sync(&self, _since: Option<&str>, _timeout: Duration) -> MatrixResult<SyncBatch> {
        let next = {
            let mut state = self.state.lock().unwrap();
            Self::require_session(&state)?;
            state.sync_calls += 1;
            let calls = state.sync_calls;
            state
                .sync_queue
                .pop_front()
                .map(|result| (result, calls))
                .ok_or(calls)
        };

        match next {
            Ok((result, _)) => result,
            Err(calls) => {
                tokio::time::sleep(IDLE_SYNC_DELAY).await;
                Ok(SyncBatch {
                    next_batch: format!("s{}", calls),
                    ..Default::default()
                })
            }
        }
    }

    async fn api_call(
        &self,
        method: Method,
        path: &[&str],
        body: Option<Value>,
    ) -> MatrixResult<Value> {
        let mut state = self.state.lock().unwrap();
        Self::require_session(&state)?;
        state.api_calls.push(ApiCall {
            method,
            path: path.iter().map(|s| s.to_string()).collect(),
            body,
        });
        Ok(json!({}))
    }
}
