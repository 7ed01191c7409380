//! Production Matrix Client Implementation
//!
//! Implements ChatClient over the Matrix client-server API (v3) with reqwest.
//! Path segments are escaped through `Url::path_segments_mut`, so room IDs,
//! aliases and user IDs can be passed verbatim.

use super::traits::*;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Client API prefix appended to the homeserver base URL
const CLIENT_API_PREFIX: [&str; 3] = ["_matrix", "client", "v3"];

/// Device name shown in the user's session list
const DEVICE_DISPLAY_NAME: &str = "ethmatrix";

/// Timeout for ordinary (non long-poll) requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time granted to a long-poll beyond the server-side timeout
const SYNC_GRACE: Duration = Duration::from_secs(30);

/// Matrix homeserver client over HTTP
#[derive(Clone)]
pub struct HttpMatrixClient {
    base_url: Url,
    http: Client,
    session: Arc<RwLock<Option<ChatIdentity>>>,
}

impl HttpMatrixClient {
    /// Create an unauthenticated client for `server` (e.g. `https://matrix.org`)
    pub fn new(server: &str) -> MatrixResult<Self> {
        let base_url = Url::parse(server).map_err(|e| {
            MatrixError::InvalidResponse(format!("invalid server URL {}: {}", server, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(MatrixError::InvalidResponse(format!(
                "invalid server URL {}",
                server
            )));
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MatrixError::Network(e.to_string()))?;

        Ok(Self {
            base_url,
            http,
            session: Arc::new(RwLock::new(None)),
        })
    }

    fn endpoint(&self, path: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base() was rejected in new()
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(CLIENT_API_PREFIX)
                .extend(path);
        }
        url
    }

    async fn access_token(&self) -> MatrixResult<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(MatrixError::NotLoggedIn)
    }

    /// Issue a request and decode the JSON response body.
    async fn request(
        &self,
        method: Method,
        path: &[&str],
        query: &[(&str, String)],
        body: Option<&Value>,
        authenticated: bool,
        timeout: Duration,
    ) -> MatrixResult<Value> {
        let url = self.endpoint(path);
        let mut builder = self
            .http
            .request(method.clone(), url)
            .query(query)
            .timeout(timeout);

        if authenticated {
            builder = builder.bearer_auth(self.access_token().await?);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| {
            MatrixError::Network(format!("{} {} failed: {}", method, path.join("/"), e))
        })?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| MatrixError::Network(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(parse_error(status.as_u16(), &bytes));
        }

        if bytes.is_empty() {
            return Ok(json!({}));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| MatrixError::InvalidResponse(format!("invalid JSON body: {}", e)))
    }

    async fn authed(
        &self,
        method: Method,
        path: &[&str],
        body: Option<&Value>,
    ) -> MatrixResult<Value> {
        self.request(method, path, &[], body, true, REQUEST_TIMEOUT)
            .await
    }

    /// Store the session returned by login/register.
    async fn establish(&self, response: Value) -> MatrixResult<ChatIdentity> {
        let auth: AuthResponse = serde_json::from_value(response)
            .map_err(|e| MatrixError::InvalidResponse(format!("invalid auth response: {}", e)))?;

        let home_server = auth
            .home_server
            .or_else(|| server_name(&auth.user_id).map(str::to_string))
            .or_else(|| self.base_url.host_str().map(str::to_string))
            .unwrap_or_default();

        let identity = ChatIdentity {
            user_id: UserId(auth.user_id),
            access_token: auth.access_token,
            home_server,
        };

        *self.session.write().await = Some(identity.clone());
        Ok(identity)
    }
}

#[derive(Deserialize)]
struct AuthResponse {
    user_id: String,
    access_token: String,
    home_server: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errcode: String,
    #[serde(default)]
    error: String,
}

/// Build a MatrixError from a non-success response.
fn parse_error(status: u16, body: &[u8]) -> MatrixError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(err) => MatrixError::http(status, err.errcode, err.error),
        Err(_) => {
            let truncated = &body[..body.len().min(512)];
            MatrixError::http(status, "", String::from_utf8_lossy(truncated))
        }
    }
}

/// Server part of a user ID (`@local:server` -> `server`)
fn server_name(user_id: &str) -> Option<&str> {
    user_id.split_once(':').map(|(_, server)| server)
}

#[derive(Deserialize)]
struct SyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: SyncRooms,
}

#[derive(Deserialize, Default)]
struct SyncRooms {
    #[serde(default)]
    join: BTreeMap<String, JoinedRoom>,
    #[serde(default)]
    invite: BTreeMap<String, Value>,
    #[serde(default)]
    leave: BTreeMap<String, Value>,
}

#[derive(Deserialize, Default)]
struct JoinedRoom {
    #[serde(default)]
    timeline: Timeline,
}

#[derive(Deserialize, Default)]
struct Timeline {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    sender: String,
    #[serde(default)]
    content: Value,
}

/// Flatten a `/sync` response into a SyncBatch.
pub(crate) fn parse_sync(value: Value) -> MatrixResult<SyncBatch> {
    let resp: SyncResponse = serde_json::from_value(value)
        .map_err(|e| MatrixError::InvalidResponse(format!("invalid sync response: {}", e)))?;

    let mut batch = SyncBatch {
        next_batch: resp.next_batch,
        ..Default::default()
    };

    for (room_id, room) in resp.rooms.join {
        let room_id = RoomId(room_id);
        for event in room.timeline.events {
            let content = event.content;
            batch.events.push(ChatEvent {
                room_id: room_id.clone(),
                event_type: event.event_type,
                msgtype: content
                    .get("msgtype")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                sender: UserId(event.sender),
                body: content
                    .get("body")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        batch.joined.push(room_id);
    }
    batch.invited = resp.rooms.invite.into_keys().map(RoomId).collect();
    batch.left = resp.rooms.leave.into_keys().map(RoomId).collect();

    Ok(batch)
}

#[async_trait]
impl ChatClient for HttpMatrixClient {
    async fn login(&self, username: &str, password: &str) -> MatrixResult<ChatIdentity> {
        let body = json!({
            "type": "m.login.password",
            "identifier": {"type": "m.id.user", "user": username},
            "password": password,
            "initial_device_display_name": DEVICE_DISPLAY_NAME,
        });
        let resp = self
            .request(Method::POST, &["login"], &[], Some(&body), false, REQUEST_TIMEOUT)
            .await?;
        self.establish(resp).await
    }

    async fn register(&self, username: &str, password: &str) -> MatrixResult<ChatIdentity> {
        let body = json!({
            "username": username,
            "password": password,
            "auth": {"type": "m.login.dummy"},
            "initial_device_display_name": DEVICE_DISPLAY_NAME,
        });
        let resp = self
            .request(
                Method::POST,
                &["register"],
                &[("kind", "user".to_string())],
                Some(&body),
                false,
                REQUEST_TIMEOUT,
            )
            .await?;
        self.establish(resp).await
    }

    async fn restore_session(&self, identity: ChatIdentity) {
        *self.session.write().await = Some(identity);
    }

    async fn session(&self) -> Option<ChatIdentity> {
        self.session.read().await.clone()
    }

    async fn join_room(&self, room: &str) -> MatrixResult<RoomId> {
        let resp = self
            .authed(Method::POST, &["join", room], Some(&json!({})))
            .await?;
        resp.get("room_id")
            .and_then(Value::as_str)
            .map(|id| RoomId(id.to_string()))
            .ok_or_else(|| MatrixError::InvalidResponse("join: missing room_id".to_string()))
    }

    async fn joined_rooms(&self) -> MatrixResult<Vec<RoomId>> {
        let resp = self.authed(Method::GET, &["joined_rooms"], None).await?;
        let rooms = resp
            .get("joined_rooms")
            .and_then(Value::as_array)
            .ok_or_else(|| MatrixError::InvalidResponse("missing joined_rooms".to_string()))?;

        Ok(rooms
            .iter()
            .filter_map(Value::as_str)
            .map(|id| RoomId(id.to_string()))
            .collect())
    }

    async fn canonical_alias(&self, room: &RoomId) -> MatrixResult<Option<String>> {
        match self
            .authed(
                Method::GET,
                &["rooms", room.as_str(), "state", "m.room.canonical_alias"],
                None,
            )
            .await
        {
            Ok(resp) => Ok(resp
                .get("alias")
                .and_then(Value::as_str)
                .map(str::to_string)),
            Err(e) if e.status() == Some(404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn room_aliases(&self, room: &RoomId) -> MatrixResult<Vec<String>> {
        let resp = self
            .authed(Method::GET, &["rooms", room.as_str(), "aliases"], None)
            .await?;
        Ok(resp
            .get("aliases")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_canonical_alias(&self, room: &RoomId, alias: &str) -> MatrixResult<()> {
        self.authed(
            Method::PUT,
            &["rooms", room.as_str(), "state", "m.room.canonical_alias"],
            Some(&json!({ "alias": alias })),
        )
        .await?;
        Ok(())
    }

    async fn send_text(&self, room: &RoomId, text: &str) -> MatrixResult<()> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        self.authed(
            Method::PUT,
            &["rooms", room.as_str(), "send", MESSAGE_EVENT, &txn_id],
            Some(&json!({ "msgtype": TEXT_MSGTYPE, "body": text })),
        )
        .await?;
        Ok(())
    }

    async fn set_display_name(&self, user: &UserId, name: &str) -> MatrixResult<()> {
        self.authed(
            Method::PUT,
            &["profile", user.as_str(), "displayname"],
            Some(&json!({ "displayname": name })),
        )
        .await?;
        Ok(())
    }

    async fn display_name(&self, user: &UserId) -> MatrixResult<Option<String>> {
        match self
            .authed(Method::GET, &["profile", user.as_str(), "displayname"], None)
            .await
        {
            Ok(resp) => Ok(resp
                .get("displayname")
                .and_then(Value::as_str)
                .map(str::to_string)),
            Err(e) if e.status() == Some(404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn sync(&self, since: Option<&str>, timeout: Duration) -> MatrixResult<SyncBatch> {
        let mut query = vec![("timeout", timeout.as_millis().to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }

        let resp = self
            .request(Method::GET, &["sync"], &query, None, true, timeout + SYNC_GRACE)
            .await?;
        parse_sync(resp)
    }

    async fn api_call(
        &self,
        method: Method,
        path: &[&str],
        body: Option<Value>,
    ) -> MatrixResult<Value> {
        self.authed(method, path, body.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_escapes_segments() {
        let client = HttpMatrixClient::new("https://matrix.example.org").unwrap();
        let url = client.endpoint(&["rooms", "!abc:example.org", "typing", "@0xab:example.org"]);
        assert_eq!(
            url.as_str(),
            "https://matrix.example.org/_matrix/client/v3/rooms/!abc:example.org/typing/@0xab:example.org"
        );

        let url = client.endpoint(&["join", "#room name:example.org"]);
        assert_eq!(
            url.as_str(),
            "https://matrix.example.org/_matrix/client/v3/join/%23room%20name:example.org"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = HttpMatrixClient::new("https://example.org/matrix/").unwrap();
        let url = client.endpoint(&["sync"]);
        assert_eq!(url.as_str(), "https://example.org/matrix/_matrix/client/v3/sync");
    }

    #[test]
    fn test_invalid_server_url() {
        assert!(HttpMatrixClient::new("not a url").is_err());
        assert!(HttpMatrixClient::new("mailto:someone@example.org").is_err());
    }

    #[test]
    fn test_parse_error_body() {
        let err = parse_error(403, br#"{"errcode":"M_FORBIDDEN","error":"Invalid password"}"#);
        assert_eq!(err, MatrixError::http(403, "M_FORBIDDEN", "Invalid password"));
        assert!(err.is_forbidden());

        let err = parse_error(502, b"<html>Bad Gateway</html>");
        assert!(err.is_server_error());
    }

    #[test]
    fn test_server_name() {
        assert_eq!(server_name("@0xabc:example.org"), Some("example.org"));
        assert_eq!(server_name("@0xabc:example.org:8448"), Some("example.org:8448"));
        assert_eq!(server_name("nocolon"), None);
    }

    #[test]
    fn test_parse_sync() {
        let batch = parse_sync(json!({
            "next_batch": "s72595_4483_1934",
            "rooms": {
                "join": {
                    "!room:hs": {
                        "timeline": {
                            "events": [
                                {
                                    "type": "m.room.message",
                                    "sender": "@0xabc:hs",
                                    "content": {"msgtype": "m.text", "body": "hello\n0x01"}
                                },
                                {
                                    "type": "m.room.member",
                                    "sender": "@0xdef:hs",
                                    "content": {"membership": "join"}
                                }
                            ]
                        }
                    }
                },
                "invite": {"!invited:hs": {"invite_state": {"events": []}}},
                "leave": {"!gone:hs": {}}
            }
        }))
        .unwrap();

        assert_eq!(batch.next_batch, "s72595_4483_1934");
        assert_eq!(batch.joined, vec![RoomId("!room:hs".into())]);
        assert_eq!(batch.invited, vec![RoomId("!invited:hs".into())]);
        assert_eq!(batch.left, vec![RoomId("!gone:hs".into())]);
        assert_eq!(batch.events.len(), 2);

        assert!(batch.events[0].is_text_message());
        assert_eq!(batch.events[0].body.as_deref(), Some("hello\n0x01"));
        assert_eq!(batch.events[0].sender, UserId("@0xabc:hs".into()));

        assert!(!batch.events[1].is_text_message());
        assert_eq!(batch.events[1].body, None);
    }

    #[test]
    fn test_parse_sync_without_rooms() {
        let batch = parse_sync(json!({"next_batch": "s1"})).unwrap();
        assert_eq!(batch.next_batch, "s1");
        assert!(batch.events.is_empty());
        assert!(batch.joined.is_empty());
    }

    #[tokio::test]
    async fn test_requires_session() {
        let client = HttpMatrixClient::new("https://matrix.example.org").unwrap();
        assert_eq!(client.session().await, None);
        let err = client.joined_rooms().await.unwrap_err();
        assert_eq!(err, MatrixError::NotLoggedIn);
    }
}
