//! Typing heartbeat
//!
//! Periodically marks the bridge user as typing in every joined room, a
//! liveness signal for other participants.

use super::rooms::RoomRegistry;
use super::traits::{ChatClient, Method, UserId};
use serde_json::json;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long each typing notification stays visible (ms)
const TYPING_TIMEOUT_MS: u64 = 1000;

/// Send typing notifications every `interval` until cancelled
pub async fn run_typing_heartbeat<C: ChatClient>(
    client: C,
    registry: RoomRegistry,
    user: UserId,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("typing heartbeat stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        for room in registry.snapshot().await {
            let body = json!({ "typing": true, "timeout": TYPING_TIMEOUT_MS });
            let path = ["rooms", room.as_str(), "typing", user.as_str()];
            if let Err(e) = client.api_call(Method::PUT, &path, Some(body)).await {
                warn!(room = %room, error = %e, "typing notification failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::mock::MockMatrixClient;
    use crate::matrix::traits::RoomId;

    #[tokio::test]
    async fn test_heartbeat_hits_every_room() {
        let client = MockMatrixClient::new("hs");
        let identity = client.register("bridge", "pw").await.unwrap();

        let registry = RoomRegistry::new();
        registry.insert(RoomId("!a:hs".into())).await;
        registry.insert(RoomId("!b:hs".into())).await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_typing_heartbeat(
            client.clone(),
            registry,
            identity.user_id.clone(),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(35)).await;
        cancel.cancel();
        task.await.unwrap();

        let calls = client.api_calls();
        assert!(calls.len() >= 4);
        assert_eq!(calls[0].method, Method::PUT);
        assert_eq!(calls[0].path, vec!["rooms", "!a:hs", "typing", "@bridge:hs"]);
        assert_eq!(calls[1].path[1], "!b:hs");
        assert_eq!(
            calls[0].body,
            Some(json!({ "typing": true, "timeout": 1000 }))
        );
    }

    #[tokio::test]
    async fn test_heartbeat_survives_failures() {
        // No session: every call fails with NotLoggedIn
        let client = MockMatrixClient::new("hs");
        let registry = RoomRegistry::new();
        registry.insert(RoomId("!a:hs".into())).await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_typing_heartbeat(
            client.clone(),
            registry,
            UserId("@bridge:hs".into()),
            Duration::from_millis(5),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        cancel.cancel();
        task.await.unwrap();
    }
}
