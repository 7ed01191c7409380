//! HTTP surface against a real listener on 127.0.0.1:0

use ethmatrix::api::{self, AppState};
use ethmatrix::bridge::{Bridge, BridgeSettings};
use ethmatrix::chain::{Address, MockWallet, Signature, Wallet};
use ethmatrix::identity::MemoryIdentityStore;
use ethmatrix::matrix::{MockMatrixClient, RoomId};
use ethmatrix::signed_text::encode;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

fn account() -> Address {
    Address::parse("0x5e4d5e4d5e4d5e4d5e4d5e4d5e4d5e4d5e4d5e4d").unwrap()
}

struct Harness {
    base: String,
    wallet: MockWallet,
    client: MockMatrixClient,
    bridge: Bridge<MockWallet, MockMatrixClient>,
    server: JoinHandle<std::io::Result<()>>,
}

impl Harness {
    async fn start(rooms: &[&str]) -> Self {
        let wallet = MockWallet::new(vec![account()]);
        let client = MockMatrixClient::new("hs");
        for (i, alias) in rooms.iter().enumerate() {
            client.add_room(RoomId(format!("!room{}:hs", i)), &[*alias], None);
        }

        let bridge = Bridge::start(
            wallet.clone(),
            client.clone(),
            account(),
            &mut MemoryIdentityStore::new(),
            BridgeSettings {
                rooms: rooms.iter().map(|r| r.to_string()).collect(),
                typing_interval: None,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(api::serve(
            listener,
            AppState::shared(bridge.sender(), wallet.clone()),
            bridge.cancellation_token(),
        ));

        Self {
            base,
            wallet,
            client,
            bridge,
            server,
        }
    }

    async fn stop(self) {
        self.bridge.shutdown().await.unwrap();
        self.server.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_send_returns_recoverable_receipt() {
    let h = Harness::start(&["#a:hs", "#b:hs"]).await;

    let response = reqwest::Client::new()
        .post(format!("{}/send", h.base))
        .json(&serde_json::json!({"a": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.unwrap();

    let lines: Vec<&str> = body.split('\n').collect();
    assert_eq!(lines.len(), 3);
    let user_id = h.bridge.identity().user_id.as_str();
    assert_eq!(lines[0], account().as_str());
    assert_eq!(lines[1], user_id);

    let signature = Signature::parse(lines[2]).unwrap();
    let recovered = h
        .wallet
        .recover_address(&encode(r#"{"a":1}"#, user_id), &signature)
        .await
        .unwrap();
    assert_eq!(recovered, account());

    let sent = h.client.sent_messages();
    assert_eq!(sent.len(), 2);
    assert!(sent
        .iter()
        .all(|m| m.body == encode(r#"{"a":1}"#, lines[2])));

    h.stop().await;
}

#[tokio::test]
async fn test_block_is_not_cached() {
    let h = Harness::start(&[]).await;
    let url = format!("{}/block", h.base);

    for height in [100u64, 101, 250] {
        h.wallet.set_block_number(height);
        let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
        assert_eq!(body.parse::<u64>().unwrap(), height);
    }

    h.stop().await;
}

#[tokio::test]
async fn test_broadcast_failure_is_server_error() {
    let h = Harness::start(&["#a:hs", "#b:hs"]).await;
    h.client.fail_sends_to(&RoomId("!room1:hs".into()));

    let response = reqwest::Client::new()
        .post(format!("{}/send", h.base))
        .json(&serde_json::json!({"a": 1}))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_server_error());
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("!room1:hs"));
    // No rollback of the room that already received it
    assert_eq!(h.client.sent_messages().len(), 1);

    h.stop().await;
}

#[tokio::test]
async fn test_non_json_body_rejected() {
    let h = Harness::start(&["#a:hs"]).await;

    let response = reqwest::Client::new()
        .post(format!("{}/send", h.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    assert!(h.client.sent_messages().is_empty());

    h.stop().await;
}
