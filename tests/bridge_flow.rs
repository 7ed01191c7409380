//! End-to-end flows against the in-memory homeserver and wallet
//!
//! One participant binds an identity and broadcasts; another verifies what
//! arrives in the room.

use ethmatrix::bridge::{Bridge, BridgeSettings};
use ethmatrix::chain::{Address, MockWallet, Wallet};
use ethmatrix::identity::{IdentityBinder, MemoryIdentityStore};
use ethmatrix::matrix::{
    ChatClient, ChatEvent, MockMatrixClient, RoomId, RoomRegistry, SyncBatch,
};
use ethmatrix::sender::MessageSender;
use ethmatrix::signed_text::encode;
use ethmatrix::verifier::{MessageVerifier, RejectReason, Verdict, VerificationMode};
use serde_json::json;
use std::time::Duration;

fn alice() -> Address {
    Address::parse("0xA11CEA11CEA11CEA11CEA11CEA11CEA11CEA11CE").unwrap()
}

fn mallory() -> Address {
    Address::parse("0x3a11033a11033a11033a11033a11033a11033a11").unwrap()
}

fn room() -> RoomId {
    RoomId("!lobby:hs".into())
}

fn homeserver() -> MockMatrixClient {
    let client = MockMatrixClient::new("hs");
    client.add_room(room(), &["#lobby:hs"], None);
    client
}

fn settings() -> BridgeSettings {
    BridgeSettings {
        rooms: vec!["#lobby:hs".into()],
        typing_interval: None,
        ..Default::default()
    }
}

type Verifier = MessageVerifier<MockWallet, MockMatrixClient>;

/// A second participant reading the room through its own session
async fn observer(mode: VerificationMode) -> (Verifier, MockMatrixClient) {
    let client = homeserver();
    client.register("observer", "pw").await.unwrap();
    let verifier = MessageVerifier::new(MockWallet::new(vec![]), client.clone(), mode);
    (verifier, client)
}

#[tokio::test]
async fn test_broadcast_verifies_at_peer() {
    let wallet = MockWallet::new(vec![alice()]);
    let client = homeserver();
    let bridge = Bridge::start(
        wallet,
        client.clone(),
        alice(),
        &mut MemoryIdentityStore::new(),
        settings(),
    )
    .await
    .unwrap();

    let receipt = bridge.sender().send(&json!({"a": 1})).await.unwrap();
    let user = bridge.identity().user_id.clone();
    let sent = client.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].room, room());

    // The peer sees Alice's display name and message through its own session
    let (verifier, peer) = observer(VerificationMode::DisplayName).await;
    let display_name = client.display_name(&user).await.unwrap().unwrap();
    peer.put_display_name(&user, &display_name);

    let verdict = verifier
        .verify(&ChatEvent::text(room(), user.clone(), sent[0].body.clone()))
        .await;
    assert_eq!(verdict, Verdict::Accepted(alice()));
    assert_eq!(receipt.account, alice());

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_impostor_display_name_rejected() {
    let wallet = MockWallet::new(vec![alice()]);
    let client = homeserver();
    let binder = IdentityBinder::new(wallet.clone(), client.clone(), alice());
    let identity = binder.bind(&mut MemoryIdentityStore::new()).await.unwrap();
    let registry = RoomRegistry::new();
    binder
        .join_rooms(&["#lobby:hs".into()], &registry)
        .await
        .unwrap();

    let sender = MessageSender::new(
        wallet,
        client.clone(),
        alice(),
        identity.user_id.clone(),
        registry,
    );
    sender.send(&json!({"pay": 10})).await.unwrap();
    let body = client.sent_messages()[0].body.clone();

    // Someone else's signature published as Alice's display name
    let (verifier, peer) = observer(VerificationMode::DisplayName).await;
    let user = identity.user_id.as_str();
    let forged = MockWallet::forge(&mallory(), user);
    peer.put_display_name(&identity.user_id, forged.as_str());

    let verdict = verifier
        .verify(&ChatEvent::text(room(), identity.user_id.clone(), body.clone()))
        .await;
    assert!(matches!(
        verdict,
        Verdict::Rejected(RejectReason::SignerMismatch { .. })
    ));

    // The legacy mode only looks at the message signature
    let (legacy, _) = observer(VerificationMode::SenderId).await;
    let verdict = legacy
        .verify(&ChatEvent::text(room(), identity.user_id.clone(), body))
        .await;
    assert_eq!(verdict, Verdict::Accepted(alice()));
}

#[tokio::test]
async fn test_restart_reuses_identity() {
    let wallet = MockWallet::new(vec![alice()]);
    let mut store = MemoryIdentityStore::new();

    let first = homeserver();
    let identity = IdentityBinder::new(wallet.clone(), first.clone(), alice())
        .bind(&mut store)
        .await
        .unwrap();

    let second = homeserver();
    let again = IdentityBinder::new(wallet, second.clone(), alice())
        .bind(&mut store)
        .await
        .unwrap();

    assert_eq!(again, identity);
    assert!(second.login_attempts().is_empty());
    assert!(second.register_attempts().is_empty());
    assert_eq!(store.save_count(), 1);
}

#[tokio::test]
async fn test_same_account_yields_same_password() {
    let wallet = MockWallet::new(vec![alice()]);

    // First run registers; a run on a fresh store must log in with the same
    // derived password
    let client = homeserver();
    IdentityBinder::new(wallet.clone(), client.clone(), alice())
        .bind(&mut MemoryIdentityStore::new())
        .await
        .unwrap();
    IdentityBinder::new(wallet, client.clone(), alice())
        .bind(&mut MemoryIdentityStore::new())
        .await
        .unwrap();

    assert_eq!(client.register_attempts().len(), 1);
    assert_eq!(client.login_attempts().len(), 2);
}

#[tokio::test]
async fn test_listener_feeds_verifier() {
    let wallet = MockWallet::new(vec![alice()]);
    let client = homeserver();
    client.push_sync(Ok(Default::default()));

    let bridge = Bridge::start(
        wallet.clone(),
        client.clone(),
        alice(),
        &mut MemoryIdentityStore::new(),
        settings(),
    )
    .await
    .unwrap();

    let user = bridge.identity().user_id.clone();
    let message = "hello\nworld";
    let sig = wallet.sign(&alice(), &encode(message, user.as_str())).await.unwrap();
    client.push_sync(Ok(SyncBatch {
        next_batch: "s-msg".into(),
        events: vec![ChatEvent::text(room(), user.clone(), encode(message, sig.as_str()))],
        ..Default::default()
    }));

    for _ in 0..100 {
        if !client.display_name_lookups().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // Verification fetched the sender's display name from the homeserver
    assert_eq!(client.display_name_lookups(), vec![user]);
    bridge.shutdown().await.unwrap();
}
