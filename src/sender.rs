//! Outbound signed broadcasts

use crate::chain::{Address, Signature, Wallet};
use crate::error::{BridgeError, BridgeResult};
use crate::matrix::{ChatClient, RoomRegistry, UserId};
use crate::signed_text::encode;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Returned to the caller after a broadcast
///
/// Renders as `account\nuser_id\nsignature`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub account: Address,
    pub user_id: UserId,
    pub signature: Signature,
}

impl fmt::Display for SendReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}\n{}", self.account, self.user_id, self.signature)
    }
}

/// Signs payloads and broadcasts them to every joined room
#[derive(Clone)]
pub struct MessageSender<W: Wallet, C: ChatClient> {
    wallet: W,
    client: C,
    account: Address,
    user_id: UserId,
    registry: RoomRegistry,
}

impl<W: Wallet, C: ChatClient> MessageSender<W, C> {
    pub fn new(
        wallet: W,
        client: C,
        account: Address,
        user_id: UserId,
        registry: RoomRegistry,
    ) -> Self {
        Self {
            wallet,
            client,
            account,
            user_id,
            registry,
        }
    }

    /// Compact JSON with object keys in sorted order
    pub fn canonicalize<T: Serialize + ?Sized>(payload: &T) -> BridgeResult<String> {
        let value = serde_json::to_value(payload)?;
        Ok(serde_json::to_string(&value)?)
    }

    /// Sign `payload` and send it to every joined room
    ///
    /// Stops at the first room that fails; rooms already sent to keep the
    /// message.
    pub async fn send<T: Serialize + ?Sized>(&self, payload: &T) -> BridgeResult<SendReceipt> {
        let message = Self::canonicalize(payload)?;
        let signature = self
            .wallet
            .sign(&self.account, &encode(&message, self.user_id.as_str()))
            .await?;
        let body = encode(&message, signature.as_str());

        let rooms = self.registry.snapshot().await;
        if rooms.is_empty() {
            warn!("no joined rooms, message not delivered");
        }

        for room in &rooms {
            self.client
                .send_text(room, &body)
                .await
                .map_err(|source| BridgeError::Broadcast {
                    room: room.clone(),
                    source,
                })?;
            debug!(room = %room, "message sent");
        }

        info!(rooms = rooms.len(), message = %message, "signed message broadcast");
        Ok(SendReceipt {
            account: self.account.clone(),
            user_id: self.user_id.clone(),
            signature,
        })
    }
}
