//! Inbound message verification
//!
//! A text message body is `message\nsignature`, where the signature covers
//! `message\nsender_user_id`. The recovered address must appear in the sender's
//! user ID. In the default display-name mode the sender's display name must
//! also be a signature over the bare user ID by that same address.
//!
//! Verification never fails: every event ends up Accepted, Rejected or
//! Ignored.

use crate::chain::{Address, Signature, Wallet};
use crate::matrix::{ChatClient, ChatEvent, SyncHandler, UserId};
use crate::signed_text::SignedText;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// How strictly inbound messages are checked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationMode {
    /// Message signer must match the signer of the sender's display name
    #[default]
    DisplayName,
    /// Legacy: message signer only has to appear in the sender's user ID
    SenderId,
}

/// Why an event was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Body is not `message\nsignature`
    Malformed(String),
    /// The wallet could not recover a signer
    Unrecoverable(String),
    /// Display-name mode, but the sender has no display name
    MissingDisplayName,
    /// Display name and message were signed by different addresses
    SignerMismatch {
        display_name: Address,
        message: Address,
    },
    /// The signer does not appear in the sender's user ID
    NotInSenderId(Address),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(why) => write!(f, "malformed body: {}", why),
            Self::Unrecoverable(why) => write!(f, "signer not recoverable: {}", why),
            Self::MissingDisplayName => f.write_str("sender has no display name"),
            Self::SignerMismatch {
                display_name,
                message,
            } => write!(
                f,
                "display name signed by {}, message by {}",
                display_name, message
            ),
            Self::NotInSenderId(address) => write!(f, "{} not in sender ID", address),
        }
    }
}

/// Outcome of verifying one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(Address),
    Rejected(RejectReason),
    /// Not a plain text message
    Ignored,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Checks inbound events against the sender's identity
#[derive(Clone)]
pub struct MessageVerifier<W: Wallet, C: ChatClient> {
    wallet: W,
    client: C,
    mode: VerificationMode,
}

impl<W: Wallet, C: ChatClient> MessageVerifier<W, C> {
    pub fn new(wallet: W, client: C, mode: VerificationMode) -> Self {
        Self {
            wallet,
            client,
            mode,
        }
    }

    pub async fn verify(&self, event: &ChatEvent) -> Verdict {
        if !event.is_text_message() {
            return Verdict::Ignored;
        }

        let sender = &event.sender;
        let body = event.body.as_deref().unwrap_or_default();
        let verdict = self.check(sender, body).await;

        match &verdict {
            Verdict::Accepted(address) => {
                let message = crate::signed_text::split(body)
                    .map(|(message, _)| message)
                    .unwrap_or_default();
                info!(sender = %sender, address = %address, message = %message, "valid signature");
            }
            Verdict::Rejected(reason) => {
                debug!(sender = %sender, room = %event.room_id, reason = %reason, "invalid signature");
            }
            Verdict::Ignored => {}
        }
        verdict
    }

    async fn check(&self, sender: &UserId, body: &str) -> Verdict {
        let signed = match SignedText::parse(body) {
            Ok(signed) => signed,
            Err(e) => return Verdict::Rejected(RejectReason::Malformed(e.to_string())),
        };

        let address = match self
            .recover(&signed.signing_input(sender.as_str()), &signed.signature)
            .await
        {
            Ok(address) => address,
            Err(reason) => return Verdict::Rejected(reason),
        };

        if self.mode == VerificationMode::DisplayName {
            let display_address = match self.display_name_signer(sender).await {
                Ok(address) => address,
                Err(reason) => return Verdict::Rejected(reason),
            };
            if display_address != address {
                return Verdict::Rejected(RejectReason::SignerMismatch {
                    display_name: display_address,
                    message: address,
                });
            }
        }

        // Case-insensitive: homeservers may keep the casing a user registered with
        if !sender.as_str().to_lowercase().contains(address.as_str()) {
            return Verdict::Rejected(RejectReason::NotInSenderId(address));
        }

        Verdict::Accepted(address)
    }

    async fn display_name_signer(&self, sender: &UserId) -> Result<Address, RejectReason> {
        let name = match self.client.display_name(sender).await {
            Ok(Some(name)) => name,
            Ok(None) => return Err(RejectReason::MissingDisplayName),
            Err(e) => return Err(RejectReason::Unrecoverable(e.to_string())),
        };
        let signature =
            Signature::parse(&name).map_err(|e| RejectReason::Malformed(e.to_string()))?;
        self.recover(sender.as_str(), &signature).await
    }

    async fn recover(&self, text: &str, signature: &Signature) -> Result<Address, RejectReason> {
        self.wallet
            .recover_address(text, signature)
            .await
            .map_err(|e| RejectReason::Unrecoverable(e.to_string()))
    }
}

#[async_trait]
impl<W: Wallet, C: ChatClient> SyncHandler for MessageVerifier<W, C> {
    async fn on_event(&self, event: ChatEvent) {
        self.verify(&event).await;
    }
}
