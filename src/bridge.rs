//! Bridge runtime
//!
//! Binds the identity, joins rooms, then runs two background tasks until
//! shutdown: the sync listener (verifying every inbound message) and the
//! typing heartbeat. Both stop on the shared cancellation token. A fatal
//! listener error cancels the token too, so the whole bridge winds down.

use crate::chain::{Address, Wallet};
use crate::error::BridgeResult;
use crate::identity::{IdentityBinder, IdentityStore};
use crate::matrix::listener::{BackoffPolicy, INITIAL_BACKOFF, MAX_BACKOFF};
use crate::matrix::{
    run_typing_heartbeat, ChatClient, ChatIdentity, MatrixError, MatrixResult, RoomRegistry,
    SyncListener,
};
use crate::sender::MessageSender;
use crate::verifier::{MessageVerifier, VerificationMode};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runtime knobs for the bridge
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Room aliases joined at startup
    pub rooms: Vec<String>,
    pub sync_timeout: Duration,
    pub max_backoff: Duration,
    /// `None` disables the typing heartbeat
    pub typing_interval: Option<Duration>,
    pub verification: VerificationMode,
    pub auto_join_invites: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            rooms: Vec::new(),
            sync_timeout: Duration::from_millis(30_000),
            max_backoff: MAX_BACKOFF,
            typing_interval: Some(Duration::from_secs(5)),
            verification: VerificationMode::default(),
            auto_join_invites: true,
        }
    }
}

/// A running bridge
pub struct Bridge<W: Wallet, C: ChatClient> {
    identity: ChatIdentity,
    registry: RoomRegistry,
    sender: MessageSender<W, C>,
    cancel: CancellationToken,
    listener: Option<JoinHandle<MatrixResult<()>>>,
    typing: Option<JoinHandle<()>>,
}

impl<W: Wallet, C: ChatClient> Bridge<W, C> {
    /// Bind the identity, join rooms and spawn the background tasks
    pub async fn start<S: IdentityStore + ?Sized>(
        wallet: W,
        client: C,
        account: Address,
        store: &mut S,
        settings: BridgeSettings,
    ) -> BridgeResult<Self> {
        let binder = IdentityBinder::new(wallet.clone(), client.clone(), account.clone());
        let identity = binder.bind(store).await?;

        let registry = RoomRegistry::new();
        binder.join_rooms(&settings.rooms, &registry).await?;

        let cancel = CancellationToken::new();
        let verifier = Arc::new(MessageVerifier::new(
            wallet.clone(),
            client.clone(),
            settings.verification,
        ));
        let listener = SyncListener::new(client.clone(), registry.clone())
            .with_backoff(BackoffPolicy::new(INITIAL_BACKOFF, settings.max_backoff))
            .with_timeout(settings.sync_timeout)
            .with_auto_join(settings.auto_join_invites)
            .with_error_handler(Arc::new(|e: &MatrixError| {
                warn!(error = %e, "exception during sync");
            }));

        let token = cancel.clone();
        let listener = tokio::spawn(async move {
            let result = listener.run(verifier, token.clone()).await;
            if let Err(e) = &result {
                error!(error = %e, "sync listener stopped");
                token.cancel();
            }
            result
        });

        let typing = settings.typing_interval.map(|interval| {
            tokio::spawn(run_typing_heartbeat(
                client.clone(),
                registry.clone(),
                identity.user_id.clone(),
                interval,
                cancel.clone(),
            ))
        });

        let sender = MessageSender::new(
            wallet,
            client,
            account,
            identity.user_id.clone(),
            registry.clone(),
        );

        info!(user_id = %identity.user_id, mode = ?settings.verification, "bridge started");
        Ok(Self {
            identity,
            registry,
            sender,
            cancel,
            listener: Some(listener),
            typing,
        })
    }

    pub fn identity(&self) -> &ChatIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Sender sharing this bridge's identity and rooms
    pub fn sender(&self) -> MessageSender<W, C> {
        self.sender.clone()
    }

    /// Token that stops the bridge; also fires when the listener dies
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves once the bridge is stopping
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }

    /// Stop both tasks and wait for them
    ///
    /// Returns the listener's error if it died on its own.
    pub async fn shutdown(mut self) -> BridgeResult<()> {
        self.cancel.cancel();

        if let Some(typing) = self.typing.take() {
            if let Err(e) = typing.await {
                warn!(error = %e, "typing heartbeat task failed");
            }
        }

        let result = match self.listener.take() {
            Some(listener) => match listener.await {
                Ok(result) => result.map_err(Into::into),
                Err(e) => {
                    warn!(error = %e, "sync listener task failed");
                    Ok(())
                }
            },
            None => Ok(()),
        };

        info!("bridge stopped");
        result
    }
}

impl<W: Wallet, C: ChatClient> Drop for Bridge<W, C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
