//! Sync long-poll loop with backoff.
//!
//! - 5xx from the homeserver: warn, back off (doubling, capped), retry
//! - Other HTTP errors: stop and return the error
//! - Network and decoding errors: hand to the error handler, back off, retry;
//!   without a handler, stop and return the error
//!
//! The first sync is a priming sync: it establishes the `since` token and its
//! timeline is dropped so history is not replayed on every start.

use super::rooms::RoomRegistry;
use super::traits::*;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// First retry delay after a failed sync
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(5);

/// Default cap on the retry delay (1 hour)
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Default server-side long-poll timeout
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Doubling retry delay with a ceiling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to the initial delay after a success
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

/// Receives timeline events from the listener
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn on_event(&self, event: ChatEvent);
}

/// Callback for network-class sync failures
pub type ErrorHandler = Arc<dyn Fn(&MatrixError) + Send + Sync>;

/// Long-poll loop over an injected client
pub struct SyncListener<C: ChatClient> {
    client: C,
    registry: RoomRegistry,
    backoff: BackoffPolicy,
    timeout: Duration,
    auto_join_invites: bool,
    error_handler: Option<ErrorHandler>,
}

impl<C: ChatClient> SyncListener<C> {
    pub fn new(client: C, registry: RoomRegistry) -> Self {
        Self {
            client,
            registry,
            backoff: BackoffPolicy::default(),
            timeout: DEFAULT_SYNC_TIMEOUT,
            auto_join_invites: true,
            error_handler: None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_auto_join(mut self, auto_join_invites: bool) -> Self {
        self.auto_join_invites = auto_join_invites;
        self
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Poll until cancelled or a non-retryable error occurs
    pub async fn run(
        mut self,
        handler: Arc<dyn SyncHandler>,
        cancel: CancellationToken,
    ) -> MatrixResult<()> {
        let mut since: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let priming = since.is_none();
            let timeout = if priming { Duration::ZERO } else { self.timeout };

            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.client.sync(since.as_deref(), timeout) => result,
            };

            match result {
                Ok(batch) => {
                    self.backoff.reset();
                    self.registry.apply(&batch.joined, &batch.left).await;
                    if self.auto_join_invites {
                        self.accept_invites(&batch.invited).await;
                    }

                    if priming {
                        debug!(
                            discarded = batch.events.len(),
                            "priming sync complete, listening"
                        );
                    } else {
                        for event in batch.events {
                            handler.on_event(event).await;
                        }
                    }
                    since = Some(batch.next_batch);
                }
                Err(err) if err.is_server_error() => {
                    let delay = self.backoff.next_delay();
                    warn!(error = %err, delay_secs = delay.as_secs_f64(), "sync failed, retrying");
                    if Self::wait(delay, &cancel).await {
                        return Ok(());
                    }
                }
                Err(err @ MatrixError::Http { .. }) => return Err(err),
                Err(err) => {
                    let Some(on_error) = &self.error_handler else {
                        return Err(err);
                    };
                    on_error(&err);
                    let delay = self.backoff.next_delay();
                    warn!(error = %err, delay_secs = delay.as_secs_f64(), "sync error, retrying");
                    if Self::wait(delay, &cancel).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn accept_invites(&self, invited: &[RoomId]) {
        for room in invited {
            match self.client.join_room(room.as_str()).await {
                Ok(joined) => {
                    info!(room = %joined, "accepted invite");
                    self.registry.insert(joined).await;
                }
                Err(e) => warn!(room = %room, error = %e, "failed to accept invite"),
            }
        }
    }

    /// Sleep for `delay`; true if cancelled meanwhile.
    async fn wait(delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }
}
