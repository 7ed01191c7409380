//! Shared state for the HTTP handlers.

use std::sync::Arc;

use crate::chain::Wallet;
use crate::matrix::ChatClient;
use crate::sender::MessageSender;

pub struct AppState<W: Wallet, C: ChatClient> {
    pub sender: MessageSender<W, C>,
    pub wallet: W,
}

pub type SharedState<W, C> = Arc<AppState<W, C>>;

impl<W: Wallet, C: ChatClient> AppState<W, C> {
    pub fn shared(sender: MessageSender<W, C>, wallet: W) -> SharedState<W, C> {
        Arc::new(Self { sender, wallet })
    }
}
