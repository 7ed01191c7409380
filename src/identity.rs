//! Chat identity binding
//!
//! Ties a Matrix account to an Ethereum account:
//!
//! 1. Reuse a persisted identity for the account, or log in / register with a
//!    password derived from a wallet signature (no secret needs persisting)
//! 2. Persist `{user_id, access_token, home_server}` under the account
//! 3. Publish a display name that is a signature over the user ID, so anyone
//!    can recover the account from (user ID, display name)
//! 4. Join the configured rooms
//!
//! Errors in 1-3 are fatal; the process is expected to be restarted by its
//! supervisor.

use crate::chain::{Address, ChainResult, Wallet};
use crate::error::{BridgeError, BridgeResult};
use crate::matrix::{ChatClient, ChatIdentity, RoomId, RoomRegistry};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Usernames tried (`acct`, `acct.1`, ... `acct.4`) before giving up
pub const MAX_REGISTRATION_ATTEMPTS: u32 = 5;

/// Text signed to derive the Matrix password
const PASSWORD_SEED: &str = "password";

/// Hex characters of the signature kept as password
const PASSWORD_LEN: usize = 16;

/// Identity store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Persistence for account → chat identity bindings
pub trait IdentityStore {
    fn load(&self, account: &Address) -> Option<ChatIdentity>;

    fn save(&mut self, account: &Address, identity: &ChatIdentity) -> Result<(), StoreError>;
}

/// In-memory identity store
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityStore {
    identities: HashMap<Address, ChatIdentity>,
    saves: usize,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `save` was called
    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self, account: &Address) -> Option<ChatIdentity> {
        self.identities.get(account).cloned()
    }

    fn save(&mut self, account: &Address, identity: &ChatIdentity) -> Result<(), StoreError> {
        self.identities.insert(account.clone(), identity.clone());
        self.saves += 1;
        Ok(())
    }
}

/// Username for the given attempt: `acct`, then `acct.1`, `acct.2`, ...
pub fn candidate_username(account: &Address, attempt: u32) -> String {
    if attempt == 0 {
        account.as_str().to_string()
    } else {
        format!("{}.{}", account.as_str(), attempt)
    }
}

/// Deterministic Matrix password for `account`
///
/// Last 16 hex characters of the account's signature over "password": the same
/// account always yields the same credential across restarts.
pub async fn derive_password<W: Wallet>(
    wallet: &W,
    account: &Address,
) -> ChainResult<Zeroizing<String>> {
    let signature = wallet.sign(account, PASSWORD_SEED).await?;
    Ok(Zeroizing::new(signature.tail(PASSWORD_LEN).to_string()))
}

/// Establishes the bridge's chat identity
pub struct IdentityBinder<W: Wallet, C: ChatClient> {
    wallet: W,
    client: C,
    account: Address,
}

impl<W: Wallet, C: ChatClient> IdentityBinder<W, C> {
    pub fn new(wallet: W, client: C, account: Address) -> Self {
        Self {
            wallet,
            client,
            account,
        }
    }

    /// Reuse or create the chat identity, persist it, publish the display name
    pub async fn bind<S: IdentityStore + ?Sized>(
        &self,
        store: &mut S,
    ) -> BridgeResult<ChatIdentity> {
        let identity = match store.load(&self.account) {
            Some(identity) => {
                info!(user_id = %identity.user_id, "reusing stored Matrix identity");
                self.client.restore_session(identity.clone()).await;
                identity
            }
            None => {
                let identity = self.login_or_register().await?;
                store.save(&self.account, &identity)?;
                identity
            }
        };

        self.publish_display_name(&identity).await?;
        Ok(identity)
    }

    async fn login_or_register(&self) -> BridgeResult<ChatIdentity> {
        let password = derive_password(&self.wallet, &self.account).await?;

        for attempt in 0..MAX_REGISTRATION_ATTEMPTS {
            let username = candidate_username(&self.account, attempt);

            match self.client.login(&username, &password).await {
                Ok(identity) => {
                    info!(user_id = %identity.user_id, "logged in");
                    return Ok(identity);
                }
                Err(e) if e.is_forbidden() => {
                    debug!(username = %username, "login refused, trying to register");
                }
                Err(e) => return Err(e.into()),
            }

            match self.client.register(&username, &password).await {
                Ok(identity) => {
                    info!(user_id = %identity.user_id, "registered");
                    return Ok(identity);
                }
                Err(e) if e.is_bad_request() => {
                    debug!(username = %username, "username taken, trying next suffix");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(BridgeError::RegistrationExhausted {
            attempts: MAX_REGISTRATION_ATTEMPTS,
        })
    }

    /// Display name = signature over the bare user id
    async fn publish_display_name(&self, identity: &ChatIdentity) -> BridgeResult<()> {
        let user_id = identity.user_id.as_str();
        let signature = self.wallet.sign(&self.account, user_id).await?;
        self.client
            .set_display_name(&identity.user_id, signature.as_str())
            .await?;
        debug!(user_id = %user_id, "display name published");
        Ok(())
    }

    /// Join `aliases` and register every joined room
    ///
    /// Rooms without a canonical alias adopt their first known alias; failures
    /// there are only logged.
    pub async fn join_rooms(
        &self,
        aliases: &[String],
        registry: &RoomRegistry,
    ) -> BridgeResult<Vec<RoomId>> {
        for alias in aliases {
            let room = self
                .client
                .join_room(alias)
                .await
                .map_err(|source| BridgeError::RoomJoin {
                    room: alias.clone(),
                    source,
                })?;
            debug!(alias = %alias, room = %room, "joined");
        }

        let rooms = self.client.joined_rooms().await?;
        for room in &rooms {
            self.adopt_canonical_alias(room).await;
            registry.insert(room.clone()).await;
        }

        info!(count = rooms.len(), "rooms joined");
        Ok(rooms)
    }

    async fn adopt_canonical_alias(&self, room: &RoomId) {
        let canonical = match self.client.canonical_alias(room).await {
            Ok(canonical) => canonical,
            Err(e) => {
                warn!(room = %room, error = %e, "could not read canonical alias");
                return;
            }
        };
        if canonical.is_some() {
            return;
        }

        let aliases = match self.client.room_aliases(room).await {
            Ok(aliases) => aliases,
            Err(e) => {
                warn!(room = %room, error = %e, "could not read room aliases");
                return;
            }
        };
        let Some(first) = aliases.first() else {
            return;
        };

        match self.client.set_canonical_alias(room, first).await {
            Ok(()) => debug!(room = %room, alias = %first, "canonical alias set"),
            Err(e) => warn!(room = %room, error = %e, "could not set canonical alias"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockWallet;
    use crate::matrix::{MatrixError, MockMatrixClient, UserId};

    fn account() -> Address {
        Address::parse("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").unwrap()
    }

    fn setup() -> (MockWallet, MockMatrixClient) {
        (MockWallet::new(vec![account()]), MockMatrixClient::new("hs"))
    }

    #[test]
    fn test_candidate_usernames() {
        let acct = account();
        assert_eq!(candidate_username(&acct, 0), acct.as_str());
        assert_eq!(candidate_username(&acct, 1), format!("{}.1", acct));
        assert_eq!(candidate_username(&acct, 4), format!("{}.4", acct));
    }

    #[tokio::test]
    async fn test_derive_password_is_deterministic() {
        let (wallet, _) = setup();
        let a = derive_password(&wallet, &account()).await.unwrap();
        let b = derive_password(&wallet, &account()).await.unwrap();

        assert_eq!(a.len(), 16);
        assert_eq!(*a, *b);
        let full = MockWallet::forge(&account(), "password");
        assert!(full.as_str().ends_with(a.as_str()));
    }

    #[tokio::test]
    async fn test_registers_fresh_account() {
        let (wallet, client) = setup();
        let mut store = MemoryIdentityStore::new();

        let identity = IdentityBinder::new(wallet, client.clone(), account())
            .bind(&mut store)
            .await
            .unwrap();

        let expected = format!("@{}:hs", account());
        assert_eq!(identity.user_id, UserId(expected));
        assert_eq!(store.load(&account()), Some(identity));
        assert_eq!(client.login_attempts(), vec![account().to_string()]);
        assert_eq!(client.register_attempts(), vec![account().to_string()]);
    }

    #[tokio::test]
    async fn test_logs_in_existing_account() {
        let (wallet, client) = setup();
        let password = derive_password(&wallet, &account()).await.unwrap();
        client.add_account(account().as_str(), &password);

        let mut store = MemoryIdentityStore::new();
        IdentityBinder::new(wallet, client.clone(), account())
            .bind(&mut store)
            .await
            .unwrap();

        assert!(client.register_attempts().is_empty());
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_collisions_walk_suffixes() {
        let (wallet, client) = setup();
        let acct = account();
        client.add_account(&candidate_username(&acct, 0), "someone-else");
        client.add_account(&candidate_username(&acct, 1), "someone-else");

        let mut store = MemoryIdentityStore::new();
        let identity = IdentityBinder::new(wallet, client.clone(), acct.clone())
            .bind(&mut store)
            .await
            .unwrap();

        let expected = vec![
            acct.to_string(),
            format!("{}.1", acct),
            format!("{}.2", acct),
        ];
        assert_eq!(client.login_attempts(), expected);
        assert_eq!(client.register_attempts(), expected);
        assert_eq!(identity.user_id, client.user_id_for(&format!("{}.2", acct)));
    }

    #[tokio::test]
    async fn test_registration_exhausted_after_five() {
        let (wallet, client) = setup();
        client.fail_register(MatrixError::http(400, "M_USER_IN_USE", "taken"));

        let mut store = MemoryIdentityStore::new();
        let err = IdentityBinder::new(wallet, client.clone(), account())
            .bind(&mut store)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BridgeError::RegistrationExhausted { attempts: 5 }
        ));
        assert_eq!(client.login_attempts().len(), 5);
        assert_eq!(client.register_attempts().len(), 5);
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_unexpected_login_error_is_fatal() {
        let (wallet, client) = setup();
        client.fail_login(MatrixError::http(429, "M_LIMIT_EXCEEDED", "slow down"));

        let err = IdentityBinder::new(wallet, client.clone(), account())
            .bind(&mut MemoryIdentityStore::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Matrix(ref e) if e.status() == Some(429)));
        assert!(client.register_attempts().is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_register_error_is_fatal() {
        let (wallet, client) = setup();
        client.fail_register(MatrixError::http(403, "M_FORBIDDEN", "registration disabled"));

        let err = IdentityBinder::new(wallet, client.clone(), account())
            .bind(&mut MemoryIdentityStore::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Matrix(_)));
        assert_eq!(client.register_attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_reuses_stored_identity() {
        let (wallet, client) = setup();
        let stored = ChatIdentity {
            user_id: UserId(format!("@{}:hs", account())),
            access_token: "cached".into(),
            home_server: "hs".into(),
        };
        let mut store = MemoryIdentityStore::new();
        store.save(&account(), &stored).unwrap();

        let identity = IdentityBinder::new(wallet.clone(), client.clone(), account())
            .bind(&mut store)
            .await
            .unwrap();

        assert_eq!(identity, stored);
        assert_eq!(client.session().await, Some(stored));
        assert!(client.login_attempts().is_empty());
        // Only the display name was signed, no password derivation
        assert_eq!(wallet.signed_texts().len(), 1);
    }

    #[tokio::test]
    async fn test_display_name_recovers_account() {
        let (wallet, client) = setup();
        let identity = IdentityBinder::new(wallet.clone(), client.clone(), account())
            .bind(&mut MemoryIdentityStore::new())
            .await
            .unwrap();

        let name = client.display_name(&identity.user_id).await.unwrap().unwrap();
        let signature = crate::chain::Signature::parse(&name).unwrap();
        let recovered = wallet
            .recover_address(identity.user_id.as_str(), &signature)
            .await
            .unwrap();
        assert_eq!(recovered, account());

        // Only the bare user id is covered, nothing appended
        assert!(wallet
            .signed_texts()
            .iter()
            .any(|(_, text)| text == identity.user_id.as_str()));
    }

    #[tokio::test]
    async fn test_join_rooms_sets_missing_canonical_alias() {
        let (wallet, client) = setup();
        let binder = IdentityBinder::new(wallet, client.clone(), account());
        binder.bind(&mut MemoryIdentityStore::new()).await.unwrap();

        let bare = RoomId("!bare:hs".into());
        let named = RoomId("!named:hs".into());
        client.add_room(bare.clone(), &["#first:hs", "#second:hs"], None);
        client.add_room(named.clone(), &["#named:hs"], Some("#canon:hs"));

        let registry = RoomRegistry::new();
        let rooms = binder
            .join_rooms(&["#first:hs".into(), "#named:hs".into()], &registry)
            .await
            .unwrap();

        assert_eq!(rooms.len(), 2);
        assert_eq!(registry.snapshot().await, vec![bare.clone(), named.clone()]);
        assert_eq!(client.stored_canonical_alias(&bare).as_deref(), Some("#first:hs"));
        assert_eq!(client.stored_canonical_alias(&named).as_deref(), Some("#canon:hs"));
    }

    #[tokio::test]
    async fn test_join_unknown_room_is_fatal() {
        let (wallet, client) = setup();
        let binder = IdentityBinder::new(wallet, client.clone(), account());
        binder.bind(&mut MemoryIdentityStore::new()).await.unwrap();

        let err = binder
            .join_rooms(&["#missing:hs".into()], &RoomRegistry::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::RoomJoin { ref room, .. } if room == "#missing:hs"));
    }
}
