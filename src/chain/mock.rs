//! Mock Wallet for Testing
//!
//! Signatures are deterministic and recoverable without real elliptic-curve
//! keys: `sha256(text) || (address XOR sha256(text)[..20])`. Flipping a byte in
//! the first half makes recovery fail; flipping one in the second half recovers
//! a different address. Either way a tampered signature does not verify.

use super::traits::*;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const DIGEST_LEN: usize = 32;
const SIGNATURE_LEN: usize = DIGEST_LEN + 20;

/// Mock wallet for testing
#[derive(Clone)]
pub struct MockWallet {
    state: Arc<Mutex<MockState>>,
    block_number: Arc<AtomicU64>,
}

#[derive(Default)]
struct MockState {
    accounts: Vec<Address>,
    passwords: HashMap<Address, String>,
    unlocked: Vec<Address>,
    signed: Vec<(Address, String)>,
}

fn digest(text: &str) -> [u8; DIGEST_LEN] {
    Sha256::digest(text.as_bytes()).into()
}

impl MockWallet {
    /// Create a wallet holding `accounts`
    pub fn new(accounts: Vec<Address>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                accounts,
                ..Default::default()
            })),
            block_number: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Require `password` to unlock `account`
    pub fn set_password(&self, account: &Address, password: &str) {
        self.state
            .lock()
            .unwrap()
            .passwords
            .insert(account.clone(), password.to_string());
    }

    pub fn set_block_number(&self, number: u64) {
        self.block_number.store(number, Ordering::SeqCst);
    }

    /// Texts signed so far, in order
    pub fn signed_texts(&self) -> Vec<(Address, String)> {
        self.state.lock().unwrap().signed.clone()
    }

    pub fn is_unlocked(&self, account: &Address) -> bool {
        self.state.lock().unwrap().unlocked.contains(account)
    }

    /// Sign without recording, for building fixtures from other accounts.
    pub fn forge(account: &Address, text: &str) -> Signature {
        let digest = digest(text);
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes[..DIGEST_LEN].copy_from_slice(&digest);
        for (i, b) in account.to_bytes().iter().enumerate() {
            bytes[DIGEST_LEN + i] = b ^ digest[i];
        }
        Signature::from_bytes(&bytes)
    }
}

#[async_trait]
impl Wallet for MockWallet {
    async fn accounts(&self) -> ChainResult<Vec<Address>> {
        Ok(self.state.lock().unwrap().accounts.clone())
    }

    async fn sign(&self, account: &Address, text: &str) -> ChainResult<Signature> {
        let mut state = self.state.lock().unwrap();
        if !state.accounts.contains(account) {
            return Err(ChainError::UnknownAccount(account.clone()));
        }
        state.signed.push((account.clone(), text.to_string()));
        Ok(Self::forge(account, text))
    }

    async fn recover_address(&self, text: &str, signature: &Signature) -> ChainResult<Address> {
        let bytes = signature.to_bytes()?;
        if bytes.len() != SIGNATURE_LEN {
            return Err(ChainError::InvalidSignature(format!(
                "expected {} bytes, got {}",
                SIGNATURE_LEN,
                bytes.len()
            )));
        }

        let digest = digest(text);
        if bytes[..DIGEST_LEN] != digest {
            return Err(ChainError::InvalidSignature(
                "signature does not cover this text".to_string(),
            ));
        }

        let mut address = [0u8; 20];
        for (i, slot) in address.iter_mut().enumerate() {
            *slot = bytes[DIGEST_LEN + i] ^ digest[i];
        }
        Ok(Address::from_bytes(address))
    }

    async fn unlock(&self, account: &Address, password: &str) -> ChainResult<bool> {
        let mut state = self.state.lock().unwrap();
        if !state.accounts.contains(account) {
            return Err(ChainError::UnknownAccount(account.clone()));
        }

        let ok = state
            .passwords
            .get(account)
            .map(|expected| expected == password)
            .unwrap_or(false);
        if ok {
            state.unlocked.push(account.clone());
        }
        Ok(ok)
    }

    async fn block_number(&self) -> ChainResult<u64> {
        Ok(self.block_number.load(Ordering::SeqCst))
    }
}
