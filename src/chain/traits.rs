//! Blockchain Wallet Trait Abstractions
//!
//! The bridge never touches key material. Signing and signer recovery are
//! delegated to a wallet (an Ethereum node in production, `MockWallet` in tests).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ethereum account address, normalized to lowercase `0x` + 40 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse an address, accepting any hex case.
    pub fn parse(raw: &str) -> ChainResult<Self> {
        let raw = raw.trim();
        let digits = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .ok_or_else(|| ChainError::InvalidAddress(raw.to_string()))?;

        if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChainError::InvalidAddress(raw.to_string()));
        }

        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw 20 address bytes.
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut bytes = [0u8; 20];
        // Validated in parse()
        if let Ok(decoded) = hex::decode(&self.0[2..]) {
            bytes.copy_from_slice(&decoded);
        }
        bytes
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = ChainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// Hex-encoded signature as returned by `eth_sign` (`0x`-prefixed).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    /// Parse a `0x`-prefixed hex signature.
    pub fn parse(raw: &str) -> ChainResult<Self> {
        let digits = raw
            .strip_prefix("0x")
            .ok_or_else(|| ChainError::InvalidSignature(raw.to_string()))?;

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChainError::InvalidSignature(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> ChainResult<Vec<u8>> {
        hex::decode(&self.0[2..]).map_err(|e| ChainError::InvalidSignature(e.to_string()))
    }

    /// Last `n` characters of the hex rendering.
    pub fn tail(&self, n: usize) -> &str {
        let start = self.0.len().saturating_sub(n);
        &self.0[start..]
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result type for wallet operations
pub type ChainResult<T> = Result<T, ChainError>;

/// Wallet errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(Address),
}

/// Blockchain signing service
///
/// `sign` and `recover_address` must agree on message framing: whatever the
/// wallet does to `text` before signing, recovery undoes for the same `text`.
#[async_trait]
pub trait Wallet: Clone + Send + Sync + 'static {
    /// Accounts the wallet can sign for
    async fn accounts(&self) -> ChainResult<Vec<Address>>;

    /// Sign `text` with the key of `account`
    async fn sign(&self, account: &Address, text: &str) -> ChainResult<Signature>;

    /// Recover the address that produced `signature` over `text`
    async fn recover_address(&self, text: &str, signature: &Signature) -> ChainResult<Address>;

    /// Unlock `account` for signing without per-request approval
    async fn unlock(&self, account: &Address, password: &str) -> ChainResult<bool>;

    /// Current block number
    async fn block_number(&self) -> ChainResult<u64>;
}
