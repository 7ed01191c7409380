//! Blockchain Wallet Integration Module
//!
//! Account listing, signing, signer recovery, unlock and block height, behind
//! the `Wallet` trait so the bridge core can run against `MockWallet`.

pub mod mock;
pub mod rpc;
pub mod traits;

pub use mock::MockWallet;
pub use rpc::JsonRpcWallet;
pub use traits::{Address, ChainError, ChainResult, Signature, Wallet};
