//! Ethereum JSON-RPC Wallet
//!
//! Talks to an Ethereum node that holds the operator's keys (geth-style
//! `personal` namespace enabled). Signing uses `eth_sign`, which applies the
//! `"\x19Ethereum Signed Message:\n" + len` prefix; `personal_ecRecover`
//! undoes the same framing.

use super::traits::*;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default request timeout. Signing may block on an operator approval prompt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Wallet backed by an Ethereum node's JSON-RPC endpoint
#[derive(Clone)]
pub struct JsonRpcWallet {
    endpoint: String,
    client: Client,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcWallet {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> ChainResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ChainError::Network(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a JSON-RPC request and return its `result` member.
    async fn rpc_request(&self, method: &str, params: Value) -> ChainResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Network(format!("{} request failed: {}", method, e)))?;

        let status = resp.status();
        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(format!("{} (HTTP {}): {}", method, status, e)))?;

        parse_rpc_response(parsed)
    }
}

/// Extract `result` from a JSON-RPC response, mapping `error` objects.
fn parse_rpc_response(mut parsed: Value) -> ChainResult<Value> {
    if let Some(err) = parsed.get("error") {
        let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown")
            .to_string();
        return Err(ChainError::Rpc { code, message });
    }

    match parsed.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(ChainError::InvalidResponse(
            "response has neither result nor error".to_string(),
        )),
    }
}

fn as_str(value: &Value) -> ChainResult<&str> {
    value
        .as_str()
        .ok_or_else(|| ChainError::InvalidResponse(format!("expected string, got {}", value)))
}

/// Hex-encode UTF-8 text the way web3 clients pass `data` to `eth_sign`.
fn text_to_hex(text: &str) -> String {
    format!("0x{}", hex::encode(text.as_bytes()))
}

/// Parse a `0x`-prefixed hex quantity.
fn parse_quantity(raw: &str) -> ChainResult<u64> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::InvalidResponse(format!("invalid quantity: {}", raw)))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("invalid quantity {}: {}", raw, e)))
}

#[async_trait]
impl Wallet for JsonRpcWallet {
    async fn accounts(&self) -> ChainResult<Vec<Address>> {
        let result = self.rpc_request("eth_accounts", json!([])).await?;
        let list = result
            .as_array()
            .ok_or_else(|| ChainError::InvalidResponse("eth_accounts: expected array".into()))?;

        list.iter().map(|v| Address::parse(as_str(v)?)).collect()
    }

    async fn sign(&self, account: &Address, text: &str) -> ChainResult<Signature> {
        let result = self
            .rpc_request("eth_sign", json!([account.as_str(), text_to_hex(text)]))
            .await?;
        Signature::parse(as_str(&result)?)
    }

    async fn recover_address(&self, text: &str, signature: &Signature) -> ChainResult<Address> {
        let result = self
            .rpc_request(
                "personal_ecRecover",
                json!([text_to_hex(text), signature.as_str()]),
            )
            .await?;
        Address::parse(as_str(&result)?)
    }

    async fn unlock(&self, account: &Address, password: &str) -> ChainResult<bool> {
        let result = self
            .rpc_request(
                "personal_unlockAccount",
                json!([account.as_str(), password, Value::Null]),
            )
            .await?;
        result
            .as_bool()
            .ok_or_else(|| ChainError::InvalidResponse(format!("expected bool, got {}", result)))
    }

    async fn block_number(&self) -> ChainResult<u64> {
        let result = self.rpc_request("eth_blockNumber", json!([])).await?;
        parse_quantity(as_str(&result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_to_hex() {
        assert_eq!(text_to_hex("password"), "0x70617373776f7264");
        assert_eq!(text_to_hex(""), "0x");
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x4b7").unwrap(), 1207);
        assert!(parse_quantity("1207").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_parse_rpc_result() {
        let value = parse_rpc_response(json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"})).unwrap();
        assert_eq!(value, json!("0x10"));
    }

    #[test]
    fn test_parse_rpc_error() {
        let err = parse_rpc_response(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "authentication needed: password or unlock"}
        }))
        .unwrap_err();

        assert_eq!(
            err,
            ChainError::Rpc {
                code: -32000,
                message: "authentication needed: password or unlock".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rpc_missing_result() {
        let err = parse_rpc_response(json!({"jsonrpc": "2.0", "id": 1})).unwrap_err();
        assert!(matches!(err, ChainError::InvalidResponse(_)));
    }
}
