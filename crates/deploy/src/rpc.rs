//! Shared RPC utilities for interacting with Ethereum JSON-RPC endpoints.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;

/// Timeout for a single RPC request.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from a single JSON-RPC call.
///
/// Transport errors (endpoint unreachable, malformed response) are
/// distinguished from node errors (the endpoint answered with an `error`
/// object) because some node errors are recoverable, e.g. a resubmitted
/// transaction the node already knows about.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("{method}: {message}")]
    Transport { method: &'static str, message: String },

    #[error("{method}: node returned error: {message}")]
    Node { method: &'static str, message: String },
}

impl RpcError {
    pub fn message(&self) -> &str {
        match self {
            RpcError::Transport { message, .. } | RpcError::Node { message, .. } => message,
        }
    }

    pub fn is_node_error(&self) -> bool {
        matches!(self, RpcError::Node { .. })
    }
}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, RpcError> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| RpcError::Transport {
            method: "client",
            message: e.to_string(),
        })
}

/// Make a JSON-RPC call and deserialize the result.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &'static str,
    params: Vec<Value>,
) -> Result<T, RpcError> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| RpcError::Transport {
            method,
            message: format!("failed to send request: {e}"),
        })?;

    let body: Value = response.json().await.map_err(|e| RpcError::Transport {
        method,
        message: format!("failed to parse response: {e}"),
    })?;

    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown")
            .to_string();
        return Err(RpcError::Node { method, message });
    }

    let result = body
        .get("result")
        .cloned()
        .ok_or_else(|| RpcError::Transport {
            method,
            message: "no result in response".to_string(),
        })?;

    serde_json::from_value(result).map_err(|e| RpcError::Transport {
        method,
        message: format!("failed to deserialize result: {e}"),
    })
}

/// Deserialize a `0x`-prefixed hex quantity into a u64.
pub fn u64_from_hex<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom)
}

/// Deserialize an optional `0x`-prefixed hex quantity.
pub fn opt_u64_from_hex<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    s.map(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom))
        .transpose()
}

/// Format a u64 as a `0x`-prefixed hex quantity.
pub fn to_hex(value: u64) -> String {
    format!("0x{value:x}")
}

/// The block fields the preflight checks care about.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(deserialize_with = "u64_from_hex")]
    pub number: u64,
    #[serde(deserialize_with = "u64_from_hex")]
    pub gas_limit: u64,
}

/// A transaction receipt, as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: B256,
    pub contract_address: Option<Address>,
    #[serde(deserialize_with = "u64_from_hex")]
    pub gas_used: u64,
    #[serde(default, deserialize_with = "opt_u64_from_hex")]
    pub status: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64_from_hex")]
    pub block_number: Option<u64>,
}

impl TxReceipt {
    /// Post-Byzantium success flag. A missing status field counts as failure.
    pub fn succeeded(&self) -> bool {
        self.status == Some(1)
    }
}

/// The transaction fields needed to cross-check a receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct TxLookup {
    #[serde(deserialize_with = "u64_from_hex")]
    pub gas: u64,
}

pub async fn chain_id(client: &reqwest::Client, url: &str) -> Result<u64, RpcError> {
    let hex: String = json_rpc_call(client, url, "eth_chainId", vec![]).await?;
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|e| RpcError::Transport {
        method: "eth_chainId",
        message: format!("invalid chain id {hex:?}: {e}"),
    })
}

pub async fn block_number(client: &reqwest::Client, url: &str) -> Result<u64, RpcError> {
    let hex: String = json_rpc_call(client, url, "eth_blockNumber", vec![]).await?;
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|e| RpcError::Transport {
        method: "eth_blockNumber",
        message: format!("invalid block number {hex:?}: {e}"),
    })
}

pub async fn latest_block(client: &reqwest::Client, url: &str) -> Result<Block, RpcError> {
    json_rpc_call(
        client,
        url,
        "eth_getBlockByNumber",
        vec![Value::from("latest"), Value::from(false)],
    )
    .await
}

/// Pending transaction count for an address, i.e. the next usable nonce.
pub async fn transaction_count(
    client: &reqwest::Client,
    url: &str,
    address: Address,
) -> Result<u64, RpcError> {
    let hex: String = json_rpc_call(
        client,
        url,
        "eth_getTransactionCount",
        vec![Value::from(format!("{address:?}")), Value::from("pending")],
    )
    .await?;
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|e| RpcError::Transport {
        method: "eth_getTransactionCount",
        message: format!("invalid count {hex:?}: {e}"),
    })
}

pub async fn send_raw_transaction(
    client: &reqwest::Client,
    url: &str,
    raw: &Bytes,
) -> Result<B256, RpcError> {
    json_rpc_call(
        client,
        url,
        "eth_sendRawTransaction",
        vec![Value::from(format!("{raw}"))],
    )
    .await
}

pub async fn transaction_receipt(
    client: &reqwest::Client,
    url: &str,
    hash: B256,
) -> Result<Option<TxReceipt>, RpcError> {
    json_rpc_call(
        client,
        url,
        "eth_getTransactionReceipt",
        vec![Value::from(format!("{hash}"))],
    )
    .await
}

pub async fn transaction_by_hash(
    client: &reqwest::Client,
    url: &str,
    hash: B256,
) -> Result<Option<TxLookup>, RpcError> {
    json_rpc_call(
        client,
        url,
        "eth_getTransactionByHash",
        vec![Value::from(format!("{hash}"))],
    )
    .await
}

pub async fn estimate_gas(
    client: &reqwest::Client,
    url: &str,
    from: Address,
    to: Option<Address>,
    data: &Bytes,
    value: U256,
) -> Result<u64, RpcError> {
    let mut call = serde_json::json!({
        "from": format!("{from:?}"),
        "data": format!("{data}"),
        "value": format!("0x{value:x}"),
    });
    if let Some(to) = to {
        call["to"] = Value::from(format!("{to:?}"));
    }
    let hex: String = json_rpc_call(client, url, "eth_estimateGas", vec![call]).await?;
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|e| RpcError::Transport {
        method: "eth_estimateGas",
        message: format!("invalid estimate {hex:?}: {e}"),
    })
}

/// Read-only contract call against the latest block.
pub async fn eth_call(
    client: &reqwest::Client,
    url: &str,
    to: Address,
    data: &Bytes,
) -> Result<Bytes, RpcError> {
    json_rpc_call(
        client,
        url,
        "eth_call",
        vec![
            serde_json::json!({
                "to": format!("{to:?}"),
                "data": format!("{data}"),
            }),
            Value::from("latest"),
        ],
    )
    .await
}

pub async fn get_code(
    client: &reqwest::Client,
    url: &str,
    address: Address,
) -> Result<Bytes, RpcError> {
    json_rpc_call(
        client,
        url,
        "eth_getCode",
        vec![Value::from(format!("{address:?}")), Value::from("latest")],
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_block() {
        let block: Block = serde_json::from_value(serde_json::json!({
            "number": "0x10",
            "gasLimit": "0x6691b7",
            "hash": "0x0000000000000000000000000000000000000000000000000000000000000000",
        }))
        .unwrap();
        assert_eq!(block.number, 16);
        assert_eq!(block.gas_limit, 0x6691b7);
    }

    #[test]
    fn deserializes_receipt() {
        let receipt: TxReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "contractAddress": "0x2222222222222222222222222222222222222222",
            "gasUsed": "0x5208",
            "status": "0x1",
            "blockNumber": "0x2a",
        }))
        .unwrap();
        assert!(receipt.succeeded());
        assert_eq!(receipt.gas_used, 21000);
        assert_eq!(receipt.block_number, Some(42));
        assert!(receipt.contract_address.is_some());
    }

    #[test]
    fn failed_receipt_status() {
        let receipt: TxReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "contractAddress": null,
            "gasUsed": "0x5208",
            "status": "0x0",
        }))
        .unwrap();
        assert!(!receipt.succeeded());
    }

    #[test]
    fn missing_status_counts_as_failure() {
        let receipt: TxReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "contractAddress": null,
            "gasUsed": "0x5208",
        }))
        .unwrap();
        assert!(!receipt.succeeded());
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(to_hex(0), "0x0");
        assert_eq!(to_hex(21000), "0x5208");
    }
}
