//! Minimal EVM JSON-RPC client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::{parse_hex_u256, ChainClient};

/// `decimals()` selector.
const DECIMALS_CALL: &str = "0x313ce567";
/// `balanceOf(address)` selector.
const BALANCE_OF_SELECTOR: &str = "70a08231";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Receipt {
    #[serde(default)]
    status: Option<String>,
}

pub struct JsonRpcClient {
    http: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("TIDEWATCH/0.1.0 (trading-agent)")
            .build()
            .context("Failed to build HTTP client for RPC")?;
        Ok(Self {
            http,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Issue one call and return its `result`, which may be `null`.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "RPC call");
        let resp = self
            .http
            .post(&self.url)
            .json(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .send()
            .await
            .with_context(|| format!("RPC {method} request failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("RPC {method} HTTP error {status}: {body}");
        }

        let body: RpcResponse = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse RPC {method} response"))?;
        if let Some(err) = body.error {
            anyhow::bail!("RPC {method} error {}: {}", err.code, err.message);
        }
        Ok(body.result)
    }

    async fn call_quantity(&self, method: &str, params: Value) -> Result<U256> {
        let result = self.call(method, params).await?;
        let text = result
            .as_str()
            .with_context(|| format!("RPC {method} returned a non-string result"))?;
        parse_hex_u256(text)
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn nonce(&self, address: Address) -> Result<U256> {
        self.call_quantity("eth_getTransactionCount", json!([format!("{address:?}"), "pending"]))
            .await
    }

    async fn gas_price(&self) -> Result<U256> {
        self.call_quantity("eth_gasPrice", json!([])).await
    }

    async fn decimals(&self, token: Address) -> Result<u8> {
        let raw = self
            .call_quantity(
                "eth_call",
                json!([{"to": format!("{token:?}"), "data": DECIMALS_CALL}, "latest"]),
            )
            .await?;
        if raw > U256::from(u8::MAX) {
            anyhow::bail!("token {token:?} reported implausible decimals {raw}");
        }
        Ok(raw.as_u32() as u8)
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        let data = format!("0x{BALANCE_OF_SELECTOR}{:0>64}", hex::encode(owner.as_bytes()));
        self.call_quantity(
            "eth_call",
            json!([{"to": format!("{token:?}"), "data": data}, "latest"]),
        )
        .await
    }

    async fn send_raw(&self, signed: Bytes) -> Result<String> {
        let result = self
            .call("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(&signed))]))
            .await?;
        let hash = result
            .as_str()
            .context("eth_sendRawTransaction returned no hash")?
            .to_string();
        info!(tx_hash = %hash, "Transaction broadcast");
        Ok(hash)
    }

    async fn receipt_status(&self, tx_hash: &str) -> Result<Option<bool>> {
        let result = self.call("eth_getTransactionReceipt", json!([tx_hash])).await?;
        parse_receipt_status(result)
    }
}

fn parse_receipt_status(result: Value) -> Result<Option<bool>> {
    if result.is_null() {
        return Ok(None);
    }
    let receipt: Receipt = serde_json::from_value(result).context("Malformed transaction receipt")?;
    match receipt.status.as_deref() {
        Some(status) => Ok(Some(!parse_hex_u256(status)?.is_zero())),
        None => Ok(Some(true)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
