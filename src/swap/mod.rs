//! On-chain swap plumbing for live execution.
//!
//! Two seams: `SwapProvider` turns "sell X of token A for token B" into a
//! signable transaction (an aggregator quote), and `ChainClient` covers the
//! node side: nonce, gas price, token decimals, broadcast and receipts.
//! Signing happens in the executor, never here.

pub mod rpc;
pub mod zeroex;

pub use rpc::JsonRpcClient;
pub use zeroex::ZeroExClient;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use std::time::Duration;
use tracing::debug;

/// Parameters of a swap quote. Amounts are in raw token units.
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub chain_id: u64,
    pub sell_token: Address,
    pub buy_token: Address,
    pub sell_amount: U256,
    pub taker: Address,
    pub slippage_bps: u32,
}

/// A quoted swap, ready to be signed by the taker.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapQuote {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas: Option<U256>,
    pub gas_price: Option<U256>,
    pub sell_amount: U256,
    pub buy_amount: U256,
    /// Set when the taker must first approve this spender for the sell token.
    pub allowance_spender: Option<Address>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapProvider: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Next nonce for `address`, pending transactions included.
    async fn nonce(&self, address: Address) -> Result<U256>;

    async fn gas_price(&self) -> Result<U256>;

    /// ERC-20 `decimals()` of `token`.
    async fn decimals(&self, token: Address) -> Result<u8>;

    /// ERC-20 `balanceOf(owner)` of `token`, in raw units.
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256>;

    /// Broadcast a signed raw transaction. Returns the transaction hash.
    async fn send_raw(&self, signed: Bytes) -> Result<String>;

    /// `Some(true)` once mined successfully, `Some(false)` if reverted,
    /// `None` while pending.
    async fn receipt_status(&self, tx_hash: &str) -> Result<Option<bool>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed,
    Reverted,
    TimedOut,
}

/// Poll for a receipt until mined or `timeout` elapses. RPC errors while
/// polling are retried; only the timeout ends the wait.
pub async fn wait_for_receipt(
    chain: &dyn ChainClient,
    tx_hash: &str,
    timeout: Duration,
    poll: Duration,
) -> TxOutcome {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match chain.receipt_status(tx_hash).await {
            Ok(Some(true)) => return TxOutcome::Confirmed,
            Ok(Some(false)) => return TxOutcome::Reverted,
            Ok(None) => {}
            Err(e) => debug!(tx_hash, error = %e, "Receipt poll failed"),
        }
        if tokio::time::Instant::now() + poll > deadline {
            return TxOutcome::TimedOut;
        }
        tokio::time::sleep(poll).await;
    }
}

// ---------------------------------------------------------------------------
// Unit conversion and calldata helpers
// ---------------------------------------------------------------------------

/// Significant decimal digits carried through an f64 → raw conversion.
const FLOAT_DIGITS: u8 = 15;

/// Convert a human amount to raw units, rounding down so the result never
/// exceeds what the holder has.
pub fn to_raw_units(amount: f64, decimals: u8) -> Result<U256> {
    if !amount.is_finite() || amount < 0.0 {
        bail!("invalid token amount {amount}");
    }
    let carried = decimals.min(FLOAT_DIGITS);
    let scaled = (amount * 10f64.powi(carried as i32)).floor();
    if scaled >= u128::MAX as f64 {
        bail!("token amount {amount} out of range");
    }
    Ok(U256::from(scaled as u128) * U256::exp10((decimals - carried) as usize))
}

/// Convert raw units to a human amount.
pub fn from_raw_units(raw: U256, decimals: u8) -> Result<f64> {
    let text = ethers::utils::format_units(raw, decimals as u32)
        .context("Failed to format token amount")?;
    text.parse::<f64>().context("Failed to parse token amount")
}

/// Parse a `0x`-prefixed hex quantity as returned by JSON-RPC.
pub fn parse_hex_u256(value: &str) -> Result<U256> {
    let digits = value.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16).map_err(|e| anyhow::anyhow!("bad hex quantity {value}: {e:?}"))
}

/// ERC-20 `approve(spender, amount)` calldata.
pub fn approve_calldata(spender: Address, amount: U256) -> Bytes {
    const SELECTOR: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];
    let mut data = SELECTOR.to_vec();
    data.extend(ethers::abi::encode(&[
        ethers::abi::Token::Address(spender),
        ethers::abi::Token::Uint(amount),
    ]));
    Bytes::from(data)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
