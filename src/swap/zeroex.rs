//! 0x swap API client (allowance-holder flow).
//!
//! API docs: https://0x.org/docs/api
//! Auth: `0x-api-key` header

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::{QuoteRequest, SwapProvider, SwapQuote};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    #[serde(default = "yes")]
    liquidity_available: bool,
    #[serde(default)]
    buy_amount: Option<String>,
    #[serde(default)]
    sell_amount: Option<String>,
    #[serde(default)]
    transaction: Option<QuoteTx>,
    #[serde(default)]
    issues: Option<QuoteIssues>,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteTx {
    to: String,
    data: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    gas: Option<String>,
    #[serde(default)]
    gas_price: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct QuoteIssues {
    #[serde(default)]
    allowance: Option<AllowanceIssue>,
}

#[derive(Debug, Deserialize)]
struct AllowanceIssue {
    spender: String,
}

fn dec_u256(field: &str, value: Option<&str>) -> Result<Option<U256>> {
    value
        .map(|v| U256::from_dec_str(v).map_err(|e| anyhow::anyhow!("bad {field} {v}: {e:?}")))
        .transpose()
}

fn into_quote(resp: QuoteResponse) -> Result<SwapQuote> {
    if !resp.liquidity_available {
        anyhow::bail!("0x reports no liquidity for this pair");
    }
    let tx = resp.transaction.context("0x quote carries no transaction")?;
    let data = hex::decode(tx.data.trim_start_matches("0x")).context("0x quote calldata is not hex")?;
    let allowance_spender = resp
        .issues
        .and_then(|i| i.allowance)
        .map(|a| a.spender.parse::<Address>())
        .transpose()
        .context("0x allowance spender is not an address")?;

    Ok(SwapQuote {
        to: tx.to.parse().context("0x quote target is not an address")?,
        data: Bytes::from(data),
        value: dec_u256("value", tx.value.as_deref())?.unwrap_or_default(),
        gas: dec_u256("gas", tx.gas.as_deref())?,
        gas_price: dec_u256("gasPrice", tx.gas_price.as_deref())?,
        sell_amount: dec_u256("sellAmount", resp.sell_amount.as_deref())?.context("0x quote has no sellAmount")?,
        buy_amount: dec_u256("buyAmount", resp.buy_amount.as_deref())?.context("0x quote has no buyAmount")?,
        allowance_spender,
    })
}

pub struct ZeroExClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl ZeroExClient {
    pub fn new(base_url: &str, api_key: Option<SecretString>, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("TIDEWATCH/0.1.0 (trading-agent)")
            .build()
            .context("Failed to build HTTP client for 0x")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl SwapProvider for ZeroExClient {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote> {
        let url = format!(
            "{}/swap/allowance-holder/quote?chainId={}&sellToken={:?}&buyToken={:?}&sellAmount={}&taker={:?}&slippageBps={}",
            self.base_url,
            request.chain_id,
            request.sell_token,
            request.buy_token,
            request.sell_amount,
            request.taker,
            request.slippage_bps,
        );
        debug!(url = %url, "Requesting 0x quote");

        let mut req = self.http.get(&url).header("0x-version", "v2");
        if let Some(key) = &self.api_key {
            req = req.header("0x-api-key", key.expose_secret());
        }
        let resp = req.send().await.context("0x quote request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("0x API error {status}: {body}");
        }

        let parsed: QuoteResponse = resp.json().await.context("Failed to parse 0x quote")?;
        into_quote(parsed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
