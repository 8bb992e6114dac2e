//! DexScreener market-data feed.
//!
//! Discovery uses the latest token boosts; pair statistics come from the
//! tokens endpoint, which accepts up to 30 comma-separated addresses. For
//! each token the deepest pool on the requested chain is used.
//!
//! API docs: https://docs.dexscreener.com/api/reference
//! Rate limit: 60 req/min (boosts), 300 req/min (tokens)
//! Auth: none

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{parse_num, split_volume, MarketDataProvider};
use crate::types::RawCandidate;

const BASE_URL: &str = "https://api.dexscreener.com";
const PROVIDER_NAME: &str = "dexscreener";

/// Max addresses per `/tokens/v1` call.
const TOKENS_PER_REQUEST: usize = 30;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Boost {
    chain_id: String,
    token_address: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Pair {
    #[serde(default)]
    chain_id: String,
    base_token: PairToken,
    #[serde(default)]
    price_usd: serde_json::Value,
    #[serde(default)]
    txns: HashMap<String, TxnCounts>,
    #[serde(default)]
    volume: HashMap<String, serde_json::Value>,
    #[serde(default)]
    price_change: HashMap<String, serde_json::Value>,
    #[serde(default)]
    liquidity: Option<PairLiquidity>,
    #[serde(default)]
    info: Option<PairInfo>,
}

#[derive(Debug, Deserialize, Default)]
struct PairToken {
    address: String,
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
struct TxnCounts {
    #[serde(default)]
    buys: u64,
    #[serde(default)]
    sells: u64,
}

#[derive(Debug, Deserialize, Default)]
struct PairLiquidity {
    #[serde(default)]
    usd: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct PairInfo {
    #[serde(default)]
    websites: Vec<serde_json::Value>,
    #[serde(default)]
    socials: Vec<serde_json::Value>,
}

impl Pair {
    fn liquidity_usd(&self) -> f64 {
        self.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0)
    }

    fn to_raw(&self) -> RawCandidate {
        let volume_24h = self.volume.get("h24").and_then(parse_num);
        let day = self.txns.get("h24").copied();
        let (buy, sell) = split_volume(volume_24h, day.map(|t| t.buys), day.map(|t| t.sells));
        let verified = self
            .info
            .as_ref()
            .map(|i| !i.websites.is_empty() || !i.socials.is_empty())
            .unwrap_or(false);

        RawCandidate {
            asset_id: self.base_token.address.clone(),
            symbol: self.base_token.symbol.clone(),
            chain: self.chain_id.clone(),
            price: parse_num(&self.price_usd),
            change_24h: self.price_change.get("h24").and_then(parse_num),
            change_1h: self.price_change.get("h1").and_then(parse_num),
            change_5m: self.price_change.get("m5").and_then(parse_num),
            volume_24h,
            liquidity: self.liquidity.as_ref().and_then(|l| l.usd),
            buy_volume_24h: buy,
            sell_volume_24h: sell,
            holders: None,
            verified,
            source: PROVIDER_NAME.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct DexScreenerClient {
    http: Client,
    base_url: String,
}

impl DexScreenerClient {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("TIDEWATCH/0.1.0 (trading-agent)")
            .build()
            .context("Failed to build HTTP client for DexScreener")?;
        Ok(Self {
            http,
            base_url: BASE_URL.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "Fetching DexScreener");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("DexScreener request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("DexScreener API error {status}: {body}");
        }

        resp.json().await.context("Failed to parse DexScreener response")
    }

    async fn boosted_tokens(&self, chain: &str) -> Result<Vec<String>> {
        let boosts: Vec<Boost> = self
            .get_json(&format!("{}/token-boosts/latest/v1", self.base_url))
            .await?;
        let mut seen = std::collections::HashSet::new();
        Ok(boosts
            .into_iter()
            .filter(|b| b.chain_id.eq_ignore_ascii_case(chain))
            .filter(|b| seen.insert(b.token_address.to_lowercase()))
            .map(|b| b.token_address)
            .collect())
    }

    async fn pairs_for(&self, chain: &str, addresses: &[String]) -> Result<Vec<Pair>> {
        let mut pairs = Vec::new();
        for chunk in addresses.chunks(TOKENS_PER_REQUEST) {
            let url = format!(
                "{}/tokens/v1/{}/{}",
                self.base_url,
                urlencoding::encode(chain),
                chunk.join(",")
            );
            let batch: Vec<Pair> = self.get_json(&url).await?;
            pairs.extend(batch);
        }
        Ok(pairs)
    }
}

/// Keep the deepest pool per base token on `chain`.
fn deepest_pools(chain: &str, pairs: Vec<Pair>) -> Vec<Pair> {
    let mut best: HashMap<String, Pair> = HashMap::new();
    for pair in pairs {
        if !pair.chain_id.eq_ignore_ascii_case(chain) {
            continue;
        }
        let key = pair.base_token.address.to_lowercase();
        match best.get(&key) {
            Some(existing) if existing.liquidity_usd() >= pair.liquidity_usd() => {}
            _ => {
                best.insert(key, pair);
            }
        }
    }
    best.into_values().collect()
}

#[async_trait]
impl MarketDataProvider for DexScreenerClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch_candidates(&self, chain: &str) -> Result<Vec<RawCandidate>> {
        let tokens = self.boosted_tokens(chain).await?;
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let pairs = self.pairs_for(chain, &tokens).await?;
        let candidates: Vec<RawCandidate> = deepest_pools(chain, pairs).iter().map(Pair::to_raw).collect();
        info!(chain, total = candidates.len(), "DexScreener scan complete");
        Ok(candidates)
    }

    async fn fetch_price(&self, chain: &str, asset_id: &str) -> Result<Option<f64>> {
        let prices = self.fetch_prices(chain, &[asset_id.to_string()]).await?;
        Ok(prices.get(asset_id).copied())
    }

    async fn fetch_prices(&self, chain: &str, asset_ids: &[String]) -> Result<HashMap<String, f64>> {
        if asset_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let pairs = self.pairs_for(chain, asset_ids).await?;
        let by_lower: HashMap<String, f64> = deepest_pools(chain, pairs)
            .iter()
            .filter_map(|p| Some((p.base_token.address.to_lowercase(), parse_num(&p.price_usd)?)))
            .collect();
        Ok(asset_ids
            .iter()
            .filter_map(|id| Some((id.clone(), *by_lower.get(&id.to_lowercase())?)))
            .filter(|(_, p)| *p > 0.0)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const PAIRS_JSON: &str = r#"[
        {
            "chainId": "base",
            "dexId": "uniswap",
            "pairAddress": "0xpool1",
            "baseToken": {"address": "0xAAA", "name": "Alpha", "symbol": "ALPHA"},
            "priceUsd": "0.0042",
            "txns": {"h24": {"buys": 300, "sells": 100}, "h1": {"buys": 20, "sells": 10}},
            "volume": {"h24": 120000, "h1": 8000},
            "priceChange": {"m5": 0.8, "h1": 4.2, "h24": 35.5},
            "liquidity": {"usd": 60000, "base": 1, "quote": 2},
            "info": {"websites": [{"url": "https://alpha.xyz"}], "socials": []}
        },
        {
            "chainId": "base",
            "pairAddress": "0xpool2",
            "baseToken": {"address": "0xaaa", "symbol": "ALPHA"},
            "priceUsd": "0.0041",
            "liquidity": {"usd": 1000}
        },
        {
            "chainId": "solana",
            "pairAddress": "pool3",
            "baseToken": {"address": "So1"},
            "priceUsd": "1.0"
        }
    ]"#;

    #[test]
    fn test_deepest_pool_per_token_on_chain() {
        let pairs: Vec<Pair> = serde_json::from_str(PAIRS_JSON).unwrap();
        let best = deepest_pools("base", pairs);
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].liquidity_usd(), 60_000.0);
    }

    #[test]
    fn test_pair_to_raw_candidate() {
        let pairs: Vec<Pair> = serde_json::from_str(PAIRS_JSON).unwrap();
        let raw = pairs[0].to_raw();
        assert_eq!(raw.asset_id, "0xAAA");
        assert_eq!(raw.symbol.as_deref(), Some("ALPHA"));
        assert_eq!(raw.price, Some(0.0042));
        assert_eq!(raw.change_1h, Some(4.2));
        assert_eq!(raw.volume_24h, Some(120_000.0));
        assert_eq!(raw.buy_volume_24h, Some(90_000.0));
        assert_eq!(raw.liquidity, Some(60_000.0));
        assert!(raw.verified);
        assert_eq!(raw.holders, None);
        assert_eq!(raw.source, "dexscreener");
    }

    #[test]
    fn test_sparse_pair_tolerated() {
        let pairs: Vec<Pair> = serde_json::from_str(PAIRS_JSON).unwrap();
        let raw = pairs[2].to_raw();
        assert_eq!(raw.price, Some(1.0));
        assert_eq!(raw.volume_24h, None);
        assert_eq!(raw.buy_volume_24h, None);
        assert!(!raw.verified);
    }

    #[test]
    fn test_boosts_parse() {
        let json = r#"[{"url":"x","chainId":"base","tokenAddress":"0x1","amount":10,"totalAmount":10}]"#;
        let boosts: Vec<Boost> = serde_json::from_str(json).unwrap();
        assert_eq!(boosts[0].chain_id, "base");
        assert_eq!(boosts[0].token_address, "0x1");
    }
}
