//! GeckoTerminal market-data feed.
//!
//! Discovery uses the trending pools endpoint with the base token
//! included; prices come from the simple token-price endpoint.
//!
//! API docs: https://www.geckoterminal.com/dex-api
//! Rate limit: 30 calls/minute (public)
//! Auth: none

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{parse_num, split_volume, MarketDataProvider};
use crate::types::RawCandidate;

const BASE_URL: &str = "https://api.geckoterminal.com/api/v2";
const PROVIDER_NAME: &str = "geckoterminal";

/// Max addresses per simple price call.
const PRICES_PER_REQUEST: usize = 30;

/// GeckoTerminal network ids differ from the chain names used elsewhere.
pub fn network_id(chain: &str) -> &str {
    match chain {
        "ethereum" => "eth",
        "arbitrum" => "arbitrum",
        "polygon" => "polygon_pos",
        "avalanche" => "avax",
        other => other,
    }
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PoolsResponse {
    #[serde(default)]
    data: Vec<Pool>,
    #[serde(default)]
    included: Vec<IncludedToken>,
}

#[derive(Debug, Deserialize)]
struct Pool {
    attributes: PoolAttributes,
    #[serde(default)]
    relationships: Option<PoolRelationships>,
}

#[derive(Debug, Deserialize, Default)]
struct PoolAttributes {
    #[serde(default)]
    base_token_price_usd: serde_json::Value,
    #[serde(default)]
    reserve_in_usd: serde_json::Value,
    #[serde(default)]
    price_change_percentage: HashMap<String, serde_json::Value>,
    #[serde(default)]
    volume_usd: HashMap<String, serde_json::Value>,
    #[serde(default)]
    transactions: HashMap<String, GeckoTxns>,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
struct GeckoTxns {
    #[serde(default)]
    buys: Option<u64>,
    #[serde(default)]
    sells: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PoolRelationships {
    base_token: Relationship,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    data: RelationshipData,
}

#[derive(Debug, Deserialize)]
struct RelationshipData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IncludedToken {
    id: String,
    #[serde(default)]
    attributes: TokenAttributes,
}

#[derive(Debug, Deserialize, Default)]
struct TokenAttributes {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    data: PriceData,
}

#[derive(Debug, Deserialize)]
struct PriceData {
    attributes: PriceAttributes,
}

#[derive(Debug, Deserialize)]
struct PriceAttributes {
    #[serde(default)]
    token_prices: HashMap<String, serde_json::Value>,
}

/// Relationship ids look like `base_0xabc…`; the address follows the
/// first underscore.
fn address_from_id(id: &str) -> &str {
    id.split_once('_').map(|(_, addr)| addr).unwrap_or(id)
}

fn to_raw_candidates(chain: &str, resp: PoolsResponse) -> Vec<RawCandidate> {
    let tokens: HashMap<&str, &TokenAttributes> =
        resp.included.iter().map(|t| (t.id.as_str(), &t.attributes)).collect();

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for pool in &resp.data {
        let Some(rel) = &pool.relationships else { continue };
        let token_id = rel.base_token.data.id.as_str();
        let token = tokens.get(token_id);
        let address = token
            .and_then(|t| t.address.clone())
            .unwrap_or_else(|| address_from_id(token_id).to_string());
        if !seen.insert(address.to_lowercase()) {
            continue;
        }

        let a = &pool.attributes;
        let volume_24h = a.volume_usd.get("h24").and_then(parse_num);
        let day = a.transactions.get("h24").copied().unwrap_or_default();
        let (buy, sell) = split_volume(volume_24h, day.buys, day.sells);

        out.push(RawCandidate {
            asset_id: address,
            symbol: token.and_then(|t| t.symbol.clone()),
            chain: chain.to_string(),
            price: parse_num(&a.base_token_price_usd),
            change_24h: a.price_change_percentage.get("h24").and_then(parse_num),
            change_1h: a.price_change_percentage.get("h1").and_then(parse_num),
            change_5m: a.price_change_percentage.get("m5").and_then(parse_num),
            volume_24h,
            liquidity: parse_num(&a.reserve_in_usd),
            buy_volume_24h: buy,
            sell_volume_24h: sell,
            holders: None,
            verified: false,
            source: PROVIDER_NAME.to_string(),
        });
    }
    out
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GeckoTerminalClient {
    http: Client,
}

impl GeckoTerminalClient {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("TIDEWATCH/0.1.0 (trading-agent)")
            .build()
            .context("Failed to build HTTP client for GeckoTerminal")?;
        Ok(Self { http })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "Fetching GeckoTerminal");
        let resp = self
            .http
            .get(url)
            .header("Accept", "application/json;version=20230302")
            .send()
            .await
            .context("GeckoTerminal request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GeckoTerminal API error {status}: {body}");
        }

        resp.json().await.context("Failed to parse GeckoTerminal response")
    }
}

#[async_trait]
impl MarketDataProvider for GeckoTerminalClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch_candidates(&self, chain: &str) -> Result<Vec<RawCandidate>> {
        let url = format!(
            "{BASE_URL}/networks/{}/trending_pools?include=base_token",
            urlencoding::encode(network_id(chain))
        );
        let resp: PoolsResponse = self.get_json(&url).await?;
        let candidates = to_raw_candidates(chain, resp);
        info!(chain, total = candidates.len(), "GeckoTerminal scan complete");
        Ok(candidates)
    }

    async fn fetch_price(&self, chain: &str, asset_id: &str) -> Result<Option<f64>> {
        let prices = self.fetch_prices(chain, &[asset_id.to_string()]).await?;
        Ok(prices.get(asset_id).copied())
    }

    async fn fetch_prices(&self, chain: &str, asset_ids: &[String]) -> Result<HashMap<String, f64>> {
        let mut out = HashMap::new();
        for chunk in asset_ids.chunks(PRICES_PER_REQUEST) {
            let url = format!(
                "{BASE_URL}/simple/networks/{}/token_price/{}",
                urlencoding::encode(network_id(chain)),
                chunk.join(",")
            );
            let resp: PriceResponse = self.get_json(&url).await?;
            let by_lower: HashMap<String, f64> = resp
                .data
                .attributes
                .token_prices
                .iter()
                .filter_map(|(k, v)| Some((k.to_lowercase(), parse_num(v)?)))
                .collect();
            for id in chunk {
                if let Some(p) = by_lower.get(&id.to_lowercase()).filter(|p| **p > 0.0) {
                    out.insert(id.clone(), *p);
                }
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
