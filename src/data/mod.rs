//! Market-data providers.
//!
//! Defines the `MarketDataProvider` trait and the public HTTP feeds the
//! aggregator merges: DexScreener and GeckoTerminal. Providers must
//! tolerate missing or partial fields and report them as `None` rather
//! than failing the whole batch.

pub mod dexscreener;
pub mod geckoterminal;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::types::RawCandidate;

/// Abstraction over external market-data sources.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name for logging and corroboration counting.
    fn name(&self) -> &str;

    /// Fetch tradeable assets currently surfaced on `chain`.
    async fn fetch_candidates(&self, chain: &str) -> Result<Vec<RawCandidate>>;

    /// Current price for one asset. `Ok(None)` when the provider has no
    /// quote for it.
    async fn fetch_price(&self, chain: &str, asset_id: &str) -> Result<Option<f64>>;

    /// Prices for several assets. Assets without a quote are omitted.
    async fn fetch_prices(&self, chain: &str, asset_ids: &[String]) -> Result<HashMap<String, f64>> {
        let mut prices = HashMap::new();
        for id in asset_ids {
            if let Some(p) = self.fetch_price(chain, id).await? {
                prices.insert(id.clone(), p);
            }
        }
        Ok(prices)
    }
}

/// Parse a numeric field that providers send as either a JSON string or a
/// number.
pub(crate) fn parse_num(value: &serde_json::Value) -> Option<f64> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Split 24h volume into buy/sell using transaction counts when the
/// provider only reports counts.
pub(crate) fn split_volume(volume: Option<f64>, buys: Option<u64>, sells: Option<u64>) -> (Option<f64>, Option<f64>) {
    match (volume, buys, sells) {
        (Some(v), Some(b), Some(s)) if b + s > 0 => {
            let share = b as f64 / (b + s) as f64;
            (Some(v * share), Some(v * (1.0 - share)))
        }
        _ => (None, None),
    }
}
