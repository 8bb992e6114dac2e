//! Scripted market feed for integration testing.
//!
//! Provides a deterministic `MarketDataProvider` whose candidates, prices,
//! latency and failures are fully controllable from test code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tidewatch::data::MarketDataProvider;
use tidewatch::types::RawCandidate;

pub struct MockFeed {
    name: String,
    candidates: Mutex<Vec<RawCandidate>>,
    prices: Mutex<HashMap<String, f64>>,
    delay: Mutex<Option<Duration>>,
    /// If set, every call returns this error.
    force_error: Mutex<Option<String>>,
    candidate_calls: AtomicUsize,
}

impl MockFeed {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            candidates: Mutex::new(Vec::new()),
            prices: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            force_error: Mutex::new(None),
            candidate_calls: AtomicUsize::new(0),
        }
    }

    /// Add a listed asset; its price is also served by the price endpoint.
    pub fn list(&self, raw: RawCandidate) {
        if let Some(price) = raw.price {
            self.prices.lock().unwrap().insert(raw.asset_id.clone(), price);
        }
        self.candidates.lock().unwrap().push(raw);
    }

    /// Move the live price of an asset. Listings keep their discovery price.
    pub fn set_price(&self, asset_id: &str, price: f64) {
        self.prices.lock().unwrap().insert(asset_id.to_string(), price);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn candidate_calls(&self) -> usize {
        self.candidate_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let forced = self.force_error.lock().unwrap().clone();
        match forced {
            Some(msg) => Err(anyhow!(msg)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketDataProvider for MockFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_candidates(&self, _chain: &str) -> Result<Vec<RawCandidate>> {
        self.candidate_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await?;
        Ok(self.candidates.lock().unwrap().clone())
    }

    async fn fetch_price(&self, _chain: &str, asset_id: &str) -> Result<Option<f64>> {
        self.simulate_latency().await?;
        Ok(self.prices.lock().unwrap().get(asset_id).copied())
    }
}

/// A liquid, rising asset that passes every hard filter.
pub fn make_raw(asset_id: &str, symbol: &str, price: f64) -> RawCandidate {
    RawCandidate {
        asset_id: asset_id.to_string(),
        symbol: Some(symbol.to_string()),
        chain: "base".to_string(),
        price: Some(price),
        change_24h: Some(20.0),
        change_1h: Some(5.0),
        change_5m: Some(1.0),
        volume_24h: Some(300_000.0),
        liquidity: Some(120_000.0),
        buy_volume_24h: Some(210_000.0),
        sell_volume_24h: Some(90_000.0),
        holders: None,
        verified: true,
        source: "mock".to_string(),
    }
}

/// Same asset shape but below the volume and liquidity floors.
pub fn make_thin(asset_id: &str, symbol: &str, price: f64) -> RawCandidate {
    RawCandidate {
        volume_24h: Some(5_000.0),
        liquidity: Some(2_000.0),
        buy_volume_24h: Some(3_500.0),
        sell_volume_24h: Some(1_500.0),
        ..make_raw(asset_id, symbol, price)
    }
}
