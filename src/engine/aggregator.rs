//! Candidate aggregator.
//!
//! Fans out to every configured provider concurrently, merges their
//! candidates by asset (first seen wins, later sightings only raise the
//! corroboration count), drops hard rejects, scores and ranks. Results are
//! cached per chain; refreshes are single-flight so concurrent callers
//! share one fetch.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::AggregatorConfig;
use crate::data::MarketDataProvider;
use crate::strategy::scoring::{hard_reject, quality_score};
use crate::types::{Candidate, RawCandidate};

#[derive(Default)]
struct ChainCache {
    fetched_at: Option<Instant>,
    candidates: Arc<Vec<Candidate>>,
}

pub struct Aggregator {
    providers: Vec<Arc<dyn MarketDataProvider>>,
    config: AggregatorConfig,
    ttl: Duration,
    provider_timeout: Duration,
    caches: std::sync::Mutex<HashMap<String, Arc<Mutex<ChainCache>>>>,
}

impl Aggregator {
    pub fn new(providers: Vec<Arc<dyn MarketDataProvider>>, config: AggregatorConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.cache_ttl_secs),
            provider_timeout: Duration::from_secs(config.provider_timeout_secs),
            providers,
            config,
            caches: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    fn chain_cache(&self, chain: &str) -> Arc<Mutex<ChainCache>> {
        let mut caches = match self.caches.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        caches.entry(chain.to_lowercase()).or_default().clone()
    }

    /// Ranked candidates for `chain`, served from cache while fresh.
    /// Never fails: if every provider is down the result is empty.
    pub async fn refresh(&self, chain: &str) -> Arc<Vec<Candidate>> {
        let cache = self.chain_cache(chain);
        let mut entry = cache.lock().await;
        if let Some(at) = entry.fetched_at {
            if at.elapsed() < self.ttl {
                debug!(chain, "Candidate cache hit");
                return entry.candidates.clone();
            }
        }

        let (raws, succeeded) = self.fetch_all(chain).await;
        let ranked = Arc::new(self.rank(raws));
        if succeeded > 0 {
            entry.fetched_at = Some(Instant::now());
            entry.candidates = ranked.clone();
        }
        info!(
            chain,
            providers_ok = succeeded,
            providers = self.providers.len(),
            candidates = ranked.len(),
            "Candidates refreshed"
        );
        ranked
    }

    /// Raw candidates from every provider, in provider order, plus the
    /// number of providers that answered.
    async fn fetch_all(&self, chain: &str) -> (Vec<RawCandidate>, usize) {
        let results = join_all(self.providers.iter().map(|p| async move {
            let outcome = tokio::time::timeout(self.provider_timeout, p.fetch_candidates(chain)).await;
            (p.name().to_string(), outcome)
        }))
        .await;

        let mut raws = Vec::new();
        let mut succeeded = 0;
        for (name, outcome) in results {
            match outcome {
                Ok(Ok(batch)) => {
                    succeeded += 1;
                    raws.extend(batch);
                }
                Ok(Err(e)) => warn!(provider = %name, error = %e, "Provider failed, continuing without"),
                Err(_) => warn!(provider = %name, "Provider timed out, continuing without"),
            }
        }
        (raws, succeeded)
    }

    /// Merge, filter, score and sort.
    fn rank(&self, raws: Vec<RawCandidate>) -> Vec<Candidate> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut merged: Vec<Candidate> = Vec::new();
        for raw in raws {
            let key = raw.asset_id.to_lowercase();
            if let Some(&i) = index.get(&key) {
                merged[i].providers += 1;
                continue;
            }
            if let Some(candidate) = Candidate::from_raw(raw) {
                index.insert(key, merged.len());
                merged.push(candidate);
            }
        }

        let mut ranked: Vec<Candidate> = merged
            .into_iter()
            .filter(|c| match hard_reject(c, &self.config) {
                Some(reason) => {
                    debug!(asset = %c.asset_id, symbol = %c.symbol, %reason, "Hard reject");
                    false
                }
                None => true,
            })
            .map(|mut c| {
                c.quality_score = quality_score(&c);
                c
            })
            .filter(|c| c.quality_score >= self.config.min_quality_score)
            .collect();

        ranked.sort_by(|a, b| {
            b.quality_score
                .partial_cmp(&a.quality_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.volume_24h.partial_cmp(&a.volume_24h).unwrap_or(std::cmp::Ordering::Equal))
        });
        ranked
    }

    /// Fresh prices for held assets, bypassing the candidate cache. Earlier
    /// providers take precedence; assets nobody quotes are omitted.
    pub async fn fresh_prices(&self, chain: &str, asset_ids: &[String]) -> HashMap<String, f64> {
        if asset_ids.is_empty() {
            return HashMap::new();
        }
        let results = join_all(self.providers.iter().map(|p| async move {
            let outcome = tokio::time::timeout(self.provider_timeout, p.fetch_prices(chain, asset_ids)).await;
            (p.name().to_string(), outcome)
        }))
        .await;

        let mut prices = HashMap::new();
        for (name, outcome) in results {
            match outcome {
                Ok(Ok(batch)) => {
                    for (id, price) in batch {
                        if price.is_finite() && price > 0.0 {
                            prices.entry(id).or_insert(price);
                        }
                    }
                }
                Ok(Err(e)) => warn!(provider = %name, error = %e, "Price fetch failed"),
                Err(_) => warn!(provider = %name, "Price fetch timed out"),
            }
        }
        prices
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
