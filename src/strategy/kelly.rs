//! Kelly criterion size ceiling.
//!
//! Turns an account's historical trade statistics into a cap on position
//! size. Until a minimum sample of closed trades exists the ceiling is
//! inactive; once it exists, a positive Kelly fraction (scaled by a
//! fractional multiplier) bounds the position, and a non-positive one
//! shrinks it to a small probe size.

use tracing::debug;

use crate::types::TradeStats;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Kelly ceiling configuration.
#[derive(Debug, Clone)]
pub struct KellyConfig {
    /// Fractional Kelly multiplier (0.5 = half-Kelly). Lower = more conservative.
    pub multiplier: f64,
    /// Closed trades required before the ceiling applies.
    pub min_sample: u32,
    /// Ceiling as a fraction of balance when Kelly is not positive.
    pub negative_edge_pct: f64,
    /// Below this raw Kelly the probe size is halved again.
    pub materially_negative: f64,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            multiplier: 0.5,
            min_sample: 20,
            negative_edge_pct: 0.02,
            materially_negative: -0.1,
        }
    }
}

// ---------------------------------------------------------------------------
// Kelly calculator
// ---------------------------------------------------------------------------

/// Result of evaluating the historical edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KellyCeiling {
    /// Raw Kelly fraction.
    pub kelly_fraction: f64,
    /// Maximum position notional in quote currency.
    pub max_size: f64,
}

#[derive(Debug, Clone, Default)]
pub struct KellyCalculator {
    config: KellyConfig,
}

impl KellyCalculator {
    pub fn new(config: KellyConfig) -> Self {
        Self { config }
    }

    /// Access the Kelly configuration.
    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// Raw Kelly fraction from trade statistics.
    ///
    /// Kelly formula: f* = (bp - q) / b
    /// where:
    ///   b = average reward:risk
    ///   p = historical win rate
    ///   q = 1 - p
    ///
    /// Returns `None` when the sample is too small or there is no loss
    /// history to derive b from.
    pub fn fraction(&self, stats: &TradeStats) -> Option<f64> {
        if stats.trades < self.config.min_sample {
            return None;
        }
        let b = stats.reward_risk()?;
        if b <= 0.0 || !b.is_finite() {
            return Some(-1.0);
        }
        let p = stats.win_rate();
        let q = 1.0 - p;
        Some((b * p - q) / b)
    }

    /// Size ceiling for an account with `balance` free quote currency.
    /// `None` means no ceiling applies.
    pub fn ceiling(&self, stats: &TradeStats, balance: f64) -> Option<KellyCeiling> {
        let kelly = self.fraction(stats)?;
        if balance <= 0.0 {
            return Some(KellyCeiling { kelly_fraction: kelly, max_size: 0.0 });
        }

        let max_size = if kelly > 0.0 {
            kelly * self.config.multiplier * balance
        } else {
            let mut probe = self.config.negative_edge_pct * balance;
            if kelly < self.config.materially_negative {
                probe *= 0.5;
            }
            probe
        };

        debug!(
            trades = stats.trades,
            win_rate = format!("{:.0}%", stats.win_rate() * 100.0),
            raw_kelly = format!("{:.2}%", kelly * 100.0),
            max_size = format!("${:.2}", max_size),
            "Kelly ceiling computed"
        );

        Some(KellyCeiling { kelly_fraction: kelly, max_size })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
