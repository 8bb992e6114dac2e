//! Candidate hard filters and quality scoring.
//!
//! Both functions are pure: the same candidate always produces the same
//! verdict and the same score. The aggregator applies them after merging
//! provider feeds.

use std::fmt;

use crate::config::AggregatorConfig;
use crate::types::Candidate;

/// Upper bound on the additive quality score.
pub const MAX_QUALITY_SCORE: f64 = 100.0;

// ---------------------------------------------------------------------------
// Hard filters
// ---------------------------------------------------------------------------

/// Why a candidate was dropped before scoring.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    LowVolume(f64),
    LowLiquidity(f64),
    ChangeOutOfRange(f64),
    WeakBuyPressure(f64),
    FewHolders(u64),
    WashTrading(f64),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::LowVolume(v) => write!(f, "volume ${v:.0} below floor"),
            RejectReason::LowLiquidity(l) => write!(f, "liquidity ${l:.0} below floor"),
            RejectReason::ChangeOutOfRange(c) => write!(f, "24h change {c:+.1}% out of range"),
            RejectReason::WeakBuyPressure(p) => write!(f, "buy pressure {:.0}% too weak", p * 100.0),
            RejectReason::FewHolders(h) => write!(f, "only {h} holders"),
            RejectReason::WashTrading(r) => write!(f, "volume/liquidity {r:.1}x looks washed"),
        }
    }
}

/// Apply the hard rejects. Returns `None` when the candidate survives.
pub fn hard_reject(candidate: &Candidate, cfg: &AggregatorConfig) -> Option<RejectReason> {
    if candidate.volume_24h < cfg.min_volume_24h {
        return Some(RejectReason::LowVolume(candidate.volume_24h));
    }
    if candidate.liquidity < cfg.min_liquidity {
        return Some(RejectReason::LowLiquidity(candidate.liquidity));
    }
    if candidate.change_24h < cfg.min_change_24h || candidate.change_24h > cfg.max_change_24h {
        return Some(RejectReason::ChangeOutOfRange(candidate.change_24h));
    }
    if let Some(pressure) = candidate.buy_pressure() {
        if pressure < cfg.min_buy_pressure {
            return Some(RejectReason::WeakBuyPressure(pressure));
        }
    }
    if let Some(holders) = candidate.holders {
        if holders < cfg.min_holders {
            return Some(RejectReason::FewHolders(holders));
        }
    }
    let ratio = candidate.volume_liquidity_ratio();
    if ratio > cfg.max_volume_liquidity_ratio {
        return Some(RejectReason::WashTrading(ratio));
    }
    None
}

// ---------------------------------------------------------------------------
// Quality score
// ---------------------------------------------------------------------------

/// Additive quality score over weighted tiers, capped at
/// [`MAX_QUALITY_SCORE`].
///
/// Tiers:
/// - short-horizon momentum (5m and 1h change), up to 20
/// - 24h volume, up to 20
/// - liquidity, up to 15
/// - volume velocity relative to liquidity, up to 10
/// - buy-side dominance, up to 15
/// - cross-provider corroboration, up to 10
/// - verification bonus, 10
pub fn quality_score(c: &Candidate) -> f64 {
    let mut score = 0.0;

    score += momentum_points(c.change_5m, c.change_1h);

    score += match c.volume_24h {
        v if v >= 1_000_000.0 => 20.0,
        v if v >= 250_000.0 => 15.0,
        v if v >= 100_000.0 => 10.0,
        v if v >= 25_000.0 => 5.0,
        _ => 0.0,
    };

    score += match c.liquidity {
        l if l >= 500_000.0 => 15.0,
        l if l >= 100_000.0 => 12.0,
        l if l >= 50_000.0 => 8.0,
        l if l >= 20_000.0 => 4.0,
        _ => 0.0,
    };

    // Turnover: healthy when the pool trades a few times its depth per day.
    if c.liquidity > 0.0 {
        let velocity = c.volume_24h / c.liquidity;
        score += if (0.5..=5.0).contains(&velocity) {
            10.0
        } else if (0.2..0.5).contains(&velocity) || (5.0..=10.0).contains(&velocity) {
            5.0
        } else {
            0.0
        };
    }

    if let Some(pressure) = c.buy_pressure() {
        score += if pressure >= 0.65 {
            15.0
        } else if pressure >= 0.55 {
            10.0
        } else if pressure >= 0.5 {
            5.0
        } else {
            0.0
        };
    }

    score += match c.providers {
        n if n >= 3 => 10.0,
        2 => 6.0,
        _ => 0.0,
    };

    if c.verified {
        score += 10.0;
    }

    score.min(MAX_QUALITY_SCORE)
}

fn momentum_points(change_5m: f64, change_1h: f64) -> f64 {
    let mut points = 0.0;
    if change_5m > 0.0 && change_5m <= 15.0 {
        points += 5.0;
    }
    points += match change_1h {
        c if (2.0..=30.0).contains(&c) => 15.0,
        c if (0.0..2.0).contains(&c) => 8.0,
        c if c > 30.0 && c <= 100.0 => 5.0,
        _ => 0.0,
    };
    points
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candidate(volume: f64, liquidity: f64) -> Candidate {
        Candidate {
            asset_id: "0xabc".into(),
            symbol: "ABC".into(),
            chain: "base".into(),
            price: 0.01,
            change_24h: 20.0,
            change_1h: 5.0,
            change_5m: 1.0,
            volume_24h: volume,
            liquidity,
            buy_volume_24h: volume * 0.6,
            sell_volume_24h: volume * 0.4,
            holders: Some(500),
            verified: false,
            providers: 1,
            quality_score: 0.0,
        }
    }

    #[test]
    fn test_low_volume_and_liquidity_rejected() {
        let cfg = AggregatorConfig::default();
        let c = make_candidate(5_000.0, 2_000.0);
        assert!(matches!(hard_reject(&c, &cfg), Some(RejectReason::LowVolume(_))));

        let c = make_candidate(50_000.0, 2_000.0);
        assert!(matches!(hard_reject(&c, &cfg), Some(RejectReason::LowLiquidity(_))));
    }

    #[test]
    fn test_change_window_enforced() {
        let cfg = AggregatorConfig::default();
        let mut c = make_candidate(100_000.0, 50_000.0);
        c.change_24h = -80.0;
        assert!(matches!(hard_reject(&c, &cfg), Some(RejectReason::ChangeOutOfRange(_))));
        c.change_24h = 900.0;
        assert!(matches!(hard_reject(&c, &cfg), Some(RejectReason::ChangeOutOfRange(_))));
    }

    #[test]
    fn test_sell_heavy_rejected() {
        let cfg = AggregatorConfig::default();
        let mut c = make_candidate(100_000.0, 50_000.0);
        c.buy_volume_24h = 30_000.0;
        c.sell_volume_24h = 70_000.0;
        assert!(matches!(hard_reject(&c, &cfg), Some(RejectReason::WeakBuyPressure(_))));
    }

    #[test]
    fn test_holder_floor_only_when_known() {
        let cfg = AggregatorConfig::default();
        let mut c = make_candidate(100_000.0, 50_000.0);
        c.holders = Some(10);
        assert!(matches!(hard_reject(&c, &cfg), Some(RejectReason::FewHolders(10))));
        c.holders = None;
        assert!(hard_reject(&c, &cfg).is_none());
    }

    #[test]
    fn test_wash_trading_ceiling() {
        let cfg = AggregatorConfig::default();
        let c = make_candidate(10_000_000.0, 100_000.0); // 100x turnover
        assert!(matches!(hard_reject(&c, &cfg), Some(RejectReason::WashTrading(_))));
    }

    #[test]
    fn test_missing_split_skips_buy_pressure() {
        let cfg = AggregatorConfig::default();
        let mut c = make_candidate(100_000.0, 50_000.0);
        c.buy_volume_24h = 0.0;
        c.sell_volume_24h = 0.0;
        assert!(hard_reject(&c, &cfg).is_none());
    }

    #[test]
    fn test_score_is_deterministic() {
        let c = make_candidate(300_000.0, 120_000.0);
        let first = quality_score(&c);
        for _ in 0..10 {
            assert_eq!(quality_score(&c), first);
        }
    }

    #[test]
    fn test_score_tiers_add_up() {
        // 5m +5, 1h +15, vol 15, liq 12, velocity 10, buy 10 (0.6), single provider 0
        let c = make_candidate(300_000.0, 120_000.0);
        assert_eq!(quality_score(&c), 67.0);
    }

    #[test]
    fn test_corroboration_and_verification_raise_score() {
        let base = make_candidate(300_000.0, 120_000.0);
        let mut better = base.clone();
        better.providers = 3;
        better.verified = true;
        assert_eq!(quality_score(&better) - quality_score(&base), 20.0);
    }

    #[test]
    fn test_score_capped() {
        let mut c = make_candidate(5_000_000.0, 1_000_000.0);
        c.buy_volume_24h = 4_000_000.0;
        c.sell_volume_24h = 1_000_000.0;
        c.providers = 5;
        c.verified = true;
        assert!(quality_score(&c) <= MAX_QUALITY_SCORE);
        assert_eq!(quality_score(&c), 100.0);
    }

    #[test]
    fn test_parabolic_hour_scores_less_than_steady_climb() {
        let steady = make_candidate(300_000.0, 120_000.0);
        let mut parabolic = steady.clone();
        parabolic.change_1h = 80.0;
        assert!(quality_score(&steady) > quality_score(&parabolic));
    }

    #[test]
    fn test_reject_reason_display() {
        assert_eq!(RejectReason::FewHolders(12).to_string(), "only 12 holders");
        assert_eq!(
            RejectReason::WeakBuyPressure(0.3).to_string(),
            "buy pressure 30% too weak"
        );
    }
}
