//! Risk planner: trade decision + account state + settings → order plan.
//!
//! `plan` is a pure function. It performs no I/O and reads no clock, so the
//! same inputs always produce the same plan. Every output satisfies:
//!
//! - stop distance ≤ `max_stop_pct` of entry
//! - margin + fees ≤ available balance
//! - size, quantity and margin are finite and positive
//!
//! Anything that cannot meet these returns `None` (no trade).

use serde::Serialize;
use tracing::debug;

use super::kelly::KellyCalculator;
use crate::config::{RiskMode, Settings};
use crate::types::{Side, TradeStats};

/// Orders smaller than this notional are not worth the fees.
pub const MIN_ORDER_SIZE: f64 = 1.0;

/// Profit targets as multiples of the initial risk distance.
pub const TARGET_R_MULTIPLES: [f64; 2] = [1.5, 3.0];

const CONFIDENCE_FLOOR: f64 = 0.6;
const CONFIDENCE_SPAN: f64 = 0.7;
const STREAK_MIN: f64 = 0.5;
const STREAK_MAX: f64 = 1.2;

// ---------------------------------------------------------------------------
// Inputs and output
// ---------------------------------------------------------------------------

/// What the entry loop wants to do.
#[derive(Debug, Clone)]
pub struct TradeDecision {
    pub asset_id: String,
    pub symbol: String,
    pub side: Side,
    /// Last observed market price.
    pub reference_price: f64,
    /// Suggested stop. `None` uses the account's stop-loss setting.
    pub stop_price: Option<f64>,
    /// Quality score 0–100.
    pub score: f64,
    /// Recent absolute price swing in percent, used as a stop floor.
    pub volatility_pct: Option<f64>,
}

/// The slice of account state the planner needs.
#[derive(Debug, Clone, Default)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    pub stats: TradeStats,
}

/// A fully-resolved order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPlan {
    pub asset_id: String,
    pub symbol: String,
    pub side: Side,
    pub reference_price: f64,
    /// Expected fill after slippage.
    pub entry_price: f64,
    pub stop_price: f64,
    pub stop_distance_pct: f64,
    pub targets: Vec<f64>,
    pub trailing_pct: f64,
    /// Notional position size in quote currency.
    pub size: f64,
    pub quantity: f64,
    pub leverage: f64,
    pub margin: f64,
    pub fees: f64,
    pub risk_amount: f64,
}

impl OrderPlan {
    /// Quote currency debited on open.
    pub fn total_cost(&self) -> f64 {
        self.margin + self.fees
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Plan with the default Kelly configuration.
pub fn plan(decision: &TradeDecision, account: &AccountSnapshot, settings: &Settings) -> Option<OrderPlan> {
    plan_with(decision, account, settings, &KellyCalculator::default())
}

pub fn plan_with(
    decision: &TradeDecision,
    account: &AccountSnapshot,
    settings: &Settings,
    kelly: &KellyCalculator,
) -> Option<OrderPlan> {
    let reference = decision.reference_price;
    if !reference.is_finite() || reference <= 0.0 || !account.balance.is_finite() || account.balance <= 0.0 {
        return None;
    }
    let dir = decision.side.direction();

    // 1. Slippage: longs pay more, shorts receive less.
    let entry = reference * (1.0 + dir * settings.slippage_pct / 100.0);

    // 2–4. Stop distance, as percent of entry.
    let requested = decision
        .stop_price
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| dir * (entry - s) / entry * 100.0)
        .unwrap_or(settings.stop_loss_pct);
    let stop_pct = resolve_stop_pct(requested, decision.volatility_pct, settings);
    let stop_price = entry * (1.0 - dir * stop_pct / 100.0);
    let stop_frac = stop_pct / 100.0;

    // 5. Base size from the risk budget.
    let leverage = settings.leverage;
    let risk_amount = match settings.risk_mode {
        RiskMode::PercentOfBalance => account.balance * settings.risk_per_trade_pct / 100.0,
        RiskMode::FixedAmount => settings.trade_amount,
    };
    let mut size = risk_amount / stop_frac * leverage;

    // 6. Confidence.
    size *= confidence_multiplier(decision.score);

    // 7. Streak.
    size *= streak_multiplier(account.consecutive_wins, account.consecutive_losses);

    // 8. Kelly ceiling on committed margin.
    if let Some(ceiling) = kelly.ceiling(&account.stats, account.balance) {
        size = size.min(ceiling.max_size * leverage);
    }

    // 9. Per-trade share of balance.
    size = size.min(account.balance * settings.max_position_pct / 100.0 * leverage);

    // 10. Margin + fees must fit the balance.
    let fee_rate = settings.fee_pct / 100.0;
    let affordable = account.balance / (1.0 / leverage + fee_rate);
    if size > affordable {
        size = affordable * (1.0 - 1e-9);
    }

    let margin = size / leverage;
    let fees = size * fee_rate;
    let quantity = size / entry;

    // 11. Reject degenerate results.
    let finite = [size, margin, fees, quantity].iter().all(|v| v.is_finite());
    if !finite || size < MIN_ORDER_SIZE || quantity <= 0.0 || margin + fees > account.balance {
        debug!(
            asset_id = %decision.asset_id,
            size,
            balance = account.balance,
            "Plan rejected"
        );
        return None;
    }

    let targets = TARGET_R_MULTIPLES
        .iter()
        .map(|r| entry * (1.0 + dir * stop_frac * r))
        .collect();

    Some(OrderPlan {
        asset_id: decision.asset_id.clone(),
        symbol: decision.symbol.clone(),
        side: decision.side,
        reference_price: reference,
        entry_price: entry,
        stop_price,
        stop_distance_pct: stop_pct,
        targets,
        trailing_pct: settings.trailing_stop_pct,
        size,
        quantity,
        leverage,
        margin,
        fees,
        risk_amount,
    })
}

/// Cap at the max stop, correct a wrong-side stop to the default offset,
/// then enforce the floor. The floor itself never exceeds the cap.
fn resolve_stop_pct(requested: f64, volatility_pct: Option<f64>, settings: &Settings) -> f64 {
    let mut pct = requested;
    if !pct.is_finite() {
        pct = settings.stop_loss_pct;
    }
    if pct > settings.max_stop_pct {
        pct = settings.max_stop_pct;
    }
    if pct <= 0.0 {
        pct = settings.stop_loss_pct.min(settings.max_stop_pct);
    }
    let volatility_floor = volatility_pct.filter(|v| v.is_finite()).map(f64::abs).unwrap_or(0.0);
    let floor = settings.min_stop_pct.max(volatility_floor).min(settings.max_stop_pct);
    pct.max(floor)
}

/// 0.6 at score 0, 1.3 at score 100.
pub fn confidence_multiplier(score: f64) -> f64 {
    let s = if score.is_finite() { score.clamp(0.0, 100.0) } else { 0.0 };
    CONFIDENCE_FLOOR + s / 100.0 * CONFIDENCE_SPAN
}

/// Lean in slightly on win streaks, back off harder on loss streaks.
pub fn streak_multiplier(wins: u32, losses: u32) -> f64 {
    let m = if losses > 0 {
        1.0 - 0.1 * losses as f64
    } else {
        1.0 + 0.05 * wins as f64
    };
    m.clamp(STREAK_MIN, STREAK_MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsInput;

    fn make_decision(price: f64) -> TradeDecision {
        TradeDecision {
            asset_id: "0xabc".into(),
            symbol: "ABC".into(),
            side: Side::Long,
            reference_price: price,
            stop_price: None,
            score: 50.0,
            volatility_pct: None,
        }
    }

    fn make_account(balance: f64) -> AccountSnapshot {
        AccountSnapshot { balance, ..Default::default() }
    }

    fn settings(input: SettingsInput) -> Settings {
        Settings::from_input(&input)
    }

    #[test]
    fn test_basic_long_plan() {
        let s = settings(SettingsInput { slippage_pct: Some(1.0), ..Default::default() });
        let p = plan(&make_decision(100.0), &make_account(1000.0), &s).unwrap();
        assert!((p.entry_price - 101.0).abs() < 1e-9);
        assert!((p.stop_distance_pct - 8.0).abs() < 1e-9);
        assert!(p.stop_price < p.entry_price);
        assert!(p.targets.iter().all(|t| *t > p.entry_price));
        assert_eq!(p.targets.len(), 2);
        assert!(p.total_cost() <= 1000.0);
    }

    #[test]
    fn test_short_receives_less() {
        let s = settings(SettingsInput { slippage_pct: Some(2.0), ..Default::default() });
        let mut d = make_decision(100.0);
        d.side = Side::Short;
        let p = plan(&d, &make_account(1000.0), &s).unwrap();
        assert!((p.entry_price - 98.0).abs() < 1e-9);
        assert!(p.stop_price > p.entry_price);
        assert!(p.targets.iter().all(|t| *t < p.entry_price));
    }

    #[test]
    fn test_wide_stop_capped() {
        let s = settings(SettingsInput { max_stop_pct: Some(10.0), slippage_pct: Some(0.0), ..Default::default() });
        let mut d = make_decision(100.0);
        d.stop_price = Some(50.0);
        let p = plan(&d, &make_account(1000.0), &s).unwrap();
        assert!((p.stop_distance_pct - 10.0).abs() < 1e-9);
        assert!((p.stop_price - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_wrong_side_stop_corrected() {
        let s = settings(SettingsInput { slippage_pct: Some(0.0), stop_loss_pct: Some(6.0), ..Default::default() });
        let mut d = make_decision(100.0);
        d.stop_price = Some(110.0);
        let p = plan(&d, &make_account(1000.0), &s).unwrap();
        assert!((p.stop_distance_pct - 6.0).abs() < 1e-9);
        assert!(p.stop_price < p.entry_price);
    }

    #[test]
    fn test_tight_stop_raised_to_floor() {
        let s = settings(SettingsInput { slippage_pct: Some(0.0), min_stop_pct: Some(2.0), ..Default::default() });
        let mut d = make_decision(100.0);
        d.stop_price = Some(99.5);
        let p = plan(&d, &make_account(1000.0), &s).unwrap();
        assert!((p.stop_distance_pct - 2.0).abs() < 1e-9);

        d.volatility_pct = Some(4.0);
        let p = plan(&d, &make_account(1000.0), &s).unwrap();
        assert!((p.stop_distance_pct - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_volatility_floor_never_exceeds_max_stop() {
        let s = settings(SettingsInput { max_stop_pct: Some(5.0), ..Default::default() });
        let mut d = make_decision(100.0);
        d.volatility_pct = Some(30.0);
        let p = plan(&d, &make_account(1000.0), &s).unwrap();
        assert!(p.stop_distance_pct <= 5.0 + 1e-9);
    }

    #[test]
    fn test_fixed_amount_risk_mode() {
        let s = settings(SettingsInput {
            risk_mode: Some(RiskMode::FixedAmount),
            trade_amount: Some(10.0),
            max_position_pct: Some(100.0),
            ..Default::default()
        });
        let p = plan(&make_decision(1.0), &make_account(10_000.0), &s).unwrap();
        assert_eq!(p.risk_amount, 10.0);
    }

    #[test]
    fn test_never_exceeds_balance() {
        for leverage in [1.0, 3.0, 10.0, 20.0] {
            for balance in [5.0, 37.5, 100.0, 1_000.0, 123_456.0] {
                for fee in [0.0, 0.3, 2.0] {
                    let s = settings(SettingsInput {
                        leverage: Some(leverage),
                        fee_pct: Some(fee),
                        max_position_pct: Some(100.0),
                        risk_per_trade_pct: Some(10.0),
                        min_stop_pct: Some(0.1),
                        stop_loss_pct: Some(1.0),
                        ..Default::default()
                    });
                    let mut d = make_decision(0.00042);
                    d.score = 100.0;
                    if let Some(p) = plan(&d, &make_account(balance), &s) {
                        assert!(
                            p.margin + p.fees <= balance,
                            "lev {leverage} bal {balance} fee {fee}: {} > {balance}",
                            p.margin + p.fees
                        );
                        assert!(p.stop_distance_pct <= s.max_stop_pct + 1e-9);
                    }
                }
            }
        }
    }

    #[test]
    fn test_max_position_pct_caps_margin() {
        let s = settings(SettingsInput {
            max_position_pct: Some(10.0),
            risk_per_trade_pct: Some(10.0),
            stop_loss_pct: Some(1.0),
            min_stop_pct: Some(0.5),
            ..Default::default()
        });
        let p = plan(&make_decision(1.0), &make_account(1000.0), &s).unwrap();
        assert!(p.margin <= 100.0 + 1e-9);
    }

    #[test]
    fn test_zero_balance_returns_none() {
        assert!(plan(&make_decision(1.0), &make_account(0.0), &Settings::default()).is_none());
        assert!(plan(&make_decision(1.0), &make_account(-5.0), &Settings::default()).is_none());
    }

    #[test]
    fn test_bad_price_returns_none() {
        let acct = make_account(1000.0);
        assert!(plan(&make_decision(0.0), &acct, &Settings::default()).is_none());
        assert!(plan(&make_decision(f64::NAN), &acct, &Settings::default()).is_none());
    }

    #[test]
    fn test_dust_balance_returns_none() {
        assert!(plan(&make_decision(1.0), &make_account(0.5), &Settings::default()).is_none());
    }

    #[test]
    fn test_higher_score_sizes_larger() {
        let s = Settings::default();
        let acct = make_account(10_000.0);
        let mut low = make_decision(1.0);
        low.score = 10.0;
        let mut high = make_decision(1.0);
        high.score = 90.0;
        let pl = plan(&low, &acct, &s).unwrap();
        let ph = plan(&high, &acct, &s).unwrap();
        assert!(ph.size > pl.size);
    }

    #[test]
    fn test_multipliers_bounded() {
        assert_eq!(confidence_multiplier(-50.0), 0.6);
        assert!((confidence_multiplier(100.0) - 1.3).abs() < 1e-9);
        assert_eq!(streak_multiplier(0, 0), 1.0);
        assert_eq!(streak_multiplier(10, 0), 1.2);
        assert_eq!(streak_multiplier(0, 10), 0.5);
    }

    #[test]
    fn test_kelly_shrinks_losing_strategy() {
        let s = settings(SettingsInput { max_position_pct: Some(100.0), ..Default::default() });
        let losing = AccountSnapshot {
            balance: 1000.0,
            stats: TradeStats { trades: 40, wins: 8, avg_win_pct: 5.0, avg_loss_pct: 5.0 },
            ..Default::default()
        };
        let p = plan(&make_decision(1.0), &losing, &s).unwrap();
        // materially negative Kelly → 1% of balance
        assert!(p.margin <= 10.0 + 1e-9);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let s = Settings::default();
        let d = make_decision(0.0123);
        let a = make_account(777.0);
        assert_eq!(plan(&d, &a, &s), plan(&d, &a, &s));
    }
}
