//! Position lifecycle: decide hold, partial exit or full exit for one open
//! position at the current price.
//!
//! Rules are checked in a fixed order and the first terminal match wins:
//!
//! 1. stop-loss
//! 2. take-profit
//! 3. breakeven stop (only once armed)
//! 4. early bail once a share of max hold has passed
//! 5. time limit, then stale position
//! 6. adaptive trailing stop sized from peak profit
//!
//! Two non-terminal effects follow when nothing fired: arming the
//! breakeven flag and a one-time partial take-profit. The updated peak is
//! returned on every call and callers must persist it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Settings;
use crate::types::{ExitReason, Position};

const EPS: f64 = 1e-9;

/// Reduce a position without closing it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PartialExit {
    pub quantity: f64,
    pub fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitDecision {
    pub exit: Option<ExitReason>,
    pub partial: Option<PartialExit>,
    /// Most favourable price including this observation.
    pub updated_peak: f64,
    /// Breakeven flag should be set (it was not already).
    pub arm_breakeven: bool,
    pub pnl_pct: f64,
    pub peak_pnl_pct: f64,
}

impl ExitDecision {
    pub fn is_exit(&self) -> bool {
        self.exit.is_some()
    }

    /// Peak or breakeven flag changed and must be written back.
    pub fn marks_changed(&self, position: &Position) -> bool {
        self.arm_breakeven || self.updated_peak != position.peak_price
    }
}

/// Trailing width as a multiple of the configured trailing %, widening as
/// the peak profit grows.
pub fn trailing_width_pct(peak_pnl_pct: f64, trailing_stop_pct: f64) -> f64 {
    let factor = if peak_pnl_pct < 10.0 {
        0.5
    } else if peak_pnl_pct < 25.0 {
        1.0
    } else if peak_pnl_pct < 50.0 {
        1.5
    } else {
        2.0
    };
    trailing_stop_pct * factor
}

/// Evaluate `position` at `price`.
pub fn evaluate(position: &Position, price: f64, now: DateTime<Utc>, settings: &Settings) -> ExitDecision {
    let previous_peak = if position.peak_price > 0.0 { position.peak_price } else { position.entry_price };
    let updated_peak = if price.is_finite() && price > 0.0 {
        position.side.favorable(previous_peak, price)
    } else {
        previous_peak
    };

    let pnl = position.pnl_pct(price);
    let peak_pnl = position.pnl_pct(updated_peak);
    let held = position.held_minutes(now);
    let max_hold = settings.max_hold_minutes;

    let mut decision = ExitDecision {
        exit: None,
        partial: None,
        updated_peak,
        arm_breakeven: false,
        pnl_pct: pnl,
        peak_pnl_pct: peak_pnl,
    };

    if !price.is_finite() || price <= 0.0 {
        return decision;
    }

    decision.exit = terminal_reason(position, pnl, peak_pnl, held, max_hold, price, updated_peak, settings);
    if decision.exit.is_some() {
        return decision;
    }

    if !position.breakeven_armed && peak_pnl >= settings.breakeven_arm_pct - EPS {
        decision.arm_breakeven = true;
    }

    if position.partial_sold_qty <= 0.0 && pnl >= settings.partial_tp_pct - EPS && position.quantity > 0.0 {
        decision.partial = Some(PartialExit {
            quantity: position.quantity * settings.partial_tp_fraction,
            fraction: settings.partial_tp_fraction,
        });
    }

    decision
}

/// PnL % at which the stop fires: the planned stop when one was recorded
/// on the right side of entry, else the configured stop-loss.
fn stop_pnl_pct(position: &Position, settings: &Settings) -> f64 {
    position
        .stop_price
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| position.pnl_pct(s))
        .filter(|pct| *pct < 0.0)
        .unwrap_or(-settings.stop_loss_pct)
}

#[allow(clippy::too_many_arguments)]
fn terminal_reason(
    position: &Position,
    pnl: f64,
    peak_pnl: f64,
    held: f64,
    max_hold: f64,
    price: f64,
    peak: f64,
    settings: &Settings,
) -> Option<ExitReason> {
    if pnl <= stop_pnl_pct(position, settings) + EPS {
        return Some(ExitReason::StopLoss);
    }
    if pnl >= settings.take_profit_pct - EPS {
        return Some(ExitReason::TakeProfit);
    }
    if position.breakeven_armed && pnl <= settings.breakeven_buffer_pct + EPS {
        return Some(ExitReason::BreakevenStop);
    }
    if held >= max_hold * settings.early_bail_hold_fraction && pnl <= -settings.early_bail_pct + EPS {
        return Some(ExitReason::EarlyBail);
    }
    if held >= max_hold {
        return Some(ExitReason::TimeLimit);
    }
    if held >= max_hold * settings.stale_hold_fraction && pnl < settings.stale_min_pnl_pct {
        return Some(ExitReason::StalePosition);
    }
    if peak_pnl >= settings.breakeven_arm_pct - EPS && peak > 0.0 {
        let width = trailing_width_pct(peak_pnl, settings.trailing_stop_pct);
        let drawdown = position.side.direction() * (peak - price) / peak * 100.0;
        if drawdown >= width - EPS {
            return Some(ExitReason::TrailingStop);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
