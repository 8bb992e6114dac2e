//! Risk governor: daily loss and loss-streak circuit breaker.
//!
//! `record_close` runs after every full close; `check` runs at the start of
//! every entry tick and returns a pause reason when a limit is hit.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::Settings;
use crate::types::RiskState;

/// Roll the daily baseline when `now` falls on a new UTC calendar day.
/// Returns true if the baseline was reset.
pub fn roll_day(risk: &mut RiskState, equity: f64, now: DateTime<Utc>) -> bool {
    let today = now.date_naive();
    if risk.daily_baseline_date == Some(today) {
        return false;
    }
    risk.daily_baseline = equity;
    risk.daily_baseline_date = Some(today);
    risk.daily_realized_pnl = 0.0;
    true
}

/// Account for a closed position. `equity_after` is account equity once
/// the close has settled.
pub fn record_close(risk: &mut RiskState, realized_pnl: f64, equity_after: f64, now: DateTime<Utc>) {
    roll_day(risk, equity_after - realized_pnl, now);
    risk.daily_realized_pnl += realized_pnl;
    if realized_pnl < 0.0 {
        risk.consecutive_losses += 1;
        risk.consecutive_wins = 0;
    } else {
        risk.consecutive_losses = 0;
        risk.consecutive_wins += 1;
    }
}

/// Loss since the daily baseline in percent (positive = loss). Takes the
/// larger of the realized loss and the equity drawdown.
pub fn daily_loss_pct(risk: &RiskState, equity: f64) -> f64 {
    if risk.daily_baseline <= 0.0 {
        return 0.0;
    }
    let drawdown = risk.daily_baseline - equity;
    let realized_loss = -risk.daily_realized_pnl;
    drawdown.max(realized_loss).max(0.0) / risk.daily_baseline * 100.0
}

/// Check limits before an entry cycle. On a trip the pause reason and time
/// are written into `risk` and the reason is returned.
pub fn check(risk: &mut RiskState, equity: f64, settings: &Settings, now: DateTime<Utc>) -> Option<String> {
    roll_day(risk, equity, now);

    let loss_pct = daily_loss_pct(risk, equity);
    let reason = if loss_pct >= settings.daily_loss_limit_pct {
        Some(format!(
            "Daily loss limit reached: -{:.1}% (limit {:.0}%)",
            loss_pct, settings.daily_loss_limit_pct
        ))
    } else if risk.consecutive_losses >= settings.max_consecutive_losses {
        Some(format!(
            "Consecutive loss limit reached: {} losses in a row (limit {})",
            risk.consecutive_losses, settings.max_consecutive_losses
        ))
    } else {
        None
    };

    if let Some(r) = &reason {
        warn!(reason = %r, equity = format!("${:.2}", equity), "Risk governor tripped");
        risk.pause_reason = Some(r.clone());
        risk.paused_at = Some(now);
    }
    reason
}

/// Operator restart after a pause: clear the pause, forgive the streak and
/// re-base the day at current equity so the same loss does not re-trip.
pub fn acknowledge(risk: &mut RiskState, equity: f64, now: DateTime<Utc>) {
    risk.pause_reason = None;
    risk.paused_at = None;
    risk.consecutive_losses = 0;
    risk.daily_baseline = equity;
    risk.daily_baseline_date = Some(now.date_naive());
    risk.daily_realized_pnl = 0.0;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
