//! Ledger: applies fills to balances and positions.
//!
//! Every method maps one fill onto one atomic store operation. PnL is
//! settled against margin, so a leveraged loss can consume at most the
//! margin it put up.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::executor::Fill;
use crate::storage::{CloseRecord, PartialRecord, Store};
use crate::strategy::planner::OrderPlan;
use crate::types::{EngineError, ExitReason, Position, PositionStatus};

/// Result of recording a full close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CloseOutcome {
    /// This call closed the position. `realized_pnl` is lifetime PnL
    /// including partial exits and entry fees.
    Closed { realized_pnl: f64, credit: f64 },
    /// Someone else closed it first; nothing was credited.
    AlreadyClosed,
}

/// Result of recording a partial exit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialOutcome {
    pub realized_pnl: f64,
    pub credit: f64,
}

pub struct Ledger {
    store: Arc<dyn Store>,
}

fn check_fill(fill: &Fill) -> Result<(), EngineError> {
    let finite = [fill.price, fill.quantity, fill.notional, fill.fees]
        .iter()
        .all(|v| v.is_finite());
    if !finite || fill.price <= 0.0 || fill.quantity <= 0.0 || fill.fees < 0.0 {
        return Err(EngineError::ExecutionFailure(format!("degenerate fill {fill:?}")));
    }
    Ok(())
}

/// Margin released and quote currency returned when `fill` sells out of
/// `position`.
fn settle(position: &Position, fill: &Fill) -> (f64, f64) {
    let fraction = (fill.quantity / position.quantity).min(1.0);
    let released = position.cost_basis * fraction;
    let gross = position.side.direction() * (fill.price - position.entry_price) * fill.quantity;
    let credit = (released + gross - fill.fees).max(0.0);
    (released, credit)
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Equity for risk purposes: free balance plus margin committed to open
    /// positions. Unrealized PnL is not counted.
    pub async fn equity(&self, account_id: &str) -> Result<f64, EngineError> {
        let account = self
            .store
            .load_account(account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("account {account_id}")))?;
        let committed: f64 = self
            .store
            .open_positions(account_id)
            .await?
            .iter()
            .map(|p| p.cost_basis)
            .sum();
        Ok(account.balance + committed)
    }

    /// Debit the entry and create the open position.
    pub async fn record_open(
        &self,
        owner_id: &str,
        chain: &str,
        plan: &OrderPlan,
        fill: &Fill,
        now: DateTime<Utc>,
    ) -> Result<Position, EngineError> {
        check_fill(fill)?;
        let leverage = plan.leverage.max(1.0);
        let margin = fill.notional / leverage;

        let position = Position {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            asset_id: plan.asset_id.clone(),
            symbol: plan.symbol.clone(),
            chain: chain.to_string(),
            side: plan.side,
            entry_price: fill.price,
            stop_price: Some(plan.stop_price),
            quantity: fill.quantity,
            cost_basis: margin,
            leverage,
            fees_paid: fill.fees,
            peak_price: fill.price,
            breakeven_armed: false,
            partial_sold_qty: 0.0,
            realized_pnl: 0.0,
            status: PositionStatus::Open,
            opened_at: now,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            tx_hash: fill.tx_hash.clone(),
        };

        self.store.open_position(&position, margin + fill.fees).await?;
        info!(
            account_id = %owner_id,
            position = %position,
            debit = format!("${:.2}", margin + fill.fees),
            stop = plan.stop_price,
            targets = ?plan.targets,
            trailing_pct = plan.trailing_pct,
            "Position opened"
        );
        Ok(position)
    }

    /// Reduce the position by the filled quantity and credit the proceeds.
    pub async fn record_partial(&self, position: &Position, fill: &Fill) -> Result<PartialOutcome, EngineError> {
        check_fill(fill)?;
        if fill.quantity >= position.quantity {
            return Err(EngineError::InvalidDecision(format!(
                "partial exit of {} would empty position {}",
                fill.quantity, position.id
            )));
        }
        let (released, credit) = settle(position, fill);
        let realized_pnl = credit - released;

        self.store
            .reduce_position(&PartialRecord {
                position_id: position.id.clone(),
                owner_id: position.owner_id.clone(),
                sold_quantity: fill.quantity,
                remaining_quantity: position.quantity - fill.quantity,
                remaining_cost_basis: position.cost_basis - released,
                realized_pnl,
                credit,
            })
            .await?;

        info!(
            position_id = %position.id,
            sold = fill.quantity,
            pnl = format!("${:.2}", realized_pnl),
            "Partial exit recorded"
        );
        Ok(PartialOutcome { realized_pnl, credit })
    }

    /// Close the position. A conflicting close is retried once after
    /// re-reading the position; if it turns out to be closed already the
    /// close counts as done.
    pub async fn record_close(
        &self,
        position: &Position,
        fill: &Fill,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<CloseOutcome, EngineError> {
        check_fill(fill)?;
        let (released, credit) = settle(position, fill);
        let realized_pnl = position.realized_pnl + (credit - released) - position.fees_paid;

        let record = CloseRecord {
            position_id: position.id.clone(),
            owner_id: position.owner_id.clone(),
            exit_price: fill.price,
            exit_time: now,
            reason,
            realized_pnl,
            credit,
            tx_hash: fill.tx_hash.clone(),
        };

        match self.store.close_position(&record).await {
            Ok(()) => {}
            Err(EngineError::PersistenceConflict(msg)) => {
                warn!(position_id = %position.id, conflict = %msg, "Close conflicted, re-reading position");
                match self.store.load_position(&position.id).await? {
                    Some(current) if !current.is_open() => return Ok(CloseOutcome::AlreadyClosed),
                    Some(_) => self.store.close_position(&record).await?,
                    None => return Err(EngineError::NotFound(format!("position {}", position.id))),
                }
            }
            Err(e) => return Err(e),
        }

        info!(
            position_id = %position.id,
            reason = %reason,
            exit_price = fill.price,
            pnl = format!("${:.2}", realized_pnl),
            "Position closed"
        );
        Ok(CloseOutcome::Closed { realized_pnl, credit })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::storage::SqliteStore;
    use crate::types::{Account, ExecutionMode, Side};

    fn make_plan(asset: &str, size: f64, leverage: f64) -> OrderPlan {
        OrderPlan {
            asset_id: asset.into(),
            symbol: "TKN".into(),
            side: Side::Long,
            reference_price: 1.0,
            entry_price: 1.0,
            stop_price: 0.92,
            stop_distance_pct: 8.0,
            targets: vec![1.12, 1.24],
            trailing_pct: 8.0,
            size,
            quantity: size,
            leverage,
            margin: size / leverage,
            fees: 0.0,
            risk_amount: 4.0,
        }
    }

    fn make_fill(price: f64, quantity: f64, fees: f64) -> Fill {
        Fill {
            price,
            quantity,
            notional: price * quantity,
            fees,
            tx_hash: None,
        }
    }

    async fn make_ledger(balance: f64) -> (Ledger, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let account = Account::new("acct", "base", ExecutionMode::Paper, balance, Settings::default());
        store.insert_account(&account).await.unwrap();
        (Ledger::new(store.clone()), store)
    }

    async fn balance(store: &Arc<dyn Store>) -> f64 {
        store.load_account("acct").await.unwrap().unwrap().balance
    }

    #[tokio::test]
    async fn test_open_then_close_at_profit() {
        let (ledger, store) = make_ledger(1000.0).await;
        let t = Utc::now();
        let pos = ledger
            .record_open("acct", "base", &make_plan("0xa", 100.0, 1.0), &make_fill(1.0, 100.0, 0.3), t)
            .await
            .unwrap();
        assert!((balance(&store).await - 899.7).abs() < 1e-9);
        assert!((ledger.equity("acct").await.unwrap() - 999.7).abs() < 1e-9);

        let outcome = ledger
            .record_close(&pos, &make_fill(1.2, 100.0, 0.36), ExitReason::TakeProfit, t)
            .await
            .unwrap();
        let CloseOutcome::Closed { realized_pnl, credit } = outcome else {
            panic!("expected close");
        };
        assert!((credit - 119.64).abs() < 1e-9);
        assert!((realized_pnl - 19.34).abs() < 1e-9);
        assert!((balance(&store).await - 1019.34).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_leveraged_loss_capped_at_margin() {
        let (ledger, store) = make_ledger(1000.0).await;
        let t = Utc::now();
        let pos = ledger
            .record_open("acct", "base", &make_plan("0xa", 500.0, 5.0), &make_fill(1.0, 500.0, 0.0), t)
            .await
            .unwrap();
        assert_eq!(pos.cost_basis, 100.0);
        assert_eq!(balance(&store).await, 900.0);

        // -30% on 5x would be -150, but only 100 of margin is at stake
        ledger
            .record_close(&pos, &make_fill(0.7, 500.0, 0.0), ExitReason::StopLoss, t)
            .await
            .unwrap();
        assert_eq!(balance(&store).await, 900.0);
    }

    #[tokio::test]
    async fn test_partial_then_close() {
        let (ledger, store) = make_ledger(1000.0).await;
        let t = Utc::now();
        let pos = ledger
            .record_open("acct", "base", &make_plan("0xa", 100.0, 1.0), &make_fill(1.0, 100.0, 0.0), t)
            .await
            .unwrap();

        let partial = ledger.record_partial(&pos, &make_fill(1.2, 50.0, 0.0)).await.unwrap();
        assert!((partial.realized_pnl - 10.0).abs() < 1e-9);
        assert!((balance(&store).await - 960.0).abs() < 1e-9);

        let reduced = store.load_position(&pos.id).await.unwrap().unwrap();
        assert_eq!(reduced.quantity, 50.0);
        assert!((reduced.cost_basis - 50.0).abs() < 1e-9);

        let CloseOutcome::Closed { realized_pnl, .. } = ledger
            .record_close(&reduced, &make_fill(1.0, 50.0, 0.0), ExitReason::BreakevenStop, t)
            .await
            .unwrap()
        else {
            panic!("expected close");
        };
        assert!((realized_pnl - 10.0).abs() < 1e-9);
        assert!((balance(&store).await - 1010.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_partial_cannot_empty_position() {
        let (ledger, _store) = make_ledger(1000.0).await;
        let pos = ledger
            .record_open("acct", "base", &make_plan("0xa", 100.0, 1.0), &make_fill(1.0, 100.0, 0.0), Utc::now())
            .await
            .unwrap();
        let err = ledger.record_partial(&pos, &make_fill(1.1, 100.0, 0.0)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidDecision(_)));
    }

    #[tokio::test]
    async fn test_double_close_credits_once() {
        let (ledger, store) = make_ledger(1000.0).await;
        let t = Utc::now();
        let pos = ledger
            .record_open("acct", "base", &make_plan("0xa", 100.0, 1.0), &make_fill(1.0, 100.0, 0.0), t)
            .await
            .unwrap();

        let first = ledger
            .record_close(&pos, &make_fill(1.1, 100.0, 0.0), ExitReason::TakeProfit, t)
            .await
            .unwrap();
        assert!(matches!(first, CloseOutcome::Closed { .. }));

        // A second closer working from a stale copy
        let second = ledger
            .record_close(&pos, &make_fill(1.1, 100.0, 0.0), ExitReason::TrailingStop, t)
            .await
            .unwrap();
        assert_eq!(second, CloseOutcome::AlreadyClosed);
        assert!((balance(&store).await - 1010.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_open_without_funds_leaves_no_trace() {
        let (ledger, store) = make_ledger(50.0).await;
        let err = ledger
            .record_open("acct", "base", &make_plan("0xa", 100.0, 1.0), &make_fill(1.0, 100.0, 0.0), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
        assert_eq!(balance(&store).await, 50.0);
        assert!(store.open_positions("acct").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_degenerate_fill_rejected() {
        let (ledger, _store) = make_ledger(1000.0).await;
        let err = ledger
            .record_open("acct", "base", &make_plan("0xa", 100.0, 1.0), &make_fill(f64::NAN, 100.0, 0.0), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExecutionFailure(_)));
    }
}
