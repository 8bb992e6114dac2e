//! Persistence layer.
//!
//! The `Store` trait is what the engine depends on; `SqliteStore` is the
//! sqlx-backed implementation. Every position status transition and every
//! balance movement goes through one of the three atomic operations
//! (`open_position`, `reduce_position`, `close_position`), each a single
//! transaction guarded by the expected prior state.

pub mod sqlite;

pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Account, BotStatus, EngineError, ExitReason, Position, RiskState, TradeStats};

/// Full close of an open position.
#[derive(Debug, Clone)]
pub struct CloseRecord {
    pub position_id: String,
    pub owner_id: String,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    pub reason: ExitReason,
    /// Lifetime PnL of the position, partial exits included.
    pub realized_pnl: f64,
    /// Quote currency returned to the balance by this close.
    pub credit: f64,
    pub tx_hash: Option<String>,
}

/// Partial exit of an open position.
#[derive(Debug, Clone)]
pub struct PartialRecord {
    pub position_id: String,
    pub owner_id: String,
    pub sold_quantity: f64,
    pub remaining_quantity: f64,
    pub remaining_cost_basis: f64,
    pub realized_pnl: f64,
    pub credit: f64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert an account if no account with that id exists. Returns true if
    /// inserted.
    async fn insert_account(&self, account: &Account) -> Result<bool>;

    async fn load_account(&self, id: &str) -> Result<Option<Account>>;

    async fn list_accounts(&self) -> Result<Vec<Account>>;

    async fn save_risk_state(&self, account_id: &str, risk: &RiskState) -> Result<()>;

    async fn set_bot_status(&self, account_id: &str, status: BotStatus) -> Result<()>;

    async fn set_sealed_key(&self, account_id: &str, wallet_address: Option<&str>, sealed_key: &str) -> Result<()>;

    async fn open_positions(&self, owner_id: &str) -> Result<Vec<Position>>;

    async fn load_position(&self, position_id: &str) -> Result<Option<Position>>;

    /// Most recently closed position for (owner, asset). Drives cooldowns.
    async fn last_closed(&self, owner_id: &str, asset_id: &str) -> Result<Option<Position>>;

    async fn trade_stats(&self, owner_id: &str) -> Result<TradeStats>;

    /// Debit the owner's balance by `debit` and insert `position`, or do
    /// neither.
    async fn open_position(&self, position: &Position, debit: f64) -> Result<(), EngineError>;

    /// Reduce an open position that has not been partially exited yet and
    /// credit the balance.
    async fn reduce_position(&self, partial: &PartialRecord) -> Result<(), EngineError>;

    /// Transition OPEN → CLOSED and credit the balance. Fails with
    /// `PersistenceConflict` when the position is not OPEN.
    async fn close_position(&self, close: &CloseRecord) -> Result<(), EngineError>;

    /// Persist peak price and breakeven flag.
    async fn update_marks(&self, position_id: &str, peak_price: f64, breakeven_armed: bool) -> Result<()>;
}
