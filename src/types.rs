//! Shared types for the TIDEWATCH agent.
//!
//! These types form the data model used across all modules.
//! They are kept free of I/O so that the strategy functions, the engine
//! and the storage layer can depend on them without circular references.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::Settings;

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// An asset as reported by a single market-data provider.
///
/// Every field except the identity is optional: providers routinely omit
/// holder counts, buy/sell splits or short-horizon price changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCandidate {
    pub asset_id: String,
    pub symbol: Option<String>,
    pub chain: String,
    pub price: Option<f64>,
    pub change_24h: Option<f64>,
    pub change_1h: Option<f64>,
    pub change_5m: Option<f64>,
    pub volume_24h: Option<f64>,
    pub liquidity: Option<f64>,
    pub buy_volume_24h: Option<f64>,
    pub sell_volume_24h: Option<f64>,
    pub holders: Option<u64>,
    pub verified: bool,
    /// Provider name, used for corroboration counting.
    pub source: String,
}

/// A merged, scored asset snapshot eligible for entry consideration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub asset_id: String,
    pub symbol: String,
    pub chain: String,
    pub price: f64,
    pub change_24h: f64,
    pub change_1h: f64,
    pub change_5m: f64,
    pub volume_24h: f64,
    pub liquidity: f64,
    pub buy_volume_24h: f64,
    pub sell_volume_24h: f64,
    pub holders: Option<u64>,
    pub verified: bool,
    /// Number of distinct providers that reported this asset.
    pub providers: u32,
    pub quality_score: f64,
}

impl Candidate {
    /// Share of 24h volume on the buy side (0.0–1.0). `None` when the
    /// provider did not split volume.
    pub fn buy_pressure(&self) -> Option<f64> {
        let total = self.buy_volume_24h + self.sell_volume_24h;
        if total > 0.0 {
            Some(self.buy_volume_24h / total)
        } else {
            None
        }
    }

    /// 24h volume divided by liquidity. High values indicate wash trading.
    pub fn volume_liquidity_ratio(&self) -> f64 {
        if self.liquidity > 0.0 {
            self.volume_24h / self.liquidity
        } else {
            f64::INFINITY
        }
    }

    /// Build a candidate from a provider record with missing numeric
    /// fields defaulted to zero. The quality score is filled in later.
    pub fn from_raw(raw: RawCandidate) -> Option<Self> {
        let price = raw.price.filter(|p| p.is_finite() && *p > 0.0)?;
        let symbol = raw.symbol.unwrap_or_else(|| short_id(&raw.asset_id));
        Some(Self {
            asset_id: raw.asset_id,
            symbol,
            chain: raw.chain,
            price,
            change_24h: raw.change_24h.unwrap_or(0.0),
            change_1h: raw.change_1h.unwrap_or(0.0),
            change_5m: raw.change_5m.unwrap_or(0.0),
            volume_24h: raw.volume_24h.unwrap_or(0.0),
            liquidity: raw.liquidity.unwrap_or(0.0),
            buy_volume_24h: raw.buy_volume_24h.unwrap_or(0.0),
            sell_volume_24h: raw.sell_volume_24h.unwrap_or(0.0),
            holders: raw.holders,
            verified: raw.verified,
            providers: 1,
            quality_score: 0.0,
        })
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) ${:.8} | 1h {:+.1}% | vol ${:.0} | liq ${:.0} | score {:.0}",
            self.symbol,
            self.chain,
            self.price,
            self.change_1h,
            self.volume_24h,
            self.liquidity,
            self.quality_score,
        )
    }
}

fn short_id(asset_id: &str) -> String {
    asset_id.chars().take(6).collect()
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for longs, -1 for shorts.
    pub fn direction(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    /// The more favourable of two prices for this side.
    pub fn favorable(&self, a: f64, b: f64) -> f64 {
        match self {
            Side::Long => a.max(b),
            Side::Short => a.min(b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LONG" | "BUY" => Ok(Side::Long),
            "SHORT" | "SELL" => Ok(Side::Short),
            _ => Err(anyhow::anyhow!("Unknown side: {s}")),
        }
    }
}

/// Persistent position status. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }
}

impl std::str::FromStr for PositionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(PositionStatus::Open),
            "CLOSED" => Ok(PositionStatus::Closed),
            _ => Err(anyhow::anyhow!("Unknown position status: {s}")),
        }
    }
}

/// Why a position was (fully) closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    BreakevenStop,
    EarlyBail,
    TimeLimit,
    StalePosition,
    TrailingStop,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::BreakevenStop => "breakeven_stop",
            ExitReason::EarlyBail => "early_bail",
            ExitReason::TimeLimit => "time_limit",
            ExitReason::StalePosition => "stale_position",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Manual => "manual",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExitReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop_loss" => Ok(ExitReason::StopLoss),
            "take_profit" => Ok(ExitReason::TakeProfit),
            "breakeven_stop" => Ok(ExitReason::BreakevenStop),
            "early_bail" => Ok(ExitReason::EarlyBail),
            "time_limit" => Ok(ExitReason::TimeLimit),
            "stale_position" => Ok(ExitReason::StalePosition),
            "trailing_stop" => Ok(ExitReason::TrailingStop),
            "manual" => Ok(ExitReason::Manual),
            _ => Err(anyhow::anyhow!("Unknown exit reason: {s}")),
        }
    }
}

/// How an account's orders are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Paper,
    Live,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Paper => "paper",
            ExecutionMode::Live => "live",
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper" | "simulated" => Ok(ExecutionMode::Paper),
            "live" => Ok(ExecutionMode::Live),
            _ => Err(anyhow::anyhow!("Unknown execution mode: {s}")),
        }
    }
}

/// Bot lifecycle status as persisted on the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotStatus {
    Stopped,
    Running,
    Paused,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Stopped => "STOPPED",
            BotStatus::Running => "RUNNING",
            BotStatus::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BotStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOPPED" => Ok(BotStatus::Stopped),
            "RUNNING" => Ok(BotStatus::Running),
            "PAUSED" => Ok(BotStatus::Paused),
            _ => Err(anyhow::anyhow!("Unknown bot status: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A persisted position. At most one `Open` position exists per
/// (owner, asset); once `Closed` it is never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub owner_id: String,
    pub asset_id: String,
    pub symbol: String,
    pub chain: String,
    pub side: Side,
    pub entry_price: f64,
    /// Protective stop resolved by the planner at entry. `None` falls back
    /// to the account's stop-loss percentage.
    pub stop_price: Option<f64>,
    /// Remaining quantity (reduced by partial exits).
    pub quantity: f64,
    /// Margin still committed to the remaining quantity.
    pub cost_basis: f64,
    pub leverage: f64,
    /// Entry fees paid.
    pub fees_paid: f64,
    /// Most favourable price seen since entry.
    pub peak_price: f64,
    pub breakeven_armed: bool,
    pub partial_sold_qty: f64,
    /// PnL already realized by partial exits (net of fees).
    pub realized_pnl: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub tx_hash: Option<String>,
}

impl Position {
    /// Unrealized PnL in percent of entry at `price`.
    pub fn pnl_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.side.direction() * (price - self.entry_price) / self.entry_price * 100.0
    }

    /// Unrealized PnL in quote currency at `price` for the remaining quantity.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.side.direction() * (price - self.entry_price) * self.quantity
    }

    /// Minutes elapsed since entry.
    pub fn held_minutes(&self, now: DateTime<Utc>) -> f64 {
        (now - self.opened_at).num_seconds() as f64 / 60.0
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Whether the position ended at a loss. `None` while still open.
    pub fn was_loss(&self) -> Option<bool> {
        match self.status {
            PositionStatus::Closed => Some(self.realized_pnl < 0.0),
            PositionStatus::Open => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} qty={:.4} entry=${:.8} peak=${:.8} basis=${:.2}",
            self.status.as_str(),
            self.side,
            self.symbol,
            self.quantity,
            self.entry_price,
            self.peak_price,
            self.cost_basis,
        )
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Circuit-breaker state embedded in an account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskState {
    /// Equity at the first activity of the current calendar day (UTC).
    pub daily_baseline: f64,
    pub daily_baseline_date: Option<NaiveDate>,
    /// PnL realized since the daily baseline was taken.
    pub daily_realized_pnl: f64,
    pub consecutive_losses: u32,
    pub consecutive_wins: u32,
    pub pause_reason: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
}

/// Aggregate statistics over an account's closed positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub trades: u32,
    pub wins: u32,
    /// Mean PnL % of winning trades (positive).
    pub avg_win_pct: f64,
    /// Mean PnL % of losing trades, as a positive number.
    pub avg_loss_pct: f64,
}

impl TradeStats {
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64
        }
    }

    /// Average reward-to-risk ratio. `None` when there are no losses to
    /// divide by.
    pub fn reward_risk(&self) -> Option<f64> {
        if self.avg_loss_pct > 0.0 {
            Some(self.avg_win_pct / self.avg_loss_pct)
        } else {
            None
        }
    }
}

/// A trading account and everything the engine needs to trade it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub chain: String,
    pub mode: ExecutionMode,
    /// Free quote-currency balance (margin of open positions excluded).
    pub balance: f64,
    pub starting_balance: f64,
    pub wallet_address: Option<String>,
    /// Sealed signing key (see `vault`). Never logged.
    #[serde(skip_serializing)]
    pub sealed_key: Option<String>,
    pub settings: Settings,
    pub risk: RiskState,
    pub blacklist: Vec<String>,
    pub bot_status: BotStatus,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: &str, chain: &str, mode: ExecutionMode, balance: f64, settings: Settings) -> Self {
        Self {
            id: id.to_string(),
            chain: chain.to_string(),
            mode,
            balance,
            starting_balance: balance,
            wallet_address: None,
            sealed_key: None,
            settings,
            risk: RiskState::default(),
            blacklist: Vec::new(),
            bot_status: BotStatus::Stopped,
            created_at: Utc::now(),
        }
    }

    pub fn is_blacklisted(&self, asset_id: &str) -> bool {
        self.blacklist.iter().any(|a| a.eq_ignore_ascii_case(asset_id))
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the trading engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Data unavailable ({source_name}): {message}")]
    DataUnavailable { source_name: String, message: String },

    #[error("Invalid decision: {0}")]
    InvalidDecision(String),

    #[error("Insufficient balance: need ${needed:.2}, have ${available:.2}")]
    InsufficientBalance { needed: f64, available: f64 },

    #[error("Execution failed: {0}")]
    ExecutionFailure(String),

    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] anyhow::Error),

    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),

    #[error("Key vault error: {0}")]
    Vault(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
