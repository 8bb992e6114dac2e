//! SQLite-backed store.
//!
//! Timestamps are stored as RFC 3339 text, settings/risk/blacklist as JSON.
//! Settings are re-read through `SettingsInput` so stored values are
//! clamped again on load.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use super::{CloseRecord, PartialRecord, Store};
use crate::config::{Settings, SettingsInput};
use crate::types::{
    Account, BotStatus, EngineError, Position, PositionStatus, RiskState, TradeStats,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY,
        chain TEXT NOT NULL,
        mode TEXT NOT NULL,
        balance REAL NOT NULL,
        starting_balance REAL NOT NULL,
        wallet_address TEXT,
        sealed_key TEXT,
        settings TEXT NOT NULL,
        risk TEXT NOT NULL,
        blacklist TEXT NOT NULL,
        bot_status TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS positions (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL REFERENCES accounts(id),
        asset_id TEXT NOT NULL,
        symbol TEXT NOT NULL,
        chain TEXT NOT NULL,
        side TEXT NOT NULL,
        entry_price REAL NOT NULL,
        stop_price REAL,
        quantity REAL NOT NULL,
        cost_basis REAL NOT NULL,
        leverage REAL NOT NULL,
        fees_paid REAL NOT NULL,
        peak_price REAL NOT NULL,
        breakeven_armed INTEGER NOT NULL DEFAULT 0,
        partial_sold_qty REAL NOT NULL DEFAULT 0,
        realized_pnl REAL NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        opened_at TEXT NOT NULL,
        exit_price REAL,
        exit_time TEXT,
        exit_reason TEXT,
        tx_hash TEXT
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_one_open
        ON positions(owner_id, asset_id) WHERE status = 'OPEN'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_positions_owner_closed
        ON positions(owner_id, asset_id, exit_time)
    "#,
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and run migrations. In-memory databases get a single
    /// connection so every query sees the same database.
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            // Dropping the last connection drops the database.
            options = options.idle_timeout(None).max_lifetime(None);
        }
        let pool = options
            .connect(url)
            .await
            .with_context(|| format!("Failed to open database {url}"))?;
        let store = Self { pool };
        store.migrate().await?;
        info!(url, "Database ready");
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("Schema migration failed")?;
        }
        Ok(())
    }

    async fn balance_of(&self, account_id: &str) -> Result<Option<f64>> {
        let row = sqlx::query("SELECT balance FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<f64, _>("balance")))
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn db_error(e: sqlx::Error) -> EngineError {
    EngineError::Persistence(anyhow::Error::new(e))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Bad timestamp: {s}"))?
        .with_timezone(&Utc))
}

fn row_to_account(row: &SqliteRow) -> Result<Account> {
    let settings_json: String = row.try_get("settings")?;
    let settings_input: SettingsInput =
        serde_json::from_str(&settings_json).context("Bad settings JSON")?;
    let risk: RiskState = serde_json::from_str(&row.try_get::<String, _>("risk")?).context("Bad risk JSON")?;
    let blacklist: Vec<String> =
        serde_json::from_str(&row.try_get::<String, _>("blacklist")?).context("Bad blacklist JSON")?;

    Ok(Account {
        id: row.try_get("id")?,
        chain: row.try_get("chain")?,
        mode: row.try_get::<String, _>("mode")?.parse()?,
        balance: row.try_get("balance")?,
        starting_balance: row.try_get("starting_balance")?,
        wallet_address: row.try_get("wallet_address")?,
        sealed_key: row.try_get("sealed_key")?,
        settings: Settings::from_input(&settings_input),
        risk,
        blacklist,
        bot_status: row.try_get::<String, _>("bot_status")?.parse()?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn row_to_position(row: &SqliteRow) -> Result<Position> {
    let exit_time: Option<String> = row.try_get("exit_time")?;
    let exit_reason: Option<String> = row.try_get("exit_reason")?;
    let status: PositionStatus = row.try_get::<String, _>("status")?.parse()?;

    Ok(Position {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        asset_id: row.try_get("asset_id")?,
        symbol: row.try_get("symbol")?,
        chain: row.try_get("chain")?,
        side: row.try_get::<String, _>("side")?.parse()?,
        entry_price: row.try_get("entry_price")?,
        stop_price: row.try_get("stop_price")?,
        quantity: row.try_get("quantity")?,
        cost_basis: row.try_get("cost_basis")?,
        leverage: row.try_get("leverage")?,
        fees_paid: row.try_get("fees_paid")?,
        peak_price: row.try_get("peak_price")?,
        breakeven_armed: row.try_get("breakeven_armed")?,
        partial_sold_qty: row.try_get("partial_sold_qty")?,
        realized_pnl: row.try_get("realized_pnl")?,
        status,
        opened_at: parse_time(&row.try_get::<String, _>("opened_at")?)?,
        exit_price: row.try_get("exit_price")?,
        exit_time: exit_time.as_deref().map(parse_time).transpose()?,
        exit_reason: exit_reason.as_deref().map(str::parse).transpose()?,
        tx_hash: row.try_get("tx_hash")?,
    })
}

// ---------------------------------------------------------------------------
// Store implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Store for SqliteStore {
    async fn insert_account(&self, account: &Account) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO accounts (
                id, chain, mode, balance, starting_balance, wallet_address, sealed_key,
                settings, risk, blacklist, bot_status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(&account.chain)
        .bind(account.mode.as_str())
        .bind(account.balance)
        .bind(account.starting_balance)
        .bind(&account.wallet_address)
        .bind(&account.sealed_key)
        .bind(serde_json::to_string(&account.settings)?)
        .bind(serde_json::to_string(&account.risk)?)
        .bind(serde_json::to_string(&account.blacklist)?)
        .bind(account.bot_status.as_str())
        .bind(account.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to insert account")?;
        Ok(result.rows_affected() == 1)
    }

    async fn load_account(&self, id: &str) -> Result<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load account")?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM accounts ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list accounts")?;
        rows.iter().map(row_to_account).collect()
    }

    async fn save_risk_state(&self, account_id: &str, risk: &RiskState) -> Result<()> {
        sqlx::query("UPDATE accounts SET risk = ? WHERE id = ?")
            .bind(serde_json::to_string(risk)?)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .context("Failed to save risk state")?;
        Ok(())
    }

    async fn set_bot_status(&self, account_id: &str, status: BotStatus) -> Result<()> {
        sqlx::query("UPDATE accounts SET bot_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(account_id)
            .execute(&self.pool)
            .await
            .context("Failed to save bot status")?;
        Ok(())
    }

    async fn set_sealed_key(&self, account_id: &str, wallet_address: Option<&str>, sealed_key: &str) -> Result<()> {
        sqlx::query("UPDATE accounts SET sealed_key = ?, wallet_address = COALESCE(?, wallet_address) WHERE id = ?")
            .bind(sealed_key)
            .bind(wallet_address)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .context("Failed to store sealed key")?;
        Ok(())
    }

    async fn open_positions(&self, owner_id: &str) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE owner_id = ? AND status = 'OPEN' ORDER BY opened_at")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load open positions")?;
        rows.iter().map(row_to_position).collect()
    }

    async fn load_position(&self, position_id: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE id = ?")
            .bind(position_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load position")?;
        row.as_ref().map(row_to_position).transpose()
    }

    async fn last_closed(&self, owner_id: &str, asset_id: &str) -> Result<Option<Position>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM positions
            WHERE owner_id = ? AND asset_id = ? COLLATE NOCASE AND status = 'CLOSED'
            ORDER BY exit_time DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load last closed position")?;
        row.as_ref().map(row_to_position).transpose()
    }

    async fn trade_stats(&self, owner_id: &str) -> Result<TradeStats> {
        let rows = sqlx::query(
            r#"
            SELECT side, entry_price, exit_price, realized_pnl FROM positions
            WHERE owner_id = ? AND status = 'CLOSED' AND exit_price IS NOT NULL
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load trade history")?;

        let mut stats = TradeStats::default();
        let (mut win_sum, mut loss_sum) = (0.0, 0.0);
        for row in &rows {
            let side: crate::types::Side = row.try_get::<String, _>("side")?.parse()?;
            let entry: f64 = row.try_get("entry_price")?;
            let exit: f64 = row.try_get("exit_price")?;
            let pnl: f64 = row.try_get("realized_pnl")?;
            if entry <= 0.0 {
                continue;
            }
            let pct = side.direction() * (exit - entry) / entry * 100.0;
            stats.trades += 1;
            if pnl < 0.0 {
                loss_sum += pct.abs();
            } else {
                stats.wins += 1;
                win_sum += pct.abs();
            }
        }
        let losses = stats.trades - stats.wins;
        if stats.wins > 0 {
            stats.avg_win_pct = win_sum / stats.wins as f64;
        }
        if losses > 0 {
            stats.avg_loss_pct = loss_sum / losses as f64;
        }
        Ok(stats)
    }

    async fn open_position(&self, p: &Position, debit: f64) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let debited = sqlx::query("UPDATE accounts SET balance = balance - ? WHERE id = ? AND balance >= ?")
            .bind(debit)
            .bind(&p.owner_id)
            .bind(debit)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        if debited.rows_affected() == 0 {
            tx.rollback().await.map_err(db_error)?;
            return match self.balance_of(&p.owner_id).await? {
                Some(available) => Err(EngineError::InsufficientBalance { needed: debit, available }),
                None => Err(EngineError::NotFound(format!("account {}", p.owner_id))),
            };
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO positions (
                id, owner_id, asset_id, symbol, chain, side, entry_price, stop_price,
                quantity, cost_basis, leverage, fees_paid, peak_price, breakeven_armed,
                partial_sold_qty, realized_pnl, status, opened_at, tx_hash
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'OPEN', ?, ?)
            "#,
        )
        .bind(&p.id)
        .bind(&p.owner_id)
        .bind(&p.asset_id)
        .bind(&p.symbol)
        .bind(&p.chain)
        .bind(p.side.as_str())
        .bind(p.entry_price)
        .bind(p.stop_price)
        .bind(p.quantity)
        .bind(p.cost_basis)
        .bind(p.leverage)
        .bind(p.fees_paid)
        .bind(p.peak_price)
        .bind(p.breakeven_armed)
        .bind(p.partial_sold_qty)
        .bind(p.realized_pnl)
        .bind(p.opened_at.to_rfc3339())
        .bind(&p.tx_hash)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tx.rollback().await.map_err(db_error)?;
                return Err(EngineError::PersistenceConflict(format!(
                    "{} already has an open position in {}",
                    p.owner_id, p.asset_id
                )));
            }
            Err(e) => return Err(db_error(e)),
        }

        tx.commit().await.map_err(db_error)?;
        debug!(position_id = %p.id, owner = %p.owner_id, debit, "Position opened");
        Ok(())
    }

    async fn reduce_position(&self, r: &PartialRecord) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let updated = sqlx::query(
            r#"
            UPDATE positions
            SET quantity = ?, cost_basis = ?, partial_sold_qty = partial_sold_qty + ?,
                realized_pnl = realized_pnl + ?
            WHERE id = ? AND status = 'OPEN' AND partial_sold_qty = 0
            "#,
        )
        .bind(r.remaining_quantity)
        .bind(r.remaining_cost_basis)
        .bind(r.sold_quantity)
        .bind(r.realized_pnl)
        .bind(&r.position_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(db_error)?;
            return Err(EngineError::PersistenceConflict(format!(
                "position {} is not open for a partial exit",
                r.position_id
            )));
        }

        sqlx::query("UPDATE accounts SET balance = balance + ? WHERE id = ?")
            .bind(r.credit)
            .bind(&r.owner_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn close_position(&self, c: &CloseRecord) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let updated = sqlx::query(
            r#"
            UPDATE positions
            SET status = 'CLOSED', exit_price = ?, exit_time = ?, exit_reason = ?,
                realized_pnl = ?, cost_basis = 0, tx_hash = COALESCE(?, tx_hash)
            WHERE id = ? AND status = 'OPEN'
            "#,
        )
        .bind(c.exit_price)
        .bind(c.exit_time.to_rfc3339())
        .bind(c.reason.as_str())
        .bind(c.realized_pnl)
        .bind(&c.tx_hash)
        .bind(&c.position_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(db_error)?;
            return Err(EngineError::PersistenceConflict(format!(
                "position {} is not open",
                c.position_id
            )));
        }

        sqlx::query("UPDATE accounts SET balance = balance + ? WHERE id = ?")
            .bind(c.credit)
            .bind(&c.owner_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        debug!(position_id = %c.position_id, reason = %c.reason, credit = c.credit, "Position closed");
        Ok(())
    }

    async fn update_marks(&self, position_id: &str, peak_price: f64, breakeven_armed: bool) -> Result<()> {
        sqlx::query("UPDATE positions SET peak_price = ?, breakeven_armed = ? WHERE id = ? AND status = 'OPEN'")
            .bind(peak_price)
            .bind(breakeven_armed)
            .bind(position_id)
            .execute(&self.pool)
            .await
            .context("Failed to update position marks")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
