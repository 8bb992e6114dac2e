//! Per-account bot scheduler.
//!
//! Each started account gets a `BotSession` and two timer loops: a fast
//! exit loop that manages open positions and a slower entry loop that
//! scans for new ones. Every timer fire runs its tick on a fresh task;
//! a tick that finds its loop lock held is skipped, never queued. Ticks
//! re-check that their session is still registered before any side
//! effect, so a stop takes effect even while a tick is in flight.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::engine::ledger::{CloseOutcome, Ledger};
use crate::engine::aggregator::Aggregator;
use crate::engine::executor::Executors;
use crate::engine::session::{BotSession, BotStatusReport, LogLevel, LoopKind};
use crate::notify::Notifier;
use crate::storage::Store;
use crate::strategy::momentum::MomentumTracker;
use crate::strategy::planner::{self, AccountSnapshot, TradeDecision};
use crate::strategy::{governor, lifecycle};
use crate::types::{
    Account, BotStatus, Candidate, EngineError, ExitReason, Position, RiskState, Side, TradeStats,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// A paused bot was acknowledged and resumed.
    Resumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    /// The previous tick of this loop was still running.
    Skipped,
    /// Entry scanning is suspended by the risk governor.
    Paused,
    /// The bot was stopped; nothing was done.
    Unregistered,
    Failed,
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct BotScheduler {
    store: Arc<dyn Store>,
    ledger: Ledger,
    aggregator: Arc<Aggregator>,
    executors: Executors,
    notifier: Arc<dyn Notifier>,
    sessions: RwLock<HashMap<String, Arc<BotSession>>>,
    /// Last session of each stopped bot, kept for status queries.
    finished: RwLock<HashMap<String, Arc<BotSession>>>,
}

impl BotScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        aggregator: Arc<Aggregator>,
        executors: Executors,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ledger: Ledger::new(Arc::clone(&store)),
            store,
            aggregator,
            executors,
            notifier,
            sessions: RwLock::new(HashMap::new()),
            finished: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn session(&self, account_id: &str) -> Option<Arc<BotSession>> {
        read(&self.sessions).get(account_id).cloned()
    }

    pub fn running_accounts(&self) -> Vec<String> {
        read(&self.sessions).keys().cloned().collect()
    }

    fn is_registered(&self, session: &Arc<BotSession>) -> bool {
        read(&self.sessions)
            .get(&session.account_id)
            .map(|s| Arc::ptr_eq(s, session))
            .unwrap_or(false)
    }

    async fn load_account(&self, account_id: &str) -> Result<Account, EngineError> {
        self.store
            .load_account(account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("account {account_id}")))
    }

    // -----------------------------------------------------------------------
    // Control surface
    // -----------------------------------------------------------------------

    /// Start the bot for `account_id`. Runs one entry tick before arming
    /// the timers. Calling it on a running bot is a no-op; on a paused bot
    /// it acknowledges the pause and resumes scanning.
    pub async fn start(self: &Arc<Self>, account_id: &str) -> Result<StartOutcome, EngineError> {
        let account = self.load_account(account_id).await?;
        let now = Utc::now();

        if let Some(session) = self.session(account_id) {
            if session.status() != BotStatus::Paused {
                session.log(LogLevel::Info, "start requested: already running");
                return Ok(StartOutcome::AlreadyRunning);
            }
            self.update_risk(&session, |risk, equity| governor::acknowledge(risk, equity, now))
                .await?;
            session.set_status(BotStatus::Running, None);
            self.store.set_bot_status(account_id, BotStatus::Running).await?;
            session.log(LogLevel::Info, "pause acknowledged, scanning resumed");
            return Ok(StartOutcome::Resumed);
        }

        let session = Arc::new(BotSession::new(
            account_id,
            MomentumTracker::from_settings(&account.settings),
            now,
        ));

        // Persist before registering: a failure here must leave the bot
        // startable again.
        if account.risk.pause_reason.is_some() {
            self.update_risk(&session, |risk, equity| governor::acknowledge(risk, equity, now))
                .await?;
            session.log(LogLevel::Info, "previous pause acknowledged");
        }
        self.store.set_bot_status(account_id, BotStatus::Running).await?;

        {
            let mut sessions = write(&self.sessions);
            if sessions.contains_key(account_id) {
                return Ok(StartOutcome::AlreadyRunning);
            }
            sessions.insert(account_id.to_string(), Arc::clone(&session));
        }

        let settings = &account.settings;
        session.log(
            LogLevel::Info,
            format!(
                "bot started ({} mode, entry every {}s, exit every {}s)",
                account.mode.as_str(),
                settings.entry_interval_secs,
                settings.exit_interval_secs
            ),
        );

        self.entry_tick(&session).await;

        self.spawn_loop(
            Arc::clone(&session),
            LoopKind::Exit,
            Duration::from_secs_f64(settings.exit_interval_secs),
        );
        self.spawn_loop(
            session,
            LoopKind::Entry,
            Duration::from_secs_f64(settings.entry_interval_secs),
        );
        Ok(StartOutcome::Started)
    }

    /// Stop the bot. Returns false if it was not running.
    pub async fn stop(&self, account_id: &str) -> Result<bool, EngineError> {
        let removed = write(&self.sessions).remove(account_id);
        let Some(session) = removed else {
            self.load_account(account_id).await?;
            return Ok(false);
        };

        session.cancel.cancel();
        session.set_status(BotStatus::Stopped, None);
        session.log(LogLevel::Info, "bot stopped");
        write(&self.finished).insert(account_id.to_string(), session);
        self.store.set_bot_status(account_id, BotStatus::Stopped).await?;
        Ok(true)
    }

    pub async fn stop_all(&self) {
        for account_id in self.running_accounts() {
            if let Err(e) = self.stop(&account_id).await {
                warn!(account_id = %account_id, error = %e, "Failed to stop bot");
            }
        }
    }

    pub async fn status(&self, account_id: &str) -> Result<BotStatusReport, EngineError> {
        let now = Utc::now();
        if let Some(session) = self.session(account_id) {
            return Ok(session.report(now));
        }
        let finished = read(&self.finished).get(account_id).cloned();
        if let Some(session) = finished {
            return Ok(session.report(now));
        }
        let account = self.load_account(account_id).await?;
        let state = match account.bot_status {
            BotStatus::Paused => BotStatus::Paused,
            _ => BotStatus::Stopped,
        };
        Ok(BotStatusReport::idle(account_id, state, account.risk.pause_reason))
    }

    pub async fn status_all(&self) -> Result<Vec<BotStatusReport>, EngineError> {
        let accounts = self.store.list_accounts().await?;
        let mut reports = Vec::with_capacity(accounts.len());
        for account in accounts {
            reports.push(self.status(&account.id).await?);
        }
        Ok(reports)
    }

    fn spawn_loop(self: &Arc<Self>, session: Arc<BotSession>, kind: LoopKind, period: Duration) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = session.cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if !scheduler.is_registered(&session) {
                    break;
                }
                let scheduler = Arc::clone(&scheduler);
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    match kind {
                        LoopKind::Entry => scheduler.entry_tick(&session).await,
                        LoopKind::Exit => scheduler.exit_tick(&session).await,
                    };
                });
            }
            debug!(account_id = %session.account_id, loop_kind = kind.as_str(), "Loop stopped");
        });
    }

    /// Load the account, run `f` on its risk state and save it, with the
    /// session's risk lock held throughout.
    async fn update_risk<R, F>(&self, session: &BotSession, f: F) -> Result<R, EngineError>
    where
        F: FnOnce(&mut RiskState, f64) -> R + Send,
        R: Send,
    {
        let _guard = session.risk_lock.lock().await;
        let mut account = self.load_account(&session.account_id).await?;
        let equity = self.ledger.equity(&session.account_id).await?;
        let out = f(&mut account.risk, equity);
        self.store.save_risk_state(&session.account_id, &account.risk).await?;
        Ok(out)
    }

    async fn pause(&self, session: &BotSession, reason: &str) {
        session.set_status(BotStatus::Paused, Some(reason.to_string()));
        session.log(LogLevel::Warn, format!("PAUSED: {reason}"));
        if let Err(e) = self.store.set_bot_status(&session.account_id, BotStatus::Paused).await {
            warn!(account_id = %session.account_id, error = %e, "Failed to persist pause");
        }
        self.notifier.notify(&session.account_id, "Bot paused", reason);
    }

    // -----------------------------------------------------------------------
    // Entry loop
    // -----------------------------------------------------------------------

    pub async fn entry_tick(&self, session: &Arc<BotSession>) -> TickOutcome {
        let Ok(_guard) = session.entry_lock.try_lock() else {
            debug!(account_id = %session.account_id, "Entry tick still running, skipping");
            return TickOutcome::Skipped;
        };
        if !self.is_registered(session) {
            return TickOutcome::Unregistered;
        }
        if session.status() == BotStatus::Paused {
            return TickOutcome::Paused;
        }
        let scan = session.record_scan();
        debug!(account_id = %session.account_id, scan, "Entry tick");

        match self.run_entry(session).await {
            Ok(outcome) => outcome,
            Err(e) => {
                session.log(LogLevel::Error, format!("entry tick failed: {e}"));
                TickOutcome::Failed
            }
        }
    }

    async fn run_entry(&self, session: &Arc<BotSession>) -> Result<TickOutcome, EngineError> {
        let now = Utc::now();
        let account = self.load_account(&session.account_id).await?;
        let settings = account.settings.clone();
        let starting_balance = account.starting_balance;

        let tripped = self
            .update_risk(session, move |risk, equity| {
                if risk.daily_baseline_date.is_none() {
                    // Never measured before: the day starts from the funded balance.
                    governor::roll_day(risk, starting_balance, now);
                }
                governor::check(risk, equity, &settings, now)
            })
            .await?;
        if let Some(reason) = tripped {
            self.pause(session, &reason).await;
            return Ok(TickOutcome::Paused);
        }

        let open = self.store.open_positions(&account.id).await?;
        let capacity = (account.settings.max_open_positions as usize).saturating_sub(open.len());
        let cycle_cap = capacity.min(account.settings.max_entries_per_cycle as usize);
        if cycle_cap == 0 {
            debug!(account_id = %account.id, open = open.len(), "At position capacity");
            return Ok(TickOutcome::Completed);
        }

        let candidates = self.aggregator.refresh(&account.chain).await;
        session.with_momentum(|m| m.sweep(now));
        if candidates.is_empty() {
            session.log(LogLevel::Info, "scan: no candidates");
            return Ok(TickOutcome::Completed);
        }

        let held: HashSet<String> = open.iter().map(|p| p.asset_id.to_lowercase()).collect();
        let stats = self.store.trade_stats(&account.id).await?;
        let mut balance = account.balance;
        let mut opened = 0usize;

        for candidate in candidates.iter() {
            if opened >= cycle_cap {
                break;
            }
            if !self.is_registered(session) {
                return Ok(TickOutcome::Unregistered);
            }
            if held.contains(&candidate.asset_id.to_lowercase()) {
                continue;
            }
            if account.is_blacklisted(&candidate.asset_id) {
                session.log(LogLevel::Info, format!("skip: blacklisted {}", candidate.symbol));
                continue;
            }
            match self.cooldown_remaining(&account, &candidate.asset_id, now).await {
                Ok(Some(minutes)) => {
                    session.log(
                        LogLevel::Info,
                        format!("skip: cooldown {} ({minutes}m left)", candidate.symbol),
                    );
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    session.log(
                        LogLevel::Warn,
                        format!("skip: {} cooldown check failed: {e}", candidate.symbol),
                    );
                    continue;
                }
            }

            let verdict =
                session.with_momentum(|m| m.observe(&candidate.asset_id, candidate.price, now));
            if !verdict.ready {
                session.log(
                    LogLevel::Info,
                    format!("skip: momentum not confirmed {} ({})", candidate.symbol, verdict.reason),
                );
                continue;
            }

            match self
                .open_candidate(session, &account, candidate, balance, &stats, now)
                .await
            {
                Ok(debit) => {
                    balance -= debit;
                    opened += 1;
                }
                Err(e) => session.log(LogLevel::Warn, format!("skip: {} {e}", candidate.symbol)),
            }
        }
        Ok(TickOutcome::Completed)
    }

    /// Minutes of cooldown left on `asset_id`, if any.
    async fn cooldown_remaining(
        &self,
        account: &Account,
        asset_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, EngineError> {
        let Some(last) = self.store.last_closed(&account.id, asset_id).await? else {
            return Ok(None);
        };
        let Some(exit_time) = last.exit_time else {
            return Ok(None);
        };
        let until = exit_time + account.settings.cooldown(last.was_loss().unwrap_or(false));
        Ok((until > now).then(|| (until - now).num_minutes().max(1)))
    }

    /// Plan, fill and record one entry. Returns the balance debited.
    async fn open_candidate(
        &self,
        session: &BotSession,
        account: &Account,
        candidate: &Candidate,
        balance: f64,
        stats: &TradeStats,
        now: DateTime<Utc>,
    ) -> Result<f64, EngineError> {
        let decision = TradeDecision {
            asset_id: candidate.asset_id.clone(),
            symbol: candidate.symbol.clone(),
            side: Side::Long,
            reference_price: candidate.price,
            stop_price: None,
            score: candidate.quality_score,
            volatility_pct: Some(candidate.change_1h.abs()),
        };
        let snapshot = AccountSnapshot {
            balance,
            consecutive_wins: account.risk.consecutive_wins,
            consecutive_losses: account.risk.consecutive_losses,
            stats: *stats,
        };
        let plan = planner::plan(&decision, &snapshot, &account.settings)
            .ok_or_else(|| EngineError::InvalidDecision("no viable position size".into()))?;

        let executor = self.executors.for_mode(account.mode)?;
        let mut view = account.clone();
        view.balance = balance;
        let fill = executor.open(&view, &plan).await?;

        let position = match self
            .ledger
            .record_open(&account.id, &account.chain, &plan, &fill, now)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                if fill.tx_hash.is_some() {
                    error!(account_id = %account.id, tx_hash = ?fill.tx_hash, error = %e, "Filled on-chain but not recorded");
                }
                return Err(e);
            }
        };

        session.record_open();
        let summary = format!(
            "buy {} qty {:.4} @ ${:.8} (${:.2}, score {:.0}, stop ${:.8})",
            position.symbol,
            position.quantity,
            position.entry_price,
            fill.notional,
            candidate.quality_score,
            plan.stop_price
        );
        session.log(LogLevel::Info, summary.clone());
        self.notifier.notify(&account.id, "Position opened", &summary);
        Ok(position.cost_basis + position.fees_paid)
    }

    // -----------------------------------------------------------------------
    // Exit loop
    // -----------------------------------------------------------------------

    pub async fn exit_tick(&self, session: &Arc<BotSession>) -> TickOutcome {
        let Ok(_guard) = session.exit_lock.try_lock() else {
            debug!(account_id = %session.account_id, "Exit tick still running, skipping");
            return TickOutcome::Skipped;
        };
        if !self.is_registered(session) {
            return TickOutcome::Unregistered;
        }
        match self.run_exit(session).await {
            Ok(()) => TickOutcome::Completed,
            Err(e) => {
                session.log(LogLevel::Error, format!("exit tick failed: {e}"));
                TickOutcome::Failed
            }
        }
    }

    async fn run_exit(&self, session: &Arc<BotSession>) -> Result<(), EngineError> {
        let now = Utc::now();
        let account = self.load_account(&session.account_id).await?;
        let positions = self.store.open_positions(&account.id).await?;
        if positions.is_empty() {
            return Ok(());
        }

        let assets: Vec<String> = positions.iter().map(|p| p.asset_id.clone()).collect();
        let prices = self.aggregator.fresh_prices(&account.chain, &assets).await;

        for position in &positions {
            if !self.is_registered(session) {
                break;
            }
            let Some(&price) = prices.get(&position.asset_id) else {
                debug!(position_id = %position.id, symbol = %position.symbol, "No fresh price, holding");
                continue;
            };
            if let Err(e) = self.manage_position(session, &account, position, price, now).await {
                session.log(LogLevel::Warn, format!("exit {}: {e}", position.symbol));
            }
        }
        Ok(())
    }

    async fn manage_position(
        &self,
        session: &BotSession,
        account: &Account,
        position: &Position,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let decision = lifecycle::evaluate(position, price, now, &account.settings);

        if decision.marks_changed(position) {
            let armed = position.breakeven_armed || decision.arm_breakeven;
            self.store
                .update_marks(&position.id, decision.updated_peak, armed)
                .await?;
            if armed && !position.breakeven_armed {
                session.log(
                    LogLevel::Info,
                    format!("breakeven armed {} at {:+.1}%", position.symbol, decision.pnl_pct),
                );
            }
        }

        if let Some(reason) = decision.exit {
            return self
                .close_position(session, account, position, price, reason, decision.pnl_pct, now)
                .await;
        }

        if let Some(partial) = decision.partial {
            let executor = self.executors.for_mode(account.mode)?;
            let fill = executor.close(account, position, partial.quantity, price).await?;
            let outcome = self.ledger.record_partial(position, &fill).await?;
            let summary = format!(
                "partial: {} sold {:.0}% @ ${:.8} (pnl ${:+.2})",
                position.symbol,
                partial.fraction * 100.0,
                fill.price,
                outcome.realized_pnl
            );
            session.log(LogLevel::Info, summary.clone());
            self.notifier.notify(&account.id, "Partial take-profit", &summary);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn close_position(
        &self,
        session: &BotSession,
        account: &Account,
        position: &Position,
        price: f64,
        reason: ExitReason,
        pnl_pct: f64,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let executor = self.executors.for_mode(account.mode)?;
        let fill = executor.close(account, position, position.quantity, price).await?;

        match self.ledger.record_close(position, &fill, reason, now).await? {
            CloseOutcome::AlreadyClosed => {
                session.log(LogLevel::Info, format!("sell: {} already closed", position.symbol));
            }
            CloseOutcome::Closed { realized_pnl, .. } => {
                session.record_close();
                let summary = format!(
                    "sell: {reason} {} @ ${:.8} ({:+.1}%, pnl ${:+.2})",
                    position.symbol, fill.price, pnl_pct, realized_pnl
                );
                session.log(LogLevel::Info, summary.clone());
                self.update_risk(session, move |risk, equity| {
                    governor::record_close(risk, realized_pnl, equity, now)
                })
                .await?;
                info!(account_id = %account.id, position_id = %position.id, %reason, "Exit complete");
                self.notifier.notify(&account.id, "Position closed", &summary);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
