//! Full-pipeline scenarios driven tick by tick.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use tidewatch::config::{AggregatorConfig, Settings, SettingsInput};
use tidewatch::data::MarketDataProvider;
use tidewatch::engine::{Aggregator, BotScheduler, Executors, StartOutcome, TickOutcome};
use tidewatch::notify::NullNotifier;
use tidewatch::storage::{SqliteStore, Store};
use tidewatch::types::{Account, BotStatus, ExecutionMode, ExitReason, Position, PositionStatus};

use crate::mock_feed::{make_raw, make_thin, MockFeed};

const ACCOUNT: &str = "acct";

/// Frictionless settings with an instant momentum window so the second
/// sighting of an asset is a buy.
fn make_settings() -> SettingsInput {
    SettingsInput {
        momentum_window_secs: Some(0.0),
        slippage_pct: Some(0.0),
        fee_pct: Some(0.0),
        stop_loss_pct: Some(8.0),
        breakeven_arm_pct: Some(5.0),
        breakeven_buffer_pct: Some(1.0),
        trailing_stop_pct: Some(8.0),
        take_profit_pct: Some(25.0),
        partial_tp_pct: Some(15.0),
        partial_tp_fraction: Some(0.5),
        ..Default::default()
    }
}

struct Harness {
    scheduler: Arc<BotScheduler>,
    store: Arc<SqliteStore>,
    feed: Arc<MockFeed>,
}

async fn make_harness(balance: f64, starting_balance: f64, cache_ttl_secs: u64) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let mut account = Account::new(
        ACCOUNT,
        "base",
        ExecutionMode::Paper,
        balance,
        Settings::from_input(&make_settings()),
    );
    account.starting_balance = starting_balance;
    store.insert_account(&account).await.unwrap();

    let feed = Arc::new(MockFeed::new("mock"));
    let config = AggregatorConfig {
        cache_ttl_secs,
        ..AggregatorConfig::default()
    };
    let provider: Arc<dyn MarketDataProvider> = feed.clone();
    let aggregator = Arc::new(Aggregator::new(vec![provider], config));
    let scheduler = Arc::new(BotScheduler::new(
        store.clone(),
        aggregator,
        Executors::paper_only(),
        Arc::new(NullNotifier),
    ));
    Harness { scheduler, store, feed }
}

impl Harness {
    /// Start the bot and run the confirming entry tick.
    async fn start_and_buy(&self) -> Position {
        assert_eq!(self.scheduler.start(ACCOUNT).await.unwrap(), StartOutcome::Started);
        let session = self.scheduler.session(ACCOUNT).unwrap();
        assert_eq!(self.scheduler.entry_tick(&session).await, TickOutcome::Completed);
        let mut open = self.store.open_positions(ACCOUNT).await.unwrap();
        assert_eq!(open.len(), 1, "expected exactly one entry");
        open.remove(0)
    }

    async fn exit_tick(&self) {
        let session = self.scheduler.session(ACCOUNT).unwrap();
        assert_eq!(self.scheduler.exit_tick(&session).await, TickOutcome::Completed);
    }

    async fn balance(&self) -> f64 {
        self.store.load_account(ACCOUNT).await.unwrap().unwrap().balance
    }
}

#[tokio::test]
async fn test_below_floor_asset_is_never_considered() {
    let h = make_harness(1000.0, 1000.0, 0).await;
    h.feed.list(make_thin("0xthin", "THIN", 1.0));
    h.feed.list(make_raw("0xgood", "GOOD", 1.0));

    let position = h.start_and_buy().await;
    assert_eq!(position.asset_id, "0xgood");

    let session = h.scheduler.session(ACCOUNT).unwrap();
    assert!(session.recent_log().iter().all(|e| !e.message.contains("THIN")));
    h.scheduler.stop_all().await;
}

#[tokio::test]
async fn test_stop_loss_round_trip() {
    let h = make_harness(1000.0, 1000.0, 0).await;
    h.feed.list(make_raw("0xalpha", "ALPHA", 100.0));
    let position = h.start_and_buy().await;
    assert!((position.entry_price - 100.0).abs() < 1e-9);

    h.feed.set_price("0xalpha", 92.0);
    h.exit_tick().await;

    let closed = h.store.load_position(&position.id).await.unwrap().unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
    assert!((closed.realized_pnl + 0.08 * position.cost_basis).abs() < 1e-6);
    assert!((h.balance().await - (1000.0 + closed.realized_pnl)).abs() < 1e-6);

    let account = h.store.load_account(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(account.risk.consecutive_losses, 1);
    h.scheduler.stop_all().await;
}

#[tokio::test]
async fn test_breakeven_stop_round_trip() {
    let h = make_harness(1000.0, 1000.0, 0).await;
    h.feed.list(make_raw("0xalpha", "ALPHA", 100.0));
    let position = h.start_and_buy().await;

    h.feed.set_price("0xalpha", 106.0);
    h.exit_tick().await;
    let marked = h.store.load_position(&position.id).await.unwrap().unwrap();
    assert!(marked.is_open());
    assert!(marked.breakeven_armed);
    assert!((marked.peak_price - 106.0).abs() < 1e-9);

    h.feed.set_price("0xalpha", 101.0);
    h.exit_tick().await;
    let closed = h.store.load_position(&position.id).await.unwrap().unwrap();
    assert_eq!(closed.exit_reason, Some(ExitReason::BreakevenStop));
    assert!(closed.realized_pnl > 0.0);
    h.scheduler.stop_all().await;
}

#[tokio::test]
async fn test_partial_then_take_profit_accounting() {
    let h = make_harness(1000.0, 1000.0, 0).await;
    h.feed.list(make_raw("0xalpha", "ALPHA", 100.0));
    let position = h.start_and_buy().await;
    let cost = position.cost_basis;

    h.feed.set_price("0xalpha", 116.0);
    h.exit_tick().await;
    let reduced = h.store.load_position(&position.id).await.unwrap().unwrap();
    assert!(reduced.is_open());
    assert!((reduced.quantity - position.quantity / 2.0).abs() < 1e-9);
    assert!((reduced.cost_basis - cost / 2.0).abs() < 1e-6);
    assert!((reduced.realized_pnl - 0.08 * cost).abs() < 1e-6);

    // Partial take-profit fires once per position
    h.exit_tick().await;
    let still = h.store.load_position(&position.id).await.unwrap().unwrap();
    assert!((still.quantity - reduced.quantity).abs() < 1e-12);

    h.feed.set_price("0xalpha", 126.0);
    h.exit_tick().await;
    let closed = h.store.load_position(&position.id).await.unwrap().unwrap();
    assert_eq!(closed.exit_reason, Some(ExitReason::TakeProfit));
    assert!((closed.realized_pnl - 0.21 * cost).abs() < 1e-6);
    assert!((h.balance().await - (1000.0 + 0.21 * cost)).abs() < 1e-6);

    let account = h.store.load_account(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(account.risk.consecutive_wins, 1);
    assert_eq!(account.risk.consecutive_losses, 0);
    h.scheduler.stop_all().await;
}

#[tokio::test]
async fn test_overlapping_entry_ticks_skip() {
    let h = make_harness(1000.0, 1000.0, 0).await;
    h.feed.list(make_raw("0xalpha", "ALPHA", 1.0));
    h.scheduler.start(ACCOUNT).await.unwrap();
    let session = h.scheduler.session(ACCOUNT).unwrap();
    let scans_before = session.scan_count();
    let calls_before = h.feed.candidate_calls();

    h.feed.set_delay(Duration::from_millis(300));
    let (first, second) = tokio::join!(
        h.scheduler.entry_tick(&session),
        h.scheduler.entry_tick(&session)
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|o| **o == TickOutcome::Skipped).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| **o == TickOutcome::Completed).count(), 1);
    assert_eq!(session.scan_count(), scans_before + 1);
    assert_eq!(h.feed.candidate_calls(), calls_before + 1);
    h.scheduler.stop_all().await;
}

#[tokio::test]
async fn test_daily_loss_limit_pauses_bot() {
    let h = make_harness(840.0, 1000.0, 0).await;
    h.feed.list(make_raw("0xalpha", "ALPHA", 1.0));
    h.scheduler.start(ACCOUNT).await.unwrap();

    let report = h.scheduler.status(ACCOUNT).await.unwrap();
    assert_eq!(report.state, "PAUSED");
    assert!(report.pause_reason.as_deref().unwrap_or("").contains("Daily loss limit"));
    assert!(report.recent_log.iter().any(|e| e.message.starts_with("PAUSED:")));
    assert_eq!(h.feed.candidate_calls(), 0);

    let session = h.scheduler.session(ACCOUNT).unwrap();
    assert_eq!(h.scheduler.entry_tick(&session).await, TickOutcome::Paused);
    assert_eq!(session.scan_count(), 1);

    let account = h.store.load_account(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(account.bot_status, BotStatus::Paused);
    h.scheduler.stop_all().await;
}

#[tokio::test]
async fn test_provider_outage_keeps_positions() {
    let h = make_harness(1000.0, 1000.0, 0).await;
    h.feed.list(make_raw("0xalpha", "ALPHA", 100.0));
    let position = h.start_and_buy().await;

    h.feed.set_error("HTTP 503");
    h.exit_tick().await;
    let session = h.scheduler.session(ACCOUNT).unwrap();
    assert_eq!(h.scheduler.entry_tick(&session).await, TickOutcome::Completed);

    let still = h.store.load_position(&position.id).await.unwrap().unwrap();
    assert!(still.is_open());
    h.scheduler.stop_all().await;
}

#[tokio::test]
async fn test_stopped_bot_reports_history() {
    let h = make_harness(1000.0, 1000.0, 0).await;
    h.feed.list(make_raw("0xalpha", "ALPHA", 1.0));
    h.start_and_buy().await;
    assert!(assert_ok!(h.scheduler.stop(ACCOUNT).await));

    let report = h.scheduler.status(ACCOUNT).await.unwrap();
    assert_eq!(report.state, "STOPPED");
    assert_eq!(report.trades_opened, 1);
    assert_eq!(report.scan_count, 2);
    assert!(report.started_at.unwrap() <= Utc::now());

    // Restarting creates a fresh session
    assert_eq!(h.scheduler.start(ACCOUNT).await.unwrap(), StartOutcome::Started);
    assert_eq!(h.scheduler.session(ACCOUNT).unwrap().scan_count(), 1);
    h.scheduler.stop_all().await;
}
