//! In-memory state of one running bot.
//!
//! A session exists from `start` to `stop`. It owns the loop locks, the
//! cancellation token for both timers, the momentum tracker, run counters
//! and a bounded activity log surfaced through `status`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::strategy::momentum::MomentumTracker;
use crate::types::BotStatus;

/// Entries kept in the activity log.
pub const LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Point-in-time view of a bot for the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct BotStatusReport {
    pub account_id: String,
    pub state: String,
    pub running: bool,
    pub pause_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: i64,
    pub scan_count: u64,
    pub trades_opened: u64,
    pub trades_closed: u64,
    pub recent_log: Vec<LogEntry>,
}

impl BotStatusReport {
    /// Report for an account with no session this process lifetime.
    pub fn idle(account_id: &str, status: BotStatus, pause_reason: Option<String>) -> Self {
        Self {
            account_id: account_id.to_string(),
            state: status.as_str().to_string(),
            running: false,
            pause_reason,
            started_at: None,
            uptime_secs: 0,
            scan_count: 0,
            trades_opened: 0,
            trades_closed: 0,
            recent_log: Vec::new(),
        }
    }
}

/// Which loop a tick belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Entry,
    Exit,
}

impl LoopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopKind::Entry => "entry",
            LoopKind::Exit => "exit",
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct BotSession {
    pub account_id: String,
    pub started_at: DateTime<Utc>,
    state: Mutex<(BotStatus, Option<String>)>,
    scan_count: AtomicU64,
    trades_opened: AtomicU64,
    trades_closed: AtomicU64,
    log: Mutex<VecDeque<LogEntry>>,
    pub(crate) cancel: CancellationToken,
    /// Held for the duration of an entry tick; a busy lock means skip.
    pub(crate) entry_lock: tokio::sync::Mutex<()>,
    pub(crate) exit_lock: tokio::sync::Mutex<()>,
    /// Serializes load-modify-save of the account's risk state between
    /// the two loops.
    pub(crate) risk_lock: tokio::sync::Mutex<()>,
    momentum: Mutex<MomentumTracker>,
}

impl BotSession {
    pub fn new(account_id: &str, momentum: MomentumTracker, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.to_string(),
            started_at: now,
            state: Mutex::new((BotStatus::Running, None)),
            scan_count: AtomicU64::new(0),
            trades_opened: AtomicU64::new(0),
            trades_closed: AtomicU64::new(0),
            log: Mutex::new(VecDeque::with_capacity(LOG_CAPACITY)),
            cancel: CancellationToken::new(),
            entry_lock: tokio::sync::Mutex::new(()),
            exit_lock: tokio::sync::Mutex::new(()),
            risk_lock: tokio::sync::Mutex::new(()),
            momentum: Mutex::new(momentum),
        }
    }

    pub fn status(&self) -> BotStatus {
        lock(&self.state).0
    }

    pub fn pause_reason(&self) -> Option<String> {
        lock(&self.state).1.clone()
    }

    pub(crate) fn set_status(&self, status: BotStatus, reason: Option<String>) {
        *lock(&self.state) = (status, reason);
    }

    pub fn scan_count(&self) -> u64 {
        self.scan_count.load(Ordering::Relaxed)
    }

    pub(crate) fn record_scan(&self) -> u64 {
        self.scan_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_open(&self) {
        self.trades_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_close(&self) {
        self.trades_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Append to the activity log and mirror it to tracing.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!(account_id = %self.account_id, "{message}"),
            LogLevel::Warn => warn!(account_id = %self.account_id, "{message}"),
            LogLevel::Error => error!(account_id = %self.account_id, "{message}"),
        }
        let mut log = lock(&self.log);
        if log.len() == LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
    }

    pub(crate) fn with_momentum<R>(&self, f: impl FnOnce(&mut MomentumTracker) -> R) -> R {
        f(&mut lock(&self.momentum))
    }

    pub fn recent_log(&self) -> Vec<LogEntry> {
        lock(&self.log).iter().cloned().collect()
    }

    pub fn report(&self, now: DateTime<Utc>) -> BotStatusReport {
        let (status, pause_reason) = lock(&self.state).clone();
        BotStatusReport {
            account_id: self.account_id.clone(),
            state: status.as_str().to_string(),
            running: status != BotStatus::Stopped,
            pause_reason,
            started_at: Some(self.started_at),
            uptime_secs: if status == BotStatus::Stopped {
                0
            } else {
                (now - self.started_at).num_seconds().max(0)
            },
            scan_count: self.scan_count(),
            trades_opened: self.trades_opened.load(Ordering::Relaxed),
            trades_closed: self.trades_closed.load(Ordering::Relaxed),
            recent_log: self.recent_log(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
