//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, the vault secret) are referenced by env-var name in
//! the config and resolved at runtime via `std::env::var`.
//!
//! Per-account trading settings arrive as [`SettingsInput`] (every field
//! optional) and are turned into a [`Settings`] exactly once by
//! [`Settings::from_input`], which fills defaults and clamps every numeric
//! field into its documented range. Nothing downstream re-derives defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

// ---------------------------------------------------------------------------
// Application config
// ---------------------------------------------------------------------------

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub accounts: Vec<AccountSeed>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// SQLite connection string, e.g. `sqlite://tidewatch.db?mode=rwc`.
    pub database_url: String,
    /// Default chain scanned for accounts that don't override it.
    pub chain: String,
}

/// Hard filters and cache policy for the candidate aggregator.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AggregatorConfig {
    pub cache_ttl_secs: u64,
    pub provider_timeout_secs: u64,
    pub min_volume_24h: f64,
    pub min_liquidity: f64,
    pub min_change_24h: f64,
    pub max_change_24h: f64,
    /// Minimum share of volume on the buy side (0.0–1.0).
    pub min_buy_pressure: f64,
    /// Applied only when the provider reports a holder count.
    pub min_holders: u64,
    /// Volume/liquidity ceiling above which trading is assumed to be wash.
    pub max_volume_liquidity_ratio: f64,
    pub min_quality_score: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            provider_timeout_secs: 8,
            min_volume_24h: 10_000.0,
            min_liquidity: 5_000.0,
            min_change_24h: -50.0,
            max_change_24h: 500.0,
            min_buy_pressure: 0.45,
            min_holders: 50,
            max_volume_liquidity_ratio: 50.0,
            min_quality_score: 40.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    #[serde(default = "enabled")]
    pub dexscreener: bool,
    #[serde(default = "enabled")]
    pub geckoterminal: bool,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            dexscreener: true,
            geckoterminal: true,
        }
    }
}

fn enabled() -> bool {
    true
}

/// On-chain execution settings. Only consulted for `live` accounts.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LiveConfig {
    pub enabled: bool,
    pub rpc_url: String,
    pub chain_id: u64,
    pub swap_api_url: String,
    pub swap_api_key_env: Option<String>,
    /// Quote asset spent on entries and received on exits (e.g. USDC).
    pub quote_asset: String,
    pub quote_decimals: u8,
    pub slippage_bps: u32,
    pub confirm_timeout_secs: u64,
    pub vault_secret_env: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rpc_url: "https://mainnet.base.org".to_string(),
            chain_id: 8453,
            swap_api_url: "https://api.0x.org".to_string(),
            swap_api_key_env: Some("ZEROEX_API_KEY".to_string()),
            quote_asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
            quote_decimals: 6,
            slippage_bps: 300,
            confirm_timeout_secs: 60,
            vault_secret_env: "TIDEWATCH_VAULT_SECRET".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8787,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

/// An account created at startup if it doesn't already exist.
#[derive(Debug, Deserialize, Clone)]
pub struct AccountSeed {
    pub id: String,
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default = "paper_mode")]
    pub mode: String,
    pub starting_balance: f64,
    #[serde(default)]
    pub wallet_address: Option<String>,
    /// Env var holding the raw signing key; it is sealed on first load.
    #[serde(default)]
    pub private_key_env: Option<String>,
    #[serde(default)]
    pub autostart: bool,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub settings: SettingsInput,
}

fn paper_mode() -> String {
    "paper".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

// ---------------------------------------------------------------------------
// Trading settings
// ---------------------------------------------------------------------------

/// How the per-trade risk amount is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskMode {
    #[default]
    PercentOfBalance,
    FixedAmount,
}

/// Raw, possibly out-of-range settings as supplied by a user or config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsInput {
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub max_hold_minutes: Option<f64>,
    pub max_open_positions: Option<f64>,
    pub cooldown_hours: Option<f64>,
    pub loss_cooldown_multiplier: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
    pub breakeven_arm_pct: Option<f64>,
    pub breakeven_buffer_pct: Option<f64>,
    pub trade_amount: Option<f64>,
    pub risk_per_trade_pct: Option<f64>,
    pub risk_mode: Option<RiskMode>,
    pub max_stop_pct: Option<f64>,
    pub min_stop_pct: Option<f64>,
    pub slippage_pct: Option<f64>,
    pub fee_pct: Option<f64>,
    pub leverage: Option<f64>,
    pub max_position_pct: Option<f64>,
    pub partial_tp_pct: Option<f64>,
    pub partial_tp_fraction: Option<f64>,
    pub early_bail_pct: Option<f64>,
    pub early_bail_hold_fraction: Option<f64>,
    pub stale_hold_fraction: Option<f64>,
    pub stale_min_pnl_pct: Option<f64>,
    pub daily_loss_limit_pct: Option<f64>,
    pub max_consecutive_losses: Option<f64>,
    pub max_entries_per_cycle: Option<f64>,
    pub momentum_window_secs: Option<f64>,
    pub momentum_min_change_pct: Option<f64>,
    pub momentum_max_idle_secs: Option<f64>,
    pub detect_fading: Option<bool>,
    pub exit_interval_secs: Option<f64>,
    pub entry_interval_secs: Option<f64>,
}

/// `(min, max, default)` for one numeric setting.
#[derive(Debug, Clone, Copy)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

const fn bound(min: f64, max: f64, default: f64) -> Bound {
    Bound { min, max, default }
}

pub const STOP_LOSS_PCT: Bound = bound(1.0, 50.0, 8.0);
pub const TAKE_PROFIT_PCT: Bound = bound(2.0, 500.0, 25.0);
pub const MAX_HOLD_MINUTES: Bound = bound(5.0, 1440.0, 240.0);
pub const MAX_OPEN_POSITIONS: Bound = bound(1.0, 20.0, 3.0);
pub const COOLDOWN_HOURS: Bound = bound(0.0, 72.0, 2.0);
pub const LOSS_COOLDOWN_MULTIPLIER: Bound = bound(1.0, 10.0, 3.0);
pub const TRAILING_STOP_PCT: Bound = bound(1.0, 50.0, 8.0);
pub const BREAKEVEN_ARM_PCT: Bound = bound(1.0, 50.0, 5.0);
pub const BREAKEVEN_BUFFER_PCT: Bound = bound(0.0, 5.0, 1.0);
pub const TRADE_AMOUNT: Bound = bound(1.0, 100_000.0, 50.0);
pub const RISK_PER_TRADE_PCT: Bound = bound(0.1, 10.0, 2.0);
pub const MAX_STOP_PCT: Bound = bound(1.0, 50.0, 15.0);
pub const MIN_STOP_PCT: Bound = bound(0.1, 10.0, 1.5);
pub const SLIPPAGE_PCT: Bound = bound(0.0, 10.0, 1.0);
pub const FEE_PCT: Bound = bound(0.0, 2.0, 0.3);
pub const LEVERAGE: Bound = bound(1.0, 20.0, 1.0);
pub const MAX_POSITION_PCT: Bound = bound(1.0, 100.0, 25.0);
pub const PARTIAL_TP_PCT: Bound = bound(1.0, 500.0, 15.0);
pub const PARTIAL_TP_FRACTION: Bound = bound(0.1, 0.9, 0.5);
pub const EARLY_BAIL_PCT: Bound = bound(0.5, 20.0, 3.0);
pub const EARLY_BAIL_HOLD_FRACTION: Bound = bound(0.1, 0.9, 0.5);
pub const STALE_HOLD_FRACTION: Bound = bound(0.25, 1.0, 0.75);
pub const STALE_MIN_PNL_PCT: Bound = bound(0.0, 20.0, 1.0);
pub const DAILY_LOSS_LIMIT_PCT: Bound = bound(1.0, 100.0, 15.0);
pub const MAX_CONSECUTIVE_LOSSES: Bound = bound(1.0, 20.0, 5.0);
pub const MAX_ENTRIES_PER_CYCLE: Bound = bound(1.0, 10.0, 2.0);
pub const MOMENTUM_WINDOW_SECS: Bound = bound(0.0, 1800.0, 60.0);
pub const MOMENTUM_MIN_CHANGE_PCT: Bound = bound(0.0, 50.0, 0.0);
pub const MOMENTUM_MAX_IDLE_SECS: Bound = bound(60.0, 86_400.0, 900.0);
pub const EXIT_INTERVAL_SECS: Bound = bound(2.0, 60.0, 5.0);
pub const ENTRY_INTERVAL_SECS: Bound = bound(10.0, 600.0, 30.0);

impl Bound {
    /// Default for missing or non-finite input, then clamp into range.
    pub fn apply(&self, value: Option<f64>) -> f64 {
        value
            .filter(|v| v.is_finite())
            .unwrap_or(self.default)
            .clamp(self.min, self.max)
    }

    fn apply_count(&self, value: Option<f64>) -> u32 {
        self.apply(value.map(f64::round)) as u32
    }
}

/// Validated per-account trading settings.
///
/// Percentages are expressed as percent (8.0 = 8%), fractions as 0.0–1.0.
/// Construct via [`Settings::from_input`] or [`Settings::default`]; both
/// guarantee every field is within its bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub max_hold_minutes: f64,
    pub max_open_positions: u32,
    pub cooldown_hours: f64,
    pub loss_cooldown_multiplier: f64,
    pub trailing_stop_pct: f64,
    pub breakeven_arm_pct: f64,
    pub breakeven_buffer_pct: f64,
    pub trade_amount: f64,
    pub risk_per_trade_pct: f64,
    pub risk_mode: RiskMode,
    pub max_stop_pct: f64,
    pub min_stop_pct: f64,
    pub slippage_pct: f64,
    pub fee_pct: f64,
    pub leverage: f64,
    pub max_position_pct: f64,
    pub partial_tp_pct: f64,
    pub partial_tp_fraction: f64,
    pub early_bail_pct: f64,
    /// Share of max hold after which a losing position is bailed.
    pub early_bail_hold_fraction: f64,
    /// Share of max hold after which a flat position counts as stale.
    pub stale_hold_fraction: f64,
    /// A stale position is closed unless its PnL % reaches this.
    pub stale_min_pnl_pct: f64,
    pub daily_loss_limit_pct: f64,
    pub max_consecutive_losses: u32,
    pub max_entries_per_cycle: u32,
    pub momentum_window_secs: f64,
    pub momentum_min_change_pct: f64,
    pub momentum_max_idle_secs: f64,
    pub detect_fading: bool,
    pub exit_interval_secs: f64,
    pub entry_interval_secs: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_input(&SettingsInput::default())
    }
}

impl Settings {
    /// Build settings from raw input. Out-of-range values are silently
    /// corrected, never rejected.
    pub fn from_input(input: &SettingsInput) -> Self {
        let min_stop_pct = MIN_STOP_PCT.apply(input.min_stop_pct);
        let max_stop_pct = MAX_STOP_PCT.apply(input.max_stop_pct).max(min_stop_pct);

        // A record must outlive its window by at least one entry tick or
        // it is swept before it can confirm.
        let momentum_window_secs = MOMENTUM_WINDOW_SECS.apply(input.momentum_window_secs);
        let entry_interval_secs = ENTRY_INTERVAL_SECS.apply(input.entry_interval_secs);
        let momentum_max_idle_secs = MOMENTUM_MAX_IDLE_SECS
            .apply(input.momentum_max_idle_secs)
            .max(momentum_window_secs + entry_interval_secs);

        Self {
            stop_loss_pct: STOP_LOSS_PCT.apply(input.stop_loss_pct),
            take_profit_pct: TAKE_PROFIT_PCT.apply(input.take_profit_pct),
            max_hold_minutes: MAX_HOLD_MINUTES.apply(input.max_hold_minutes),
            max_open_positions: MAX_OPEN_POSITIONS.apply_count(input.max_open_positions),
            cooldown_hours: COOLDOWN_HOURS.apply(input.cooldown_hours),
            loss_cooldown_multiplier: LOSS_COOLDOWN_MULTIPLIER
                .apply(input.loss_cooldown_multiplier),
            trailing_stop_pct: TRAILING_STOP_PCT.apply(input.trailing_stop_pct),
            breakeven_arm_pct: BREAKEVEN_ARM_PCT.apply(input.breakeven_arm_pct),
            breakeven_buffer_pct: BREAKEVEN_BUFFER_PCT.apply(input.breakeven_buffer_pct),
            trade_amount: TRADE_AMOUNT.apply(input.trade_amount),
            risk_per_trade_pct: RISK_PER_TRADE_PCT.apply(input.risk_per_trade_pct),
            risk_mode: input.risk_mode.unwrap_or_default(),
            max_stop_pct,
            min_stop_pct,
            slippage_pct: SLIPPAGE_PCT.apply(input.slippage_pct),
            fee_pct: FEE_PCT.apply(input.fee_pct),
            leverage: LEVERAGE.apply(input.leverage),
            max_position_pct: MAX_POSITION_PCT.apply(input.max_position_pct),
            partial_tp_pct: PARTIAL_TP_PCT.apply(input.partial_tp_pct),
            partial_tp_fraction: PARTIAL_TP_FRACTION.apply(input.partial_tp_fraction),
            early_bail_pct: EARLY_BAIL_PCT.apply(input.early_bail_pct),
            early_bail_hold_fraction: EARLY_BAIL_HOLD_FRACTION
                .apply(input.early_bail_hold_fraction),
            stale_hold_fraction: STALE_HOLD_FRACTION.apply(input.stale_hold_fraction),
            stale_min_pnl_pct: STALE_MIN_PNL_PCT.apply(input.stale_min_pnl_pct),
            daily_loss_limit_pct: DAILY_LOSS_LIMIT_PCT.apply(input.daily_loss_limit_pct),
            max_consecutive_losses: MAX_CONSECUTIVE_LOSSES
                .apply_count(input.max_consecutive_losses),
            max_entries_per_cycle: MAX_ENTRIES_PER_CYCLE.apply_count(input.max_entries_per_cycle),
            momentum_window_secs,
            momentum_min_change_pct: MOMENTUM_MIN_CHANGE_PCT
                .apply(input.momentum_min_change_pct),
            momentum_max_idle_secs,
            detect_fading: input.detect_fading.unwrap_or(true),
            exit_interval_secs: EXIT_INTERVAL_SECS.apply(input.exit_interval_secs),
            entry_interval_secs,
        }
    }

    /// Cooldown before re-entering an asset, extended after a loss.
    pub fn cooldown(&self, last_was_loss: bool) -> chrono::Duration {
        let hours = if last_was_loss {
            self.cooldown_hours * self.loss_cooldown_multiplier
        } else {
            self.cooldown_hours
        };
        chrono::Duration::seconds((hours * 3600.0) as i64)
    }
}
