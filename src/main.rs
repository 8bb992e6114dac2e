//! TIDEWATCH: autonomous on-chain momentum trading agent
//!
//! Entry point. Loads configuration, initialises structured logging,
//! seeds accounts into the store, wires providers, executors and the
//! scheduler, serves the control API and runs until Ctrl+C.

use anyhow::{Context, Result};
use ethers::signers::{LocalWallet, Signer};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{info, warn};

use tidewatch::api;
use tidewatch::config::{self, AppConfig, Settings};
use tidewatch::data::dexscreener::DexScreenerClient;
use tidewatch::data::geckoterminal::GeckoTerminalClient;
use tidewatch::data::MarketDataProvider;
use tidewatch::engine::{Aggregator, BotScheduler, ExecutionAdapter, Executors, LiveExecutor, SimulatedExecutor};
use tidewatch::notify::{Notifier, NullNotifier, TelegramNotifier};
use tidewatch::storage::{SqliteStore, Store};
use tidewatch::swap::{JsonRpcClient, ZeroExClient};
use tidewatch::types::{Account, ExecutionMode};
use tidewatch::vault::KeyVault;

const BANNER: &str = r#"
 _____ ___ ____  _______        ___  _____ ____ _   _
|_   _|_ _|  _ \| ____\ \      / / \|_   _/ ___| | | |
  | |  | || | | |  _|  \ \ /\ / / _ \ | || |   | |_| |
  | |  | || |_| | |___  \ V  V / ___ \| || |___|  _  |
  |_| |___|____/|_____|  \_/\_/_/   \_\_| \____|_| |_|

  Momentum entries, managed exits
  v0.1.0
"#;

const HTTP_TIMEOUT_SECS: u64 = 15;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        chain = %cfg.agent.chain,
        accounts = cfg.accounts.len(),
        live = cfg.live.enabled,
        "TIDEWATCH starting up"
    );

    // -- Storage and accounts --------------------------------------------

    let store: Arc<dyn Store> = Arc::new(SqliteStore::connect(&cfg.agent.database_url).await?);
    let vault = load_vault(&cfg)?;
    seed_accounts(&cfg, store.as_ref(), vault.as_deref()).await?;

    // -- Components ------------------------------------------------------

    let mut providers: Vec<Arc<dyn MarketDataProvider>> = Vec::new();
    if cfg.providers.dexscreener {
        providers.push(Arc::new(DexScreenerClient::new(HTTP_TIMEOUT_SECS)?));
    }
    if cfg.providers.geckoterminal {
        providers.push(Arc::new(GeckoTerminalClient::new(HTTP_TIMEOUT_SECS)?));
    }
    if providers.is_empty() {
        warn!("No market-data providers enabled; bots will find no candidates");
    }
    let aggregator = Arc::new(Aggregator::new(providers, cfg.aggregator.clone()));

    let live: Option<Arc<dyn ExecutionAdapter>> = match &vault {
        Some(vault) => {
            let api_key = cfg
                .live
                .swap_api_key_env
                .as_deref()
                .and_then(|env| std::env::var(env).ok())
                .map(SecretString::new);
            let swap = Arc::new(ZeroExClient::new(&cfg.live.swap_api_url, api_key, HTTP_TIMEOUT_SECS)?);
            let chain = Arc::new(JsonRpcClient::new(&cfg.live.rpc_url, HTTP_TIMEOUT_SECS)?);
            let executor: Arc<dyn ExecutionAdapter> =
                Arc::new(LiveExecutor::new(&cfg.live, swap, chain, Arc::clone(vault))?);
            info!(chain_id = cfg.live.chain_id, rpc = %cfg.live.rpc_url, "Live execution enabled");
            Some(executor)
        }
        None => None,
    };
    let executors = Executors::new(Arc::new(SimulatedExecutor), live);

    let notifier: Arc<dyn Notifier> = match TelegramNotifier::from_config(&cfg.alerts)? {
        Some(telegram) => {
            info!("Telegram alerts enabled");
            Arc::new(telegram)
        }
        None => Arc::new(NullNotifier),
    };

    let scheduler = Arc::new(BotScheduler::new(Arc::clone(&store), aggregator, executors, notifier));

    if cfg.api.enabled {
        api::spawn_api(Arc::clone(&scheduler), cfg.api.port).await?;
    }

    for seed in cfg.accounts.iter().filter(|s| s.autostart) {
        match scheduler.start(&seed.id).await {
            Ok(outcome) => info!(account_id = %seed.id, ?outcome, "Autostart"),
            Err(e) => warn!(account_id = %seed.id, error = %e, "Autostart failed"),
        }
    }

    info!("Running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received.");
    scheduler.stop_all().await;
    info!("TIDEWATCH shut down cleanly.");
    Ok(())
}

/// The vault is needed only when live execution is configured.
fn load_vault(cfg: &AppConfig) -> Result<Option<Arc<KeyVault>>> {
    if !cfg.live.enabled {
        return Ok(None);
    }
    let vault = KeyVault::from_env(&cfg.live.vault_secret_env)
        .context("Live execution is enabled but the vault secret is unavailable")?;
    Ok(Some(Arc::new(vault)))
}

/// Insert configured accounts that don't exist yet and seal signing keys
/// for live accounts that have none stored.
async fn seed_accounts(cfg: &AppConfig, store: &dyn Store, vault: Option<&KeyVault>) -> Result<()> {
    for seed in &cfg.accounts {
        let mode: ExecutionMode = seed.mode.parse()?;
        let chain = seed.chain.as_deref().unwrap_or(&cfg.agent.chain);
        let mut account = Account::new(
            &seed.id,
            chain,
            mode,
            seed.starting_balance,
            Settings::from_input(&seed.settings),
        );
        account.blacklist = seed.blacklist.clone();
        account.wallet_address = seed.wallet_address.clone();

        if store.insert_account(&account).await? {
            info!(account_id = %seed.id, mode = mode.as_str(), chain, balance = seed.starting_balance, "Account created");
        }

        if mode != ExecutionMode::Live {
            continue;
        }
        let existing = store
            .load_account(&seed.id)
            .await?
            .with_context(|| format!("Account {} vanished after insert", seed.id))?;
        if existing.sealed_key.is_some() {
            continue;
        }
        let (Some(vault), Some(env)) = (vault, seed.private_key_env.as_deref()) else {
            warn!(account_id = %seed.id, "Live account has no sealed key; live orders will fail");
            continue;
        };
        let key = SecretString::new(AppConfig::resolve_env(env)?);
        let wallet: LocalWallet = key
            .expose_secret()
            .trim_start_matches("0x")
            .parse()
            .with_context(|| format!("{env} is not a valid private key"))?;
        let address = ethers::utils::to_checksum(&wallet.address(), None);
        if let Some(configured) = &seed.wallet_address {
            if !configured.eq_ignore_ascii_case(&address) {
                anyhow::bail!("{env} does not control wallet {configured} of account {}", seed.id);
            }
        }
        let sealed = vault.seal(&key)?;
        store.set_sealed_key(&seed.id, Some(&address), &sealed).await?;
        info!(account_id = %seed.id, wallet = %address, "Signing key sealed");
    }
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tidewatch=info"));

    let json_logging = std::env::var("TIDEWATCH_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
