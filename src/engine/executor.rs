//! Trade execution.
//!
//! `ExecutionAdapter` turns an order plan (or an exit) into a fill. The
//! simulated adapter fills at the planned price with configured slippage;
//! the live adapter swaps on-chain through the aggregator and reports what
//! actually landed in the wallet. Adapters never touch the store: a fill is
//! applied to balance and positions by the ledger, so an error here always
//! means "no fill, nothing mutated".

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LiveConfig;
use crate::strategy::planner::OrderPlan;
use crate::swap::{
    approve_calldata, from_raw_units, to_raw_units, wait_for_receipt, ChainClient, QuoteRequest,
    SwapProvider, TxOutcome,
};
use crate::types::{Account, EngineError, ExecutionMode, Position, Side};
use crate::vault::KeyVault;

const APPROVE_GAS: u64 = 80_000;
const DEFAULT_SWAP_GAS: u64 = 500_000;

// ---------------------------------------------------------------------------
// Fill
// ---------------------------------------------------------------------------

/// What an adapter actually executed.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    /// Average execution price in quote currency per unit.
    pub price: f64,
    pub quantity: f64,
    /// Quote currency exchanged (price × quantity).
    pub notional: f64,
    /// Quote-currency fees charged on top of the notional.
    pub fees: f64,
    pub tx_hash: Option<String>,
}

#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Execute an entry.
    async fn open(&self, account: &Account, plan: &OrderPlan) -> Result<Fill, EngineError>;

    /// Sell `quantity` of an open position at roughly `market_price`.
    async fn close(
        &self,
        account: &Account,
        position: &Position,
        quantity: f64,
        market_price: f64,
    ) -> Result<Fill, EngineError>;
}

fn check_exit_request(position: &Position, quantity: f64, market_price: f64) -> Result<(), EngineError> {
    if !position.is_open() {
        return Err(EngineError::InvalidDecision(format!("position {} is not open", position.id)));
    }
    if !(quantity > 0.0) || quantity > position.quantity * (1.0 + 1e-9) {
        return Err(EngineError::InvalidDecision(format!(
            "exit quantity {quantity} outside (0, {}]",
            position.quantity
        )));
    }
    if !market_price.is_finite() || market_price <= 0.0 {
        return Err(EngineError::InvalidDecision(format!("bad exit price {market_price}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Simulated
// ---------------------------------------------------------------------------

/// Paper execution. Entries fill at the plan's entry price (slippage is
/// already applied by the planner); exits pay the account's slippage and
/// fee settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedExecutor;

#[async_trait]
impl ExecutionAdapter for SimulatedExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Paper
    }

    async fn open(&self, account: &Account, plan: &OrderPlan) -> Result<Fill, EngineError> {
        if plan.total_cost() > account.balance {
            return Err(EngineError::InsufficientBalance {
                needed: plan.total_cost(),
                available: account.balance,
            });
        }
        debug!(
            account_id = %account.id,
            asset = %plan.asset_id,
            price = plan.entry_price,
            quantity = plan.quantity,
            "[PAPER] Filled entry"
        );
        Ok(Fill {
            price: plan.entry_price,
            quantity: plan.quantity,
            notional: plan.size,
            fees: plan.fees,
            tx_hash: None,
        })
    }

    async fn close(
        &self,
        account: &Account,
        position: &Position,
        quantity: f64,
        market_price: f64,
    ) -> Result<Fill, EngineError> {
        check_exit_request(position, quantity, market_price)?;
        let settings = &account.settings;
        // Exiting a long sells into the bid; exiting a short buys the ask.
        let price = market_price * (1.0 - position.side.direction() * settings.slippage_pct / 100.0);
        let notional = price * quantity;
        let fees = notional * settings.fee_pct / 100.0;
        debug!(
            account_id = %account.id,
            position_id = %position.id,
            price,
            quantity,
            "[PAPER] Filled exit"
        );
        Ok(Fill {
            price,
            quantity,
            notional,
            fees,
            tx_hash: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Live
// ---------------------------------------------------------------------------

struct SwapOutcome {
    sold_raw: U256,
    received_raw: U256,
    tx_hash: String,
}

/// On-chain execution through a swap aggregator. Long only, no leverage.
pub struct LiveExecutor {
    swap: Arc<dyn SwapProvider>,
    chain: Arc<dyn ChainClient>,
    vault: Arc<KeyVault>,
    chain_id: u64,
    quote_token: Address,
    quote_decimals: u8,
    slippage_bps: u32,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

fn exec_err(e: anyhow::Error) -> EngineError {
    EngineError::ExecutionFailure(format!("{e:#}"))
}

fn parse_address(what: &str, value: &str) -> Result<Address, EngineError> {
    value
        .parse::<Address>()
        .map_err(|_| EngineError::ExecutionFailure(format!("{what} {value} is not an address")))
}

impl LiveExecutor {
    pub fn new(
        config: &LiveConfig,
        swap: Arc<dyn SwapProvider>,
        chain: Arc<dyn ChainClient>,
        vault: Arc<KeyVault>,
    ) -> Result<Self, EngineError> {
        let quote_token = config
            .quote_asset
            .parse::<Address>()
            .map_err(|_| EngineError::ConfigurationInvalid(format!("quote asset {} is not an address", config.quote_asset)))?;
        Ok(Self {
            swap,
            chain,
            vault,
            chain_id: config.chain_id,
            quote_token,
            quote_decimals: config.quote_decimals,
            slippage_bps: config.slippage_bps,
            confirm_timeout: Duration::from_secs(config.confirm_timeout_secs),
            poll_interval: Duration::from_secs(2),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Decrypt the account key, sign, and drop the key before returning.
    /// Synchronous so key material never lives across an await point.
    fn sign(&self, sealed_key: &str, expected: Address, tx: &TypedTransaction) -> Result<Bytes, EngineError> {
        let key = self.vault.unseal(sealed_key)?;
        let wallet = key
            .expose_secret()
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|_| EngineError::Vault("sealed key is not a valid private key".into()))?
            .with_chain_id(self.chain_id);
        if wallet.address() != expected {
            return Err(EngineError::Vault("sealed key does not match the account wallet".into()));
        }
        let signature = wallet
            .sign_transaction_sync(tx)
            .map_err(|e| EngineError::ExecutionFailure(format!("signing failed: {e}")))?;
        Ok(tx.rlp_signed(&signature))
    }

    async fn broadcast(&self, sealed_key: &str, taker: Address, tx: TypedTransaction) -> Result<String, EngineError> {
        let signed = self.sign(sealed_key, taker, &tx)?;
        let tx_hash = self.chain.send_raw(signed).await.map_err(exec_err)?;
        match wait_for_receipt(self.chain.as_ref(), &tx_hash, self.confirm_timeout, self.poll_interval).await {
            TxOutcome::Confirmed => Ok(tx_hash),
            TxOutcome::Reverted => Err(EngineError::ExecutionFailure(format!("transaction {tx_hash} reverted"))),
            TxOutcome::TimedOut => {
                warn!(tx_hash = %tx_hash, "Broadcast not confirmed before timeout, left unreconciled");
                Err(EngineError::ExecutionFailure(format!(
                    "transaction {tx_hash} unconfirmed after {}s",
                    self.confirm_timeout.as_secs()
                )))
            }
        }
    }

    /// Sell exactly `sell_amount` of `sell` for `buy`, approving the
    /// aggregator first if the quote asks for it.
    async fn swap_exact_in(
        &self,
        account: &Account,
        sell: Address,
        buy: Address,
        sell_amount: U256,
    ) -> Result<SwapOutcome, EngineError> {
        let sealed_key = account
            .sealed_key
            .as_deref()
            .ok_or_else(|| EngineError::Vault(format!("account {} has no sealed key", account.id)))?;
        let taker = parse_address(
            "wallet",
            account
                .wallet_address
                .as_deref()
                .ok_or_else(|| EngineError::ExecutionFailure(format!("account {} has no wallet", account.id)))?,
        )?;

        let before = self.chain.balance_of(buy, taker).await.map_err(exec_err)?;
        let quote = self
            .swap
            .quote(&QuoteRequest {
                chain_id: self.chain_id,
                sell_token: sell,
                buy_token: buy,
                sell_amount,
                taker,
                slippage_bps: self.slippage_bps,
            })
            .await
            .map_err(exec_err)?;

        let mut nonce = self.chain.nonce(taker).await.map_err(exec_err)?;
        let gas_price = match quote.gas_price {
            Some(price) => price,
            None => self.chain.gas_price().await.map_err(exec_err)?,
        };

        if let Some(spender) = quote.allowance_spender {
            info!(account_id = %account.id, spender = ?spender, "Approving swap spender");
            let approve = TransactionRequest::new()
                .from(taker)
                .to(sell)
                .data(approve_calldata(spender, U256::MAX))
                .nonce(nonce)
                .gas(APPROVE_GAS)
                .gas_price(gas_price)
                .chain_id(self.chain_id);
            self.broadcast(sealed_key, taker, approve.into()).await?;
            nonce += U256::one();
        }

        let swap_tx = TransactionRequest::new()
            .from(taker)
            .to(quote.to)
            .data(quote.data.clone())
            .value(quote.value)
            .nonce(nonce)
            .gas(quote.gas.unwrap_or_else(|| U256::from(DEFAULT_SWAP_GAS)))
            .gas_price(gas_price)
            .chain_id(self.chain_id);
        let tx_hash = self.broadcast(sealed_key, taker, swap_tx.into()).await?;

        let received_raw = match self.chain.balance_of(buy, taker).await {
            Ok(after) if after > before => after - before,
            Ok(_) | Err(_) => {
                warn!(tx_hash = %tx_hash, "Could not observe received amount, using quoted amount");
                quote.buy_amount
            }
        };

        Ok(SwapOutcome {
            sold_raw: quote.sell_amount,
            received_raw,
            tx_hash,
        })
    }
}

#[async_trait]
impl ExecutionAdapter for LiveExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn open(&self, account: &Account, plan: &OrderPlan) -> Result<Fill, EngineError> {
        if plan.side != Side::Long || plan.leverage > 1.0 + 1e-9 {
            return Err(EngineError::ExecutionFailure(
                "live execution supports unleveraged longs only".into(),
            ));
        }
        if plan.total_cost() > account.balance {
            return Err(EngineError::InsufficientBalance {
                needed: plan.total_cost(),
                available: account.balance,
            });
        }

        let asset = parse_address("asset", &plan.asset_id)?;
        let asset_decimals = self.chain.decimals(asset).await.map_err(exec_err)?;
        let amount = to_raw_units(plan.size, self.quote_decimals).map_err(exec_err)?;

        let outcome = self.swap_exact_in(account, self.quote_token, asset, amount).await?;
        let spent = from_raw_units(outcome.sold_raw, self.quote_decimals).map_err(exec_err)?;
        let received = from_raw_units(outcome.received_raw, asset_decimals).map_err(exec_err)?;
        if !(received > 0.0) || !(spent > 0.0) {
            return Err(EngineError::ExecutionFailure(format!(
                "swap {} produced an empty fill",
                outcome.tx_hash
            )));
        }

        info!(
            account_id = %account.id,
            asset = %plan.asset_id,
            spent,
            received,
            tx_hash = %outcome.tx_hash,
            "[LIVE] Entry confirmed"
        );
        Ok(Fill {
            price: spent / received,
            quantity: received,
            notional: spent,
            fees: 0.0,
            tx_hash: Some(outcome.tx_hash),
        })
    }

    async fn close(
        &self,
        account: &Account,
        position: &Position,
        quantity: f64,
        market_price: f64,
    ) -> Result<Fill, EngineError> {
        check_exit_request(position, quantity, market_price)?;
        if position.side != Side::Long {
            return Err(EngineError::ExecutionFailure("live execution cannot close shorts".into()));
        }

        let asset = parse_address("asset", &position.asset_id)?;
        let asset_decimals = self.chain.decimals(asset).await.map_err(exec_err)?;
        let amount = to_raw_units(quantity, asset_decimals).map_err(exec_err)?;
        if amount.is_zero() {
            return Err(EngineError::ExecutionFailure(format!("exit quantity {quantity} rounds to zero")));
        }

        let outcome = self.swap_exact_in(account, asset, self.quote_token, amount).await?;
        let sold = from_raw_units(outcome.sold_raw, asset_decimals).map_err(exec_err)?;
        let proceeds = from_raw_units(outcome.received_raw, self.quote_decimals).map_err(exec_err)?;
        if !(sold > 0.0) {
            return Err(EngineError::ExecutionFailure(format!(
                "swap {} sold nothing",
                outcome.tx_hash
            )));
        }

        info!(
            account_id = %account.id,
            position_id = %position.id,
            sold,
            proceeds,
            tx_hash = %outcome.tx_hash,
            "[LIVE] Exit confirmed"
        );
        Ok(Fill {
            price: proceeds / sold,
            quantity: sold,
            notional: proceeds,
            fees: 0.0,
            tx_hash: Some(outcome.tx_hash),
        })
    }
}

// ---------------------------------------------------------------------------
// Mode routing
// ---------------------------------------------------------------------------

/// Adapters by execution mode. Live is absent unless configured.
#[derive(Clone)]
pub struct Executors {
    paper: Arc<dyn ExecutionAdapter>,
    live: Option<Arc<dyn ExecutionAdapter>>,
}

impl Executors {
    pub fn new(paper: Arc<dyn ExecutionAdapter>, live: Option<Arc<dyn ExecutionAdapter>>) -> Self {
        Self { paper, live }
    }

    pub fn paper_only() -> Self {
        Self::new(Arc::new(SimulatedExecutor), None)
    }

    pub fn for_mode(&self, mode: ExecutionMode) -> Result<&dyn ExecutionAdapter, EngineError> {
        match mode {
            ExecutionMode::Paper => Ok(self.paper.as_ref()),
            ExecutionMode::Live => self
                .live
                .as_deref()
                .ok_or_else(|| EngineError::ConfigurationInvalid("live execution is not configured".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::swap::{MockChainClient, MockSwapProvider, SwapQuote};
    use crate::types::PositionStatus;
    use chrono::Utc;
    use secrecy::SecretString;

    // Well-known development key (anvil account 0).
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
    const ASSET: &str = "0x00000000000000000000000000000000000000aa";

    fn make_plan(size: f64, leverage: f64, side: Side) -> OrderPlan {
        OrderPlan {
            asset_id: ASSET.into(),
            symbol: "AA".into(),
            side,
            reference_price: 0.025,
            entry_price: 0.025,
            stop_price: 0.023,
            stop_distance_pct: 8.0,
            targets: vec![0.028, 0.031],
            trailing_pct: 8.0,
            size,
            quantity: size / 0.025,
            leverage,
            margin: size / leverage,
            fees: size * 0.003,
            risk_amount: 4.0,
        }
    }

    fn make_position(quantity: f64) -> Position {
        Position {
            id: "p1".into(),
            owner_id: "acct".into(),
            asset_id: ASSET.into(),
            symbol: "AA".into(),
            chain: "base".into(),
            side: Side::Long,
            entry_price: 0.025,
            stop_price: None,
            quantity,
            cost_basis: quantity * 0.025,
            leverage: 1.0,
            fees_paid: 0.0,
            peak_price: 0.025,
            breakeven_armed: false,
            partial_sold_qty: 0.0,
            realized_pnl: 0.0,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            tx_hash: None,
        }
    }

    fn make_vault() -> Arc<KeyVault> {
        Arc::new(KeyVault::new(SecretString::new("server-secret-0123456789".into())).unwrap())
    }

    fn make_live_account(vault: &KeyVault) -> Account {
        let mut account = Account::new("acct", "base", ExecutionMode::Live, 500.0, Settings::default());
        account.wallet_address = Some(DEV_ADDRESS.into());
        account.sealed_key = Some(vault.seal(&SecretString::new(DEV_KEY.into())).unwrap());
        account
    }

    fn make_quote(sell_amount: u64, buy_amount: U256) -> SwapQuote {
        SwapQuote {
            to: "0x0000000000001ff3684f28c67538d4d072c22734".parse().unwrap(),
            data: Bytes::from(vec![0xde, 0xad]),
            value: U256::zero(),
            gas: Some(U256::from(200_000u64)),
            gas_price: Some(U256::from(1_000_000u64)),
            sell_amount: U256::from(sell_amount),
            buy_amount,
            allowance_spender: None,
        }
    }

    fn make_live(swap: MockSwapProvider, chain: MockChainClient, vault: Arc<KeyVault>) -> LiveExecutor {
        LiveExecutor::new(&LiveConfig::default(), Arc::new(swap), Arc::new(chain), vault)
            .unwrap()
            .with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_simulated_open_fills_at_plan() {
        let account = Account::new("acct", "base", ExecutionMode::Paper, 1000.0, Settings::default());
        let plan = make_plan(50.0, 1.0, Side::Long);
        let fill = SimulatedExecutor.open(&account, &plan).await.unwrap();
        assert_eq!(fill.price, plan.entry_price);
        assert_eq!(fill.quantity, plan.quantity);
        assert_eq!(fill.notional, 50.0);
        assert!(fill.tx_hash.is_none());
    }

    #[tokio::test]
    async fn test_simulated_open_rejects_unaffordable_plan() {
        let account = Account::new("acct", "base", ExecutionMode::Paper, 10.0, Settings::default());
        let err = SimulatedExecutor
            .open(&account, &make_plan(50.0, 1.0, Side::Long))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn test_simulated_close_applies_slippage_and_fee() {
        let account = Account::new("acct", "base", ExecutionMode::Paper, 1000.0, Settings::default());
        let position = make_position(1000.0);
        let fill = SimulatedExecutor.close(&account, &position, 1000.0, 0.03).await.unwrap();
        // Default slippage 1%, fee 0.3%
        assert!((fill.price - 0.0297).abs() < 1e-12);
        assert!((fill.notional - 29.7).abs() < 1e-9);
        assert!((fill.fees - 0.0891).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_close_rejects_bad_requests() {
        let account = Account::new("acct", "base", ExecutionMode::Paper, 1000.0, Settings::default());
        let position = make_position(100.0);
        assert!(SimulatedExecutor.close(&account, &position, 0.0, 1.0).await.is_err());
        assert!(SimulatedExecutor.close(&account, &position, 150.0, 1.0).await.is_err());
        assert!(SimulatedExecutor.close(&account, &position, 10.0, f64::NAN).await.is_err());

        let mut closed = make_position(100.0);
        closed.status = PositionStatus::Closed;
        assert!(SimulatedExecutor.close(&account, &closed, 10.0, 1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_live_open_reports_observed_fill() {
        let vault = make_vault();
        let account = make_live_account(&vault);

        let mut swap = MockSwapProvider::new();
        swap.expect_quote()
            .times(1)
            .returning(|req| {
                assert_eq!(req.sell_amount, U256::from(50_000_000u64));
                Ok(make_quote(50_000_000, U256::exp10(18) * U256::from(1990u64)))
            });

        let mut chain = MockChainClient::new();
        let mut seq = mockall::Sequence::new();
        chain.expect_decimals().returning(|_| Ok(18));
        chain
            .expect_balance_of()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(U256::zero()));
        chain.expect_nonce().returning(|_| Ok(U256::from(7u64)));
        chain.expect_send_raw().times(1).returning(|signed| {
            assert!(!signed.is_empty());
            Ok("0xswap".to_string())
        });
        chain.expect_receipt_status().returning(|_| Ok(Some(true)));
        chain
            .expect_balance_of()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(U256::exp10(18) * U256::from(2000u64)));

        let live = make_live(swap, chain, vault);
        let fill = live.open(&account, &make_plan(50.0, 1.0, Side::Long)).await.unwrap();
        assert_eq!(fill.quantity, 2000.0);
        assert_eq!(fill.notional, 50.0);
        assert!((fill.price - 0.025).abs() < 1e-12);
        assert_eq!(fill.tx_hash.as_deref(), Some("0xswap"));
    }

    #[tokio::test]
    async fn test_live_rejects_leverage_and_shorts() {
        let vault = make_vault();
        let account = make_live_account(&vault);
        let live = make_live(MockSwapProvider::new(), MockChainClient::new(), vault);

        let err = live.open(&account, &make_plan(50.0, 2.0, Side::Long)).await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionFailure(_)));
        let err = live.open(&account, &make_plan(50.0, 1.0, Side::Short)).await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionFailure(_)));
    }

    #[tokio::test]
    async fn test_live_quote_failure_is_no_fill() {
        let vault = make_vault();
        let account = make_live_account(&vault);

        let mut swap = MockSwapProvider::new();
        swap.expect_quote().returning(|_| Err(anyhow::anyhow!("0x API error 503")));
        let mut chain = MockChainClient::new();
        chain.expect_decimals().returning(|_| Ok(18));
        chain.expect_balance_of().returning(|_, _| Ok(U256::zero()));
        chain.expect_send_raw().never();

        let live = make_live(swap, chain, vault);
        let err = live.open(&account, &make_plan(50.0, 1.0, Side::Long)).await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionFailure(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_live_reverted_swap_is_failure() {
        let vault = make_vault();
        let account = make_live_account(&vault);

        let mut swap = MockSwapProvider::new();
        swap.expect_quote()
            .returning(|_| Ok(make_quote(1_000_000_000_000_000_000, U256::from(30_000_000u64))));
        let mut chain = MockChainClient::new();
        chain.expect_decimals().returning(|_| Ok(18));
        chain.expect_balance_of().returning(|_, _| Ok(U256::zero()));
        chain.expect_nonce().returning(|_| Ok(U256::zero()));
        chain.expect_send_raw().returning(|_| Ok("0xbad".to_string()));
        chain.expect_receipt_status().returning(|_| Ok(Some(false)));

        let live = make_live(swap, chain, vault);
        let err = live.close(&account, &make_position(1.0), 1.0, 30.0).await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionFailure(msg) if msg.contains("reverted")));
    }

    #[tokio::test]
    async fn test_live_requires_matching_sealed_key() {
        let vault = make_vault();
        let mut account = make_live_account(&vault);
        account.wallet_address = Some("0x00000000000000000000000000000000000000bb".into());

        let mut swap = MockSwapProvider::new();
        swap.expect_quote()
            .returning(|_| Ok(make_quote(50_000_000, U256::from(1u64))));
        let mut chain = MockChainClient::new();
        chain.expect_decimals().returning(|_| Ok(18));
        chain.expect_balance_of().returning(|_, _| Ok(U256::zero()));
        chain.expect_nonce().returning(|_| Ok(U256::zero()));
        chain.expect_send_raw().never();

        let live = make_live(swap, chain, vault);
        let err = live.open(&account, &make_plan(50.0, 1.0, Side::Long)).await.unwrap_err();
        assert!(matches!(err, EngineError::Vault(_)));
    }

    #[test]
    fn test_executors_route_by_mode() {
        let executors = Executors::paper_only();
        assert_eq!(executors.for_mode(ExecutionMode::Paper).unwrap().mode(), ExecutionMode::Paper);
        assert!(executors.for_mode(ExecutionMode::Live).is_err());
    }
}
