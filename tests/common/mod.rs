//! In-memory chain, market and bridge for integration testing.
//!
//! Every fake shares one `World`, so a vault call made by the executor is
//! visible to the next refresh, the wallet and the bridge. Bridges land
//! instantly; completion still goes through the normal tracking path.

#![allow(dead_code)]

use alloy::primitives::{Address, B256, U256};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use velvet_arc::bridge::{
    BridgeAggregator, BridgeError, BridgeStatus, BridgeTracker, Route, RouteExecution,
    RouteRequest, StatusQuery,
};
use velvet_arc::chain::{
    AgentWallet, ChainError, HookClient, HookStatus, RawTransaction, TxHash, VaultClient,
    VaultStats,
};
use velvet_arc::config::{BridgeMode, PolicyConfig, ScannerConfig};
use velvet_arc::engine::{AgentLoop, AgentRunner, Executor, Routing};
use velvet_arc::market::{GasOracle, MarketScanner, PriceFeed, PriceQuote};
use velvet_arc::strategy::DecisionEngine;
use velvet_arc::types::VaultState;

pub const SOURCE: u64 = 5042002;
pub const DESTINATION: u64 = 84532;
pub const VAULT: Address = Address::repeat_byte(0xaa);
pub const AGENT: Address = Address::repeat_byte(0xbb);

#[derive(Debug)]
pub struct World {
    pub vault_state: VaultState,
    pub available: Decimal,
    pub deployed: Decimal,
    /// Agent wallet USDC on the destination chain
    pub destination_balance: Decimal,
    pub change_24h: f64,
    pub routes_available: bool,
    /// Write calls in the order they were made
    pub calls: Vec<String>,
    pub fees: Vec<u32>,
    last_bridged: Option<Decimal>,
    next_tx: u8,
}

impl World {
    pub fn new(available: Decimal) -> Shared {
        Arc::new(Mutex::new(World {
            vault_state: VaultState::Idle,
            available,
            deployed: Decimal::ZERO,
            destination_balance: Decimal::ZERO,
            change_24h: 1.0,
            routes_available: true,
            calls: Vec::new(),
            fees: Vec::new(),
            last_bridged: None,
            next_tx: 0,
        }))
    }

    fn tx(&mut self, call: &str) -> TxHash {
        self.next_tx = self.next_tx.wrapping_add(1);
        self.calls.push(call.to_string());
        B256::with_last_byte(self.next_tx)
    }
}

pub type Shared = Arc<Mutex<World>>;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

pub struct FakeFeed(pub Shared);

#[async_trait]
impl PriceFeed for FakeFeed {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch_quote(&self) -> Result<PriceQuote> {
        let world = self.0.lock().unwrap();
        Ok(PriceQuote {
            price: 3000.0,
            change_24h: world.change_24h,
            volume_24h: dec!(20_000_000),
        })
    }
}

pub struct FakeGas;

#[async_trait]
impl GasOracle for FakeGas {
    async fn gas_price_gwei(&self) -> Result<f64> {
        Ok(30.0)
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

pub struct FakeVault(pub Shared);

#[async_trait]
impl VaultClient for FakeVault {
    fn address(&self) -> Address {
        VAULT
    }

    async fn stats(&self) -> Result<VaultStats, ChainError> {
        let w = self.0.lock().unwrap();
        Ok(VaultStats {
            state: w.vault_state,
            total_deposits: dec!(1000),
            total_shares: dec!(1000),
            deployed: w.deployed,
            available: w.available,
            yield_earned: Decimal::ZERO,
            share_price: Decimal::ONE,
        })
    }

    async fn shares_of(&self, _user: Address) -> Result<Decimal, ChainError> {
        Ok(dec!(1000))
    }

    async fn deposit(&self, amount: Decimal) -> Result<TxHash, ChainError> {
        let mut w = self.0.lock().unwrap();
        w.available += amount;
        Ok(w.tx("deposit"))
    }

    async fn withdraw(&self, shares: Decimal) -> Result<TxHash, ChainError> {
        let mut w = self.0.lock().unwrap();
        w.available -= shares;
        Ok(w.tx("withdraw"))
    }

    async fn bridge_to_execution(
        &self,
        amount: Decimal,
        destination_chain: u64,
        recipient: Address,
    ) -> Result<TxHash, ChainError> {
        assert_eq!(destination_chain, DESTINATION);
        assert_eq!(recipient, AGENT);
        let mut w = self.0.lock().unwrap();
        if amount > w.available {
            return Err(ChainError::Rpc("execution reverted: insufficient".to_string()));
        }
        w.available -= amount;
        w.deployed += amount;
        w.destination_balance += amount;
        w.vault_state = VaultState::BridgingOut;
        Ok(w.tx("bridgeToExecution"))
    }

    async fn confirm_deployment(&self) -> Result<TxHash, ChainError> {
        let mut w = self.0.lock().unwrap();
        w.vault_state = VaultState::Deployed;
        Ok(w.tx("confirmDeployment"))
    }

    async fn signal_return(&self) -> Result<TxHash, ChainError> {
        let mut w = self.0.lock().unwrap();
        if w.vault_state != VaultState::Protected {
            w.vault_state = VaultState::BridgingBack;
        }
        Ok(w.tx("signalReturn"))
    }

    async fn confirm_return(&self, _amount: Decimal) -> Result<TxHash, ChainError> {
        let mut w = self.0.lock().unwrap();
        w.vault_state = VaultState::Idle;
        w.deployed = Decimal::ZERO;
        Ok(w.tx("confirmReturn"))
    }

    async fn trigger_circuit_breaker(&self, _reason: &str) -> Result<TxHash, ChainError> {
        let mut w = self.0.lock().unwrap();
        w.vault_state = VaultState::Protected;
        Ok(w.tx("triggerCircuitBreaker"))
    }
}

pub struct FakeHook(pub Shared);

#[async_trait]
impl HookClient for FakeHook {
    async fn status(&self) -> Result<HookStatus, ChainError> {
        let w = self.0.lock().unwrap();
        Ok(HookStatus {
            current_fee: w.fees.last().copied().unwrap_or(3000),
            volatility: None,
            liquidity: Decimal::ZERO,
            last_update: 0,
            fee_reason: String::new(),
        })
    }

    async fn update_dynamic_fee(&self, fee: u32, _reason: &str) -> Result<TxHash, ChainError> {
        let mut w = self.0.lock().unwrap();
        w.fees.push(fee);
        Ok(w.tx("updateDynamicFee"))
    }
}

pub struct FakeWallet(pub Shared);

#[async_trait]
impl AgentWallet for FakeWallet {
    fn address(&self) -> Address {
        AGENT
    }

    async fn usdc_balance(&self, chain_id: u64) -> Result<Decimal, ChainError> {
        let w = self.0.lock().unwrap();
        Ok(if chain_id == DESTINATION {
            w.destination_balance
        } else {
            Decimal::ZERO
        })
    }

    async fn ensure_allowance(
        &self,
        _chain_id: u64,
        _token: Address,
        _spender: Address,
        _amount: U256,
    ) -> Result<Option<TxHash>, ChainError> {
        Ok(None)
    }

    async fn send_raw(&self, _chain_id: u64, _tx: RawTransaction) -> Result<TxHash, ChainError> {
        let mut w = self.0.lock().unwrap();
        Ok(w.tx("sendRaw"))
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

pub struct FakeBridge(pub Shared);

#[async_trait]
impl BridgeAggregator for FakeBridge {
    async fn routes(&self, request: &RouteRequest) -> Result<Vec<Route>, BridgeError> {
        if !self.0.lock().unwrap().routes_available {
            return Ok(Vec::new());
        }
        Ok(vec![Route {
            id: "fake-route".to_string(),
            from_chain: request.from_chain,
            to_chain: request.to_chain,
            from_amount: request.from_amount,
            to_amount: request.from_amount,
            to_amount_min: request.from_amount,
            tool: "cctp".to_string(),
            estimated_secs: 30,
            steps: vec![serde_json::json!({"tool": "cctp"})],
        }])
    }

    async fn execute(&self, route: &Route) -> Result<RouteExecution, BridgeError> {
        let mut w = self.0.lock().unwrap();
        if route.from_chain == DESTINATION {
            w.destination_balance -= route.from_amount;
            w.available += route.to_amount;
        } else {
            w.destination_balance += route.to_amount;
        }
        w.last_bridged = Some(route.to_amount);
        let tx = w.tx("lifi:execute");
        Ok(RouteExecution {
            tx_hashes: vec![tx],
            source_tx: tx,
            tool: route.tool.clone(),
        })
    }

    async fn status(&self, _query: &StatusQuery) -> Result<BridgeStatus, BridgeError> {
        let w = self.0.lock().unwrap();
        Ok(BridgeStatus::Done {
            received: w.last_bridged,
        })
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn runner(world: &Shared, mode: BridgeMode, dry_run: bool) -> AgentRunner {
    let vault: Arc<dyn VaultClient> = Arc::new(FakeVault(world.clone()));
    let wallet: Arc<dyn AgentWallet> = Arc::new(FakeWallet(world.clone()));
    let bridge: Arc<dyn BridgeAggregator> = Arc::new(FakeBridge(world.clone()));

    let scanner = MarketScanner::new(
        Arc::new(FakeFeed(world.clone())),
        Arc::new(FakeGas),
        ScannerConfig {
            cooldown_secs: 0,
            ..ScannerConfig::default()
        },
    );
    let executor = Executor::new(
        vault.clone(),
        Arc::new(FakeHook(world.clone())),
        wallet.clone(),
        bridge.clone(),
        Routing {
            source_chain: SOURCE,
            destination_chain: DESTINATION,
            source_usdc: Address::repeat_byte(0x36),
            destination_usdc: Address::repeat_byte(0x03),
            mode,
        },
        10,
        dry_run,
    );
    let agent = AgentLoop::new(
        scanner,
        DecisionEngine::new(PolicyConfig::default(), None),
        executor,
        BridgeTracker::new(10, chrono::Duration::minutes(30)),
        vault,
        wallet,
        bridge,
    );

    let initial = world.lock().unwrap().available;
    AgentRunner::new(agent, initial, Duration::from_secs(15))
}
