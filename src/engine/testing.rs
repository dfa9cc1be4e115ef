//! Offline agent wiring for unit tests: a steady LOW-volatility market, an
//! unreachable vault and a dry-run executor.

use alloy::primitives::Address;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use super::{AgentLoop, AgentRunner, Executor, Routing};
use crate::bridge::{BridgeAggregator, BridgeTracker, MockBridgeAggregator};
use crate::chain::{AgentWallet, ChainError, MockAgentWallet, MockHookClient, MockVaultClient, VaultClient};
use crate::config::{BridgeMode, PolicyConfig, ScannerConfig};
use crate::market::{MarketScanner, MockGasOracle, MockPriceFeed, PriceQuote};
use crate::strategy::DecisionEngine;

pub fn dry_agent() -> AgentLoop {
    let mut feed = MockPriceFeed::new();
    feed.expect_name().return_const("mock");
    feed.expect_fetch_quote().returning(|| {
        Ok(PriceQuote {
            price: 3000.0,
            change_24h: 1.0,
            volume_24h: dec!(20_000_000),
        })
    });
    let mut gas = MockGasOracle::new();
    gas.expect_gas_price_gwei().returning(|| Ok(30.0));

    let mut vault = MockVaultClient::new();
    vault.expect_address().return_const(Address::repeat_byte(0xaa));
    vault
        .expect_stats()
        .returning(|| Err(ChainError::Rpc("offline".to_string())));
    let mut wallet = MockAgentWallet::new();
    wallet.expect_address().return_const(Address::repeat_byte(0xbb));

    let vault: Arc<dyn VaultClient> = Arc::new(vault);
    let wallet: Arc<dyn AgentWallet> = Arc::new(wallet);
    let aggregator: Arc<dyn BridgeAggregator> = Arc::new(MockBridgeAggregator::new());

    let executor = Executor::new(
        vault.clone(),
        Arc::new(MockHookClient::new()),
        wallet.clone(),
        aggregator.clone(),
        Routing {
            source_chain: 5042002,
            destination_chain: 84532,
            source_usdc: Address::repeat_byte(0x36),
            destination_usdc: Address::repeat_byte(0x03),
            mode: BridgeMode::Native,
        },
        10,
        true,
    );
    AgentLoop::new(
        MarketScanner::new(Arc::new(feed), Arc::new(gas), ScannerConfig::default()),
        DecisionEngine::new(PolicyConfig::default(), None),
        executor,
        BridgeTracker::new(10, chrono::Duration::minutes(30)),
        vault,
        wallet,
        aggregator,
    )
}

pub fn dry_runner() -> AgentRunner {
    AgentRunner::new(dry_agent(), dec!(1000), Duration::from_millis(10))
}
