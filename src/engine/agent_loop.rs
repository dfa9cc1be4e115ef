//! The agent state machine.
//!
//! One call to [`AgentLoop::run_iteration`] is one tick: refresh the vault
//! view, settle or wait on the outstanding bridge, reconcile with the
//! vault's lifecycle, otherwise scan → decide → execute, and finally apply
//! the state transition for the realised action. Errors never escape an
//! iteration; they are logged as an `ERROR` entry and the phase drops back
//! to IDLE.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::executor::{ExecutionOutcome, Executor};
use crate::bridge::{BridgeAggregator, BridgeKind, BridgeTracker, PendingBridge, TrackOutcome};
use crate::chain::{AgentWallet, VaultClient};
use crate::market::{MarketScanner, VolatilityScenario};
use crate::strategy::lifecycle::{reconcile, Reconciliation};
use crate::strategy::DecisionEngine;
use crate::types::{
    Action, AgentDecision, AgentError, AgentLoopState, AgentPhase, ExecutionLog, Position,
    VaultSnapshot,
};

pub struct AgentLoop {
    scanner: MarketScanner,
    engine: DecisionEngine,
    executor: Executor,
    tracker: BridgeTracker,
    vault: Arc<dyn VaultClient>,
    wallet: Arc<dyn AgentWallet>,
    aggregator: Arc<dyn BridgeAggregator>,
}

impl AgentLoop {
    pub fn new(
        scanner: MarketScanner,
        engine: DecisionEngine,
        executor: Executor,
        tracker: BridgeTracker,
        vault: Arc<dyn VaultClient>,
        wallet: Arc<dyn AgentWallet>,
        aggregator: Arc<dyn BridgeAggregator>,
    ) -> Self {
        Self {
            scanner,
            engine,
            executor,
            tracker,
            vault,
            wallet,
            aggregator,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.executor.dry_run()
    }

    pub fn demo_active(&self) -> bool {
        self.engine.demo_active()
    }

    /// Override the volatility seen by the next scan.
    pub fn inject(&mut self, scenario: VolatilityScenario) {
        self.scanner.inject(scenario);
    }

    /// Restart time-driven behaviour (the demo cycle). Agent state is owned
    /// by the caller and replaced there.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.engine.reset(now);
    }

    pub async fn run_iteration(&mut self, state: &mut AgentLoopState) {
        self.run_iteration_at(state, Utc::now()).await
    }

    /// Run one tick as of `now`.
    pub async fn run_iteration_at(&mut self, state: &mut AgentLoopState, now: DateTime<Utc>) {
        state.iteration += 1;

        if let Err(e) = self.iterate(state, now).await {
            error!(iteration = state.iteration, error = %e, "Iteration failed");
            state.record(ExecutionLog::failure("ERROR", e.to_string()));
            state.phase = AgentPhase::Idle;
        }

        debug!(iteration = state.iteration, state = %state, "Iteration complete");
        if !state.is_consistent() {
            warn!(state = %state, "Agent state inconsistent after iteration");
        }
    }

    async fn iterate(
        &mut self,
        state: &mut AgentLoopState,
        now: DateTime<Utc>,
    ) -> Result<(), AgentError> {
        let tripped = state.phase == AgentPhase::CircuitBreaker;
        if !tripped {
            state.phase = AgentPhase::Scanning;
        }

        self.refresh_vault(state).await;

        if tripped {
            self.hold_in_breaker(state, now).await;
            return Ok(());
        }

        // -- Outstanding bridge ------------------------------------------------
        if let Some(mut pending) = state.pending_bridge.take() {
            let outcome = self
                .tracker
                .poll(&mut pending, self.aggregator.as_ref(), state.last_vault.as_ref(), now)
                .await;
            match outcome {
                TrackOutcome::Pending => {
                    state.pending_bridge = Some(pending);
                    state.phase = AgentPhase::AwaitingBridge;
                }
                TrackOutcome::Completed { received } => {
                    let decision = confirmation(&pending, received);
                    self.realise(state, decision).await?;
                }
                TrackOutcome::Failed { reason } => revert_bridge(state, &pending, &reason),
                TrackOutcome::TimedOut => revert_bridge(state, &pending, "timed out"),
            }
            return Ok(());
        }

        // -- Vault lifecycle ---------------------------------------------------
        let reconciliation = state
            .last_vault
            .as_ref()
            .and_then(|vault| reconcile(state, vault));
        match reconciliation {
            Some(Reconciliation::Protected) => {
                warn!("Vault is PROTECTED, entering circuit breaker");
                let exposure = state.deployed_amount;
                apply_transition(state, &Action::EmergencyExit { exposure }, None);
                state.record(ExecutionLog::success(
                    "EMERGENCY_EXIT",
                    "Vault reports PROTECTED; circuit breaker engaged",
                ));
                return Ok(());
            }
            Some(Reconciliation::Confirm(decision)) => {
                info!(decision = %decision, "Vault lifecycle requires confirmation");
                return self.realise(state, decision).await;
            }
            None => {}
        }

        // -- Market decision ---------------------------------------------------
        let conditions = self.scanner.scan(now).await;
        info!(conditions = %conditions, "Market scanned");
        state.last_conditions = Some(conditions.clone());

        state.phase = AgentPhase::Analyzing;
        let decision = self.engine.decide(&conditions, state, now);
        self.realise(state, decision).await
    }

    /// Execute `decision` and apply its transition.
    async fn realise(
        &mut self,
        state: &mut AgentLoopState,
        decision: AgentDecision,
    ) -> Result<(), AgentError> {
        info!(
            action = decision.action.label(),
            confidence = format!("{:.2}", decision.confidence),
            reason = %decision.reason,
            "Decision"
        );
        state.last_decision = Some(decision.clone());

        let result = self.executor.execute(&decision, state).await?;
        let label = decision.action.label();

        let details = match &result.outcome {
            ExecutionOutcome::Deferred(reason) => {
                info!(action = label, reason = %reason, "Execution deferred to next tick");
                state.phase = state.resting_phase();
                state.record(
                    ExecutionLog::success(label, format!("Deferred: {reason}"))
                        .with_tx(result.last_tx()),
                );
                return Ok(());
            }
            ExecutionOutcome::NoOp(reason) if matches!(decision.action, Action::EmergencyExit { .. }) => {
                format!("{} (no-op: {reason})", decision.reason)
            }
            _ => decision.reason.clone(),
        };

        let tx = result.last_tx();
        apply_transition(state, &decision.action, result.pending_bridge);
        state.record(ExecutionLog::success(label, details).with_tx(tx));
        Ok(())
    }

    /// Breaker tripped: keep scanning for observers, settle the emergency
    /// return if one is in flight, and keep retrying the pull-back while
    /// capital is stranded on the execution chain. No decisions until reset.
    async fn hold_in_breaker(&mut self, state: &mut AgentLoopState, now: DateTime<Utc>) {
        if let Some(mut pending) = state.pending_bridge.take() {
            let outcome = self
                .tracker
                .poll(&mut pending, self.aggregator.as_ref(), state.last_vault.as_ref(), now)
                .await;
            match outcome {
                TrackOutcome::Pending => state.pending_bridge = Some(pending),
                TrackOutcome::Completed { received } => {
                    state.vault_balance += received;
                    state.in_transit = Decimal::ZERO;
                    state.record(
                        ExecutionLog::success("BRIDGE", format!("Emergency return settled: ${received:.2}"))
                            .with_tx(pending.tx_hash().map(str::to_string)),
                    );
                }
                TrackOutcome::Failed { reason } => strand(state, &pending, &reason),
                TrackOutcome::TimedOut => strand(state, &pending, "timed out"),
            }
        }

        if state.pending_bridge.is_none() && stranded(state) {
            self.retry_pull_back(state).await;
        }

        let conditions = self.scanner.scan(now).await;
        state.last_conditions = Some(conditions);
        let details = if stranded(state) {
            format!(
                "Circuit breaker active, ${:.2} still on execution chain",
                state.deployed_amount
            )
        } else {
            "Circuit breaker active, awaiting reset".to_string()
        };
        state.record(ExecutionLog::success("HOLD", details));
        state.phase = AgentPhase::CircuitBreaker;
    }

    async fn retry_pull_back(&mut self, state: &mut AgentLoopState) {
        let exposure = state.deployed_amount;
        match self.executor.pull_back(state).await {
            Ok(result) => {
                let tx = result.last_tx();
                match result.pending_bridge {
                    Some(pending) => {
                        info!(bridge = %pending, "Emergency pull-back sent");
                        apply_transition(state, &Action::EmergencyExit { exposure }, Some(pending));
                        state.record(ExecutionLog::success("WITHDRAW", "Emergency pull-back sent").with_tx(tx));
                    }
                    None => {
                        let reason = match result.outcome {
                            ExecutionOutcome::Deferred(reason) | ExecutionOutcome::NoOp(reason) => reason,
                            ExecutionOutcome::Submitted => "no bridge opened".to_string(),
                        };
                        warn!(amount = format!("${exposure:.2}"), reason = %reason, "Emergency pull-back deferred");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Emergency pull-back failed, retrying next tick"),
        }
    }

    /// Read vault stats and the agent's destination balance. On failure the
    /// previous snapshot is kept.
    async fn refresh_vault(&self, state: &mut AgentLoopState) {
        let stats = match self.vault.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Vault read failed, keeping last snapshot");
                return;
            }
        };

        let destination_chain = self.executor.routing().destination_chain;
        let destination_balance = match self.wallet.usdc_balance(destination_chain).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(error = %e, chain = destination_chain, "Balance read failed");
                state
                    .last_vault
                    .as_ref()
                    .map(|v| v.destination_balance)
                    .unwrap_or_default()
            }
        };

        let snapshot = VaultSnapshot {
            state: stats.state,
            total_deposits: stats.total_deposits,
            total_shares: stats.total_shares,
            deployed: stats.deployed,
            available: stats.available,
            yield_earned: stats.yield_earned,
            share_price: stats.share_price,
            destination_balance,
            observed_at: Utc::now(),
        };
        debug!(vault = %snapshot, "Vault refreshed");
        // Local accounting leads the chain while capital is moving.
        if state.pending_bridge.is_none() && state.in_transit.is_zero() {
            state.vault_balance = snapshot.available;
        }
        state.last_vault = Some(snapshot);
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

fn confirmation(pending: &PendingBridge, received: Decimal) -> AgentDecision {
    match pending.kind {
        BridgeKind::Deploy => AgentDecision::new(
            Action::ConfirmDeploy { amount: received },
            format!("Bridge landed on execution chain (${received:.2})"),
            0.95,
        ),
        BridgeKind::Return => AgentDecision::new(
            Action::ConfirmReturn { amount: received },
            format!("Bridge landed back at vault (${received:.2})"),
            0.95,
        ),
    }
}

/// Apply the state change for a realised action. `opened` is the bridge
/// the execution started, if any.
pub fn apply_transition(state: &mut AgentLoopState, action: &Action, opened: Option<PendingBridge>) {
    match action {
        Action::Deploy { amount } => {
            state.phase = AgentPhase::BridgingToBase;
            state.position = Position::Base;
            state.in_transit = *amount;
            state.vault_balance = (state.vault_balance - *amount).max(Decimal::ZERO);
        }
        Action::ConfirmDeploy { amount } => {
            state.phase = AgentPhase::Farming;
            state.position = Position::Base;
            state.deployed_amount = *amount;
            state.in_transit = Decimal::ZERO;
        }
        Action::Withdraw => {
            let moving = opened.as_ref().map(|p| p.amount).unwrap_or(state.deployed_amount);
            if moving > state.deployed_amount {
                state.total_yield_earned += moving - state.deployed_amount;
            }
            state.phase = AgentPhase::BridgingToArc;
            state.position = Position::Arc;
            state.in_transit = moving;
            state.deployed_amount = Decimal::ZERO;
        }
        Action::ConfirmReturn { amount } => {
            state.phase = AgentPhase::Idle;
            state.position = Position::Arc;
            state.vault_balance += *amount;
            state.in_transit = Decimal::ZERO;
            state.deployed_amount = Decimal::ZERO;
        }
        Action::EmergencyExit { .. } => {
            state.phase = AgentPhase::CircuitBreaker;
            match &opened {
                Some(pending) => {
                    state.position = Position::Arc;
                    state.in_transit += pending.amount;
                    state.deployed_amount = Decimal::ZERO;
                }
                // Pull-back still outstanding; the breaker retries it.
                None if state.deployed_amount > Decimal::ZERO => state.position = Position::Base,
                None => state.position = Position::Arc,
            }
        }
        Action::AdjustFee { .. } => state.phase = AgentPhase::Farming,
        Action::Hold => state.phase = state.resting_phase(),
    }

    if opened.is_some() {
        state.pending_bridge = opened;
    }
}

/// Capital the breaker still has to bring home.
fn stranded(state: &AgentLoopState) -> bool {
    state.position == Position::Base && state.deployed_amount > Decimal::ZERO
}

/// An emergency return that did not land: put the amount back on the
/// execution chain so the breaker retries it.
fn strand(state: &mut AgentLoopState, pending: &PendingBridge, reason: &str) {
    warn!(bridge = %pending, reason, "Emergency return did not complete, will retry");
    state.position = Position::Base;
    state.deployed_amount += pending.amount;
    state.in_transit = Decimal::ZERO;
    state.record(
        ExecutionLog::failure("BRIDGE", format!("Emergency return {reason}; retrying"))
            .with_tx(pending.tx_hash().map(str::to_string)),
    );
}

/// Undo the optimistic move of a bridge that failed or timed out.
fn revert_bridge(state: &mut AgentLoopState, pending: &PendingBridge, reason: &str) {
    warn!(bridge = %pending, reason, "Bridge did not complete, reverting");
    match pending.kind {
        BridgeKind::Deploy => {
            state.position = Position::Arc;
            state.vault_balance += pending.amount;
            state.in_transit = Decimal::ZERO;
            state.phase = AgentPhase::Idle;
        }
        BridgeKind::Return => {
            state.position = Position::Base;
            state.deployed_amount += pending.amount;
            state.in_transit = Decimal::ZERO;
            state.phase = AgentPhase::Farming;
        }
    }
    state.record(
        ExecutionLog::failure("BRIDGE", format!("{:?} bridge of ${:.2} {reason}", pending.kind, pending.amount))
            .with_tx(pending.tx_hash().map(str::to_string)),
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeStatus, BridgeTracking, MockBridgeAggregator, Route, RouteExecution};
    use crate::chain::{ChainError, MockAgentWallet, MockHookClient, MockVaultClient};
    use crate::config::{BridgeMode, PolicyConfig, ScannerConfig};
    use crate::engine::executor::Routing;
    use crate::market::{MockGasOracle, MockPriceFeed, PriceQuote};
    use crate::types::{VolatilityLevel, HISTORY_CAPACITY};
    use alloy::primitives::{Address, B256};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    struct Market {
        change: f64,
        volume: Decimal,
        gas: f64,
    }

    impl Default for Market {
        fn default() -> Self {
            Self {
                change: 1.0,
                volume: dec!(20_000_000),
                gas: 30.0,
            }
        }
    }

    fn routing() -> Routing {
        Routing {
            source_chain: 5042002,
            destination_chain: 84532,
            source_usdc: Address::repeat_byte(0x36),
            destination_usdc: Address::repeat_byte(0x03),
            mode: BridgeMode::Native,
        }
    }

    fn offline_vault() -> MockVaultClient {
        let mut vault = MockVaultClient::new();
        vault.expect_address().return_const(Address::repeat_byte(0xaa));
        vault
            .expect_stats()
            .returning(|| Err(ChainError::Rpc("connection refused".to_string())));
        vault
    }

    fn wallet() -> MockAgentWallet {
        let mut wallet = MockAgentWallet::new();
        wallet.expect_address().return_const(Address::repeat_byte(0xbb));
        wallet
    }

    fn build(
        market: Market,
        hook: MockHookClient,
        aggregator: MockBridgeAggregator,
        dry_run: bool,
    ) -> AgentLoop {
        build_with(market, offline_vault(), hook, wallet(), aggregator, dry_run)
    }

    fn build_with(
        market: Market,
        vault: MockVaultClient,
        hook: MockHookClient,
        wallet: MockAgentWallet,
        aggregator: MockBridgeAggregator,
        dry_run: bool,
    ) -> AgentLoop {
        let mut feed = MockPriceFeed::new();
        feed.expect_name().return_const("mock");
        let (change, volume) = (market.change, market.volume);
        feed.expect_fetch_quote().returning(move || {
            Ok(PriceQuote {
                price: 3000.0,
                change_24h: change,
                volume_24h: volume,
            })
        });
        let mut gas = MockGasOracle::new();
        let gwei = market.gas;
        gas.expect_gas_price_gwei().returning(move || Ok(gwei));

        let scanner = MarketScanner::new(
            Arc::new(feed),
            Arc::new(gas),
            ScannerConfig {
                cooldown_secs: 0,
                ..ScannerConfig::default()
            },
        );

        let vault: Arc<dyn VaultClient> = Arc::new(vault);
        let wallet: Arc<dyn AgentWallet> = Arc::new(wallet);
        let aggregator: Arc<dyn BridgeAggregator> = Arc::new(aggregator);
        let executor = Executor::new(
            vault.clone(),
            Arc::new(hook),
            wallet.clone(),
            aggregator.clone(),
            routing(),
            10,
            dry_run,
        );

        AgentLoop::new(
            scanner,
            DecisionEngine::new(PolicyConfig::default(), None),
            executor,
            BridgeTracker::new(10, Duration::minutes(30)),
            vault,
            wallet,
            aggregator,
        )
    }

    fn dry(market: Market) -> AgentLoop {
        build(market, MockHookClient::new(), MockBridgeAggregator::new(), true)
    }

    #[tokio::test]
    async fn test_low_volatility_deploys_seventy_percent() {
        let mut agent = dry(Market::default());
        let mut state = AgentLoopState::new(dec!(1000));

        agent.run_iteration(&mut state).await;

        assert_eq!(state.iteration, 1);
        assert_eq!(
            state.last_decision.as_ref().unwrap().action,
            Action::Deploy { amount: dec!(700) }
        );
        assert_eq!(state.phase, AgentPhase::BridgingToBase);
        assert_eq!(state.position, Position::Base);
        assert_eq!(state.in_transit, dec!(700));
        assert!(state.pending_bridge.is_some());
        assert_eq!(state.last_conditions.as_ref().unwrap().volatility, VolatilityLevel::Low);
    }

    #[tokio::test]
    async fn test_deploy_then_confirm_round_trip() {
        let mut agent = dry(Market::default());
        let mut state = AgentLoopState::new(dec!(1000));

        agent.run_iteration(&mut state).await;
        agent.run_iteration(&mut state).await;

        assert_eq!(
            state.last_decision.as_ref().unwrap().action,
            Action::ConfirmDeploy { amount: dec!(700) }
        );
        assert_eq!(state.phase, AgentPhase::Farming);
        assert_eq!(state.position, Position::Base);
        assert_eq!(state.deployed_amount, dec!(700));
        assert_eq!(state.in_transit, Decimal::ZERO);
        assert!(state.pending_bridge.is_none());
        assert!(state.is_consistent());
        assert_eq!(state.history.len(), 2);
    }

    #[tokio::test]
    async fn test_farming_adjusts_fee() {
        let mut agent = dry(Market::default());
        let mut state = AgentLoopState::new(dec!(1000));
        for _ in 0..3 {
            agent.run_iteration(&mut state).await;
        }
        assert_eq!(
            state.last_decision.as_ref().unwrap().action,
            Action::AdjustFee { fee_bps: 20 }
        );
        assert_eq!(state.phase, AgentPhase::Farming);
        assert_eq!(state.deployed_amount, dec!(700));
    }

    #[tokio::test]
    async fn test_price_drop_withdraws_and_returns() {
        let mut agent = dry(Market {
            change: -4.0,
            ..Market::default()
        });
        let mut state = AgentLoopState::new(dec!(300));
        state.position = Position::Base;
        state.deployed_amount = dec!(700);
        state.phase = AgentPhase::Farming;

        agent.run_iteration(&mut state).await;
        assert_eq!(state.last_decision.as_ref().unwrap().action, Action::Withdraw);
        assert_eq!(state.phase, AgentPhase::BridgingToArc);
        assert_eq!(state.position, Position::Arc);
        assert_eq!(state.in_transit, dec!(700));

        agent.run_iteration(&mut state).await;
        assert_eq!(
            state.last_decision.as_ref().unwrap().action,
            Action::ConfirmReturn { amount: dec!(700) }
        );
        assert_eq!(state.phase, AgentPhase::Idle);
        assert_eq!(state.vault_balance, dec!(1000));
        assert_eq!(state.in_transit, Decimal::ZERO);
        assert!(state.is_consistent());
    }

    #[tokio::test]
    async fn test_high_gas_holds_on_arc() {
        let mut agent = dry(Market {
            gas: 90.0,
            ..Market::default()
        });
        let mut state = AgentLoopState::new(dec!(1000));
        agent.run_iteration(&mut state).await;

        assert_eq!(state.last_decision.as_ref().unwrap().action, Action::Hold);
        assert_eq!(state.phase, AgentPhase::Idle);
        assert_eq!(state.position, Position::Arc);
    }

    #[tokio::test]
    async fn test_emergency_from_any_state_trips_breaker() {
        for position in [Position::Arc, Position::Base] {
            let mut agent = dry(Market::default());
            let mut state = AgentLoopState::new(dec!(300));
            if position == Position::Base {
                state.position = Position::Base;
                state.deployed_amount = dec!(700);
                state.phase = AgentPhase::Farming;
            }

            agent.inject(VolatilityScenario::Extreme);
            agent.run_iteration(&mut state).await;

            let decision = state.last_decision.as_ref().unwrap();
            assert!(matches!(decision.action, Action::EmergencyExit { .. }));
            assert!(decision.confidence >= 0.99);
            assert_eq!(state.phase, AgentPhase::CircuitBreaker);
            assert_eq!(state.position, Position::Arc);
            assert_eq!(state.deployed_amount, Decimal::ZERO);
        }
    }

    #[tokio::test]
    async fn test_high_drop_on_arc_is_logged_noop_but_breaks() {
        let mut agent = dry(Market::default());
        let mut state = AgentLoopState::new(dec!(1000));
        agent.inject(VolatilityScenario::High);
        agent.run_iteration(&mut state).await;

        assert_eq!(state.phase, AgentPhase::CircuitBreaker);
        let entry = state.history.latest().unwrap();
        assert_eq!(entry.action, "EMERGENCY_EXIT");
        assert!(entry.details.contains("no-op"));
        assert!(state.pending_bridge.is_none());
    }

    #[tokio::test]
    async fn test_breaker_holds_until_reset() {
        let mut agent = dry(Market::default());
        let mut state = AgentLoopState::new(dec!(1000));
        state.phase = AgentPhase::CircuitBreaker;

        agent.run_iteration(&mut state).await;
        agent.run_iteration(&mut state).await;

        assert_eq!(state.phase, AgentPhase::CircuitBreaker);
        assert!(state.last_decision.is_none());
        assert!(state.last_conditions.is_some());
        assert_eq!(state.history.latest().unwrap().action, "HOLD");
    }

    #[tokio::test]
    async fn test_breaker_retries_pull_back_until_route_appears() {
        let mut vault = offline_vault();
        vault
            .expect_trigger_circuit_breaker()
            .times(1)
            .returning(|_| Ok(B256::repeat_byte(9)));
        vault.expect_signal_return().returning(|| Ok(B256::repeat_byte(4)));
        let mut wallet = wallet();
        wallet.expect_usdc_balance().returning(|_| Ok(dec!(700)));

        let mut aggregator = MockBridgeAggregator::new();
        let mut seq = mockall::Sequence::new();
        aggregator
            .expect_routes()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Vec::new()));
        aggregator
            .expect_routes()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                Ok(vec![Route {
                    id: "r1".to_string(),
                    from_chain: req.from_chain,
                    to_chain: req.to_chain,
                    from_amount: req.from_amount,
                    to_amount: req.from_amount,
                    to_amount_min: req.from_amount,
                    tool: "cctp".to_string(),
                    estimated_secs: 60,
                    steps: vec![serde_json::json!({"tool": "cctp"})],
                }])
            });
        aggregator.expect_execute().times(1).returning(|_| {
            Ok(RouteExecution {
                tx_hashes: vec![B256::repeat_byte(5)],
                source_tx: B256::repeat_byte(5),
                tool: "cctp".to_string(),
            })
        });
        aggregator.expect_status().returning(|_| Ok(BridgeStatus::Pending));
        let mut agent = build_with(Market::default(), vault, MockHookClient::new(), wallet, aggregator, false);

        let mut state = AgentLoopState::new(dec!(300));
        state.position = Position::Base;
        state.deployed_amount = dec!(700);
        state.phase = AgentPhase::Farming;

        // No route back: breaker trips, capital stays on Base.
        agent.inject(VolatilityScenario::Extreme);
        agent.run_iteration(&mut state).await;
        assert_eq!(state.phase, AgentPhase::CircuitBreaker);
        assert_eq!(state.position, Position::Base);
        assert_eq!(state.deployed_amount, dec!(700));
        assert_eq!(state.in_transit, Decimal::ZERO);
        assert!(state.pending_bridge.is_none());
        assert!(state.is_consistent());

        // Route is back: the breaker sends the return itself.
        agent.run_iteration(&mut state).await;
        assert_eq!(state.phase, AgentPhase::CircuitBreaker);
        assert_eq!(state.position, Position::Arc);
        assert_eq!(state.deployed_amount, Decimal::ZERO);
        assert_eq!(state.in_transit, dec!(700));
        let pending = state.pending_bridge.as_ref().unwrap();
        assert_eq!(pending.kind, BridgeKind::Return);
        assert!(state
            .history
            .newest_first()
            .any(|e| e.action == "WITHDRAW" && e.tx_hash == Some(B256::repeat_byte(5).to_string())));

        // In flight: tracked, not resent.
        agent.run_iteration(&mut state).await;
        assert!(state.pending_bridge.is_some());
        assert_eq!(state.history.latest().unwrap().action, "HOLD");
    }

    #[tokio::test]
    async fn test_failed_emergency_return_is_retried() {
        let mut aggregator = MockBridgeAggregator::new();
        aggregator
            .expect_status()
            .returning(|_| Ok(BridgeStatus::Failed { reason: "REFUNDED".to_string() }));
        aggregator.expect_routes().returning(|_| Ok(Vec::new()));
        let mut vault = offline_vault();
        vault.expect_signal_return().returning(|| Ok(B256::repeat_byte(4)));
        let mut wallet = wallet();
        wallet.expect_usdc_balance().returning(|_| Ok(dec!(700)));
        let mut agent = build_with(Market::default(), vault, MockHookClient::new(), wallet, aggregator, false);

        let mut state = AgentLoopState::new(dec!(300));
        state.position = Position::Base;
        state.deployed_amount = dec!(700);
        let pending = PendingBridge::new(
            BridgeKind::Return,
            dec!(700),
            84532,
            5042002,
            BridgeTracking::Aggregator {
                tx_hash: "0xbeef".to_string(),
                bridge: "cctp".to_string(),
            },
        );
        apply_transition(&mut state, &Action::EmergencyExit { exposure: dec!(700) }, Some(pending));
        assert_eq!(state.position, Position::Arc);

        agent.run_iteration(&mut state).await;
        assert_eq!(state.phase, AgentPhase::CircuitBreaker);
        assert_eq!(state.position, Position::Base);
        assert_eq!(state.deployed_amount, dec!(700));
        assert_eq!(state.in_transit, Decimal::ZERO);
        let hold = state.history.latest().unwrap();
        assert_eq!(hold.action, "HOLD");
        assert!(hold.details.contains("$700.00 still on execution chain"));
    }

    #[test]
    fn test_emergency_without_bridge_keeps_capital_on_base() {
        let mut state = AgentLoopState::new(dec!(300));
        apply_transition(&mut state, &Action::ConfirmDeploy { amount: dec!(700) }, None);
        apply_transition(&mut state, &Action::EmergencyExit { exposure: dec!(700) }, None);
        assert_eq!(state.phase, AgentPhase::CircuitBreaker);
        assert_eq!(state.position, Position::Base);
        assert_eq!(state.deployed_amount, dec!(700));
        assert_eq!(state.in_transit, Decimal::ZERO);
        assert!(state.is_consistent());
    }

    #[tokio::test]
    async fn test_execution_error_logged_and_phase_reset() {
        let mut hook = MockHookClient::new();
        hook.expect_update_dynamic_fee()
            .returning(|_, _| Err(ChainError::Rpc("x".repeat(400))));
        let mut agent = build(Market::default(), hook, MockBridgeAggregator::new(), false);

        let mut state = AgentLoopState::new(dec!(300));
        state.position = Position::Base;
        state.deployed_amount = dec!(700);
        state.phase = AgentPhase::Farming;

        agent.run_iteration(&mut state).await;

        let entry = state.history.latest().unwrap();
        assert_eq!(entry.action, "ERROR");
        assert!(!entry.success);
        assert!(entry.details.chars().count() <= 200);
        assert_eq!(state.phase, AgentPhase::Idle);
        // Capital did not move.
        assert_eq!(state.position, Position::Base);
        assert_eq!(state.deployed_amount, dec!(700));
    }

    #[tokio::test]
    async fn test_failed_bridge_reverts_deploy() {
        let mut aggregator = MockBridgeAggregator::new();
        aggregator
            .expect_status()
            .returning(|_| Ok(BridgeStatus::Failed { reason: "REFUNDED".to_string() }));
        let mut agent = build(Market::default(), MockHookClient::new(), aggregator, false);

        let mut state = AgentLoopState::new(dec!(1000));
        let pending = PendingBridge::new(
            BridgeKind::Deploy,
            dec!(700),
            5042002,
            84532,
            BridgeTracking::Aggregator {
                tx_hash: "0xfeed".to_string(),
                bridge: "cctp".to_string(),
            },
        );
        apply_transition(&mut state, &Action::Deploy { amount: dec!(700) }, Some(pending));
        assert_eq!(state.vault_balance, dec!(300));

        agent.run_iteration(&mut state).await;

        assert_eq!(state.position, Position::Arc);
        assert_eq!(state.phase, AgentPhase::Idle);
        assert_eq!(state.vault_balance, dec!(1000));
        assert_eq!(state.in_transit, Decimal::ZERO);
        assert!(state.pending_bridge.is_none());
        let entry = state.history.latest().unwrap();
        assert!(!entry.success);
        assert_eq!(entry.tx_hash.as_deref(), Some("0xfeed"));
    }

    #[tokio::test]
    async fn test_pending_bridge_blocks_decisions() {
        let mut aggregator = MockBridgeAggregator::new();
        aggregator.expect_status().returning(|_| Ok(BridgeStatus::Pending));
        let mut agent = build(Market::default(), MockHookClient::new(), aggregator, false);

        let mut state = AgentLoopState::new(dec!(1000));
        let pending = PendingBridge::new(
            BridgeKind::Deploy,
            dec!(700),
            5042002,
            84532,
            BridgeTracking::Aggregator {
                tx_hash: "0xfeed".to_string(),
                bridge: "cctp".to_string(),
            },
        );
        let started = pending.started_at;
        apply_transition(&mut state, &Action::Deploy { amount: dec!(700) }, Some(pending));

        agent.run_iteration_at(&mut state, started + Duration::seconds(15)).await;
        assert_eq!(state.phase, AgentPhase::AwaitingBridge);
        assert!(state.last_decision.is_none());
        assert_eq!(state.pending_bridge.as_ref().unwrap().polls, 1);

        // Past the tracker's timeout the deploy is unwound.
        agent.run_iteration_at(&mut state, started + Duration::minutes(31)).await;
        assert!(state.pending_bridge.is_none());
        assert_eq!(state.position, Position::Arc);
    }

    #[tokio::test]
    async fn test_history_stays_bounded() {
        let mut agent = dry(Market {
            gas: 90.0,
            ..Market::default()
        });
        let mut state = AgentLoopState::new(dec!(1000));
        for _ in 0..(HISTORY_CAPACITY + 15) {
            agent.run_iteration(&mut state).await;
        }
        assert_eq!(state.history.len(), HISTORY_CAPACITY);
        assert_eq!(state.iteration, (HISTORY_CAPACITY + 15) as u64);
    }

    #[test]
    fn test_withdraw_transition_moves_deployed_into_transit() {
        let mut state = AgentLoopState::new(dec!(300));
        apply_transition(&mut state, &Action::ConfirmDeploy { amount: dec!(699) }, None);
        apply_transition(&mut state, &Action::Withdraw, None);
        assert_eq!(state.in_transit, dec!(699));
        assert_eq!(state.deployed_amount, Decimal::ZERO);
        assert_eq!(state.position, Position::Arc);
        assert_eq!(state.total_yield_earned, Decimal::ZERO);
    }

    #[test]
    fn test_yield_recorded_when_more_comes_back() {
        let mut state = AgentLoopState::new(dec!(300));
        apply_transition(&mut state, &Action::ConfirmDeploy { amount: dec!(699) }, None);
        let back = PendingBridge::new(BridgeKind::Return, dec!(705), 84532, 5042002, BridgeTracking::Simulated);
        apply_transition(&mut state, &Action::Withdraw, Some(back));
        assert_eq!(state.total_yield_earned, dec!(6));
        assert_eq!(state.in_transit, dec!(705));
        assert!(state.pending_bridge.is_some());

        state.pending_bridge = None;
        apply_transition(&mut state, &Action::ConfirmReturn { amount: dec!(704.9) }, None);
        assert_eq!(state.vault_balance, dec!(1004.9));
        assert_eq!(state.in_transit, Decimal::ZERO);
        assert_eq!(state.phase, AgentPhase::Idle);
        assert!(state.is_consistent());
    }
}
