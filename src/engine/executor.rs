//! Execution orchestrator.
//!
//! Realises a decision against the vault, the hook and the bridge
//! aggregator. Everything that touches a chain goes through here, so this
//! is also where dry-run mode short-circuits.

use alloy::primitives::Address;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bridge::{
    BridgeAggregator, BridgeError, BridgeKind, BridgeTracking, PendingBridge, RouteRequest,
};
use crate::chain::units::parse_address;
use crate::chain::{AgentWallet, ChainError, HookClient, TxHash, VaultClient};
use crate::config::{AppConfig, BridgeMode};
use crate::types::{Action, AgentDecision, AgentLoopState, Position, VaultState};

// ---------------------------------------------------------------------------
// Results & errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Side effects were sent (or simulated in dry-run).
    Submitted,
    /// Could not proceed this tick (e.g. no route); state is kept.
    Deferred(String),
    /// Nothing to do.
    NoOp(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,
    pub tx_hashes: Vec<TxHash>,
    /// Transfer opened by this execution, to be tracked by the loop.
    pub pending_bridge: Option<PendingBridge>,
}

impl ExecutionResult {
    fn submitted(tx_hashes: Vec<TxHash>) -> Self {
        Self {
            outcome: ExecutionOutcome::Submitted,
            tx_hashes,
            pending_bridge: None,
        }
    }

    fn no_op(reason: impl Into<String>) -> Self {
        Self {
            outcome: ExecutionOutcome::NoOp(reason.into()),
            tx_hashes: Vec::new(),
            pending_bridge: None,
        }
    }

    fn deferred(reason: impl Into<String>, tx_hashes: Vec<TxHash>) -> Self {
        Self {
            outcome: ExecutionOutcome::Deferred(reason.into()),
            tx_hashes,
            pending_bridge: None,
        }
    }

    fn with_bridge(mut self, pending: PendingBridge) -> Self {
        self.pending_bridge = Some(pending);
        self
    }

    /// Hash of the last transaction sent, for the execution log.
    pub fn last_tx(&self) -> Option<String> {
        self.tx_hashes.last().map(|h| h.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("{action} failed: {source}")]
    Transaction {
        action: &'static str,
        #[source]
        source: ChainError,
    },

    #[error("{action} bridge failed: {source}")]
    Bridge {
        action: &'static str,
        #[source]
        source: BridgeError,
    },

    #[error("A bridge is already in flight: {0}")]
    BridgeInFlight(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

fn tx_err(action: &'static str) -> impl FnOnce(ChainError) -> ExecutionError {
    move |source| ExecutionError::Transaction { action, source }
}

fn bridge_err(action: &'static str) -> impl FnOnce(BridgeError) -> ExecutionError {
    move |source| ExecutionError::Bridge { action, source }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Chain ids and USDC addresses on both sides, plus the deploy path.
#[derive(Debug, Clone, PartialEq)]
pub struct Routing {
    pub source_chain: u64,
    pub destination_chain: u64,
    pub source_usdc: Address,
    pub destination_usdc: Address,
    pub mode: BridgeMode,
}

impl Routing {
    pub fn from_config(config: &AppConfig) -> Result<Self, ExecutionError> {
        let parse = |s: &str| {
            parse_address(s).map_err(|e| ExecutionError::NotConfigured(e.to_string()))
        };
        Ok(Self {
            source_chain: config.chains.source.chain_id,
            destination_chain: config.chains.destination.chain_id,
            source_usdc: parse(&config.chains.source.usdc_address)?,
            destination_usdc: parse(&config.chains.destination.usdc_address)?,
            mode: config.bridge.mode,
        })
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    vault: Arc<dyn VaultClient>,
    hook: Arc<dyn HookClient>,
    wallet: Arc<dyn AgentWallet>,
    bridge: Arc<dyn BridgeAggregator>,
    routing: Routing,
    hook_fee_scale: u32,
    dry_run: bool,
}

impl Executor {
    pub fn new(
        vault: Arc<dyn VaultClient>,
        hook: Arc<dyn HookClient>,
        wallet: Arc<dyn AgentWallet>,
        bridge: Arc<dyn BridgeAggregator>,
        routing: Routing,
        hook_fee_scale: u32,
        dry_run: bool,
    ) -> Self {
        Self {
            vault,
            hook,
            wallet,
            bridge,
            routing,
            hook_fee_scale,
            dry_run,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    /// Realise `decision` given the current agent state.
    pub async fn execute(
        &self,
        decision: &AgentDecision,
        state: &AgentLoopState,
    ) -> Result<ExecutionResult, ExecutionError> {
        if decision.action.opens_bridge() {
            if let Some(pending) = &state.pending_bridge {
                return Err(ExecutionError::BridgeInFlight(pending.to_string()));
            }
        }

        if self.dry_run {
            return Ok(self.simulate(decision, state));
        }

        match &decision.action {
            Action::Hold => Ok(ExecutionResult::no_op("hold")),
            Action::Deploy { amount } => self.deploy(*amount).await,
            Action::ConfirmDeploy { amount } => {
                info!(amount = format!("${amount:.2}"), "Confirming deployment");
                let tx = self
                    .vault
                    .confirm_deployment()
                    .await
                    .map_err(tx_err("confirmDeployment"))?;
                Ok(ExecutionResult::submitted(vec![tx]))
            }
            Action::Withdraw => self.withdraw(state).await,
            Action::ConfirmReturn { amount } => {
                info!(amount = format!("${amount:.2}"), "Confirming return");
                let tx = self
                    .vault
                    .confirm_return(*amount)
                    .await
                    .map_err(tx_err("confirmReturn"))?;
                Ok(ExecutionResult::submitted(vec![tx]))
            }
            Action::EmergencyExit { exposure } => {
                self.emergency_exit(*exposure, &decision.reason, state).await
            }
            Action::AdjustFee { fee_bps } => {
                let tx = self.adjust_fee(*fee_bps, &decision.reason).await?;
                Ok(ExecutionResult::submitted(vec![tx]))
            }
        }
    }

    fn simulate(&self, decision: &AgentDecision, state: &AgentLoopState) -> ExecutionResult {
        let r = &self.routing;
        match &decision.action {
            Action::Hold => ExecutionResult::no_op("hold"),
            Action::Deploy { amount } => {
                info!(
                    amount = format!("${amount:.2}"),
                    from = r.source_chain,
                    to = r.destination_chain,
                    "[DRY RUN] Would bridge capital to execution chain"
                );
                ExecutionResult::submitted(Vec::new()).with_bridge(PendingBridge::new(
                    BridgeKind::Deploy,
                    *amount,
                    r.source_chain,
                    r.destination_chain,
                    BridgeTracking::Simulated,
                ))
            }
            Action::Withdraw => {
                info!(
                    amount = format!("${:.2}", state.deployed_amount),
                    "[DRY RUN] Would signal return and bridge back to vault"
                );
                ExecutionResult::submitted(Vec::new()).with_bridge(self.simulated_return(state.deployed_amount))
            }
            Action::EmergencyExit { exposure } => {
                if exposure.is_zero() && state.position == Position::Arc {
                    return ExecutionResult::no_op("nothing deployed");
                }
                warn!(
                    exposure = format!("${exposure:.2}"),
                    "[DRY RUN] Would trigger circuit breaker and pull capital"
                );
                let result = ExecutionResult::submitted(Vec::new());
                if exposure.is_zero() {
                    result
                } else {
                    result.with_bridge(self.simulated_return(*exposure))
                }
            }
            Action::AdjustFee { fee_bps } => {
                info!(
                    fee_bps,
                    hook_units = fee_bps.saturating_mul(self.hook_fee_scale),
                    "[DRY RUN] Would update hook fee"
                );
                ExecutionResult::submitted(Vec::new())
            }
            Action::ConfirmDeploy { amount } | Action::ConfirmReturn { amount } => {
                info!(
                    action = decision.action.label(),
                    amount = format!("${amount:.2}"),
                    "[DRY RUN] Would confirm on vault"
                );
                ExecutionResult::submitted(Vec::new())
            }
        }
    }

    fn simulated_return(&self, amount: Decimal) -> PendingBridge {
        PendingBridge::new(
            BridgeKind::Return,
            amount,
            self.routing.destination_chain,
            self.routing.source_chain,
            BridgeTracking::Simulated,
        )
    }

    async fn deploy(&self, amount: Decimal) -> Result<ExecutionResult, ExecutionError> {
        let r = &self.routing;
        let recipient = self.wallet.address();
        let from_address = match r.mode {
            BridgeMode::Native => self.vault.address(),
            BridgeMode::Aggregator => recipient,
        };

        let routes = self
            .bridge
            .routes(&RouteRequest {
                from_chain: r.source_chain,
                to_chain: r.destination_chain,
                from_token: r.source_usdc,
                to_token: r.destination_usdc,
                from_amount: amount,
                from_address,
                to_address: recipient,
            })
            .await
            .map_err(bridge_err("deploy"))?;

        let Some(route) = routes.into_iter().next() else {
            warn!(amount = format!("${amount:.2}"), "No route to execution chain, deferring deploy");
            return Ok(ExecutionResult::deferred("no route to execution chain", Vec::new()));
        };
        info!(route = %route, "Deploy route selected");

        match r.mode {
            BridgeMode::Native => {
                let baseline = self
                    .wallet
                    .usdc_balance(r.destination_chain)
                    .await
                    .map_err(tx_err("balanceOf"))?;
                let tx = self
                    .vault
                    .bridge_to_execution(amount, r.destination_chain, recipient)
                    .await
                    .map_err(tx_err("bridgeToExecution"))?;
                let pending = PendingBridge::new(
                    BridgeKind::Deploy,
                    amount,
                    r.source_chain,
                    r.destination_chain,
                    BridgeTracking::Native {
                        tx_hash: tx.to_string(),
                        baseline,
                    },
                );
                Ok(ExecutionResult::submitted(vec![tx]).with_bridge(pending))
            }
            BridgeMode::Aggregator => {
                let exec = self.bridge.execute(&route).await.map_err(bridge_err("deploy"))?;
                let pending = PendingBridge::new(
                    BridgeKind::Deploy,
                    amount,
                    r.source_chain,
                    r.destination_chain,
                    BridgeTracking::Aggregator {
                        tx_hash: exec.source_tx.to_string(),
                        bridge: exec.tool,
                    },
                );
                Ok(ExecutionResult::submitted(exec.tx_hashes).with_bridge(pending))
            }
        }
    }

    async fn withdraw(&self, state: &AgentLoopState) -> Result<ExecutionResult, ExecutionError> {
        let r = &self.routing;
        let mut tx_hashes = Vec::new();

        // A protected vault has already released the position.
        let already_signalled = state
            .last_vault
            .as_ref()
            .is_some_and(|v| matches!(v.state, VaultState::BridgingBack | VaultState::Protected));
        if already_signalled {
            info!("Vault already releasing capital, skipping signalReturn");
        } else {
            let tx = self.vault.signal_return().await.map_err(tx_err("signalReturn"))?;
            tx_hashes.push(tx);
        }

        let amount = self
            .wallet
            .usdc_balance(r.destination_chain)
            .await
            .map_err(tx_err("balanceOf"))?;
        if amount <= Decimal::ZERO {
            warn!("No USDC on execution chain to bridge back");
            return Ok(ExecutionResult::deferred("no USDC on execution chain", tx_hashes));
        }

        let routes = self
            .bridge
            .routes(&RouteRequest {
                from_chain: r.destination_chain,
                to_chain: r.source_chain,
                from_token: r.destination_usdc,
                to_token: r.source_usdc,
                from_amount: amount,
                from_address: self.wallet.address(),
                to_address: self.vault.address(),
            })
            .await
            .map_err(bridge_err("withdraw"))?;

        let Some(route) = routes.into_iter().next() else {
            warn!(
                amount = format!("${amount:.2}"),
                "No route back to vault, return signalled; retrying next tick"
            );
            return Ok(ExecutionResult::deferred("no route back to vault", tx_hashes));
        };
        info!(route = %route, "Return route selected");

        let exec = self.bridge.execute(&route).await.map_err(bridge_err("withdraw"))?;
        tx_hashes.extend(exec.tx_hashes);
        let pending = PendingBridge::new(
            BridgeKind::Return,
            amount,
            r.destination_chain,
            r.source_chain,
            BridgeTracking::Aggregator {
                tx_hash: exec.source_tx.to_string(),
                bridge: exec.tool,
            },
        );
        Ok(ExecutionResult::submitted(tx_hashes).with_bridge(pending))
    }

    /// Bridge capital left on the execution chain back to the vault after
    /// the breaker has tripped. Called every tick until a return is in flight.
    pub async fn pull_back(&self, state: &AgentLoopState) -> Result<ExecutionResult, ExecutionError> {
        if let Some(pending) = &state.pending_bridge {
            return Err(ExecutionError::BridgeInFlight(pending.to_string()));
        }
        if self.dry_run {
            warn!(
                amount = format!("${:.2}", state.deployed_amount),
                "[DRY RUN] Would retry emergency pull-back"
            );
            return Ok(ExecutionResult::submitted(Vec::new())
                .with_bridge(self.simulated_return(state.deployed_amount)));
        }
        self.withdraw(state).await
    }

    async fn emergency_exit(
        &self,
        exposure: Decimal,
        reason: &str,
        state: &AgentLoopState,
    ) -> Result<ExecutionResult, ExecutionError> {
        if exposure.is_zero() && state.position == Position::Arc {
            warn!("Emergency exit with nothing deployed, capital already in vault");
            return Ok(ExecutionResult::no_op("nothing deployed"));
        }

        warn!(exposure = format!("${exposure:.2}"), reason, "Triggering circuit breaker");
        let breaker = self
            .vault
            .trigger_circuit_breaker(reason)
            .await
            .map_err(tx_err("triggerCircuitBreaker"))?;

        if exposure.is_zero() {
            return Ok(ExecutionResult::submitted(vec![breaker]));
        }

        // Breaker is on chain; a failed pull-back must not undo it. Without a
        // pending bridge the capital stays on Base and the breaker retries.
        match self.withdraw(state).await {
            Ok(mut pulled) => {
                pulled.tx_hashes.insert(0, breaker);
                if let ExecutionOutcome::Deferred(reason) = &pulled.outcome {
                    warn!(reason = %reason, "Emergency withdrawal deferred, retrying from breaker");
                    pulled.outcome = ExecutionOutcome::Submitted;
                }
                Ok(pulled)
            }
            Err(e) => {
                warn!(error = %e, "Emergency withdrawal failed, retrying from breaker");
                Ok(ExecutionResult::submitted(vec![breaker]))
            }
        }
    }

    async fn adjust_fee(&self, fee_bps: u32, reason: &str) -> Result<TxHash, ExecutionError> {
        let hook_fee = fee_bps
            .checked_mul(self.hook_fee_scale)
            .ok_or_else(|| ExecutionError::NotConfigured(format!("fee {fee_bps} bps overflows")))?;
        info!(fee_bps, hook_fee, "Updating hook fee");
        self.hook
            .update_dynamic_fee(hook_fee, reason)
            .await
            .map_err(tx_err("updateDynamicFee"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
