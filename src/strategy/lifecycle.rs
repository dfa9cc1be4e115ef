//! Vault lifecycle reconciliation.
//!
//! When no bridge is being tracked (fresh start, or after a reset) the
//! vault's on-chain state is the source of truth: a vault stuck in
//! BRIDGING_OUT whose recorded deployment has landed in full needs
//! `confirmDeployment`, one in
//! BRIDGING_BACK with funds available needs `confirmReturn`, and a
//! PROTECTED vault means the circuit breaker is already tripped.

use rust_decimal::Decimal;

use crate::types::{
    Action, AgentDecision, AgentLoopState, AgentPhase, Position, VaultSnapshot, VaultState,
};

/// What the vault state asks of the agent before any market decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// A confirm transaction is due.
    Confirm(AgentDecision),
    /// The vault is protected; the agent must sit in CIRCUIT_BREAKER.
    Protected,
}

/// Inspect the latest vault snapshot against the agent state.
pub fn reconcile(state: &AgentLoopState, vault: &VaultSnapshot) -> Option<Reconciliation> {
    match vault.state {
        // No start balance is known here, so wait for the whole recorded
        // deployment rather than any balance at all.
        VaultState::BridgingOut
            if vault.deployed > Decimal::ZERO && vault.destination_balance >= vault.deployed =>
        {
            Some(Reconciliation::Confirm(AgentDecision::new(
                Action::ConfirmDeploy {
                    amount: vault.deployed,
                },
                format!("Funds received on execution chain (${:.2})", vault.deployed),
                0.95,
            )))
        }
        // A withdrawal the agent still holds on the execution chain has
        // not been bridged yet.
        VaultState::BridgingBack
            if vault.available > Decimal::ZERO && state.position == Position::Arc =>
        {
            Some(Reconciliation::Confirm(AgentDecision::new(
                Action::ConfirmReturn {
                    amount: vault.available,
                },
                format!("Funds returned to vault (${:.2})", vault.available),
                0.95,
            )))
        }
        VaultState::Protected if state.phase != AgentPhase::CircuitBreaker => {
            Some(Reconciliation::Protected)
        }
        _ => None,
    }
}
