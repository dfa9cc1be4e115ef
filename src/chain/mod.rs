//! On-chain collaborators.
//!
//! The agent talks to three things on chain: the vault on the source
//! chain, the fee hook on the destination chain, and its own wallet (USDC
//! balances, approvals, and raw transactions handed to it by the bridge
//! aggregator). Each is a trait so the loop and executor can run against
//! in-memory fakes; the alloy-backed implementations live in [`evm`].

pub mod contracts;
pub mod evm;
pub mod units;

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::{VaultState, VolatilityLevel};

pub use alloy::primitives::TxHash;

/// Errors surfaced by chain clients.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Transaction {tx} reverted in {call}")]
    Reverted { call: String, tx: TxHash },

    #[error("No provider configured for chain {0}")]
    UnknownChain(u64),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unexpected contract value: {0}")]
    Decode(String),
}

/// Figures reported by `getVaultStats()`, already in USDC.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VaultStats {
    pub state: VaultState,
    pub total_deposits: Decimal,
    pub total_shares: Decimal,
    pub deployed: Decimal,
    pub available: Decimal,
    pub yield_earned: Decimal,
    pub share_price: Decimal,
}

/// Figures reported by `getHookStatus()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookStatus {
    /// Fee in the hook's native units
    pub current_fee: u32,
    pub volatility: Option<VolatilityLevel>,
    pub liquidity: Decimal,
    pub last_update: u64,
    pub fee_reason: String,
}

/// A transaction prepared elsewhere (e.g. by the bridge aggregator).
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<u64>,
}

/// Vault contract on the source chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VaultClient: Send + Sync {
    fn address(&self) -> Address;

    async fn stats(&self) -> Result<VaultStats, ChainError>;

    /// Vault share balance of `user`.
    async fn shares_of(&self, user: Address) -> Result<Decimal, ChainError>;

    /// Approve and deposit USDC from the agent wallet.
    async fn deposit(&self, amount: Decimal) -> Result<TxHash, ChainError>;

    /// Redeem vault shares for USDC.
    async fn withdraw(&self, shares: Decimal) -> Result<TxHash, ChainError>;

    async fn bridge_to_execution(
        &self,
        amount: Decimal,
        destination_chain: u64,
        recipient: Address,
    ) -> Result<TxHash, ChainError>;

    async fn confirm_deployment(&self) -> Result<TxHash, ChainError>;

    async fn signal_return(&self) -> Result<TxHash, ChainError>;

    async fn confirm_return(&self, amount: Decimal) -> Result<TxHash, ChainError>;

    async fn trigger_circuit_breaker(&self, reason: &str) -> Result<TxHash, ChainError>;
}

/// Dynamic-fee hook on the destination chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HookClient: Send + Sync {
    async fn status(&self) -> Result<HookStatus, ChainError>;

    /// `fee` is in the hook's native units.
    async fn update_dynamic_fee(&self, fee: u32, reason: &str) -> Result<TxHash, ChainError>;
}

/// The agent's own externally-owned account, on every configured chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentWallet: Send + Sync {
    fn address(&self) -> Address;

    async fn usdc_balance(&self, chain_id: u64) -> Result<Decimal, ChainError>;

    /// Approve `spender` for at least `amount` of `token` if the current
    /// allowance is short. Returns the approval hash when one was sent.
    async fn ensure_allowance(
        &self,
        chain_id: u64,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<Option<TxHash>, ChainError>;

    async fn send_raw(&self, chain_id: u64, tx: RawTransaction) -> Result<TxHash, ChainError>;
}
