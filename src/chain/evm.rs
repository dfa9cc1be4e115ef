//! alloy-backed implementations of the chain traits.
//!
//! Every write waits for its receipt and turns a failed status into
//! [`ChainError::Reverted`], so callers only ever see hashes of
//! transactions that actually landed.

use alloy::network::{Ethereum, EthereumWallet, TransactionBuilder};
use alloy::primitives::aliases::U24;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, info};

use super::contracts::{IERC20, IVelvetHook, IVelvetVault};
use super::units::{address_to_bytes32, from_units, to_units};
use super::{AgentWallet, ChainError, HookClient, HookStatus, RawTransaction, TxHash, VaultClient, VaultStats};
use crate::market::GasOracle;
use crate::types::{VaultState, VolatilityLevel};

const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Build a signing HTTP provider for one chain.
pub fn connect(rpc_url: &str, signer: &PrivateKeySigner) -> Result<DynProvider> {
    let url: alloy::transports::http::reqwest::Url = rpc_url
        .parse()
        .with_context(|| format!("Invalid RPC URL: {rpc_url}"))?;
    let wallet = EthereumWallet::from(signer.clone());
    Ok(ProviderBuilder::new().wallet(wallet).connect_http(url).erased())
}

fn rpc_err<E: Display>(call: &'static str) -> impl FnOnce(E) -> ChainError {
    move |e| ChainError::Rpc(format!("{call}: {e}"))
}

/// Wait for a receipt and check it did not revert.
async fn confirm(call: &str, pending: PendingTransactionBuilder<Ethereum>) -> Result<TxHash, ChainError> {
    let tx = *pending.tx_hash();
    debug!(call, tx = %tx, "Transaction submitted, awaiting receipt");
    let receipt = pending
        .with_timeout(Some(RECEIPT_TIMEOUT))
        .get_receipt()
        .await
        .map_err(|e| ChainError::Rpc(format!("{call} receipt: {e}")))?;

    if !receipt.status() {
        return Err(ChainError::Reverted {
            call: call.to_string(),
            tx,
        });
    }
    info!(call, tx = %tx, block = ?receipt.block_number, "Transaction confirmed");
    Ok(tx)
}

pub fn wei_to_gwei(wei: u128) -> f64 {
    wei as f64 / 1e9
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

pub struct EvmVault {
    vault: IVelvetVault::IVelvetVaultInstance<DynProvider>,
    usdc: IERC20::IERC20Instance<DynProvider>,
    owner: Address,
}

impl EvmVault {
    pub fn new(provider: DynProvider, vault: Address, usdc: Address, owner: Address) -> Self {
        Self {
            vault: IVelvetVault::new(vault, provider.clone()),
            usdc: IERC20::new(usdc, provider),
            owner,
        }
    }
}

#[async_trait]
impl VaultClient for EvmVault {
    fn address(&self) -> Address {
        *self.vault.address()
    }

    async fn stats(&self) -> Result<VaultStats, ChainError> {
        let s = self
            .vault
            .getVaultStats()
            .call()
            .await
            .map_err(rpc_err("getVaultStats"))?;

        let state = VaultState::from_ordinal(s.currentState)
            .ok_or_else(|| ChainError::Decode(format!("vault state {}", s.currentState)))?;

        Ok(VaultStats {
            state,
            total_deposits: from_units(s.totalDeposited)?,
            total_shares: from_units(s.totalSharesIssued)?,
            deployed: from_units(s.currentlyDeployed)?,
            available: from_units(s.availableBalance)?,
            yield_earned: from_units(s.yieldEarned)?,
            share_price: from_units(s.sharePrice)?,
        })
    }

    async fn shares_of(&self, user: Address) -> Result<Decimal, ChainError> {
        let raw = self
            .vault
            .balanceOf(user)
            .call()
            .await
            .map_err(rpc_err("balanceOf"))?;
        from_units(raw)
    }

    async fn deposit(&self, amount: Decimal) -> Result<TxHash, ChainError> {
        let raw = to_units(amount)?;
        let vault = *self.vault.address();

        let allowance = self
            .usdc
            .allowance(self.owner, vault)
            .call()
            .await
            .map_err(rpc_err("allowance"))?;
        if allowance < raw {
            let pending = self
                .usdc
                .approve(vault, raw)
                .send()
                .await
                .map_err(rpc_err("approve"))?;
            confirm("approve", pending).await?;
        }

        let pending = self.vault.deposit(raw).send().await.map_err(rpc_err("deposit"))?;
        confirm("deposit", pending).await
    }

    async fn withdraw(&self, shares: Decimal) -> Result<TxHash, ChainError> {
        let pending = self
            .vault
            .withdraw(to_units(shares)?)
            .send()
            .await
            .map_err(rpc_err("withdraw"))?;
        confirm("withdraw", pending).await
    }

    async fn bridge_to_execution(
        &self,
        amount: Decimal,
        destination_chain: u64,
        recipient: Address,
    ) -> Result<TxHash, ChainError> {
        let pending = self
            .vault
            .bridgeToExecution(
                to_units(amount)?,
                U256::from(destination_chain),
                address_to_bytes32(recipient),
            )
            .send()
            .await
            .map_err(rpc_err("bridgeToExecution"))?;
        confirm("bridgeToExecution", pending).await
    }

    async fn confirm_deployment(&self) -> Result<TxHash, ChainError> {
        let pending = self
            .vault
            .confirmDeployment()
            .send()
            .await
            .map_err(rpc_err("confirmDeployment"))?;
        confirm("confirmDeployment", pending).await
    }

    async fn signal_return(&self) -> Result<TxHash, ChainError> {
        let pending = self
            .vault
            .signalReturn()
            .send()
            .await
            .map_err(rpc_err("signalReturn"))?;
        confirm("signalReturn", pending).await
    }

    async fn confirm_return(&self, amount: Decimal) -> Result<TxHash, ChainError> {
        let pending = self
            .vault
            .confirmReturn(to_units(amount)?)
            .send()
            .await
            .map_err(rpc_err("confirmReturn"))?;
        confirm("confirmReturn", pending).await
    }

    async fn trigger_circuit_breaker(&self, reason: &str) -> Result<TxHash, ChainError> {
        let pending = self
            .vault
            .triggerCircuitBreaker(reason.to_string())
            .send()
            .await
            .map_err(rpc_err("triggerCircuitBreaker"))?;
        confirm("triggerCircuitBreaker", pending).await
    }
}

// ---------------------------------------------------------------------------
// Hook
// ---------------------------------------------------------------------------

pub struct EvmHook {
    hook: IVelvetHook::IVelvetHookInstance<DynProvider>,
}

impl EvmHook {
    pub fn new(provider: DynProvider, hook: Address) -> Self {
        Self {
            hook: IVelvetHook::new(hook, provider),
        }
    }
}

#[async_trait]
impl HookClient for EvmHook {
    async fn status(&self) -> Result<HookStatus, ChainError> {
        let s = self
            .hook
            .getHookStatus()
            .call()
            .await
            .map_err(rpc_err("getHookStatus"))?;
        Ok(HookStatus {
            current_fee: s.currentFee.to::<u32>(),
            volatility: VolatilityLevel::from_ordinal(s.currentVolatility),
            liquidity: from_units(s.liquidity)?,
            last_update: s.lastUpdate.saturating_to::<u64>(),
            fee_reason: s.feeReason,
        })
    }

    async fn update_dynamic_fee(&self, fee: u32, reason: &str) -> Result<TxHash, ChainError> {
        if fee >= 1 << 24 {
            return Err(ChainError::InvalidAmount(format!("fee {fee} exceeds uint24")));
        }
        let pending = self
            .hook
            .updateDynamicFee(U24::from(fee), reason.to_string())
            .send()
            .await
            .map_err(rpc_err("updateDynamicFee"))?;
        confirm("updateDynamicFee", pending).await
    }
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

struct ChainHandle {
    provider: DynProvider,
    usdc: Address,
}

pub struct EvmWallet {
    address: Address,
    chains: HashMap<u64, ChainHandle>,
}

impl EvmWallet {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            chains: HashMap::new(),
        }
    }

    pub fn with_chain(mut self, chain_id: u64, provider: DynProvider, usdc: Address) -> Self {
        self.chains.insert(chain_id, ChainHandle { provider, usdc });
        self
    }

    fn chain(&self, chain_id: u64) -> Result<&ChainHandle, ChainError> {
        self.chains.get(&chain_id).ok_or(ChainError::UnknownChain(chain_id))
    }
}

#[async_trait]
impl AgentWallet for EvmWallet {
    fn address(&self) -> Address {
        self.address
    }

    async fn usdc_balance(&self, chain_id: u64) -> Result<Decimal, ChainError> {
        let handle = self.chain(chain_id)?;
        let usdc = IERC20::new(handle.usdc, handle.provider.clone());
        let raw = usdc
            .balanceOf(self.address)
            .call()
            .await
            .map_err(rpc_err("balanceOf"))?;
        from_units(raw)
    }

    async fn ensure_allowance(
        &self,
        chain_id: u64,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<Option<TxHash>, ChainError> {
        let handle = self.chain(chain_id)?;
        let erc20 = IERC20::new(token, handle.provider.clone());
        let current = erc20
            .allowance(self.address, spender)
            .call()
            .await
            .map_err(rpc_err("allowance"))?;
        if current >= amount {
            return Ok(None);
        }
        let pending = erc20
            .approve(spender, amount)
            .send()
            .await
            .map_err(rpc_err("approve"))?;
        confirm("approve", pending).await.map(Some)
    }

    async fn send_raw(&self, chain_id: u64, tx: RawTransaction) -> Result<TxHash, ChainError> {
        let handle = self.chain(chain_id)?;
        let mut request = TransactionRequest::default()
            .with_from(self.address)
            .with_to(tx.to)
            .with_input(tx.data)
            .with_value(tx.value);
        if let Some(gas) = tx.gas_limit {
            request = request.with_gas_limit(gas);
        }
        let pending = handle
            .provider
            .send_transaction(request)
            .await
            .map_err(rpc_err("sendTransaction"))?;
        confirm("sendTransaction", pending).await
    }
}

// ---------------------------------------------------------------------------
// Gas oracle
// ---------------------------------------------------------------------------

pub struct EvmGasOracle {
    provider: DynProvider,
}

impl EvmGasOracle {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl GasOracle for EvmGasOracle {
    async fn gas_price_gwei(&self) -> Result<f64> {
        let wei = self
            .provider
            .get_gas_price()
            .await
            .context("eth_gasPrice failed")?;
        Ok(wei_to_gwei(wei))
    }
}
