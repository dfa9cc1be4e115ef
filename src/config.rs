//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The signing key is referenced by env-var name in the config and
//! resolved at runtime into a [`SecretString`] so it never lands in logs.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::strategy::demo::ForcedAction;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub chains: ChainsConfig,
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub loop_interval_secs: u64,
    /// Env var holding the hex private key of the agent wallet.
    pub private_key_env: String,
    #[serde(default)]
    pub dry_run: bool,
    /// Vault balance assumed when the vault cannot be read at startup.
    #[serde(default)]
    pub initial_vault_balance: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainsConfig {
    /// Home chain holding the vault.
    pub source: ChainConfig,
    /// Execution chain holding the hook pool.
    pub destination: ChainConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub usdc_address: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContractsConfig {
    pub vault_address: String,
    pub hook_address: String,
    /// Multiplier from basis points to the hook's native fee units.
    #[serde(default = "default_hook_fee_scale")]
    pub hook_fee_scale: u32,
}

fn default_hook_fee_scale() -> u32 {
    10
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// How the fee for an ADJUST_FEE decision is chosen.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeeMode {
    /// Fixed fee per volatility bucket.
    #[default]
    Bucket,
    /// Bucket fee nudged by volume and price movement.
    Adaptive,
}

/// Fee per volatility bucket, in basis points.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FeeSchedule {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub extreme: u32,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            low: 20,
            medium: 50,
            high: 150,
            extreme: 500,
        }
    }
}

/// Adjustments applied on top of the bucket fee in adaptive mode.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AdaptiveFeeConfig {
    pub high_volume: Decimal,
    pub high_volume_premium_bps: u32,
    pub low_volume: Decimal,
    pub low_volume_discount_bps: u32,
    /// Absolute 24h move in percent above which the premium applies.
    pub large_move_pct: f64,
    pub large_move_premium_bps: u32,
    pub min_fee_bps: u32,
    pub max_fee_bps: u32,
}

impl Default for AdaptiveFeeConfig {
    fn default() -> Self {
        Self {
            high_volume: dec!(30_000_000),
            high_volume_premium_bps: 10,
            low_volume: dec!(5_000_000),
            low_volume_discount_bps: 5,
            large_move_pct: 5.0,
            large_move_premium_bps: 20,
            min_fee_bps: 10,
            max_fee_bps: 1000,
        }
    }
}

/// Every threshold the decision policy consults.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Hold on ARC when destination gas exceeds this.
    pub max_gas_gwei: f64,
    /// HIGH volatility plus a 24h move below this trips the breaker.
    pub emergency_price_change_pct: f64,
    /// Withdraw from BASE when the 24h move drops below this.
    pub withdraw_price_change_pct: f64,
    pub low_vol_deploy_volume: Decimal,
    pub medium_vol_deploy_volume: Decimal,
    /// Withdraw from BASE when volume falls below this.
    pub withdraw_volume: Decimal,
    pub low_vol_deploy_fraction: Decimal,
    pub medium_vol_deploy_fraction: Decimal,
    pub min_deploy_amount: Decimal,
    pub fee_mode: FeeMode,
    pub fees: FeeSchedule,
    pub adaptive: AdaptiveFeeConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_gas_gwei: 80.0,
            emergency_price_change_pct: -5.0,
            withdraw_price_change_pct: -3.0,
            low_vol_deploy_volume: dec!(10_000_000),
            medium_vol_deploy_volume: dec!(5_000_000),
            withdraw_volume: dec!(3_000_000),
            low_vol_deploy_fraction: dec!(0.7),
            medium_vol_deploy_fraction: dec!(0.5),
            min_deploy_amount: dec!(1),
            fee_mode: FeeMode::Bucket,
            fees: FeeSchedule::default(),
            adaptive: AdaptiveFeeConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    pub price_api_url: String,
    /// CoinGecko asset id of the reference asset.
    pub asset_id: String,
    pub window_size: usize,
    pub cooldown_secs: u64,
    pub request_timeout_secs: u64,
    pub fallback_price: f64,
    pub fallback_volume: Decimal,
    pub fallback_gas_gwei: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            price_api_url: "https://api.coingecko.com/api/v3".to_string(),
            asset_id: "ethereum".to_string(),
            window_size: 24,
            cooldown_secs: 10,
            request_timeout_secs: 10,
            fallback_price: 3000.0,
            fallback_volume: dec!(10_000_000),
            fallback_gas_gwei: 30.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Which path moves capital out of the vault.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    /// Vault calls `bridgeToExecution` itself.
    #[default]
    Native,
    /// The agent wallet executes an aggregator route.
    Aggregator,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    pub api_url: String,
    pub integrator: String,
    /// Optional env var holding an aggregator API key.
    pub api_key_env: Option<String>,
    pub slippage: f64,
    pub order: String,
    pub mode: BridgeMode,
    pub max_polls: u32,
    pub timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_url: "https://li.quest/v1".to_string(),
            integrator: "velvet-arc".to_string(),
            api_key_env: None,
            slippage: 0.005,
            order: "RECOMMENDED".to_string(),
            mode: BridgeMode::Native,
            max_polls: 120,
            timeout_secs: 1800,
            request_timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Dashboard & demo
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3001,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DemoConfig {
    pub enabled: bool,
    /// Force the same action every iteration.
    pub force_action: Option<ForcedAction>,
    /// Cycle DEPLOY → FARMING → WITHDRAW → SAFE on a timer.
    pub auto_cycle: bool,
    pub deploy_secs: u64,
    pub farming_secs: u64,
    pub withdraw_secs: u64,
    pub safe_secs: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            force_action: None,
            auto_cycle: false,
            deploy_secs: 10,
            farming_secs: 30,
            withdraw_secs: 10,
            safe_secs: 20,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.agent.loop_interval_secs == 0 {
            anyhow::bail!("agent.loop_interval_secs must be positive");
        }
        if self.scanner.window_size < 2 {
            anyhow::bail!("scanner.window_size must be at least 2");
        }
        if !(0.0..1.0).contains(&self.bridge.slippage) {
            anyhow::bail!("bridge.slippage must be in [0, 1)");
        }
        if self.policy.adaptive.min_fee_bps > self.policy.adaptive.max_fee_bps {
            anyhow::bail!("policy.adaptive.min_fee_bps exceeds max_fee_bps");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The agent wallet's private key.
    pub fn private_key(&self) -> Result<SecretString> {
        Self::resolve_env(&self.agent.private_key_env).map(SecretString::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [agent]
        name = "VELVET-001"
        loop_interval_secs = 15
        private_key_env = "AGENT_PRIVATE_KEY"

        [chains.source]
        name = "Arc Testnet"
        chain_id = 5042002
        rpc_url = "https://rpc.testnet.arc.network"
        usdc_address = "0x3600000000000000000000000000000000000000"

        [chains.destination]
        name = "Base Sepolia"
        chain_id = 84532
        rpc_url = "https://sepolia.base.org"
        usdc_address = "0x036CbD53842c5426634e7929541eC2318f3dCF7e"

        [contracts]
        vault_address = "0x0000000000000000000000000000000000000001"
        hook_address = "0x0000000000000000000000000000000000000002"
    "#;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let cfg = AppConfig::parse(MINIMAL).unwrap();
        assert_eq!(cfg.agent.name, "VELVET-001");
        assert!(!cfg.agent.dry_run);
        assert_eq!(cfg.chains.destination.chain_id, 84532);
        assert_eq!(cfg.contracts.hook_fee_scale, 10);
        assert_eq!(cfg.policy, PolicyConfig::default());
        assert_eq!(cfg.scanner.window_size, 24);
        assert_eq!(cfg.scanner.cooldown_secs, 10);
        assert_eq!(cfg.bridge.integrator, "velvet-arc");
        assert_eq!(cfg.bridge.mode, BridgeMode::Native);
        assert_eq!(cfg.dashboard.port, 3001);
        assert!(cfg.demo.force_action.is_none());
    }

    #[test]
    fn test_policy_overrides() {
        let text = format!(
            "{MINIMAL}\n[policy]\nmax_gas_gwei = 50.0\nfee_mode = \"adaptive\"\n\n[policy.fees]\nlow = 25\nmedium = 60\nhigh = 160\nextreme = 600\n"
        );
        let cfg = AppConfig::parse(&text).unwrap();
        assert_eq!(cfg.policy.max_gas_gwei, 50.0);
        assert_eq!(cfg.policy.fee_mode, FeeMode::Adaptive);
        assert_eq!(cfg.policy.fees.extreme, 600);
        // Untouched keys keep their defaults
        assert_eq!(cfg.policy.min_deploy_amount, dec!(1));
    }

    #[test]
    fn test_demo_force_action() {
        let text = format!("{MINIMAL}\n[demo]\nenabled = true\nforce_action = \"withdraw\"\n");
        let cfg = AppConfig::parse(&text).unwrap();
        assert!(cfg.demo.enabled);
        assert_eq!(cfg.demo.force_action, Some(ForcedAction::Withdraw));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let text = MINIMAL.replace("loop_interval_secs = 15", "loop_interval_secs = 0");
        assert!(AppConfig::parse(&text).is_err());
    }

    #[test]
    fn test_rejects_bad_slippage() {
        let text = format!("{MINIMAL}\n[bridge]\nslippage = 1.5\n");
        assert!(AppConfig::parse(&text).is_err());
    }

    #[test]
    fn test_load_config() {
        // Requires config.toml in the working directory.
        let result = AppConfig::load("config.toml");
        if let Ok(cfg) = result {
            assert_eq!(cfg.agent.name, "VELVET-001");
            assert_eq!(cfg.chains.source.chain_id, 5042002);
            assert_eq!(cfg.chains.destination.chain_id, 84532);
            assert!(cfg.policy.low_vol_deploy_fraction > Decimal::ZERO);
        }
    }

    #[test]
    fn test_missing_private_key_env() {
        let mut cfg = AppConfig::parse(MINIMAL).unwrap();
        cfg.agent.private_key_env = "VELVET_TEST_KEY_THAT_IS_NOT_SET".to_string();
        assert!(cfg.private_key().is_err());
    }
}
