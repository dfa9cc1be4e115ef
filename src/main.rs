//! VELVET ARC — Autonomous Cross-Chain Liquidity Agent
//!
//! Entry point. Parses CLI flags, loads configuration, initialises
//! structured logging, wires the chain, market and bridge clients, and runs
//! the agent loop on a fixed interval with graceful shutdown.

use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use velvet_arc::bridge::lifi::LifiClient;
use velvet_arc::bridge::{BridgeAggregator, BridgeTracker};
use velvet_arc::chain::evm::{self, EvmGasOracle, EvmHook, EvmVault, EvmWallet};
use velvet_arc::chain::units::parse_address;
use velvet_arc::chain::{AgentWallet, HookClient, VaultClient};
use velvet_arc::config::AppConfig;
use velvet_arc::dashboard;
use velvet_arc::engine::{AgentLoop, AgentRunner, Executor, Routing};
use velvet_arc::market::coingecko::CoinGeckoClient;
use velvet_arc::market::MarketScanner;
use velvet_arc::strategy::demo::{DemoDirector, ForcedAction};
use velvet_arc::strategy::DecisionEngine;

const BANNER: &str = r#"
 __   __ ___  _ __   __ ___  _____     _    ___   ___
 \ \ / /| __|| |\ \ / /| __||_   _|   /_\  | _ \ / __|
  \ V / | _| | |_\ V / | _|   | |    / _ \ |   /| (__
   \_/  |___||____\_/  |___|  |_|   /_/ \_\|_|_\ \___|

  Autonomous Cross-Chain Liquidity Agent
  v0.1.0 — Arc ⇄ Base
"#;

#[derive(Parser, Debug)]
#[command(author, version, about = "VELVET ARC cross-chain liquidity agent")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Log intended transactions without sending them
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Run a single iteration and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Enable demo mode (overrides the market policy)
    #[arg(long, default_value_t = false)]
    demo: bool,

    /// Demo: force this action every iteration (deploy|withdraw)
    #[arg(long)]
    force_action: Option<ForcedAction>,

    /// Demo: cycle deploy → farm → withdraw → safe on a timer
    #[arg(long, default_value_t = false)]
    demo_cycle: bool,

    /// Control API port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Deposit this much USDC from the agent wallet into the vault, then exit
    #[arg(long, value_name = "USDC")]
    deposit: Option<Decimal>,

    /// Redeem this many vault shares back to the agent wallet, then exit
    #[arg(long, value_name = "SHARES")]
    redeem: Option<Decimal>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let mut cfg = AppConfig::load(&cli.config)?;
    apply_overrides(&mut cfg, &cli);

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        loop_interval_secs = cfg.agent.loop_interval_secs,
        source = %cfg.chains.source.name,
        destination = %cfg.chains.destination.name,
        bridge_mode = ?cfg.bridge.mode,
        dry_run = cfg.agent.dry_run,
        "VELVET ARC starting up"
    );

    // -- Signer & providers ----------------------------------------------

    let signer = load_signer(&cfg)?;
    let agent_address = signer.address();
    info!(address = %agent_address, "Agent wallet loaded");

    let source = evm::connect(&cfg.chains.source.rpc_url, &signer)?;
    let destination = evm::connect(&cfg.chains.destination.rpc_url, &signer)?;

    let source_usdc = parse_address(&cfg.chains.source.usdc_address)?;
    let destination_usdc = parse_address(&cfg.chains.destination.usdc_address)?;
    let vault_address = parse_address(&cfg.contracts.vault_address)?;
    let hook_address = parse_address(&cfg.contracts.hook_address)?;

    let vault: Arc<dyn VaultClient> = Arc::new(EvmVault::new(
        source.clone(),
        vault_address,
        source_usdc,
        agent_address,
    ));
    let hook: Arc<dyn HookClient> = Arc::new(EvmHook::new(destination.clone(), hook_address));
    let wallet: Arc<dyn AgentWallet> = Arc::new(
        EvmWallet::new(agent_address)
            .with_chain(cfg.chains.source.chain_id, source, source_usdc)
            .with_chain(cfg.chains.destination.chain_id, destination.clone(), destination_usdc),
    );

    // -- One-shot vault operations ---------------------------------------

    if cli.deposit.is_some() || cli.redeem.is_some() {
        return vault_operation(&cli, vault.as_ref(), agent_address).await;
    }

    report_status(vault.as_ref(), hook.as_ref()).await;

    // -- Agent -------------------------------------------------------------

    let api_key = cfg
        .bridge
        .api_key_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok());
    let aggregator: Arc<dyn BridgeAggregator> =
        Arc::new(LifiClient::new(&cfg.bridge, api_key, wallet.clone())?);

    let scanner = MarketScanner::new(
        Arc::new(CoinGeckoClient::new(&cfg.scanner)?),
        Arc::new(EvmGasOracle::new(destination)),
        cfg.scanner.clone(),
    );
    let engine = DecisionEngine::new(
        cfg.policy.clone(),
        DemoDirector::from_config(&cfg.demo, Utc::now()),
    );
    let executor = Executor::new(
        vault.clone(),
        hook,
        wallet.clone(),
        aggregator.clone(),
        Routing::from_config(&cfg)?,
        cfg.contracts.hook_fee_scale,
        cfg.agent.dry_run,
    );

    let initial_balance = match vault.stats().await {
        Ok(stats) => stats.available,
        Err(e) => {
            warn!(error = %e, "Vault unreadable, using configured initial balance");
            cfg.agent.initial_vault_balance
        }
    };

    let agent = AgentLoop::new(
        scanner,
        engine,
        executor,
        BridgeTracker::from_config(&cfg.bridge),
        vault,
        wallet,
        aggregator,
    );
    let runner = Arc::new(AgentRunner::new(
        agent,
        initial_balance,
        Duration::from_secs(cfg.agent.loop_interval_secs),
    ));

    if cli.once {
        let state = runner.step().await;
        info!(state = %state, "Single iteration complete");
        if let Some(entry) = state.history.latest() {
            info!(entry = %entry, "Last execution");
        }
        return Ok(());
    }

    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(runner.clone(), cfg.dashboard.port).await?;
    }

    // -- Main loop -------------------------------------------------------

    runner.start();
    runner
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await;
    runner.stop();

    let state = runner.snapshot().await;
    info!(
        iterations = state.iteration,
        phase = %state.phase,
        position = %state.position,
        deployed = format!("${:.2}", state.deployed_amount),
        in_transit = format!("${:.2}", state.in_transit),
        yield_earned = format!("${:.2}", state.total_yield_earned),
        "VELVET ARC shut down cleanly."
    );
    if state.pending_bridge.is_some() {
        warn!("Shut down with a bridge in flight; it will be reconciled from vault state on restart");
    }

    Ok(())
}

/// Fold CLI flags into the loaded config.
fn apply_overrides(cfg: &mut AppConfig, cli: &Cli) {
    if cli.dry_run {
        cfg.agent.dry_run = true;
    }
    if let Some(port) = cli.port {
        cfg.dashboard.port = port;
    }
    if cli.demo || cli.force_action.is_some() || cli.demo_cycle {
        cfg.demo.enabled = true;
    }
    if let Some(action) = cli.force_action {
        cfg.demo.force_action = Some(action);
    }
    if cli.demo_cycle {
        cfg.demo.auto_cycle = true;
    }
}

/// The agent's signing key. Dry runs may proceed without one.
fn load_signer(cfg: &AppConfig) -> Result<PrivateKeySigner> {
    match cfg.private_key() {
        Ok(key) => key
            .expose_secret()
            .trim()
            .parse::<PrivateKeySigner>()
            .context("Invalid agent private key"),
        Err(e) if cfg.agent.dry_run => {
            warn!(error = %e, "No private key configured, using an ephemeral key for dry run");
            Ok(PrivateKeySigner::random())
        }
        Err(e) => Err(e),
    }
}

async fn vault_operation(cli: &Cli, vault: &dyn VaultClient, agent: alloy::primitives::Address) -> Result<()> {
    if let Some(amount) = cli.deposit {
        info!(amount = format!("${amount:.2}"), "Depositing into vault");
        let tx = vault.deposit(amount).await.context("Vault deposit failed")?;
        info!(tx = %tx, "Deposit confirmed");
    }
    if let Some(shares) = cli.redeem {
        info!(shares = %shares, "Redeeming vault shares");
        let tx = vault.withdraw(shares).await.context("Vault withdraw failed")?;
        info!(tx = %tx, "Redemption confirmed");
    }
    match vault.shares_of(agent).await {
        Ok(shares) => info!(shares = %shares, "Agent vault shares"),
        Err(e) => warn!(error = %e, "Could not read agent shares"),
    }
    Ok(())
}

/// Log vault and hook status at startup.
async fn report_status(vault: &dyn VaultClient, hook: &dyn HookClient) {
    match vault.stats().await {
        Ok(stats) => info!(
            state = %stats.state,
            deposits = format!("${:.2}", stats.total_deposits),
            available = format!("${:.2}", stats.available),
            deployed = format!("${:.2}", stats.deployed),
            yield_earned = format!("${:.2}", stats.yield_earned),
            share_price = %stats.share_price,
            "Vault status"
        ),
        Err(e) => warn!(error = %e, "Vault status unavailable"),
    }
    match hook.status().await {
        Ok(status) => info!(
            fee = status.current_fee,
            volatility = ?status.volatility,
            liquidity = %status.liquidity,
            last_update = status.last_update,
            reason = %status.fee_reason,
            "Hook status"
        ),
        Err(e) => warn!(error = %e, "Hook status unavailable"),
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("velvet_arc=info"));

    let json_logging = std::env::var("VELVET_LOG_JSON").is_ok();

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
