//! Shared types for the VELVET ARC agent.
//!
//! These types form the data model used across all modules: market
//! snapshots, policy decisions, the agent state machine, and the bounded
//! execution history surfaced to the control API.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::bridge::PendingBridge;

/// Maximum number of entries kept in the execution history.
pub const HISTORY_CAPACITY: usize = 50;

/// Maximum length of an error message recorded in a log entry.
pub const MAX_LOG_MESSAGE_LEN: usize = 200;

// ---------------------------------------------------------------------------
// Volatility
// ---------------------------------------------------------------------------

/// Volatility bucket derived from the 0–100 volatility index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl VolatilityLevel {
    pub const ALL: &'static [VolatilityLevel] = &[
        VolatilityLevel::Low,
        VolatilityLevel::Medium,
        VolatilityLevel::High,
        VolatilityLevel::Extreme,
    ];

    /// Map a volatility index onto its bucket: <20 LOW, <50 MEDIUM,
    /// <80 HIGH, else EXTREME.
    pub fn from_index(index: f64) -> Self {
        if index < 20.0 {
            VolatilityLevel::Low
        } else if index < 50.0 {
            VolatilityLevel::Medium
        } else if index < 80.0 {
            VolatilityLevel::High
        } else {
            VolatilityLevel::Extreme
        }
    }

    /// Ordinal as stored by the hook contract (`uint8`).
    pub fn ordinal(&self) -> u8 {
        match self {
            VolatilityLevel::Low => 0,
            VolatilityLevel::Medium => 1,
            VolatilityLevel::High => 2,
            VolatilityLevel::Extreme => 3,
        }
    }

    pub fn from_ordinal(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }
}

impl fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityLevel::Low => write!(f, "LOW"),
            VolatilityLevel::Medium => write!(f, "MEDIUM"),
            VolatilityLevel::High => write!(f, "HIGH"),
            VolatilityLevel::Extreme => write!(f, "EXTREME"),
        }
    }
}

impl std::str::FromStr for VolatilityLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(VolatilityLevel::Low),
            "medium" | "med" => Ok(VolatilityLevel::Medium),
            "high" => Ok(VolatilityLevel::High),
            "extreme" => Ok(VolatilityLevel::Extreme),
            _ => Err(anyhow::anyhow!("Unknown volatility level: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Market conditions
// ---------------------------------------------------------------------------

/// Immutable market snapshot produced by the scanner once per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConditions {
    pub volatility: VolatilityLevel,
    /// 0–100
    pub volatility_index: f64,
    /// Reference asset price in USD
    pub eth_price: f64,
    /// 24-hour traded volume in USD
    pub volume_24h: Decimal,
    /// 24-hour price change in percent (e.g. -5.2)
    pub price_change_24h: f64,
    pub gas_price_gwei: f64,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for MarketConditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ETH ${:.0} | vol: {} ({:.1}) | 24h: {:+.2}% | volume: ${:.1}M | gas: {:.0} gwei",
            self.eth_price,
            self.volatility,
            self.volatility_index,
            self.price_change_24h,
            self.volume_24h / Decimal::from(1_000_000),
            self.gas_price_gwei,
        )
    }
}

impl MarketConditions {
    /// Whether every floating point field is a real number.
    pub fn is_finite(&self) -> bool {
        self.volatility_index.is_finite()
            && self.eth_price.is_finite()
            && self.price_change_24h.is_finite()
            && self.gas_price_gwei.is_finite()
    }

    /// Volume expressed in millions of USD, for log messages.
    pub fn volume_millions(&self) -> Decimal {
        (self.volume_24h / Decimal::from(1_000_000)).round_dp(1)
    }

    #[cfg(test)]
    pub fn sample(volatility: VolatilityLevel) -> Self {
        use rust_decimal_macros::dec;
        MarketConditions {
            volatility,
            volatility_index: match volatility {
                VolatilityLevel::Low => 10.0,
                VolatilityLevel::Medium => 35.0,
                VolatilityLevel::High => 65.0,
                VolatilityLevel::Extreme => 90.0,
            },
            eth_price: 3000.0,
            volume_24h: dec!(20_000_000),
            price_change_24h: 1.0,
            gas_price_gwei: 30.0,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Position & phases
// ---------------------------------------------------------------------------

/// Which chain currently holds the agent's capital.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Position {
    /// Home chain (vault, safe harbor)
    Arc,
    /// Execution chain (hook pool, yield)
    Base,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Arc => write!(f, "ARC"),
            Position::Base => write!(f, "BASE"),
        }
    }
}

/// Agent state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentPhase {
    Idle,
    Scanning,
    Analyzing,
    BridgingToBase,
    AwaitingBridge,
    DeployingLiquidity,
    Farming,
    Withdrawing,
    BridgingToArc,
    CircuitBreaker,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentPhase::Idle => "IDLE",
            AgentPhase::Scanning => "SCANNING",
            AgentPhase::Analyzing => "ANALYZING",
            AgentPhase::BridgingToBase => "BRIDGING_TO_BASE",
            AgentPhase::AwaitingBridge => "AWAITING_BRIDGE",
            AgentPhase::DeployingLiquidity => "DEPLOYING_LIQUIDITY",
            AgentPhase::Farming => "FARMING",
            AgentPhase::Withdrawing => "WITHDRAWING",
            AgentPhase::BridgingToArc => "BRIDGING_TO_ARC",
            AgentPhase::CircuitBreaker => "CIRCUIT_BREAKER",
        };
        write!(f, "{s}")
    }
}

/// Vault lifecycle state as reported by the on-chain contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VaultState {
    Idle,
    BridgingOut,
    Deployed,
    BridgingBack,
    Protected,
}

impl VaultState {
    /// Decode the contract's `uint8` state.
    pub fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(VaultState::Idle),
            1 => Some(VaultState::BridgingOut),
            2 => Some(VaultState::Deployed),
            3 => Some(VaultState::BridgingBack),
            4 => Some(VaultState::Protected),
            _ => None,
        }
    }
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VaultState::Idle => "IDLE",
            VaultState::BridgingOut => "BRIDGING_OUT",
            VaultState::Deployed => "DEPLOYED",
            VaultState::BridgingBack => "BRIDGING_BACK",
            VaultState::Protected => "PROTECTED",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time view of the vault plus the agent's destination balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub state: VaultState,
    pub total_deposits: Decimal,
    pub total_shares: Decimal,
    pub deployed: Decimal,
    pub available: Decimal,
    pub yield_earned: Decimal,
    pub share_price: Decimal,
    /// Agent wallet USDC balance on the destination chain
    pub destination_balance: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl fmt::Display for VaultSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | deposits=${:.2} available=${:.2} deployed=${:.2} | base=${:.2}",
            self.state, self.total_deposits, self.available, self.deployed, self.destination_balance,
        )
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// What the agent wants to do this iteration. Each variant carries only
/// the data its execution needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Bridge `amount` USDC from the vault to the execution chain.
    Deploy { amount: Decimal },
    /// Pull capital back to the vault.
    Withdraw,
    Hold,
    /// Trip the circuit breaker. `exposure` is the capital deployed when
    /// the decision was made.
    EmergencyExit { exposure: Decimal },
    /// Set the hook fee, in basis points.
    AdjustFee { fee_bps: u32 },
    /// Funds arrived on the execution chain.
    ConfirmDeploy { amount: Decimal },
    /// Funds arrived back in the vault.
    ConfirmReturn { amount: Decimal },
}

impl Action {
    /// Stable label used in execution logs.
    pub fn label(&self) -> &'static str {
        match self {
            Action::Deploy { .. } => "DEPLOY",
            Action::Withdraw => "WITHDRAW",
            Action::Hold => "HOLD",
            Action::EmergencyExit { .. } => "EMERGENCY_EXIT",
            Action::AdjustFee { .. } => "ADJUST_FEE",
            Action::ConfirmDeploy { .. } => "CONFIRM_DEPLOY",
            Action::ConfirmReturn { .. } => "CONFIRM_RETURN",
        }
    }

    /// Whether realising this action opens a cross-chain transfer.
    pub fn opens_bridge(&self) -> bool {
        matches!(self, Action::Deploy { .. } | Action::Withdraw)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Deploy { amount } => write!(f, "DEPLOY ${amount:.2}"),
            Action::EmergencyExit { exposure } => write!(f, "EMERGENCY_EXIT (exposure ${exposure:.2})"),
            Action::AdjustFee { fee_bps } => write!(f, "ADJUST_FEE {fee_bps} bps"),
            Action::ConfirmDeploy { amount } => write!(f, "CONFIRM_DEPLOY ${amount:.2}"),
            Action::ConfirmReturn { amount } => write!(f, "CONFIRM_RETURN ${amount:.2}"),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// A policy decision. Produced fresh each iteration and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecision {
    #[serde(flatten)]
    pub action: Action,
    pub reason: String,
    /// 0–1
    pub confidence: f64,
}

impl AgentDecision {
    /// Build a decision, clamping confidence into [0, 1].
    pub fn new(action: Action, reason: impl Into<String>, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            action,
            reason: reason.into(),
            confidence,
        }
    }

    pub fn hold(reason: impl Into<String>, confidence: f64) -> Self {
        Self::new(Action::Hold, reason, confidence)
    }
}

impl fmt::Display for AgentDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.0}% conf) — {}",
            self.action,
            self.confidence * 100.0,
            self.reason,
        )
    }
}

// ---------------------------------------------------------------------------
// Execution history
// ---------------------------------------------------------------------------

/// One line of the agent's execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub details: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl ExecutionLog {
    pub fn success(action: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            details: details.into(),
            success: true,
            tx_hash: None,
        }
    }

    pub fn failure(action: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            details: truncate_message(&details.into(), MAX_LOG_MESSAGE_LEN),
            success: false,
            tx_hash: None,
        }
    }

    pub fn with_tx(mut self, tx_hash: Option<String>) -> Self {
        self.tx_hash = tx_hash;
        self
    }
}

impl fmt::Display for ExecutionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.success { "ok" } else { "FAILED" };
        write!(
            f,
            "[{}] {} {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.action,
            mark,
            self.details,
        )?;
        if let Some(ref tx) = self.tx_hash {
            write!(f, " ({tx})")?;
        }
        Ok(())
    }
}

/// Bounded FIFO of execution logs. The oldest entry is evicted once
/// capacity is reached.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionHistory {
    entries: VecDeque<ExecutionLog>,
    capacity: usize,
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl ExecutionHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: ExecutionLog) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&ExecutionLog> {
        self.entries.back()
    }

    /// Entries newest first.
    pub fn newest_first(&self) -> impl Iterator<Item = &ExecutionLog> {
        self.entries.iter().rev()
    }
}

impl Serialize for ExecutionHistory {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.newest_first())
    }
}

impl<'de> Deserialize<'de> for ExecutionHistory {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let newest_first: Vec<ExecutionLog> = Vec::deserialize(deserializer)?;
        let mut history = ExecutionHistory::default();
        for entry in newest_first.into_iter().rev() {
            history.push(entry);
        }
        Ok(history)
    }
}

/// Cut a message down to `max` characters, marking the cut with "...".
pub fn truncate_message(msg: &str, max: usize) -> String {
    if msg.chars().count() <= max {
        return msg.to_string();
    }
    let cut: String = msg.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

// ---------------------------------------------------------------------------
// Agent loop state
// ---------------------------------------------------------------------------

/// Process-wide agent record. Owned by the loop; everyone else reads a
/// cloned snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopState {
    pub phase: AgentPhase,
    pub position: Position,
    /// Capital confirmed on the execution chain
    pub deployed_amount: Decimal,
    /// Capital available in the vault
    pub vault_balance: Decimal,
    /// Capital currently crossing a bridge in either direction
    pub in_transit: Decimal,
    pub total_yield_earned: Decimal,
    pub iteration: u64,
    pub last_decision: Option<AgentDecision>,
    pub last_conditions: Option<MarketConditions>,
    pub last_vault: Option<VaultSnapshot>,
    pub pending_bridge: Option<PendingBridge>,
    pub history: ExecutionHistory,
    pub started_at: DateTime<Utc>,
}

impl fmt::Display for AgentLoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} | vault=${:.2} deployed=${:.2} in_transit=${:.2} | iteration={}",
            self.phase,
            self.position,
            self.vault_balance,
            self.deployed_amount,
            self.in_transit,
            self.iteration,
        )
    }
}

impl AgentLoopState {
    pub fn new(vault_balance: Decimal) -> Self {
        Self {
            phase: AgentPhase::Idle,
            position: Position::Arc,
            deployed_amount: Decimal::ZERO,
            vault_balance,
            in_transit: Decimal::ZERO,
            total_yield_earned: Decimal::ZERO,
            iteration: 0,
            last_decision: None,
            last_conditions: None,
            last_vault: None,
            pending_bridge: None,
            history: ExecutionHistory::default(),
            started_at: Utc::now(),
        }
    }

    /// Check the position/balance invariants.
    pub fn is_consistent(&self) -> bool {
        let deployed_implies_base =
            self.deployed_amount <= Decimal::ZERO || self.position == Position::Base;
        let arc_not_bridging_out =
            self.position == Position::Base || self.phase != AgentPhase::BridgingToBase;
        deployed_implies_base && arc_not_bridging_out
    }

    /// Phase to settle in when nothing is in flight.
    pub fn resting_phase(&self) -> AgentPhase {
        match self.position {
            Position::Arc => AgentPhase::Idle,
            Position::Base => AgentPhase::Farming,
        }
    }

    pub fn record(&mut self, entry: ExecutionLog) {
        self.history.push(entry);
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure of one agent iteration. Market, chain and bridge errors are
/// absorbed below this level; only a failed execution surfaces.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Execution error: {0}")]
    Execution(#[from] crate::engine::executor::ExecutionError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
