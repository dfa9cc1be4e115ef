//! Cross-chain transfers.
//!
//! Defines the `BridgeAggregator` trait (routes / execute / status), the
//! `PendingBridge` record for the single transfer in flight, and the
//! polling [`tracker::BridgeTracker`]. The LI.FI REST client lives in
//! [`lifi`].

pub mod lifi;
pub mod tracker;

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chain::{ChainError, TxHash};

pub use tracker::{BridgeTracker, TrackOutcome};

/// Errors surfaced by the bridge aggregator.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Aggregator request failed: {0}")]
    Http(String),

    #[error("Aggregator API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed aggregator response: {0}")]
    Parse(String),

    #[error("Unsupported route: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// A request for routes moving USDC between two chains.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub from_chain: u64,
    pub to_chain: u64,
    pub from_token: Address,
    pub to_token: Address,
    pub from_amount: Decimal,
    pub from_address: Address,
    pub to_address: Address,
}

/// One candidate route, best first as returned by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub id: String,
    pub from_chain: u64,
    pub to_chain: u64,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub to_amount_min: Decimal,
    /// Bridge used by the cross-chain step (e.g. "cctp", "across")
    pub tool: String,
    pub estimated_secs: u64,
    /// Raw step objects, sent back verbatim when requesting calldata.
    pub steps: Vec<serde_json::Value>,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} → {} via {} | ${:.2} → ${:.2} (min ${:.2}) | ~{}s, {} step(s)",
            self.from_chain,
            self.to_chain,
            self.tool,
            self.from_amount,
            self.to_amount,
            self.to_amount_min,
            self.estimated_secs,
            self.steps.len(),
        )
    }
}

/// Transactions sent while executing a route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteExecution {
    /// Every transaction sent, approvals included, in order.
    pub tx_hashes: Vec<TxHash>,
    /// The transaction the aggregator tracks the transfer by.
    pub source_tx: TxHash,
    pub tool: String,
}

/// Parameters of a status lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusQuery {
    pub tx_hash: String,
    pub from_chain: u64,
    pub to_chain: u64,
    pub bridge: String,
}

/// Transfer status as reported by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeStatus {
    Pending,
    Done { received: Option<Decimal> },
    Failed { reason: String },
    NotFound,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeAggregator: Send + Sync {
    async fn routes(&self, request: &RouteRequest) -> Result<Vec<Route>, BridgeError>;

    /// Send `route` from the agent wallet. Only single-step routes are
    /// executed; a later step would depend on an earlier one settling.
    async fn execute(&self, route: &Route) -> Result<RouteExecution, BridgeError>;

    async fn status(&self, query: &StatusQuery) -> Result<BridgeStatus, BridgeError>;
}

// ---------------------------------------------------------------------------
// Pending bridge
// ---------------------------------------------------------------------------

/// Direction of a tracked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeKind {
    /// Vault → execution chain
    Deploy,
    /// Execution chain → vault
    Return,
}

/// How completion of a transfer is detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum BridgeTracking {
    /// Poll the aggregator's status endpoint.
    Aggregator { tx_hash: String, bridge: String },
    /// Vault-initiated transfer; watch balances on the far side.
    /// `baseline` is the recipient's balance there when the transfer started.
    Native {
        tx_hash: String,
        #[serde(default)]
        baseline: Decimal,
    },
    /// Dry run; settles on the next poll.
    Simulated,
}

/// The single outstanding cross-chain transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBridge {
    pub id: uuid::Uuid,
    pub kind: BridgeKind,
    pub amount: Decimal,
    pub from_chain: u64,
    pub to_chain: u64,
    pub tracking: BridgeTracking,
    pub started_at: DateTime<Utc>,
    pub polls: u32,
}

impl PendingBridge {
    pub fn new(
        kind: BridgeKind,
        amount: Decimal,
        from_chain: u64,
        to_chain: u64,
        tracking: BridgeTracking,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            kind,
            amount,
            from_chain,
            to_chain,
            tracking,
            started_at: Utc::now(),
            polls: 0,
        }
    }

    pub fn tx_hash(&self) -> Option<&str> {
        match &self.tracking {
            BridgeTracking::Aggregator { tx_hash, .. } | BridgeTracking::Native { tx_hash, .. } => {
                Some(tx_hash)
            }
            BridgeTracking::Simulated => None,
        }
    }
}

impl fmt::Display for PendingBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} ${:.2} {} → {} (poll #{})",
            self.kind, self.amount, self.from_chain, self.to_chain, self.polls
        )
    }
}
