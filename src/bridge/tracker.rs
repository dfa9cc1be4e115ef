//! Bridge tracker — settles the single outstanding transfer.
//!
//! Called once per loop tick while a transfer is pending. Each call is at
//! most one status request; the tracker gives up after `max_polls` calls
//! or once `timeout` has elapsed since the transfer started.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::{BridgeAggregator, BridgeKind, BridgeStatus, BridgeTracking, PendingBridge, StatusQuery};
use crate::config::BridgeConfig;
use crate::types::{VaultSnapshot, VaultState};

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    Pending,
    /// Funds landed; `received` is what arrived on the far side.
    Completed { received: Decimal },
    Failed { reason: String },
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct BridgeTracker {
    max_polls: u32,
    timeout: Duration,
}

impl BridgeTracker {
    pub fn new(max_polls: u32, timeout: Duration) -> Self {
        Self { max_polls, timeout }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.max_polls, Duration::seconds(config.timeout_secs as i64))
    }

    /// Poll `pending` once.
    ///
    /// `vault` is this tick's vault observation; native transfers are
    /// detected from it rather than from the aggregator.
    pub async fn poll(
        &self,
        pending: &mut PendingBridge,
        aggregator: &dyn BridgeAggregator,
        vault: Option<&VaultSnapshot>,
        now: DateTime<Utc>,
    ) -> TrackOutcome {
        pending.polls += 1;

        if now - pending.started_at > self.timeout || pending.polls > self.max_polls {
            warn!(
                bridge = %pending,
                elapsed_secs = (now - pending.started_at).num_seconds(),
                "Bridge tracking gave up"
            );
            return TrackOutcome::TimedOut;
        }

        let outcome = match &pending.tracking {
            BridgeTracking::Simulated => TrackOutcome::Completed {
                received: pending.amount,
            },
            BridgeTracking::Native { baseline, .. } => Self::observe_native(pending, *baseline, vault),
            BridgeTracking::Aggregator { tx_hash, bridge } => {
                let query = StatusQuery {
                    tx_hash: tx_hash.clone(),
                    from_chain: pending.from_chain,
                    to_chain: pending.to_chain,
                    bridge: bridge.clone(),
                };
                match aggregator.status(&query).await {
                    Ok(BridgeStatus::Done { received }) => TrackOutcome::Completed {
                        received: received.unwrap_or(pending.amount),
                    },
                    Ok(BridgeStatus::Failed { reason }) => TrackOutcome::Failed { reason },
                    Ok(BridgeStatus::Pending) | Ok(BridgeStatus::NotFound) => TrackOutcome::Pending,
                    Err(e) => {
                        // Status lookups are retried next tick.
                        warn!(error = %e, "Bridge status lookup failed");
                        TrackOutcome::Pending
                    }
                }
            }
        };

        match &outcome {
            TrackOutcome::Completed { received } => info!(
                bridge = %pending,
                received = format!("${received:.2}"),
                "Bridge completed"
            ),
            TrackOutcome::Pending => debug!(bridge = %pending, "Bridge still in flight"),
            _ => {}
        }
        outcome
    }

    fn observe_native(
        pending: &PendingBridge,
        baseline: Decimal,
        vault: Option<&VaultSnapshot>,
    ) -> TrackOutcome {
        let Some(vault) = vault else {
            return TrackOutcome::Pending;
        };
        match pending.kind {
            // Only growth over the starting balance counts as arrival.
            BridgeKind::Deploy if vault.destination_balance > baseline => TrackOutcome::Completed {
                received: vault.destination_balance - baseline,
            },
            BridgeKind::Return
                if vault.state == VaultState::BridgingBack && vault.available > Decimal::ZERO =>
            {
                TrackOutcome::Completed {
                    received: vault.available,
                }
            }
            _ => TrackOutcome::Pending,
        }
    }
}
