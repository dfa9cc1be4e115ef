//! Strategy engine — deterministic threshold policy, fee selection,
//! vault lifecycle reconciliation and the demo director.

pub mod demo;
pub mod fee;
pub mod lifecycle;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::PolicyConfig;
use crate::types::{Action, AgentDecision, AgentLoopState, MarketConditions, Position, VolatilityLevel};
use demo::DemoDirector;

// ---------------------------------------------------------------------------
// Decision policy
// ---------------------------------------------------------------------------

/// Pure threshold policy. No I/O, no clock, no randomness: the same inputs
/// always produce the same decision.
///
/// Priority order (first match wins):
/// 1. EXTREME volatility → emergency exit.
/// 2. HIGH volatility with a sharp 24h drop → emergency exit.
/// 3. On ARC: hold on expensive gas, deploy into calm or gently rising
///    markets with enough volume, otherwise hold.
/// 4. On BASE: withdraw on HIGH volatility, negative momentum or thin
///    volume, otherwise tune the hook fee.
/// 5. Anything unusable (non-finite inputs, dust-sized deploys) → hold.
pub fn make_decision(
    conditions: &MarketConditions,
    position: Position,
    deployed_amount: Decimal,
    vault_balance: Decimal,
    policy: &PolicyConfig,
) -> AgentDecision {
    if conditions.volatility == VolatilityLevel::Extreme {
        return AgentDecision::new(
            Action::EmergencyExit {
                exposure: deployed_amount,
            },
            format!(
                "Extreme volatility detected (index: {:.0}). Triggering circuit breaker.",
                conditions.volatility_index
            ),
            0.99,
        );
    }

    if !conditions.is_finite() {
        return fallback();
    }

    if conditions.volatility == VolatilityLevel::High
        && conditions.price_change_24h < policy.emergency_price_change_pct
    {
        return AgentDecision::new(
            Action::EmergencyExit {
                exposure: deployed_amount,
            },
            format!(
                "High volatility with {:.2}% price drop. Emergency withdrawal.",
                conditions.price_change_24h
            ),
            0.95,
        );
    }

    match position {
        Position::Arc => decide_on_arc(conditions, vault_balance, policy),
        Position::Base => decide_on_base(conditions, policy),
    }
}

fn decide_on_arc(
    conditions: &MarketConditions,
    vault_balance: Decimal,
    policy: &PolicyConfig,
) -> AgentDecision {
    if conditions.gas_price_gwei > policy.max_gas_gwei {
        return AgentDecision::hold(
            format!(
                "Gas price too high ({:.0} gwei). Waiting for better conditions.",
                conditions.gas_price_gwei
            ),
            0.8,
        );
    }

    if conditions.volatility == VolatilityLevel::Low
        && conditions.volume_24h > policy.low_vol_deploy_volume
    {
        let amount = (vault_balance * policy.low_vol_deploy_fraction).floor();
        if amount < policy.min_deploy_amount {
            return fallback();
        }
        return AgentDecision::new(
            Action::Deploy { amount },
            format!(
                "Low volatility ({:.0}) + high volume (${}M). Optimal deployment window.",
                conditions.volatility_index,
                conditions.volume_millions()
            ),
            0.88,
        );
    }

    if conditions.volatility == VolatilityLevel::Medium
        && conditions.price_change_24h > 0.0
        && conditions.volume_24h > policy.medium_vol_deploy_volume
    {
        let amount = (vault_balance * policy.medium_vol_deploy_fraction).floor();
        if amount < policy.min_deploy_amount {
            return fallback();
        }
        return AgentDecision::new(
            Action::Deploy { amount },
            format!(
                "Medium volatility with positive momentum (+{:.2}%). Moderate deployment.",
                conditions.price_change_24h
            ),
            0.72,
        );
    }

    AgentDecision::hold(
        format!(
            "Market conditions not optimal. Volatility: {}, Volume: ${}M.",
            conditions.volatility,
            conditions.volume_millions()
        ),
        0.75,
    )
}

fn decide_on_base(conditions: &MarketConditions, policy: &PolicyConfig) -> AgentDecision {
    if conditions.volatility == VolatilityLevel::High {
        return AgentDecision::new(
            Action::Withdraw,
            format!(
                "High volatility detected ({:.0}). Returning to safe harbor.",
                conditions.volatility_index
            ),
            0.9,
        );
    }

    if conditions.price_change_24h < policy.withdraw_price_change_pct {
        return AgentDecision::new(
            Action::Withdraw,
            format!(
                "Significant negative momentum ({:.2}%). Protecting capital.",
                conditions.price_change_24h
            ),
            0.85,
        );
    }

    if conditions.volume_24h < policy.withdraw_volume {
        return AgentDecision::new(
            Action::Withdraw,
            format!(
                "Volume dropped to ${}M. Insufficient yield opportunity.",
                conditions.volume_millions()
            ),
            0.7,
        );
    }

    AgentDecision::new(
        Action::AdjustFee {
            fee_bps: fee::target_fee(conditions, policy),
        },
        "Conditions stable. Continuing yield generation with optimized fee.",
        0.75,
    )
}

fn fallback() -> AgentDecision {
    AgentDecision::hold("Unable to determine optimal action. Defaulting to hold.", 0.5)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Chooses the decision for an iteration: the demo director when demo
/// mode is on, the threshold policy otherwise.
pub struct DecisionEngine {
    policy: PolicyConfig,
    demo: Option<DemoDirector>,
}

impl DecisionEngine {
    pub fn new(policy: PolicyConfig, demo: Option<DemoDirector>) -> Self {
        if demo.is_some() {
            info!("Demo director active, market policy overridden");
        }
        Self { policy, demo }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn demo_active(&self) -> bool {
        self.demo.is_some()
    }

    pub fn decide(
        &mut self,
        conditions: &MarketConditions,
        state: &AgentLoopState,
        now: DateTime<Utc>,
    ) -> AgentDecision {
        let decision = match self.demo.as_mut() {
            Some(director) => director.decide(state, self.policy.min_deploy_amount, now),
            None => make_decision(
                conditions,
                state.position,
                state.deployed_amount,
                state.vault_balance,
                &self.policy,
            ),
        };
        debug!(decision = %decision, "Decision made");
        decision
    }

    /// Restart any demo cycle.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        if let Some(director) = self.demo.as_mut() {
            director.reset(now);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
