//! Demo director — overrides the market policy for presentations.
//!
//! Two modes:
//! - **Forced action**: deploy (or withdraw) whenever the position allows it,
//!   hold otherwise.
//! - **Auto-cycle**: DEPLOY → FARMING → WITHDRAW → SAFE → DEPLOY …, with
//!   FARMING and SAFE held for a configured duration.
//!
//! Time is passed in explicitly so the cycle can be driven in tests.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::config::DemoConfig;
use crate::types::{Action, AgentDecision, AgentLoopState, Position};

/// Action forced on every iteration in demo mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForcedAction {
    Deploy,
    Withdraw,
}

impl std::str::FromStr for ForcedAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deploy" => Ok(ForcedAction::Deploy),
            "withdraw" => Ok(ForcedAction::Withdraw),
            _ => Err(anyhow::anyhow!("Unknown forced action: {s} (expected deploy|withdraw)")),
        }
    }
}

/// Stage of the demo auto-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStage {
    Deploy,
    Farming,
    Withdraw,
    Safe,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleStage::Deploy => "DEPLOY",
            CycleStage::Farming => "FARMING",
            CycleStage::Withdraw => "WITHDRAW",
            CycleStage::Safe => "SAFE",
        };
        write!(f, "{s}")
    }
}

pub struct DemoDirector {
    force: Option<ForcedAction>,
    auto_cycle: bool,
    farming: Duration,
    safe: Duration,
    stage: CycleStage,
    stage_started: DateTime<Utc>,
}

impl DemoDirector {
    /// Build a director from config, or `None` when demo mode is off.
    pub fn from_config(config: &DemoConfig, now: DateTime<Utc>) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self {
            force: config.force_action,
            auto_cycle: config.auto_cycle,
            farming: Duration::seconds(config.farming_secs as i64),
            safe: Duration::seconds(config.safe_secs as i64),
            stage: CycleStage::Deploy,
            stage_started: now,
        })
    }

    pub fn stage(&self) -> CycleStage {
        self.stage
    }

    /// Restart the cycle from DEPLOY.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.stage = CycleStage::Deploy;
        self.stage_started = now;
    }

    /// Decide this iteration's action.
    pub fn decide(
        &mut self,
        state: &AgentLoopState,
        min_deploy: Decimal,
        now: DateTime<Utc>,
    ) -> AgentDecision {
        if let Some(force) = self.force {
            return Self::forced(force, state, min_deploy);
        }
        if self.auto_cycle {
            return self.cycle(state, min_deploy, now);
        }
        AgentDecision::hold("DEMO: No action specified", 1.0)
    }

    fn forced(force: ForcedAction, state: &AgentLoopState, min_deploy: Decimal) -> AgentDecision {
        match (force, state.position) {
            (ForcedAction::Deploy, Position::Base) => {
                AgentDecision::hold("DEMO: Already deployed on Base", 1.0)
            }
            (ForcedAction::Deploy, Position::Arc) => {
                let amount = state.vault_balance.floor();
                if amount < min_deploy {
                    return AgentDecision::hold(
                        format!("DEMO: Vault balance ${:.2} below deploy minimum", state.vault_balance),
                        1.0,
                    );
                }
                AgentDecision::new(Action::Deploy { amount }, "DEMO: Manual override - DEPLOY forced", 1.0)
            }
            (ForcedAction::Withdraw, Position::Arc) => {
                AgentDecision::hold("DEMO: Already safe on Arc", 1.0)
            }
            (ForcedAction::Withdraw, Position::Base) => {
                AgentDecision::new(Action::Withdraw, "DEMO: Manual override - WITHDRAW forced", 1.0)
            }
        }
    }

    fn advance(&mut self, stage: CycleStage, now: DateTime<Utc>) {
        info!(from = %self.stage, to = %stage, "Demo cycle advancing");
        self.stage = stage;
        self.stage_started = now;
    }

    fn cycle(&mut self, state: &AgentLoopState, min_deploy: Decimal, now: DateTime<Utc>) -> AgentDecision {
        let elapsed = now - self.stage_started;

        match self.stage {
            CycleStage::Deploy => {
                let amount = state.vault_balance.floor();
                if state.position == Position::Arc && amount >= min_deploy {
                    return AgentDecision::new(
                        Action::Deploy { amount },
                        "DEMO CYCLE: Deploying to Base for yield",
                        1.0,
                    );
                }
                self.advance(CycleStage::Farming, now);
                AgentDecision::hold("DEMO CYCLE: Now farming on Base", 1.0)
            }
            CycleStage::Farming => {
                let left = (self.farming - elapsed).num_seconds().max(0);
                if elapsed > self.farming {
                    self.advance(CycleStage::Withdraw, now);
                }
                AgentDecision::hold(format!("DEMO CYCLE: Farming on Base ({left}s left)"), 1.0)
            }
            CycleStage::Withdraw => {
                if state.position == Position::Base {
                    return AgentDecision::new(
                        Action::Withdraw,
                        "DEMO CYCLE: Returning to Arc safe harbor",
                        1.0,
                    );
                }
                self.advance(CycleStage::Safe, now);
                AgentDecision::hold("DEMO CYCLE: Safe on Arc", 1.0)
            }
            CycleStage::Safe => {
                let left = (self.safe - elapsed).num_seconds().max(0);
                if elapsed > self.safe {
                    self.advance(CycleStage::Deploy, now);
                }
                AgentDecision::hold(
                    format!("DEMO CYCLE: Resting on Arc ({left}s until next deploy)"),
                    1.0,
                )
            }
        }
    }
}
