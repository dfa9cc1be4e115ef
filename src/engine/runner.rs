//! Runner — drives the agent on a fixed interval and exposes the controls
//! used by the HTTP API.
//!
//! The agent and its working state sit behind one `tokio::sync::Mutex`, so
//! a `step` from the API and a scheduled tick can never overlap. After
//! every iteration the published snapshot is replaced wholesale; readers
//! only ever see complete iterations.

use chrono::Utc;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::info;

use super::agent_loop::AgentLoop;
use crate::market::VolatilityScenario;
use crate::types::AgentLoopState;

struct Inner {
    agent: AgentLoop,
    state: AgentLoopState,
}

pub struct AgentRunner {
    inner: Mutex<Inner>,
    snapshot: RwLock<AgentLoopState>,
    running: AtomicBool,
    initial_balance: Decimal,
    interval: Duration,
}

impl AgentRunner {
    pub fn new(agent: AgentLoop, initial_balance: Decimal, interval: Duration) -> Self {
        let state = AgentLoopState::new(initial_balance);
        Self {
            snapshot: RwLock::new(state.clone()),
            inner: Mutex::new(Inner { agent, state }),
            running: AtomicBool::new(false),
            initial_balance,
            interval,
        }
    }

    /// Cloned view of the state as of the last completed iteration.
    pub async fn snapshot(&self) -> AgentLoopState {
        self.snapshot.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Let scheduled ticks dispatch iterations.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("Agent started");
        }
    }

    /// Stop dispatching. An iteration already running finishes first.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Agent stopped");
        }
    }

    /// Run one iteration now and return the resulting snapshot.
    pub async fn step(&self) -> AgentLoopState {
        let mut inner = self.inner.lock().await;
        let Inner { agent, state } = &mut *inner;
        agent.run_iteration(state).await;
        self.publish(state).await
    }

    /// Stop, and start over from a fresh state. Any tracked bridge is
    /// forgotten; the vault lifecycle reconciles it on the next tick.
    pub async fn reset(&self) -> AgentLoopState {
        self.stop();
        let mut inner = self.inner.lock().await;
        inner.agent.reset(Utc::now());
        inner.state = AgentLoopState::new(self.initial_balance);
        info!(vault_balance = %self.initial_balance, "Agent state reset");
        self.publish(&inner.state).await
    }

    /// Force a volatility scenario into the next scan and run it at once.
    pub async fn simulate(&self, scenario: VolatilityScenario) -> AgentLoopState {
        let mut inner = self.inner.lock().await;
        let Inner { agent, state } = &mut *inner;
        info!(volatility = %scenario.level(), "Simulating volatility");
        agent.inject(scenario);
        agent.run_iteration(state).await;
        self.publish(state).await
    }

    async fn publish(&self, state: &AgentLoopState) -> AgentLoopState {
        let snapshot = state.clone();
        *self.snapshot.write().await = snapshot.clone();
        snapshot
    }

    /// Tick until `shutdown` resolves. Ticks while stopped are skipped.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.interval.as_secs(),
            "Entering main loop. Press Ctrl+C to stop."
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.is_running() {
                        let state = self.step().await;
                        info!(
                            iteration = state.iteration,
                            phase = %state.phase,
                            position = %state.position,
                            "Iteration done"
                        );
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::dry_runner as runner;
    use crate::types::{AgentPhase, Position};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_step_publishes_snapshot() {
        let runner = runner();
        assert_eq!(runner.snapshot().await.iteration, 0);

        let after = runner.step().await;
        assert_eq!(after.iteration, 1);
        assert_eq!(after.position, Position::Base);

        let seen = runner.snapshot().await;
        assert_eq!(seen.iteration, 1);
        assert_eq!(seen.phase, AgentPhase::BridgingToBase);
    }

    #[tokio::test]
    async fn test_start_stop_flag() {
        let runner = runner();
        assert!(!runner.is_running());
        runner.start();
        runner.start();
        assert!(runner.is_running());
        runner.stop();
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_reset_restores_fresh_state() {
        let runner = runner();
        runner.start();
        runner.step().await;
        runner.step().await;

        let fresh = runner.reset().await;
        assert!(!runner.is_running());
        assert_eq!(fresh.iteration, 0);
        assert_eq!(fresh.position, Position::Arc);
        assert_eq!(fresh.vault_balance, dec!(1000));
        assert!(fresh.pending_bridge.is_none());
        assert!(fresh.history.is_empty());
        assert_eq!(runner.snapshot().await.iteration, 0);
    }

    #[tokio::test]
    async fn test_simulate_extreme_trips_breaker() {
        let runner = runner();
        let state = runner.simulate(VolatilityScenario::Extreme).await;
        assert_eq!(state.phase, AgentPhase::CircuitBreaker);
        assert_eq!(state.position, Position::Arc);
    }

    #[tokio::test]
    async fn test_simulated_scenario_lands_on_its_own_tick() {
        let runner = Arc::new(runner());
        let guard = runner.inner.lock().await;

        // Queue a simulate and then a plain step behind the held lock.
        let simulated = tokio::spawn({
            let runner = runner.clone();
            async move { runner.simulate(VolatilityScenario::Extreme).await }
        });
        tokio::task::yield_now().await;
        let stepped = tokio::spawn({
            let runner = runner.clone();
            async move { runner.step().await }
        });
        tokio::task::yield_now().await;
        drop(guard);

        let simulated = simulated.await.unwrap();
        let stepped = stepped.await.unwrap();
        assert_eq!(simulated.iteration, 1);
        assert_eq!(simulated.history.latest().unwrap().action, "EMERGENCY_EXIT");
        assert_eq!(stepped.iteration, 2);
        assert_eq!(stepped.history.latest().unwrap().action, "HOLD");
    }

    #[tokio::test]
    async fn test_run_until_skips_ticks_while_stopped() {
        let runner = runner();
        runner
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;
        assert_eq!(runner.snapshot().await.iteration, 0);

        runner.start();
        runner
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;
        assert!(runner.snapshot().await.iteration >= 1);
    }
}
