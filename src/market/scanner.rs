//! Market scanner — turns raw price/gas observations into a
//! [`MarketConditions`] snapshot once per iteration.
//!
//! Keeps a bounded rolling window of prices and derives a 0–100 volatility
//! index from the population standard deviation of step returns plus a
//! bounded bump for the 24h move. `scan()` never fails: upstream errors
//! fall back to the last good snapshot or a neutral default.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{GasOracle, PriceFeed};
use crate::config::ScannerConfig;
use crate::types::{MarketConditions, VolatilityLevel};

/// Step-return standard deviation that maps to a full 100 on the index.
const STD_DEV_FULL_SCALE: f64 = 0.05;
/// Cap on the 24h-move contribution when a price window exists.
const CHANGE_BUMP_CAP: f64 = 30.0;
/// Index reported by the neutral fallback.
const FALLBACK_INDEX: f64 = 35.0;

// ---------------------------------------------------------------------------
// Volatility index
// ---------------------------------------------------------------------------

/// Compute the volatility index for a price window and the 24h change.
///
/// With at least two prices: `min(100, min(100, σ/0.05·100) + min(30, |Δ|·3))`
/// where σ is the population std-dev of step returns. With fewer:
/// `min(100, |Δ|·5)`.
pub fn volatility_index(prices: &[f64], change_24h: f64) -> f64 {
    let change = if change_24h.is_finite() { change_24h.abs() } else { 0.0 };

    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();

    if prices.len() < 2 || returns.is_empty() {
        return (change * 5.0).min(100.0);
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let base = (std_dev / STD_DEV_FULL_SCALE * 100.0).min(100.0);
    let bump = (change * 3.0).min(CHANGE_BUMP_CAP);
    (base + bump).min(100.0)
}

// ---------------------------------------------------------------------------
// Injected scenarios
// ---------------------------------------------------------------------------

/// Canned market regimes injected by the control API. Each applies to
/// exactly one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityScenario {
    Low,
    High,
    Extreme,
}

impl VolatilityScenario {
    pub fn level(&self) -> VolatilityLevel {
        match self {
            VolatilityScenario::Low => VolatilityLevel::Low,
            VolatilityScenario::High => VolatilityLevel::High,
            VolatilityScenario::Extreme => VolatilityLevel::Extreme,
        }
    }

    fn index(&self) -> f64 {
        match self {
            VolatilityScenario::Low => 12.0,
            VolatilityScenario::High => 65.0,
            VolatilityScenario::Extreme => 100.0,
        }
    }

    fn change_24h(&self) -> f64 {
        match self {
            VolatilityScenario::Low => 1.2,
            VolatilityScenario::High => -8.5,
            VolatilityScenario::Extreme => -12.0,
        }
    }

    /// Overlay this scenario on a real snapshot.
    pub fn apply(&self, conditions: MarketConditions) -> MarketConditions {
        MarketConditions {
            volatility: self.level(),
            volatility_index: self.index(),
            price_change_24h: self.change_24h(),
            ..conditions
        }
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct MarketScanner {
    feed: Arc<dyn PriceFeed>,
    gas: Arc<dyn GasOracle>,
    config: ScannerConfig,
    window: VecDeque<f64>,
    last_good: Option<MarketConditions>,
    last_gas: Option<f64>,
    last_fetch: Option<DateTime<Utc>>,
    scenario: Option<VolatilityScenario>,
}

impl MarketScanner {
    pub fn new(feed: Arc<dyn PriceFeed>, gas: Arc<dyn GasOracle>, config: ScannerConfig) -> Self {
        Self {
            feed,
            gas,
            window: VecDeque::with_capacity(config.window_size),
            config,
            last_good: None,
            last_gas: None,
            last_fetch: None,
            scenario: None,
        }
    }

    /// Produce the market snapshot as of `now`. Within the cooldown the
    /// feed is not called, whether or not the last fetch succeeded.
    pub async fn scan(&mut self, now: DateTime<Utc>) -> MarketConditions {
        let conditions = if self.cooling_down(now) {
            debug!("Within price cooldown, reusing last observation");
            self.fallback(now)
        } else {
            self.refresh(now).await
        };

        match self.scenario.take() {
            Some(scenario) => {
                info!(volatility = %scenario.level(), "Applying injected volatility scenario");
                scenario.apply(conditions)
            }
            None => conditions,
        }
    }

    /// Override the volatility of the next scan only.
    pub fn inject(&mut self, scenario: VolatilityScenario) {
        self.scenario = Some(scenario);
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn last_good(&self) -> Option<&MarketConditions> {
        self.last_good.as_ref()
    }

    fn cooling_down(&self, now: DateTime<Utc>) -> bool {
        let cooldown = Duration::seconds(self.config.cooldown_secs.min(i64::MAX as u64) as i64);
        self.last_fetch
            .is_some_and(|fetched_at| now - fetched_at < cooldown)
    }

    async fn refresh(&mut self, now: DateTime<Utc>) -> MarketConditions {
        self.last_fetch = Some(now);

        let quote = match self.feed.fetch_quote().await {
            Ok(quote) if quote.is_valid() => quote,
            Ok(quote) => {
                warn!(
                    source = self.feed.name(),
                    price = quote.price,
                    "Discarding invalid price quote, using fallback conditions"
                );
                return self.fallback(now);
            }
            Err(e) => {
                warn!(
                    source = self.feed.name(),
                    error = %e,
                    "Price feed unavailable, using fallback conditions"
                );
                return self.fallback(now);
            }
        };

        self.push_price(quote.price);
        let gas_price_gwei = self.read_gas().await;
        let index = self.current_index(quote.change_24h);

        let conditions = MarketConditions {
            volatility: VolatilityLevel::from_index(index),
            volatility_index: index,
            eth_price: quote.price,
            volume_24h: quote.volume_24h,
            price_change_24h: quote.change_24h,
            gas_price_gwei,
            timestamp: now,
        };

        debug!(
            samples = self.window.len(),
            index = format!("{index:.1}"),
            "Market scan complete"
        );
        self.last_good = Some(conditions.clone());
        conditions
    }

    async fn read_gas(&mut self) -> f64 {
        match self.gas.gas_price_gwei().await {
            Ok(gwei) if gwei.is_finite() && gwei >= 0.0 => {
                self.last_gas = Some(gwei);
                gwei
            }
            Ok(gwei) => {
                warn!(gwei, "Ignoring nonsensical gas price");
                self.last_gas.unwrap_or(self.config.fallback_gas_gwei)
            }
            Err(e) => {
                warn!(error = %e, "Gas price read failed");
                self.last_gas.unwrap_or(self.config.fallback_gas_gwei)
            }
        }
    }

    fn push_price(&mut self, price: f64) {
        while self.window.len() >= self.config.window_size {
            self.window.pop_front();
        }
        self.window.push_back(price);
    }

    fn current_index(&self, change_24h: f64) -> f64 {
        let prices: Vec<f64> = self.window.iter().copied().collect();
        volatility_index(&prices, change_24h)
    }

    /// Last good snapshot with the window's volatility and a fresh timestamp.
    fn resynthesize(&self, last: &MarketConditions, now: DateTime<Utc>) -> MarketConditions {
        let index = self.current_index(last.price_change_24h);
        MarketConditions {
            volatility: VolatilityLevel::from_index(index),
            volatility_index: index,
            timestamp: now,
            ..last.clone()
        }
    }

    fn fallback(&self, now: DateTime<Utc>) -> MarketConditions {
        if let Some(last) = &self.last_good {
            return self.resynthesize(last, now);
        }
        MarketConditions {
            volatility: VolatilityLevel::Medium,
            volatility_index: FALLBACK_INDEX,
            eth_price: self.window.back().copied().unwrap_or(self.config.fallback_price),
            volume_24h: self.config.fallback_volume,
            price_change_24h: 0.0,
            gas_price_gwei: self.last_gas.unwrap_or(self.config.fallback_gas_gwei),
            timestamp: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
