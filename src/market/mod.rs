//! Market data sources.
//!
//! Defines the `PriceFeed` and `GasOracle` traits consumed by the
//! [`scanner::MarketScanner`]. The CoinGecko feed lives in [`coingecko`];
//! the gas oracle is backed by the destination chain RPC in `crate::chain`.

pub mod coingecko;
pub mod scanner;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

pub use scanner::{MarketScanner, VolatilityScenario};

/// One observation of the reference asset.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    /// Spot price in USD
    pub price: f64,
    /// 24h change in percent
    pub change_24h: f64,
    /// 24h traded volume in USD
    pub volume_24h: Decimal,
}

impl PriceQuote {
    /// A quote is usable only when the price is a positive real number.
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0 && self.change_24h.is_finite()
    }
}

/// Source of reference-asset price, 24h change and volume.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Human-readable source name for logs.
    fn name(&self) -> &'static str;

    async fn fetch_quote(&self) -> Result<PriceQuote>;
}

/// Source of the destination chain's gas price.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GasOracle: Send + Sync {
    async fn gas_price_gwei(&self) -> Result<f64>;
}
