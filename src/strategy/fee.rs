//! Hook fee policy.
//!
//! Two ways to pick the pool fee while capital is deployed:
//! - `bucket_fee`: fixed fee per volatility bucket.
//! - `optimal_fee`: bucket fee nudged up for heavy volume or large moves,
//!   down for thin volume, then clamped.
//!
//! All values are basis points. Conversion to the hook's native units
//! happens at the contract boundary.

use crate::config::{FeeMode, PolicyConfig};
use crate::types::{MarketConditions, VolatilityLevel};

/// Fixed fee for a volatility bucket.
pub fn bucket_fee(level: VolatilityLevel, policy: &PolicyConfig) -> u32 {
    match level {
        VolatilityLevel::Low => policy.fees.low,
        VolatilityLevel::Medium => policy.fees.medium,
        VolatilityLevel::High => policy.fees.high,
        VolatilityLevel::Extreme => policy.fees.extreme,
    }
}

/// Bucket fee adjusted for volume and price movement.
pub fn optimal_fee(conditions: &MarketConditions, policy: &PolicyConfig) -> u32 {
    let adaptive = &policy.adaptive;
    let mut fee = bucket_fee(conditions.volatility, policy) as i64;

    if conditions.volume_24h > adaptive.high_volume {
        fee += adaptive.high_volume_premium_bps as i64;
    } else if conditions.volume_24h < adaptive.low_volume {
        fee -= adaptive.low_volume_discount_bps as i64;
    }

    if conditions.price_change_24h.abs() > adaptive.large_move_pct {
        fee += adaptive.large_move_premium_bps as i64;
    }

    fee.clamp(adaptive.min_fee_bps as i64, adaptive.max_fee_bps as i64) as u32
}

/// Fee for an ADJUST_FEE decision under the configured mode.
pub fn target_fee(conditions: &MarketConditions, policy: &PolicyConfig) -> u32 {
    match policy.fee_mode {
        FeeMode::Bucket => bucket_fee(conditions.volatility, policy),
        FeeMode::Adaptive => optimal_fee(conditions, policy),
    }
}
