//! Conversions between human USDC amounts and raw on-chain units.

use alloy::primitives::{Address, FixedBytes, U256};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::ChainError;

/// USDC uses 6 decimals on every chain we touch.
pub const USDC_DECIMALS: u32 = 6;

/// Convert a USDC amount to raw units, truncating sub-unit dust.
pub fn to_units(amount: Decimal) -> Result<U256, ChainError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ChainError::InvalidAmount(amount.to_string()));
    }
    let scaled = (amount * Decimal::from(10u64.pow(USDC_DECIMALS))).trunc();
    let raw = scaled
        .to_u128()
        .ok_or_else(|| ChainError::InvalidAmount(amount.to_string()))?;
    Ok(U256::from(raw))
}

/// Convert raw units back to a USDC amount.
pub fn from_units(raw: U256) -> Result<Decimal, ChainError> {
    let value = u128::try_from(raw).map_err(|_| ChainError::InvalidAmount(raw.to_string()))?;
    let value = i128::try_from(value).map_err(|_| ChainError::InvalidAmount(raw.to_string()))?;
    Decimal::try_from_i128_with_scale(value, USDC_DECIMALS)
        .map(|d| d.normalize())
        .map_err(|_| ChainError::InvalidAmount(raw.to_string()))
}

/// Left-pad an address into the `bytes32` recipient format used by the
/// vault's bridge entry point.
pub fn address_to_bytes32(address: Address) -> FixedBytes<32> {
    address.into_word()
}

/// Parse a hex address from config.
pub fn parse_address(value: &str) -> Result<Address, ChainError> {
    value
        .parse::<Address>()
        .map_err(|_| ChainError::InvalidAddress(value.to_string()))
}
