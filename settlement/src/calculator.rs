//! Reward Calculator
//!
//! Pure arithmetic over purchase, transfer and redemption inputs. No I/O.
//!
//! # Economics
//!
//! Credits carry 9 fractional digits and 1 whole credit is pegged to 1000
//! minor currency units, so 1 minor currency unit of reward equals 10^6
//! smallest credit units.
//!
//! The reward computation floors twice, first in currency space and then
//! converts to credit units:
//!
//! ```text
//! redeemed_value = (redeemed_units / 10^9) * 1000
//! total_value    = fiat_amount + redeemed_value
//! reward_value   = floor(total_value * rate_bps / 10000)
//! reward_units   = reward_value * 10^6
//! ```
//!
//! The two-stage order is part of the numeric contract: flooring in currency
//! space first can drop fractional rewards that a single combined floor in
//! unit space would keep. Settled records depend on this exact sequence.

use crate::error::{SettlementError, SettlementResult};
use crate::types::AccountId;

/// Smallest credit units per whole credit (9 fractional digits)
pub const UNITS_PER_TOKEN: u64 = 1_000_000_000;

/// Minor currency units per whole credit
pub const FIAT_PER_TOKEN: u64 = 1_000;

/// Smallest credit units per minor currency unit of reward
pub const UNITS_PER_FIAT: u64 = 1_000_000;

/// Basis point denominator
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Maximum cashback or discount rate (100%)
pub const MAX_RATE_BPS: u16 = 10_000;

/// Maximum fiat amount per purchase, minor currency units
pub const MAX_PURCHASE_FIAT: u64 = 1_000_000_000;

/// Maximum credits per transfer, smallest units (10,000 whole credits)
pub const MAX_TRANSFER_UNITS: u64 = 10_000 * UNITS_PER_TOKEN;

/// Maximum credits per redemption, smallest units
pub const MAX_REDEMPTION_UNITS: u64 = 10_000 * UNITS_PER_TOKEN;

/// Maximum transfer memo length in bytes
pub const MAX_MEMO_BYTES: usize = 64;

/// Maximum merchant name length in bytes
pub const MAX_NAME_BYTES: usize = 32;

/// Maximum merchant category length in bytes
pub const MAX_CATEGORY_BYTES: usize = 16;

/// Computed economic outcome of a purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseValue {
    /// Currency value of the redeemed credits
    pub redeemed_value: u64,
    /// Total economic value, minor currency units
    pub total_value: u64,
    /// Reward in minor currency units (currency-space floor)
    pub reward_value: u64,
    /// Reward in smallest credit units
    pub reward_units: u64,
}

/// Compute the economic outcome of a purchase.
///
/// Deterministic; the only rounding is the two explicit floors described in
/// the module docs.
pub fn purchase_value(
    fiat_amount: u64,
    redeemed_token_amount: u64,
    cashback_rate_bps: u16,
) -> SettlementResult<PurchaseValue> {
    if cashback_rate_bps > MAX_RATE_BPS {
        return Err(SettlementError::Validation(format!(
            "cashback rate {} exceeds {} bps",
            cashback_rate_bps, MAX_RATE_BPS
        )));
    }
    if fiat_amount == 0 && redeemed_token_amount == 0 {
        return Err(SettlementError::Validation(
            "purchase must have positive economic value".to_string(),
        ));
    }
    if fiat_amount > MAX_PURCHASE_FIAT {
        return Err(SettlementError::Validation(format!(
            "fiat amount {} exceeds maximum {}",
            fiat_amount, MAX_PURCHASE_FIAT
        )));
    }

    // Whole-credit granularity: divide before converting to currency.
    let redeemed_value = (redeemed_token_amount / UNITS_PER_TOKEN)
        .checked_mul(FIAT_PER_TOKEN)
        .ok_or(SettlementError::ArithmeticOverflow)?;

    let total_value = fiat_amount
        .checked_add(redeemed_value)
        .ok_or(SettlementError::ArithmeticOverflow)?;

    // Stage one: floor in currency space.
    let reward_value = u64::try_from(
        (total_value as u128) * (cashback_rate_bps as u128) / (BPS_DENOMINATOR as u128),
    )
    .map_err(|_| SettlementError::ArithmeticOverflow)?;

    // Stage two: convert currency reward to credit units.
    let reward_units = reward_value
        .checked_mul(UNITS_PER_FIAT)
        .ok_or(SettlementError::ArithmeticOverflow)?;

    Ok(PurchaseValue {
        redeemed_value,
        total_value,
        reward_value,
        reward_units,
    })
}

/// Validate peer-to-peer transfer inputs.
pub fn validate_transfer(
    sender: &AccountId,
    recipient: &AccountId,
    amount: u64,
    memo: &str,
) -> SettlementResult<()> {
    if amount == 0 {
        return Err(SettlementError::Validation(
            "transfer amount cannot be zero".to_string(),
        ));
    }
    if amount > MAX_TRANSFER_UNITS {
        return Err(SettlementError::Validation(format!(
            "transfer amount {} exceeds maximum {}",
            amount, MAX_TRANSFER_UNITS
        )));
    }
    if memo.len() > MAX_MEMO_BYTES {
        return Err(SettlementError::Validation(format!(
            "memo exceeds {} bytes",
            MAX_MEMO_BYTES
        )));
    }
    if sender == recipient {
        return Err(SettlementError::Validation(
            "cannot transfer to the same account".to_string(),
        ));
    }
    Ok(())
}

/// Validate in-store redemption inputs.
pub fn validate_redemption(
    token_amount: u64,
    fiat_value: u64,
    discount_rate_bps: u16,
) -> SettlementResult<()> {
    if token_amount == 0 {
        return Err(SettlementError::Validation(
            "redemption amount cannot be zero".to_string(),
        ));
    }
    if token_amount > MAX_REDEMPTION_UNITS {
        return Err(SettlementError::Validation(format!(
            "redemption amount {} exceeds maximum {}",
            token_amount, MAX_REDEMPTION_UNITS
        )));
    }
    if discount_rate_bps > MAX_RATE_BPS {
        return Err(SettlementError::Validation(format!(
            "discount rate {} exceeds {} bps",
            discount_rate_bps, MAX_RATE_BPS
        )));
    }
    if fiat_value == 0 {
        return Err(SettlementError::Validation(
            "redemption fiat value cannot be zero".to_string(),
        ));
    }
    Ok(())
}

/// Validate merchant registration or settings inputs.
pub fn validate_merchant_profile(
    name: &str,
    category: &str,
    cashback_rate_bps: u16,
) -> SettlementResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_BYTES {
        return Err(SettlementError::Validation(format!(
            "merchant name must be 1-{} bytes",
            MAX_NAME_BYTES
        )));
    }
    if category.is_empty() || category.len() > MAX_CATEGORY_BYTES {
        return Err(SettlementError::Validation(format!(
            "merchant category must be 1-{} bytes",
            MAX_CATEGORY_BYTES
        )));
    }
    if cashback_rate_bps > MAX_RATE_BPS {
        return Err(SettlementError::Validation(format!(
            "cashback rate {} exceeds {} bps",
            cashback_rate_bps, MAX_RATE_BPS
        )));
    }
    Ok(())
}
