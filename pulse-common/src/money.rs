//! Fee-split arithmetic
//!
//! All amounts are integer paise. Basis points (bps) express percentages:
//! 10 000 bps = 100%.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Basis points in 100%
pub const BPS_DENOMINATOR: i64 = 10_000;

/// Currency code used for every order
pub const CURRENCY: &str = "INR";

/// Breakdown of an order amount into platform, gateway and consultant shares
///
/// `platform_fee + gateway_fee + consultant_payout == amount` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub amount: i64,
    pub platform_fee: i64,
    pub gateway_fee: i64,
    pub consultant_payout: i64,
}

/// Integer division rounding halves away from zero (inputs are non-negative)
fn div_round_half_up(numerator: i128, denominator: i128) -> i128 {
    (numerator + denominator / 2) / denominator
}

/// Price of a slot: hourly rate prorated to the slot length
///
/// ```
/// use pulse_common::money::slot_amount;
///
/// // 90 minutes at 2000.00 INR/h
/// assert_eq!(slot_amount(200_000, 90).unwrap(), 300_000);
/// ```
pub fn slot_amount(hourly_rate_paise: i64, slot_minutes: i64) -> Result<i64> {
    if hourly_rate_paise <= 0 {
        return Err(Error::InvalidInput(
            "Consultant has no hourly rate configured".to_string(),
        ));
    }
    if slot_minutes <= 0 {
        return Err(Error::InvalidInput("Slot length must be positive".to_string()));
    }

    let amount = div_round_half_up(hourly_rate_paise as i128 * slot_minutes as i128, 60);
    i64::try_from(amount).map_err(|_| Error::InvalidInput("Amount overflow".to_string()))
}

impl FeeSplit {
    /// Split `amount` using platform and gateway fee rates in basis points
    ///
    /// Fails when the rates together exceed 100% or the amount is not positive.
    pub fn compute(amount: i64, platform_fee_bps: i64, gateway_fee_bps: i64) -> Result<Self> {
        if amount <= 0 {
            return Err(Error::InvalidInput("Amount must be positive".to_string()));
        }
        if platform_fee_bps < 0
            || gateway_fee_bps < 0
            || platform_fee_bps + gateway_fee_bps > BPS_DENOMINATOR
        {
            return Err(Error::Config(format!(
                "Invalid fee rates: platform={}bps gateway={}bps",
                platform_fee_bps, gateway_fee_bps
            )));
        }

        let platform_fee = div_round_half_up(
            amount as i128 * platform_fee_bps as i128,
            BPS_DENOMINATOR as i128,
        ) as i64;
        let gateway_fee = div_round_half_up(
            amount as i128 * gateway_fee_bps as i128,
            BPS_DENOMINATOR as i128,
        ) as i64;

        // Independent rounding can push the fees one paisa past the amount at 100%
        let gateway_fee = gateway_fee.min(amount - platform_fee);
        let consultant_payout = amount - platform_fee - gateway_fee;

        Ok(Self {
            amount,
            platform_fee,
            gateway_fee,
            consultant_payout,
        })
    }
}
