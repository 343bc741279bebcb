//! Coupon Code Model
//!
//! Discount math lives on the model; eligibility checks and the
//! compare-and-increment usage counter live in the server's coupon module
//! because they need the current time, the user policy and a write txn.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Monetary rounding: 2 decimal places, half-up
const DECIMAL_PLACES: u32 = 2;

/// Discount type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    FixedAmount,
    Percentage,
}

/// A discount instrument. `used <= total` at all times; the counter is only
/// ever moved through the atomic compare-and-increment in the coupon module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponCode {
    pub code: String,
    pub name: String,
    pub discount_type: DiscountType,
    /// Currency amount for FIXED_AMOUNT, percentage points for PERCENTAGE
    pub value: Decimal,
    /// Usage cap
    pub total: u64,
    pub used: u64,
    /// Minimum order amount required to apply the coupon
    pub min_amount: Decimal,
    pub not_before: Option<i64>,
    pub not_after: Option<i64>,
    pub enabled: bool,
}

impl CouponCode {
    /// Apply the discount to an order amount.
    ///
    /// FIXED_AMOUNT subtracts `value`, never going below zero. PERCENTAGE
    /// keeps `(100 - value)%` of the amount, rounded half-up to the
    /// currency's minor unit.
    pub fn adjusted_price(&self, amount: Decimal) -> Decimal {
        match self.discount_type {
            DiscountType::FixedAmount => (amount - self.value).max(Decimal::ZERO),
            DiscountType::Percentage => (amount * (Decimal::ONE_HUNDRED - self.value)
                / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero),
        }
    }

    /// Human-readable description of the discount, used in logs
    pub fn description(&self) -> String {
        match self.discount_type {
            DiscountType::FixedAmount => format!("{} off", self.value),
            DiscountType::Percentage => format!("{}% off", self.value),
        }
    }
}
