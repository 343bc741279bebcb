//! Coupon Validator
//!
//! Eligibility checks run twice during placement: once at the instrument
//! level before the order total is known (`order_amount = None`), and again
//! with the computed total. Usage consumption is a compare-and-increment
//! inside the placement transaction; hitting the cap aborts the whole
//! placement.

use redb::WriteTransaction;
use rust_decimal::Decimal;
use shared::models::CouponCode;
use shared::{ServiceError, ServiceResult};

use crate::db::Store;
use crate::external::CouponUsagePolicy;

/// Validate a coupon for a user, optionally against an order amount.
///
/// Check order: enabled flag, remaining usage, validity window, per-user
/// policy, and (only when `order_amount` is supplied) the minimum order
/// amount. Every failure is a `CouponUnavailable` with the reason.
pub fn check_available(
    coupon: &CouponCode,
    user_id: &str,
    order_amount: Option<Decimal>,
    policy: &dyn CouponUsagePolicy,
    now: i64,
) -> ServiceResult<()> {
    if !coupon.enabled {
        return Err(ServiceError::CouponUnavailable(
            "this coupon does not exist".into(),
        ));
    }
    if coupon.used >= coupon.total {
        return Err(ServiceError::CouponUnavailable(
            "this coupon has been fully redeemed".into(),
        ));
    }
    if let Some(not_before) = coupon.not_before
        && now < not_before
    {
        return Err(ServiceError::CouponUnavailable(
            "this coupon is not active yet".into(),
        ));
    }
    if let Some(not_after) = coupon.not_after
        && now > not_after
    {
        return Err(ServiceError::CouponUnavailable(
            "this coupon has expired".into(),
        ));
    }
    if let Err(reason) = policy.check(user_id, coupon) {
        return Err(ServiceError::CouponUnavailable(reason));
    }
    if let Some(amount) = order_amount
        && amount < coupon.min_amount
    {
        return Err(ServiceError::CouponUnavailable(format!(
            "order amount below the coupon minimum of {}",
            coupon.min_amount
        )));
    }
    Ok(())
}

/// Atomic compare-and-increment of the coupon usage counter.
///
/// For a positive delta, returns `None` when the cap would be exceeded;
/// the caller must abort the enclosing transaction. A negative delta
/// releases usage (order cancellation), saturating at zero. Returns the
/// new `used` value on success.
pub fn change_used(
    store: &Store,
    txn: &WriteTransaction,
    code: &str,
    delta: i64,
) -> ServiceResult<Option<u64>> {
    let mut coupon = store
        .get_coupon_txn(txn, code)?
        .ok_or_else(|| ServiceError::NotFound(format!("coupon {code}")))?;

    if delta >= 0 {
        let wanted = coupon.used + delta as u64;
        if wanted > coupon.total {
            return Ok(None);
        }
        coupon.used = wanted;
    } else {
        coupon.used = coupon.used.saturating_sub(delta.unsigned_abs());
    }
    store.put_coupon(txn, &coupon)?;
    Ok(Some(coupon.used))
}
