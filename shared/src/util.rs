//! Small shared utilities: clock and reference-number generation.

use chrono::Utc;

/// Current time as epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current date as `YYYYMMDD`, used as the order-number prefix
pub fn today_compact() -> String {
    Utc::now().format("%Y%m%d").to_string()
}

/// Generate a refund reference number.
///
/// Prefixed with `R` so a refund reference can never collide with an order
/// number (those are all-digit).
pub fn new_refund_no() -> String {
    format!("R{}", uuid::Uuid::new_v4().simple())
}
