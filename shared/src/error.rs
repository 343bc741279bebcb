//! Unified Error Handling
//!
//! One error taxonomy for the whole order core. The user-facing variants
//! (`OutOfStock`, `CouponUnavailable`) abort the enclosing transaction and
//! carry a reason that is safe to show to the end user; `InternalInconsistency`
//! indicates a data-integrity violation and is never surfaced verbatim.

/// Application-level error type
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    // ========== User-facing Errors ==========
    /// Insufficient inventory at decrement time. Aborts the placement txn.
    #[error("out of stock: {0}")]
    OutOfStock(String),

    /// Any coupon rule violation, with a human-readable reason.
    #[error("coupon unavailable: {0}")]
    CouponUnavailable(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    // ========== System Errors ==========
    /// Invariant violation (e.g. a paid order with no payment method).
    /// Logged with full context, fatal to the current operation only.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// Operation the data model allows but no backend handles yet.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Whether the error is safe to show to an end user as-is.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ServiceError::OutOfStock(_)
                | ServiceError::CouponUnavailable(_)
                | ServiceError::NotFound(_)
                | ServiceError::Invalid(_)
        )
    }

    /// Stable machine-readable code, used in logs and API envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::OutOfStock(_) => "E1001",
            ServiceError::CouponUnavailable(_) => "E1002",
            ServiceError::NotFound(_) => "E0003",
            ServiceError::Invalid(_) => "E0002",
            ServiceError::InternalInconsistency(_) => "E9001",
            ServiceError::Unsupported(_) => "E9003",
            ServiceError::Gateway(_) => "E9004",
            ServiceError::Storage(_) => "E9002",
        }
    }
}
