//! External collaborators
//!
//! The order core talks to the payment gateway, the installment subsystem,
//! the cart and the per-user coupon policy through these seams. Wire
//! protocols stay behind the traits; the core only sees the refund
//! request/response shapes.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::ServiceResult;
use shared::models::CouponCode;
use std::collections::HashSet;

/// Refund call against a gateway
#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    /// The original order number
    pub order_no: String,
    /// Refund amount in currency units
    pub amount: Decimal,
    /// Fresh refund reference, distinguishable from order numbers
    pub refund_no: String,
}

/// Gateway refund response. A present `sub_code` means the gateway
/// accepted the call but reports the refund itself failed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefundResponse {
    pub sub_code: Option<String>,
}

/// Third-party payment gateway (alipay-style synchronous refunds)
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn refund(&self, req: &RefundRequest) -> ServiceResult<RefundResponse>;
}

/// Installment financing subsystem. Refunds against it are resolved
/// asynchronously by the queue worker.
#[async_trait]
pub trait InstallmentGateway: Send + Sync {
    async fn refund(&self, req: &RefundRequest) -> ServiceResult<RefundResponse>;
}

/// Shopping cart service: purchased SKUs are removed at placement time
pub trait CartService: Send + Sync {
    fn remove(&self, user_id: &str, sku_ids: &[String]) -> ServiceResult<()>;
}

/// Per-user coupon usage policy (e.g. "one use per user"). Returns a
/// human-readable rejection reason.
pub trait CouponUsagePolicy: Send + Sync {
    fn check(&self, user_id: &str, coupon: &CouponCode) -> Result<(), String>;
}

/// Default policy: no per-user restriction
pub struct UnrestrictedUsage;

impl CouponUsagePolicy for UnrestrictedUsage {
    fn check(&self, _user_id: &str, _coupon: &CouponCode) -> Result<(), String> {
        Ok(())
    }
}

/// In-memory cart, keyed by user id
#[derive(Default)]
pub struct MemoryCart {
    items: DashMap<String, HashSet<String>>,
}

impl MemoryCart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user_id: &str, sku_id: &str) {
        self.items
            .entry(user_id.to_string())
            .or_default()
            .insert(sku_id.to_string());
    }

    pub fn contains(&self, user_id: &str, sku_id: &str) -> bool {
        self.items
            .get(user_id)
            .map(|set| set.contains(sku_id))
            .unwrap_or(false)
    }
}

impl CartService for MemoryCart {
    fn remove(&self, user_id: &str, sku_ids: &[String]) -> ServiceResult<()> {
        if let Some(mut set) = self.items.get_mut(user_id) {
            for sku_id in sku_ids {
                set.remove(sku_id);
            }
        }
        Ok(())
    }
}

mod http;
pub use http::HttpPaymentGateway;
