//! Order service: placement, payment/review mutations, refunds, closure
//!
//! The service owns the store handle and the collaborator seams. All
//! placement entry points share one structural pattern: everything that
//! must be atomic runs inside a single [`Store::with_txn`] scope, and the
//! deferred closer is scheduled strictly after that transaction commits.
//!
//! Order state machine:
//!
//! ```text
//! CREATED ──(payment callback)──> PAID ──(review)──> REVIEWED
//!    │                             │
//!    └──(timeout, unpaid)──> CLOSED└──(refund)──> PENDING/PROCESSING ──> SUCCESS | FAILED
//! ```

pub mod closer;
pub mod placement;
pub mod refund;

use rust_decimal::Decimal;
use shared::models::{Order, PaymentMethod};
use shared::{ServiceError, ServiceResult};
use std::sync::Arc;

use crate::db::Store;
use crate::external::{CartService, CouponUsagePolicy, MemoryCart, PaymentGateway, UnrestrictedUsage};
use crate::inventory::SeckillGate;
use crate::queue::{Task, TaskQueue};

/// Default TTL before an unpaid order is auto-closed
pub const DEFAULT_ORDER_TTL_SECS: u64 = 1800;
/// Seckill orders close much faster to recycle contended stock
pub const DEFAULT_SECKILL_ORDER_TTL_SECS: u64 = 300;

/// One requested line of a normal order
#[derive(Debug, Clone)]
pub struct OrderItemInput {
    pub sku_id: String,
    pub amount: u32,
}

/// One review of a purchased item
#[derive(Debug, Clone)]
pub struct ReviewInput {
    pub sku_id: String,
    /// 1..=5
    pub rating: u8,
    pub content: String,
}

pub struct OrderService {
    store: Store,
    queue: TaskQueue,
    gate: Arc<SeckillGate>,
    gateway: Arc<dyn PaymentGateway>,
    cart: Arc<dyn CartService>,
    coupon_policy: Arc<dyn CouponUsagePolicy>,
    order_ttl_secs: u64,
    seckill_order_ttl_secs: u64,
}

impl OrderService {
    pub fn new(store: Store, gateway: Arc<dyn PaymentGateway>) -> Self {
        let queue = TaskQueue::new(store.clone());
        Self {
            store,
            queue,
            gate: Arc::new(SeckillGate::new()),
            gateway,
            cart: Arc::new(MemoryCart::new()),
            coupon_policy: Arc::new(UnrestrictedUsage),
            order_ttl_secs: DEFAULT_ORDER_TTL_SECS,
            seckill_order_ttl_secs: DEFAULT_SECKILL_ORDER_TTL_SECS,
        }
    }

    pub fn set_cart(&mut self, cart: Arc<dyn CartService>) {
        self.cart = cart;
    }

    pub fn set_coupon_policy(&mut self, policy: Arc<dyn CouponUsagePolicy>) {
        self.coupon_policy = policy;
    }

    pub fn set_ttls(&mut self, order_ttl_secs: u64, seckill_order_ttl_secs: u64) {
        self.order_ttl_secs = order_ttl_secs;
        self.seckill_order_ttl_secs = seckill_order_ttl_secs;
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn seckill_gate(&self) -> &SeckillGate {
        &self.gate
    }

    /// Payment-callback mutation: mark the order paid.
    ///
    /// Triggers the sold-count reactor. Rejected for closed or already-paid
    /// orders; the closer's fire-time check handles the race the other way.
    pub fn mark_paid(&self, order_no: &str, method: PaymentMethod) -> ServiceResult<Order> {
        let now = shared::util::now_millis();
        let order = self.store.with_txn(|txn| {
            let mut order = self
                .store
                .get_order_txn(txn, order_no)?
                .ok_or_else(|| ServiceError::NotFound(format!("order {order_no}")))?;
            if order.closed {
                return Err(ServiceError::Invalid("order already closed".into()));
            }
            if order.is_paid() {
                return Err(ServiceError::Invalid("order already paid".into()));
            }
            order.paid_at = Some(now);
            order.payment_method = Some(method);
            self.store.put_order(txn, &order)?;
            Ok(order)
        })?;

        self.queue.enqueue(
            Task::UpdateSoldCount {
                order_no: order.no.clone(),
            },
            0,
        )?;
        tracing::info!(order_no = %order.no, method = %method, "Order paid");
        Ok(order)
    }

    /// Review submission: freeze rating/content on the order items.
    ///
    /// Triggers the rating reactor. Each order can be reviewed once.
    pub fn submit_review(&self, order_no: &str, reviews: &[ReviewInput]) -> ServiceResult<Order> {
        if reviews.is_empty() {
            return Err(ServiceError::Invalid("no reviews submitted".into()));
        }
        let now = shared::util::now_millis();
        let order = self.store.with_txn(|txn| {
            let mut order = self
                .store
                .get_order_txn(txn, order_no)?
                .ok_or_else(|| ServiceError::NotFound(format!("order {order_no}")))?;
            if !order.is_paid() {
                return Err(ServiceError::Invalid("order not paid yet".into()));
            }
            if order.reviewed {
                return Err(ServiceError::Invalid("order already reviewed".into()));
            }
            for review in reviews {
                if !(1..=5).contains(&review.rating) {
                    return Err(ServiceError::Invalid(format!(
                        "rating must be between 1 and 5, got {}",
                        review.rating
                    )));
                }
                let item = order
                    .items
                    .iter_mut()
                    .find(|i| i.sku_id == review.sku_id)
                    .ok_or_else(|| {
                        ServiceError::Invalid(format!("sku {} not in order", review.sku_id))
                    })?;
                item.rating = Some(review.rating);
                item.review = Some(review.content.clone());
                item.reviewed_at = Some(now);
            }
            order.reviewed = true;
            self.store.put_order(txn, &order)?;
            Ok(order)
        })?;

        self.queue.enqueue(
            Task::UpdateRating {
                order_no: order.no.clone(),
            },
            0,
        )?;
        tracing::info!(order_no = %order.no, reviews = reviews.len(), "Order reviewed");
        Ok(order)
    }

    /// User-side refund request: flags the paid order for operator review.
    /// The actual refund is dispatched later via [`refund::refund_order`].
    pub fn apply_refund(&self, order_no: &str, reason: &str) -> ServiceResult<Order> {
        self.store.with_txn(|txn| {
            let mut order = self
                .store
                .get_order_txn(txn, order_no)?
                .ok_or_else(|| ServiceError::NotFound(format!("order {order_no}")))?;
            if !order.is_paid() {
                return Err(ServiceError::Invalid("order not paid, nothing to refund".into()));
            }
            if order.refund_status != shared::models::RefundStatus::Pending {
                return Err(ServiceError::Invalid("refund already requested".into()));
            }
            order.refund_status = shared::models::RefundStatus::Applied;
            order
                .extra
                .insert("refund_reason".into(), serde_json::json!(reason));
            self.store.put_order(txn, &order)?;
            Ok(order)
        })
    }

    /// Closure delay for a crowdfunding order: the standard TTL, capped so
    /// the order never outlives its campaign.
    pub(crate) fn crowdfunding_close_delay(&self, campaign_end_at: i64, now: i64) -> u64 {
        let remaining_secs = ((campaign_end_at - now).max(0) / 1000) as u64;
        self.order_ttl_secs.min(remaining_secs)
    }

    pub(crate) fn line_total(price: Decimal, amount: u32) -> Decimal {
        price * Decimal::from(amount)
    }
}
