//! Order Model
//!
//! An order embeds its line items and a snapshot of the shipping address;
//! both are frozen at creation time. The record is mutated only by the
//! payment callback, review submission, the refund dispatcher and the
//! deferred closer. Orders are never deleted.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Order type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Normal,
    Crowdfunding,
    Seckill,
}

/// Refund state machine. SUCCESS and FAILED are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    #[default]
    Pending,
    Applied,
    Processing,
    Success,
    Failed,
}

/// Payment method of a paid order.
///
/// A closed enum: every paid order carries exactly one of these, so the
/// refund dispatcher has no "unknown method" runtime arm.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Alipay,
    Wechat,
    Installment,
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentMethod::Alipay => write!(f, "alipay"),
            PaymentMethod::Wechat => write!(f, "wechat"),
            PaymentMethod::Installment => write!(f, "installment"),
        }
    }
}

/// Shipping address copied into the order at creation time.
/// Immutable afterwards, even if the source address changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressSnapshot {
    pub line: String,
    pub zip: String,
    pub contact_name: String,
    pub contact_phone: String,
}

/// One line of an order.
///
/// `price` is the unit price frozen at purchase time, decoupled from the
/// SKU's current price. Review fields are set once by review submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub sku_id: String,
    /// Unit price at time of purchase
    pub price: Decimal,
    pub amount: u32,
    pub rating: Option<u8>,
    pub review: Option<String>,
    pub reviewed_at: Option<i64>,
}

/// Order entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order number (all digits: date prefix + sequence)
    pub no: String,
    pub user_id: String,
    pub order_type: OrderType,
    pub address: AddressSnapshot,
    pub remark: String,
    /// Final amount after any coupon adjustment. Set once at creation.
    pub total_amount: Decimal,
    pub coupon_code: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub paid_at: Option<i64>,
    pub refund_no: Option<String>,
    pub refund_status: RefundStatus,
    pub closed: bool,
    pub reviewed: bool,
    /// Free-form metadata (gateway failure codes, refund reasons)
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
    pub items: Vec<OrderItem>,
    pub created_at: i64,
}

impl Order {
    pub fn new(
        no: String,
        user_id: &str,
        order_type: OrderType,
        address: AddressSnapshot,
        remark: &str,
        created_at: i64,
    ) -> Self {
        Self {
            no,
            user_id: user_id.to_string(),
            order_type,
            address,
            remark: remark.to_string(),
            total_amount: Decimal::ZERO,
            coupon_code: None,
            payment_method: None,
            paid_at: None,
            refund_no: None,
            refund_status: RefundStatus::default(),
            closed: false,
            reviewed: false,
            extra: HashMap::new(),
            items: Vec::new(),
            created_at,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }

    /// Still cancellable by the deferred closer
    pub fn is_closable(&self) -> bool {
        !self.is_paid() && !self.closed
    }
}
