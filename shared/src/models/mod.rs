//! Persistent domain models

pub mod coupon;
pub mod order;
pub mod product;
pub mod user;

pub use coupon::{CouponCode, DiscountType};
pub use order::{AddressSnapshot, Order, OrderItem, OrderType, PaymentMethod, RefundStatus};
pub use product::{CrowdfundingCampaign, Product, ProductSku};
pub use user::UserAddress;
