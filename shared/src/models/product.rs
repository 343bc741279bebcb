//! Product and SKU Models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Crowdfunding campaign attached to a product.
/// Orders for a campaign must not outlive `end_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrowdfundingCampaign {
    /// Campaign end time, epoch milliseconds
    pub end_at: i64,
    pub target_amount: Decimal,
}

/// Product aggregate. `sold_count`, `rating` and `review_count` are derived
/// values recomputed by the reactors after payment / review events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub on_sale: bool,
    pub sold_count: u64,
    pub rating: f64,
    pub review_count: u64,
    pub crowdfunding: Option<CrowdfundingCampaign>,
}

impl Product {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            on_sale: true,
            sold_count: 0,
            rating: 0.0,
            review_count: 0,
            crowdfunding: None,
        }
    }
}

/// A purchasable variant of a product, carrying its own price and stock.
/// `stock >= 0` always; mutation goes through the inventory ledger only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSku {
    pub id: String,
    pub product_id: String,
    pub title: String,
    pub price: Decimal,
    pub stock: u32,
}
