//! Post-event reactors
//!
//! Queue handlers fired after payment and review events. Each one
//! recomputes derived product aggregates from scratch inside a single
//! transaction, so re-delivery converges on the same values.

use shared::{ServiceError, ServiceResult};
use std::collections::BTreeSet;

use crate::db::Store;

/// Recompute `sold_count` for every product touched by the given order,
/// summing quantities across all paid orders.
pub fn update_sold_count(store: &Store, order_no: &str) -> ServiceResult<()> {
    store.with_txn(|txn| {
        let order = store
            .get_order_txn(txn, order_no)?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_no}")))?;
        let product_ids: BTreeSet<String> =
            order.items.iter().map(|i| i.product_id.clone()).collect();

        let orders = store.list_orders_txn(txn)?;
        for product_id in product_ids {
            let sold: u64 = orders
                .iter()
                .filter(|o| o.is_paid())
                .flat_map(|o| o.items.iter())
                .filter(|i| i.product_id == product_id)
                .map(|i| i.amount as u64)
                .sum();

            let Some(mut product) = store.get_product_txn(txn, &product_id)? else {
                tracing::warn!(product_id, "Sold-count recompute hit a missing product");
                continue;
            };
            product.sold_count = sold;
            store.put_product(txn, &product)?;
            tracing::debug!(product_id, sold, "Sold count updated");
        }
        Ok(())
    })
}

/// Recompute `rating` and `review_count` for every product touched by the
/// given order, averaging over reviewed items of paid orders.
pub fn update_rating(store: &Store, order_no: &str) -> ServiceResult<()> {
    store.with_txn(|txn| {
        let order = store
            .get_order_txn(txn, order_no)?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_no}")))?;
        let product_ids: BTreeSet<String> =
            order.items.iter().map(|i| i.product_id.clone()).collect();

        let orders = store.list_orders_txn(txn)?;
        for product_id in product_ids {
            let ratings: Vec<u8> = orders
                .iter()
                .filter(|o| o.is_paid())
                .flat_map(|o| o.items.iter())
                .filter(|i| i.product_id == product_id && i.reviewed_at.is_some())
                .filter_map(|i| i.rating)
                .collect();

            let Some(mut product) = store.get_product_txn(txn, &product_id)? else {
                tracing::warn!(product_id, "Rating recompute hit a missing product");
                continue;
            };
            product.review_count = ratings.len() as u64;
            product.rating = if ratings.is_empty() {
                0.0
            } else {
                ratings.iter().map(|r| *r as f64).sum::<f64>() / ratings.len() as f64
            };
            store.put_product(txn, &product)?;
            tracing::debug!(
                product_id,
                rating = product.rating,
                review_count = product.review_count,
                "Rating updated"
            );
        }
        Ok(())
    })
}
