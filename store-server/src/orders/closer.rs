//! Deferred order closer
//!
//! Fired by the queue worker once an order's TTL elapses. Paid and
//! already-closed orders are a no-op, so re-delivery is harmless.

use shared::{ServiceError, ServiceResult};

use crate::db::Store;
use crate::{coupons, inventory};

/// Close the order if it is still unpaid: restore stock for every line
/// and release the consumed coupon usage.
pub fn close_order(store: &Store, order_no: &str) -> ServiceResult<()> {
    store.with_txn(|txn| {
        let mut order = store
            .get_order_txn(txn, order_no)?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_no}")))?;

        if !order.is_closable() {
            tracing::debug!(order_no, "Close skipped, order paid or already closed");
            return Ok(());
        }

        order.closed = true;
        for item in &order.items {
            inventory::increase_stock(store, txn, &item.sku_id, item.amount)?;
        }
        if let Some(code) = &order.coupon_code {
            coupons::change_used(store, txn, code, -1)?;
        }
        store.put_order(txn, &order)?;
        tracing::info!(order_no, "Order closed, stock restored");
        Ok(())
    })
}
