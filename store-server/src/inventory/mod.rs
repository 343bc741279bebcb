//! Inventory Ledger
//!
//! Durable stock lives on the SKU row and is only mutated here, inside the
//! caller's write transaction. redb serializes write transactions, so a
//! decrement can never interleave with another and oversell.
//!
//! The seckill path additionally keeps a volatile per-SKU counter
//! ([`SeckillGate`]) as an admission valve: once it hits zero, further
//! attempts are rejected without touching the database. It is never the
//! source of truth; the durable decrement still decides.

use dashmap::DashMap;
use redb::WriteTransaction;
use shared::{ServiceError, ServiceResult};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::db::Store;

/// Atomically subtract `quantity` from the SKU's durable stock.
///
/// Returns the remaining stock. Fails with `OutOfStock` (leaving state
/// untouched) when stock would go negative; the caller must abort the
/// enclosing transaction.
pub fn decrease_stock(
    store: &Store,
    txn: &WriteTransaction,
    sku_id: &str,
    quantity: u32,
) -> ServiceResult<u32> {
    let mut sku = store
        .get_sku_txn(txn, sku_id)?
        .ok_or_else(|| ServiceError::NotFound(format!("sku {sku_id}")))?;

    if sku.stock < quantity {
        return Err(ServiceError::OutOfStock(sku_id.to_string()));
    }
    sku.stock -= quantity;
    store.put_sku(txn, &sku)?;
    tracing::debug!(sku_id = %sku_id, quantity, remaining = sku.stock, "Stock decreased");
    Ok(sku.stock)
}

/// Unconditionally add `quantity` back to the SKU's durable stock.
/// Used by order cancellation and refunds.
pub fn increase_stock(
    store: &Store,
    txn: &WriteTransaction,
    sku_id: &str,
    quantity: u32,
) -> ServiceResult<u32> {
    let mut sku = store
        .get_sku_txn(txn, sku_id)?
        .ok_or_else(|| ServiceError::NotFound(format!("sku {sku_id}")))?;

    sku.stock += quantity;
    store.put_sku(txn, &sku)?;
    tracing::debug!(sku_id = %sku_id, quantity, remaining = sku.stock, "Stock restored");
    Ok(sku.stock)
}

/// Volatile admission counters for flash sales, keyed by SKU id.
///
/// Primed with the sale quantity when a seckill window opens. The counter is
/// allowed to drift slightly negative under contention; it only has to stop
/// the stampede, the durable stock stops the overselling.
#[derive(Default)]
pub struct SeckillGate {
    counters: DashMap<String, AtomicI64>,
}

impl SeckillGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the admission counter for a SKU (called when the sale opens)
    pub fn prime(&self, sku_id: &str, quantity: i64) {
        self.counters
            .insert(sku_id.to_string(), AtomicI64::new(quantity));
        tracing::info!(sku_id = %sku_id, quantity, "Seckill gate primed");
    }

    /// Fast-path check: true once the counter is exhausted.
    /// An unknown SKU is treated as exhausted (sale not open).
    pub fn is_exhausted(&self, sku_id: &str) -> bool {
        match self.counters.get(sku_id) {
            Some(counter) => counter.load(Ordering::Acquire) <= 0,
            None => true,
        }
    }

    /// Decrement after a successful durable decrement. Returns the new value.
    pub fn decrement(&self, sku_id: &str) -> i64 {
        match self.counters.get(sku_id) {
            Some(counter) => counter.fetch_sub(1, Ordering::AcqRel) - 1,
            None => -1,
        }
    }

    /// Current counter value (diagnostics and tests)
    pub fn remaining(&self, sku_id: &str) -> i64 {
        self.counters
            .get(sku_id)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}
