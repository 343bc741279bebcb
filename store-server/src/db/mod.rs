//! redb-backed durable store for the order core
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | order_no | `Order` | Orders with embedded line items |
//! | `skus` | sku_id | `ProductSku` | Durable stock + price |
//! | `products` | product_id | `Product` | Derived aggregates, campaigns |
//! | `coupons` | code | `CouponCode` | Usage counters |
//! | `addresses` | address_id | `UserAddress` | `last_used_at` bookkeeping |
//! | `tasks` | task_id | `QueuedTask` | Delayed task queue |
//! | `dead_letter` | task_id | `QueuedTask` | Permanently failed tasks |
//! | `counters` | name | `u64` | Order-number sequence |
//!
//! # Transactions
//!
//! redb serializes write transactions, so SKU stock decrements and coupon
//! usage increments inside [`Store::with_txn`] cannot interleave: two
//! placements racing for the last unit observe each other's committed state.
//! [`Store::with_txn`] commits only when the closure returns `Ok`; any error
//! aborts the transaction, so no partial order ever becomes visible.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::models::{CouponCode, Order, Product, ProductSku, UserAddress};
use shared::{ServiceError, ServiceResult};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::queue::QueuedTask;

const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");
const SKUS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("skus");
const PRODUCTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("products");
const COUPONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("coupons");
const ADDRESSES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("addresses");
const TASKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");
const DEAD_LETTER_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("dead_letter");
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

const ORDER_SEQ_KEY: &str = "order_seq";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        ServiceError::Storage(e.to_string())
    }
}

/// Durable store backed by redb
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open or create the database at the given path.
    ///
    /// redb commits with immediate durability (copy-on-write with atomic
    /// pointer swap), so a committed order survives power loss.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    /// Create all tables so read transactions never hit a missing table
    fn init_tables(&self) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let _ = txn.open_table(ORDERS_TABLE)?;
            let _ = txn.open_table(SKUS_TABLE)?;
            let _ = txn.open_table(PRODUCTS_TABLE)?;
            let _ = txn.open_table(COUPONS_TABLE)?;
            let _ = txn.open_table(ADDRESSES_TABLE)?;
            let _ = txn.open_table(TASKS_TABLE)?;
            let _ = txn.open_table(DEAD_LETTER_TABLE)?;
            let mut counters = txn.open_table(COUNTERS_TABLE)?;
            if counters.get(ORDER_SEQ_KEY)?.is_none() {
                counters.insert(ORDER_SEQ_KEY, 0u64)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Run `f` within a scoped write transaction.
    ///
    /// Commit happens only when `f` returns `Ok`; every error path aborts
    /// the transaction. Callers must not perform blocking I/O inside `f`
    /// (gateway calls live outside the transaction boundary).
    pub fn with_txn<T, F>(&self, f: F) -> ServiceResult<T>
    where
        F: FnOnce(&WriteTransaction) -> ServiceResult<T>,
    {
        let txn = self.db.begin_write().map_err(StorageError::from)?;
        match f(&txn) {
            Ok(value) => {
                txn.commit().map_err(StorageError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = txn.abort() {
                    tracing::error!(error = %abort_err, "Failed to abort transaction");
                }
                Err(e)
            }
        }
    }

    /// Allocate the next order number inside the enclosing transaction.
    ///
    /// Date prefix + zero-padded global sequence. The counter advances in
    /// the same transaction as the order insert, so a rolled-back placement
    /// releases its number as well.
    pub fn next_order_no(&self, txn: &WriteTransaction) -> StorageResult<String> {
        let mut counters = txn.open_table(COUNTERS_TABLE)?;
        let next = counters.get(ORDER_SEQ_KEY)?.map(|g| g.value()).unwrap_or(0) + 1;
        counters.insert(ORDER_SEQ_KEY, next)?;
        Ok(format!("{}{:06}", shared::util::today_compact(), next))
    }

    // ========== Generic JSON accessors ==========

    fn put_raw(
        txn: &WriteTransaction,
        table: TableDefinition<&'static str, &'static [u8]>,
        key: &str,
        value: &impl Serialize,
    ) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value)?;
        let mut t = txn.open_table(table)?;
        t.insert(key, bytes.as_slice())?;
        Ok(())
    }

    fn get_raw<T: DeserializeOwned>(
        txn: &WriteTransaction,
        table: TableDefinition<&'static str, &'static [u8]>,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let t = txn.open_table(table)?;
        match t.get(key)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    fn read_raw<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&'static str, &'static [u8]>,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(table)?;
        match t.get(key)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    fn delete_raw(
        txn: &WriteTransaction,
        table: TableDefinition<&'static str, &'static [u8]>,
        key: &str,
    ) -> StorageResult<bool> {
        let mut t = txn.open_table(table)?;
        Ok(t.remove(key)?.is_some())
    }

    // ========== Orders ==========

    pub fn put_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        Self::put_raw(txn, ORDERS_TABLE, &order.no, order)
    }

    pub fn get_order_txn(&self, txn: &WriteTransaction, no: &str) -> StorageResult<Option<Order>> {
        Self::get_raw(txn, ORDERS_TABLE, no)
    }

    pub fn get_order(&self, no: &str) -> StorageResult<Option<Order>> {
        self.read_raw(ORDERS_TABLE, no)
    }

    /// All orders, in key order. Used by the reactors to recompute derived
    /// aggregates; the order table is small enough that a scan is fine.
    pub fn list_orders_txn(&self, txn: &WriteTransaction) -> StorageResult<Vec<Order>> {
        let t = txn.open_table(ORDERS_TABLE)?;
        let mut orders = Vec::new();
        for entry in t.iter()? {
            let (_, value) = entry?;
            orders.push(serde_json::from_slice(value.value())?);
        }
        Ok(orders)
    }

    pub fn count_orders(&self) -> StorageResult<usize> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(ORDERS_TABLE)?;
        let mut n = 0;
        for entry in t.iter()? {
            entry?;
            n += 1;
        }
        Ok(n)
    }

    // ========== SKUs ==========

    pub fn put_sku(&self, txn: &WriteTransaction, sku: &ProductSku) -> StorageResult<()> {
        Self::put_raw(txn, SKUS_TABLE, &sku.id, sku)
    }

    pub fn get_sku_txn(&self, txn: &WriteTransaction, id: &str) -> StorageResult<Option<ProductSku>> {
        Self::get_raw(txn, SKUS_TABLE, id)
    }

    pub fn get_sku(&self, id: &str) -> StorageResult<Option<ProductSku>> {
        self.read_raw(SKUS_TABLE, id)
    }

    // ========== Products ==========

    pub fn put_product(&self, txn: &WriteTransaction, product: &Product) -> StorageResult<()> {
        Self::put_raw(txn, PRODUCTS_TABLE, &product.id, product)
    }

    pub fn get_product_txn(
        &self,
        txn: &WriteTransaction,
        id: &str,
    ) -> StorageResult<Option<Product>> {
        Self::get_raw(txn, PRODUCTS_TABLE, id)
    }

    pub fn get_product(&self, id: &str) -> StorageResult<Option<Product>> {
        self.read_raw(PRODUCTS_TABLE, id)
    }

    // ========== Coupons ==========

    pub fn put_coupon(&self, txn: &WriteTransaction, coupon: &CouponCode) -> StorageResult<()> {
        Self::put_raw(txn, COUPONS_TABLE, &coupon.code, coupon)
    }

    pub fn get_coupon_txn(
        &self,
        txn: &WriteTransaction,
        code: &str,
    ) -> StorageResult<Option<CouponCode>> {
        Self::get_raw(txn, COUPONS_TABLE, code)
    }

    pub fn get_coupon(&self, code: &str) -> StorageResult<Option<CouponCode>> {
        self.read_raw(COUPONS_TABLE, code)
    }

    // ========== Addresses ==========

    pub fn put_address(&self, txn: &WriteTransaction, address: &UserAddress) -> StorageResult<()> {
        Self::put_raw(txn, ADDRESSES_TABLE, &address.id, address)
    }

    pub fn get_address_txn(
        &self,
        txn: &WriteTransaction,
        id: &str,
    ) -> StorageResult<Option<UserAddress>> {
        Self::get_raw(txn, ADDRESSES_TABLE, id)
    }

    pub fn get_address(&self, id: &str) -> StorageResult<Option<UserAddress>> {
        self.read_raw(ADDRESSES_TABLE, id)
    }

    // ========== Task queue ==========

    pub fn put_task(&self, txn: &WriteTransaction, task: &QueuedTask) -> StorageResult<()> {
        Self::put_raw(txn, TASKS_TABLE, &task.id, task)
    }

    pub fn delete_task(&self, txn: &WriteTransaction, id: &str) -> StorageResult<bool> {
        Self::delete_raw(txn, TASKS_TABLE, id)
    }

    /// All queued tasks (due or not), in key order
    pub fn list_tasks(&self) -> StorageResult<Vec<QueuedTask>> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(TASKS_TABLE)?;
        let mut tasks = Vec::new();
        for entry in t.iter()? {
            let (_, value) = entry?;
            tasks.push(serde_json::from_slice(value.value())?);
        }
        Ok(tasks)
    }

    /// Move a permanently failed task out of the queue for operator review
    pub fn move_task_to_dead_letter(
        &self,
        txn: &WriteTransaction,
        task: &QueuedTask,
    ) -> StorageResult<()> {
        Self::delete_raw(txn, TASKS_TABLE, &task.id)?;
        Self::put_raw(txn, DEAD_LETTER_TABLE, &task.id, task)
    }

    pub fn list_dead_letters(&self) -> StorageResult<Vec<QueuedTask>> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(DEAD_LETTER_TABLE)?;
        let mut tasks = Vec::new();
        for entry in t.iter()? {
            let (_, value) = entry?;
            tasks.push(serde_json::from_slice(value.value())?);
        }
        Ok(tasks)
    }
}
