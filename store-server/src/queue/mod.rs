//! Durable delayed task queue
//!
//! Tasks are persisted in redb with a fire-at timestamp; a polling worker
//! executes due tasks, removing them only after success. Delivery is
//! at-least-once (a crash between execution and removal re-delivers), so
//! every handler is idempotent. Transient failures retry with exponential
//! backoff and are dead-lettered after the retry budget is spent;
//! deterministic domain rejections are dead-lettered right away.

use serde::{Deserialize, Serialize};
use shared::{ServiceError, ServiceResult};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db::Store;
use crate::external::InstallmentGateway;

const MAX_RETRY_COUNT: u32 = 3;
const RETRY_BASE_DELAY_SECS: u64 = 5;
const RETRY_MAX_DELAY_SECS: u64 = 60;

/// Work item kinds. No ordering guarantee between distinct kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    /// Deferred closer: cancel the order if still unpaid
    CloseOrder { order_no: String },
    /// Asynchronous refund against the installment subsystem
    RefundInstallment { order_no: String },
    /// Recompute sold counts after a payment event
    UpdateSoldCount { order_no: String },
    /// Recompute product ratings after a review event
    UpdateRating { order_no: String },
}

impl Task {
    pub fn order_no(&self) -> &str {
        match self {
            Task::CloseOrder { order_no }
            | Task::RefundInstallment { order_no }
            | Task::UpdateSoldCount { order_no }
            | Task::UpdateRating { order_no } => order_no,
        }
    }
}

/// Persisted queue entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: String,
    pub task: Task,
    /// Earliest execution time, epoch milliseconds
    pub fire_at: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
}

/// Producer handle over the durable queue
#[derive(Clone)]
pub struct TaskQueue {
    store: Store,
}

impl TaskQueue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Enqueue a task with the given delay. Runs in its own transaction;
    /// callers schedule strictly after their business transaction commits.
    pub fn enqueue(&self, task: Task, delay_secs: u64) -> ServiceResult<String> {
        let now = shared::util::now_millis();
        let entry = QueuedTask {
            id: uuid::Uuid::new_v4().to_string(),
            task,
            fire_at: now + (delay_secs as i64) * 1000,
            retry_count: 0,
            last_error: None,
            created_at: now,
        };
        self.store.with_txn(|txn| {
            self.store.put_task(txn, &entry)?;
            Ok(())
        })?;
        tracing::debug!(task = ?entry.task, delay_secs, "Task enqueued");
        Ok(entry.id)
    }

    /// All pending entries (due or not)
    pub fn pending(&self) -> ServiceResult<Vec<QueuedTask>> {
        Ok(self.store.list_tasks()?)
    }
}

/// Polling consumer of the durable queue
pub struct QueueWorker {
    store: Store,
    installment: Arc<dyn InstallmentGateway>,
}

impl QueueWorker {
    pub fn new(store: Store, installment: Arc<dyn InstallmentGateway>) -> Self {
        Self { store, installment }
    }

    /// Run until the shutdown token fires
    pub async fn run(self, poll_interval: Duration, shutdown: CancellationToken) {
        tracing::info!(poll_ms = poll_interval.as_millis() as u64, "QueueWorker started");
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("QueueWorker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.drain_due().await;
                }
            }
        }
    }

    /// Execute every task whose fire time has passed
    pub async fn drain_due(&self) {
        let now = shared::util::now_millis();
        let due: Vec<QueuedTask> = match self.store.list_tasks() {
            Ok(tasks) => tasks.into_iter().filter(|t| t.fire_at <= now).collect(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to scan task queue");
                return;
            }
        };

        for entry in due {
            match self.execute(&entry.task).await {
                Ok(()) => {
                    if let Err(e) = self
                        .store
                        .with_txn(|txn| Ok(self.store.delete_task(txn, &entry.id)?))
                    {
                        tracing::error!(task_id = %entry.id, error = %e, "Failed to remove completed task");
                    }
                }
                Err(e) => self.mark_failed(entry, &e),
            }
        }
    }

    async fn execute(&self, task: &Task) -> ServiceResult<()> {
        match task {
            Task::CloseOrder { order_no } => crate::orders::closer::close_order(&self.store, order_no),
            Task::RefundInstallment { order_no } => {
                crate::orders::refund::resolve_installment_refund(
                    &self.store,
                    self.installment.as_ref(),
                    order_no,
                )
                .await
            }
            Task::UpdateSoldCount { order_no } => {
                crate::reactors::update_sold_count(&self.store, order_no)
            }
            Task::UpdateRating { order_no } => crate::reactors::update_rating(&self.store, order_no),
        }
    }

    /// Retry with exponential backoff; dead-letter once the budget is spent.
    /// Domain rejections are deterministic (retrying cannot change the
    /// outcome), so they dead-letter on the first failure.
    fn mark_failed(&self, mut entry: QueuedTask, error: &ServiceError) {
        entry.retry_count += 1;
        entry.last_error = Some(format!("[{}] {error}", error.code()));

        if error.is_user_facing() || entry.retry_count > MAX_RETRY_COUNT {
            tracing::error!(
                task = ?entry.task,
                retry_count = entry.retry_count,
                code = error.code(),
                error = %error,
                "Task failed permanently, moving to dead letter queue"
            );
            if let Err(e) = self
                .store
                .with_txn(|txn| Ok(self.store.move_task_to_dead_letter(txn, &entry)?))
            {
                tracing::error!(task_id = %entry.id, error = %e, "Failed to dead-letter task");
            }
            return;
        }

        let delay_secs =
            (RETRY_BASE_DELAY_SECS * 2u64.pow(entry.retry_count - 1)).min(RETRY_MAX_DELAY_SECS);
        entry.fire_at = shared::util::now_millis() + (delay_secs as i64) * 1000;
        tracing::warn!(
            task = ?entry.task,
            retry_count = entry.retry_count,
            retry_in_secs = delay_secs,
            code = error.code(),
            error = %error,
            "Task failed, scheduling retry"
        );
        if let Err(e) = self.store.with_txn(|txn| Ok(self.store.put_task(txn, &entry)?)) {
            tracing::error!(task_id = %entry.id, error = %e, "Failed to persist retry state");
        }
    }
}
