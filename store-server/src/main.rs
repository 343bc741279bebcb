use std::sync::Arc;
use std::time::Duration;

use store_server::core::BackgroundTasks;
use store_server::db::Store;
use store_server::external::HttpPaymentGateway;
use store_server::queue::QueueWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = store_server::setup_environment()?;

    tracing::info!(environment = %config.environment, "Store worker starting...");

    let db_path = format!("{}/store.redb", config.work_dir);
    let store = Store::open(&db_path)?;

    // This binary hosts the queue worker; the order service itself is
    // embedded as a library by the transport tier.
    let installment = Arc::new(HttpPaymentGateway::new(config.installment_url.clone()));

    let mut tasks = BackgroundTasks::new();
    let worker = QueueWorker::new(store, installment);
    let poll = Duration::from_millis(config.queue_poll_ms);
    let shutdown = tasks.shutdown_token();
    tasks.spawn("queue_worker", async move {
        worker.run(poll, shutdown).await;
    });

    tracing::info!(db = %db_path, poll_ms = config.queue_poll_ms, "Queue worker ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    tasks.shutdown().await;
    Ok(())
}
