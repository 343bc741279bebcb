//! Store Server - e-commerce order core
//!
//! # Architecture
//!
//! - **Orders** (`orders`): placement workflows, deferred closer, refunds
//! - **Inventory** (`inventory`): transactional stock ledger + seckill gate
//! - **Coupons** (`coupons`): eligibility checks and usage accounting
//! - **Queue** (`queue`): durable delayed task queue and its worker
//! - **Reactors** (`reactors`): post-payment / post-review aggregates
//! - **Database** (`db`): embedded redb store, transaction-as-closure
//!
//! # Module layout
//!
//! ```text
//! store-server/src/
//! ├── core/        # config, background tasks
//! ├── db/          # redb store and typed accessors
//! ├── inventory/   # stock ledger, seckill admission gate
//! ├── coupons/     # coupon validator
//! ├── orders/      # order service: placement, closer, refund
//! ├── queue/       # durable task queue + polling worker
//! ├── reactors/    # sold-count / rating recomputation
//! ├── external/    # gateway, cart, coupon policy seams
//! └── utils/       # logging
//! ```

pub mod core;
pub mod coupons;
pub mod db;
pub mod external;
pub mod inventory;
pub mod orders;
pub mod queue;
pub mod reactors;
pub mod utils;

pub use crate::core::{BackgroundTasks, Config};
pub use db::Store;
pub use external::{CartService, CouponUsagePolicy, HttpPaymentGateway, PaymentGateway};
pub use orders::{OrderItemInput, OrderService, ReviewInput};
pub use queue::{QueueWorker, Task, TaskQueue};

pub use utils::logger::init_logger_with_file;

/// Prepare the process environment: dotenv, working directory, logging
pub fn setup_environment() -> anyhow::Result<Config> {
    dotenv::dotenv().ok();
    let config = Config::from_env();
    std::fs::create_dir_all(&config.work_dir)?;

    let log_dir = format!("{}/logs", config.work_dir);
    std::fs::create_dir_all(&log_dir)?;
    // Development logs verbosely; staging and production at info, with
    // production writing daily-rolled files under the work dir.
    let level = if config.is_development() { "debug" } else { "info" };
    if config.is_production() {
        init_logger_with_file(Some(level), Some(&log_dir));
    } else {
        init_logger_with_file(Some(level), None);
    }
    Ok(config)
}
