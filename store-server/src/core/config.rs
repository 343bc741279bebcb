/// Server configuration for the order core
///
/// # Environment variables
///
/// Every field can be overridden from the environment:
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | WORK_DIR | /var/lib/store | Working directory (database, logs) |
/// | QUEUE_POLL_MS | 1000 | Task queue polling interval (milliseconds) |
/// | INSTALLMENT_URL | http://localhost:3003 | Installment subsystem base URL |
/// | ENVIRONMENT | development | Runtime environment |
///
/// # Example
///
/// ```ignore
/// WORK_DIR=/data/store QUEUE_POLL_MS=500 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Working directory for the database and log files
    pub work_dir: String,
    /// Task queue polling interval
    pub queue_poll_ms: u64,
    /// Installment subsystem base URL
    pub installment_url: String,
    /// Runtime environment: development | staging | production
    pub environment: String,
}

impl Config {
    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/store".into()),
            queue_poll_ms: std::env::var("QUEUE_POLL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            installment_url: std::env::var("INSTALLMENT_URL")
                .unwrap_or_else(|_| "http://localhost:3003".into()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
