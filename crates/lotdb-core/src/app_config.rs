use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub catalog_path: PathBuf,
    pub catalog_refresh_cron: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub copart_base_url: String,
    pub iaai_base_url: String,
    pub provider_request_timeout_secs: u64,
    pub provider_user_agent: String,
    /// Minimum spacing between two requests to the same provider.
    pub provider_min_interval_ms: u64,
    pub provider_max_retries: u32,
    pub provider_backoff_base_ms: u64,
    /// Floor for the retry delay after an HTTP 429.
    pub provider_rate_limited_backoff_ms: u64,
    pub provider_page_size: u32,
    /// Page fetches per worker run before the job yields back to the queue.
    pub page_budget: u32,
    pub max_consecutive_failures: u32,
    pub failure_cooldown_ms: u64,
    pub idle_poll_secs: u64,
    pub stall_threshold_secs: u64,
    pub estimated_total_pages: u32,
    pub auto_start_on_urgent: bool,
    pub scheduler_autostart: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("catalog_path", &self.catalog_path)
            .field("catalog_refresh_cron", &self.catalog_refresh_cron)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("copart_base_url", &self.copart_base_url)
            .field("iaai_base_url", &self.iaai_base_url)
            .field(
                "provider_request_timeout_secs",
                &self.provider_request_timeout_secs,
            )
            .field("provider_user_agent", &self.provider_user_agent)
            .field("provider_min_interval_ms", &self.provider_min_interval_ms)
            .field("provider_max_retries", &self.provider_max_retries)
            .field("provider_backoff_base_ms", &self.provider_backoff_base_ms)
            .field(
                "provider_rate_limited_backoff_ms",
                &self.provider_rate_limited_backoff_ms,
            )
            .field("provider_page_size", &self.provider_page_size)
            .field("page_budget", &self.page_budget)
            .field("max_consecutive_failures", &self.max_consecutive_failures)
            .field("failure_cooldown_ms", &self.failure_cooldown_ms)
            .field("idle_poll_secs", &self.idle_poll_secs)
            .field("stall_threshold_secs", &self.stall_threshold_secs)
            .field("estimated_total_pages", &self.estimated_total_pages)
            .field("auto_start_on_urgent", &self.auto_start_on_urgent)
            .field("scheduler_autostart", &self.scheduler_autostart)
            .finish()
    }
}
