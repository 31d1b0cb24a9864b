use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Parsing and validation are decoupled from the process environment so tests
/// can pass a plain `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        or_default(var, default)
            .parse::<SocketAddr>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_flag = |var: &str, default: bool| -> Result<bool, ConfigError> {
        match lookup(var) {
            Ok(raw) => parse_bool(&raw).ok_or_else(|| {
                invalid(var, format!("expected true/false, got '{raw}'"))
            }),
            Err(_) => Ok(default),
        }
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("LOTDB_ENV", "development"))?;

    let bind_addr = parse_addr("LOTDB_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("LOTDB_LOG_LEVEL", "info");
    let catalog_path = PathBuf::from(or_default("LOTDB_CATALOG_PATH", "./config/catalog.yaml"));
    let catalog_refresh_cron = or_default("LOTDB_CATALOG_REFRESH_CRON", "0 */30 * * * *");

    let db_max_connections = parse_u32("LOTDB_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("LOTDB_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("LOTDB_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let copart_base_url = or_default("LOTDB_COPART_BASE_URL", "https://api.copart.example.com");
    let iaai_base_url = or_default("LOTDB_IAAI_BASE_URL", "https://api.iaai.example.com");
    let provider_request_timeout_secs = parse_u64("LOTDB_PROVIDER_TIMEOUT_SECS", "30")?;
    let provider_user_agent = or_default(
        "LOTDB_PROVIDER_USER_AGENT",
        "lotdb/0.1 (auction-sales-collector)",
    );
    let provider_min_interval_ms = parse_u64("LOTDB_PROVIDER_MIN_INTERVAL_MS", "1500")?;
    let provider_max_retries = parse_u32("LOTDB_PROVIDER_MAX_RETRIES", "3")?;
    let provider_backoff_base_ms = parse_u64("LOTDB_PROVIDER_BACKOFF_BASE_MS", "1000")?;
    let provider_rate_limited_backoff_ms =
        parse_u64("LOTDB_PROVIDER_RATE_LIMITED_BACKOFF_MS", "30000")?;
    let provider_page_size = parse_u32("LOTDB_PROVIDER_PAGE_SIZE", "100")?;

    let page_budget = parse_u32("LOTDB_PAGE_BUDGET", "25")?;
    if page_budget == 0 {
        return Err(invalid("LOTDB_PAGE_BUDGET", "must be at least 1".to_string()));
    }
    let max_consecutive_failures = parse_u32("LOTDB_MAX_CONSECUTIVE_FAILURES", "3")?.max(1);
    let failure_cooldown_ms = parse_u64("LOTDB_FAILURE_COOLDOWN_MS", "5000")?;
    let idle_poll_secs = parse_u64("LOTDB_IDLE_POLL_SECS", "30")?;
    let stall_threshold_secs = parse_u64("LOTDB_STALL_THRESHOLD_SECS", "60")?;
    let estimated_total_pages = parse_u32("LOTDB_ESTIMATED_TOTAL_PAGES", "50")?.max(1);
    let auto_start_on_urgent = parse_flag("LOTDB_AUTO_START_ON_URGENT", false)?;
    let scheduler_autostart = parse_flag("LOTDB_SCHEDULER_AUTOSTART", false)?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        catalog_path,
        catalog_refresh_cron,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        copart_base_url,
        iaai_base_url,
        provider_request_timeout_secs,
        provider_user_agent,
        provider_min_interval_ms,
        provider_max_retries,
        provider_backoff_base_ms,
        provider_rate_limited_backoff_ms,
        provider_page_size,
        page_budget,
        max_consecutive_failures,
        failure_cooldown_ms,
        idle_poll_secs,
        stall_threshold_secs,
        estimated_total_pages,
        auto_start_on_urgent,
        scheduler_autostart,
    })
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "LOTDB_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
