//! Configuration for domainwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Monitor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "domainwatch.db")
    pub db_path: String,
    /// Time between ticks (default: 5 minutes)
    pub check_interval: Duration,
    /// Total HTTP attempts per check (default: 2)
    pub retry_attempts: u32,
    /// Bound on every network operation (default: 10s)
    pub connection_timeout: Duration,
    /// Budget for one target's check within a tick (default: the check interval)
    pub tick_timeout: Duration,
    /// Targets checked at once (default: 8)
    pub max_concurrent_checks: usize,
    pub user_agent: String,
    /// Where the last tick summary is written, if anywhere
    pub summary_path: Option<PathBuf>,
    /// Webhook that receives alerts, if any
    pub webhook_url: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "domainwatch.db".to_string(),
            check_interval: Duration::from_secs(300),
            retry_attempts: 2,
            connection_timeout: Duration::from_secs(10),
            tick_timeout: Duration::from_secs(300),
            max_concurrent_checks: 8,
            user_agent: "Domain-Health-Monitor/1.0".to_string(),
            summary_path: None,
            webhook_url: None,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DOMAINWATCH_HTTP_PORT`
    /// - `DOMAINWATCH_DB_PATH`
    /// - `DOMAINWATCH_CHECK_INTERVAL_SECS`
    /// - `DOMAINWATCH_RETRY_ATTEMPTS`
    /// - `DOMAINWATCH_TIMEOUT_SECS`
    /// - `DOMAINWATCH_TICK_TIMEOUT_SECS`
    /// - `DOMAINWATCH_MAX_CONCURRENT_CHECKS`
    /// - `DOMAINWATCH_USER_AGENT`
    /// - `DOMAINWATCH_SUMMARY_PATH`
    /// - `DOMAINWATCH_WEBHOOK_URL`
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parsed(&lookup, "DOMAINWATCH_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("DOMAINWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        let interval = parsed::<u64>(&lookup, "DOMAINWATCH_CHECK_INTERVAL_SECS");
        if let Some(secs) = interval.filter(|s| *s > 0) {
            cfg.check_interval = Duration::from_secs(secs);
        }
        cfg.tick_timeout = cfg.check_interval;

        let tick_timeout = parsed::<u64>(&lookup, "DOMAINWATCH_TICK_TIMEOUT_SECS");
        if let Some(secs) = tick_timeout.filter(|s| *s > 0) {
            cfg.tick_timeout = Duration::from_secs(secs);
        }

        let attempts = parsed::<u32>(&lookup, "DOMAINWATCH_RETRY_ATTEMPTS");
        if let Some(attempts) = attempts.filter(|a| *a > 0) {
            cfg.retry_attempts = attempts;
        }

        if let Some(secs) = parsed::<u64>(&lookup, "DOMAINWATCH_TIMEOUT_SECS").filter(|s| *s > 0) {
            cfg.connection_timeout = Duration::from_secs(secs);
        }

        let max_checks = parsed::<usize>(&lookup, "DOMAINWATCH_MAX_CONCURRENT_CHECKS");
        if let Some(n) = max_checks.filter(|n| *n > 0) {
            cfg.max_concurrent_checks = n;
        }

        if let Some(ua) = lookup("DOMAINWATCH_USER_AGENT").filter(|ua| !ua.trim().is_empty()) {
            cfg.user_agent = ua;
        }

        cfg.summary_path = lookup("DOMAINWATCH_SUMMARY_PATH").map(PathBuf::from);
        cfg.webhook_url = lookup("DOMAINWATCH_WEBHOOK_URL").filter(|u| !u.is_empty());

        cfg
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Config: ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}
