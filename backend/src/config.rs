//! Application configuration constants
//!
//! Central location for configuration constants, validation boundaries
//! and the environment-driven server configuration.

use crate::error::{AppError, Result};
use std::path::PathBuf;

// ===== User Defaults =====

/// Timezone assigned to newly created users
pub const DEFAULT_TIMEZONE: &str = "America/Los_Angeles";

/// Local time of day at which the daily digest is sent ("HH:MM")
pub const DEFAULT_EMAIL_TIME: &str = "09:00";

// ===== Key Result Limits =====

/// Lowest accepted confidence level
pub const MIN_CONFIDENCE_LEVEL: i64 = 0;

/// Highest accepted confidence level
pub const MAX_CONFIDENCE_LEVEL: i64 = 10;

/// Confidence assigned to new key results
pub const DEFAULT_CONFIDENCE_LEVEL: i64 = 5;

/// Target value assigned when a key result is created without one
pub const DEFAULT_TARGET_VALUE: f64 = 100.0;

// ===== SQLite Store =====

/// Connections in the application pool of a file database
pub const DB_MAX_CONNECTIONS: u32 = 5;

/// Seconds a connection waits on a locked database before failing
pub const DB_BUSY_TIMEOUT_SECS: u64 = 5;

// ===== Magic Links =====

/// Lifetime of a login token in hours
pub const MAGIC_LINK_TTL_HOURS: i64 = 24;

// ===== Digest Scheduler =====

/// Cron expression for the digest tick (every minute, on second 0)
pub const DIGEST_TICK_CRON: &str = "0 * * * * *";

/// Minutes after a user's email time during which a missed tick may still deliver.
/// Bounds the delay after a restart or an overlapping tick.
pub const DIGEST_CATCH_UP_MINUTES: i64 = 30;

// ===== OKR Quality Heuristic =====

/// Minimum objective length before it counts as descriptive
pub const MIN_OBJECTIVE_LENGTH: usize = 15;

/// Leading words that make an objective read like a task
pub const OBJECTIVE_TASK_VERBS: &[&str] = &[
    "create", "build", "make", "write", "implement", "add", "fix", "update",
];

/// Words that make a key result read like an activity instead of an outcome
pub const KEY_RESULT_TASK_VERBS: &[&str] = &[
    "create", "build", "make", "write", "implement", "add", "launch", "ship", "deploy", "design",
    "develop",
];

/// Words that mark a key result as measurable
pub const METRIC_KEYWORDS: &[&str] = &[
    "increase", "decrease", "achieve", "reach", "maintain", "reduce", "grow", "improve", "from",
    "to", "by", "%",
];

// ===== Server Configuration =====

/// Which persistence backend the server runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Json,
}

impl std::str::FromStr for StoreKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(StoreKind::Sqlite),
            "json" => Ok(StoreKind::Json),
            other => Err(AppError::Validation(format!(
                "Invalid store '{}'. Use 'sqlite' or 'json'",
                other
            ))),
        }
    }
}

/// Runtime configuration read from `OKR_*` environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub store: StoreKind,
    /// Base URL of the browser UI, used to build login links in digests
    pub app_url: String,
    pub scheduler_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3001,
            data_dir: PathBuf::from("./data"),
            store: StoreKind::Sqlite,
            app_url: "http://localhost:5173".to_string(),
            scheduler_enabled: true,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (environment in production, maps in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ServerConfig::default();

        if let Some(bind) = lookup("OKR_BIND") {
            config.bind = bind;
        }
        if let Some(port) = lookup("OKR_PORT") {
            config.port = port
                .parse()
                .map_err(|_| AppError::Validation(format!("Invalid OKR_PORT: {}", port)))?;
        }
        if let Some(dir) = lookup("OKR_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(store) = lookup("OKR_STORE") {
            config.store = store.parse()?;
        }
        if let Some(url) = lookup("OKR_APP_URL") {
            config.app_url = url.trim_end_matches('/').to_string();
        }
        if let Some(flag) = lookup("OKR_SCHEDULER") {
            config.scheduler_enabled = match flag.trim().to_lowercase().as_str() {
                "on" | "true" | "1" => true,
                "off" | "false" | "0" => false,
                _ => {
                    return Err(AppError::Validation(format!(
                        "Invalid OKR_SCHEDULER: {}",
                        flag
                    )))
                }
            };
        }

        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("okr-planner.db")
    }

    pub fn json_path(&self) -> PathBuf {
        self.data_dir.join("data.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:3001");
        assert_eq!(config.store, StoreKind::Sqlite);
        assert!(config.scheduler_enabled);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("OKR_PORT", "8080"),
            ("OKR_STORE", "json"),
            ("OKR_APP_URL", "https://okr.example.com/"),
            ("OKR_SCHEDULER", "off"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.store, StoreKind::Json);
        assert_eq!(config.app_url, "https://okr.example.com");
        assert!(!config.scheduler_enabled);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ServerConfig::from_lookup(lookup_from(&[("OKR_PORT", "abc")])).is_err());
        assert!(ServerConfig::from_lookup(lookup_from(&[("OKR_STORE", "redis")])).is_err());
        assert!(ServerConfig::from_lookup(lookup_from(&[("OKR_SCHEDULER", "maybe")])).is_err());
    }
}
