use crate::error::ConfigError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// The root configuration structure for the entire application.
///
/// Every section falls back to its defaults, so an empty `config.toml`
/// (or no file at all) is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseSettings,
    pub accelerate: AccelerateSettings,
    pub logging: LoggingSettings,
}

/// Contains parameters for the shared PostgreSQL connection pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Connection string. When absent, `DATABASE_URL` from the environment
    /// (or the `.env` file) is used.
    pub url: Option<String>,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
    /// Connections the pool keeps open even when idle.
    pub min_connections: u32,
    /// How long a caller waits for a free connection before giving up.
    pub acquire_timeout_secs: u64,
    /// Idle connections older than this are closed. `None` keeps them forever.
    pub idle_timeout_secs: Option<u64>,
    /// Create the pool without opening a connection; the first query connects.
    pub lazy: bool,
    /// Apply the embedded migrations during startup.
    pub run_migrations: bool,
}

impl DatabaseSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 5,
            idle_timeout_secs: None,
            lazy: false,
            run_migrations: true,
        }
    }
}

/// Contains parameters for the in-process read cache layered over the pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccelerateSettings {
    /// When false, cache strategies are ignored and every read hits the store.
    pub enabled: bool,
    /// Maximum number of cached query results held at once.
    pub max_entries: usize,
    /// Freshness applied to reads issued through the plain accessor interface.
    pub default_ttl_secs: Option<u64>,
    /// Stale-while-revalidate window applied alongside `default_ttl_secs`.
    pub default_swr_secs: Option<u64>,
}

impl Default for AccelerateSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            default_ttl_secs: None,
            default_swr_secs: None,
        }
    }
}

/// Output encoding of the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Contains parameters for the tracing subscriber installed by the binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    pub format: LogFormat,
    /// When set, logs are also written to a daily-rolling file in this directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
        }
    }
}

impl Config {
    /// Rejects combinations the pool or the cache cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let db = &self.database;
        if db.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if db.min_connections > db.max_connections {
            return Err(ConfigError::ValidationError(format!(
                "database.min_connections ({}) exceeds database.max_connections ({})",
                db.min_connections, db.max_connections
            )));
        }
        if self.accelerate.max_entries == 0 {
            return Err(ConfigError::ValidationError(
                "accelerate.max_entries must be at least 1".to_string(),
            ));
        }
        if self.accelerate.default_swr_secs.is_some() && self.accelerate.default_ttl_secs.is_none() {
            tracing::warn!("accelerate.default_swr_secs is set without default_ttl_secs; entries go stale immediately");
        }
        Ok(())
    }
}
