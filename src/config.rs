//! Configuration handling for pgbridge.
//!
//! Settings are read through `SettingsStore`, a key-value view of the host's
//! configuration. The binary's store is `Config` (CLI arguments with
//! environment fallbacks); embedders can pass a `HashMap` or their own store.
//! `PoolSettings::from_store` resolves the keys into what the pool needs.

use clap::Parser;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_NAME: &str = "postgres";
pub const DEFAULT_DB_USER: &str = "postgres";

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 2_000;

/// Keys looked up in the host settings store.
pub mod keys {
    pub const HOST: &str = "db_host";
    pub const PORT: &str = "db_port";
    pub const NAME: &str = "db_name";
    pub const USER: &str = "db_user";
    pub const PASSWORD: &str = "db_password";
    pub const MAX_CONNECTIONS: &str = "db_max_connections";
    pub const IDLE_TIMEOUT: &str = "db_idle_timeout";
    pub const CONNECTION_TIMEOUT: &str = "db_connection_timeout";
}

/// Read-only key-value settings provided by the host.
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<String>;
}

impl SettingsStore for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Connection target and pool policy.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct PoolSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    /// Sensitive - never log
    #[serde(skip_serializing)]
    pub password: String,
    pub max_connections: u32,
    pub idle_timeout_ms: u64,
    /// How long an acquirer waits for a free connection
    pub connection_timeout_ms: u64,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: bool,
}

impl std::fmt::Debug for PoolSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolSettings")
            .field("target", &self.masked_url())
            .field("max_connections", &self.max_connections)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("test_before_acquire", &self.test_before_acquire)
            .finish()
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            database: DEFAULT_DB_NAME.to_string(),
            user: DEFAULT_DB_USER.to_string(),
            password: String::new(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            test_before_acquire: true,
        }
    }
}

impl PoolSettings {
    /// Read settings from a host store, falling back to defaults.
    ///
    /// Unparseable numbers fall back to the default as well, matching how
    /// missing keys behave.
    pub fn from_store(store: &impl SettingsStore) -> Self {
        let defaults = Self::default();
        Self {
            host: store.get(keys::HOST).unwrap_or(defaults.host),
            port: parse_or(store, keys::PORT, defaults.port),
            database: store.get(keys::NAME).unwrap_or(defaults.database),
            user: store.get(keys::USER).unwrap_or(defaults.user),
            password: store.get(keys::PASSWORD).unwrap_or(defaults.password),
            max_connections: parse_or(store, keys::MAX_CONNECTIONS, defaults.max_connections),
            idle_timeout_ms: parse_or(store, keys::IDLE_TIMEOUT, defaults.idle_timeout_ms),
            connection_timeout_ms: parse_or(
                store,
                keys::CONNECTION_TIMEOUT,
                defaults.connection_timeout_ms,
            ),
            test_before_acquire: defaults.test_before_acquire,
        }
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host must not be empty".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        if self.connection_timeout_ms == 0 {
            return Err("connection_timeout must be greater than 0".to_string());
        }
        if self.idle_timeout_ms == 0 {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Log-safe rendering of the target, password replaced by `****`.
    pub fn masked_url(&self) -> String {
        let fallback = format!(
            "postgres://{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        );
        let Ok(mut url) = Url::parse(&format!("postgres://{}:{}", self.host, self.port)) else {
            return fallback;
        };
        url.set_path(&self.database);
        if url.set_username(&self.user).is_err() {
            return fallback;
        }
        if !self.password.is_empty() && url.set_password(Some("****")).is_err() {
            return fallback;
        }
        url.to_string()
    }
}

fn parse_or<T: std::str::FromStr>(store: &impl SettingsStore, key: &str, default: T) -> T {
    store
        .get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Configuration for the pgbridge binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pgbridge",
    about = "PostgreSQL access layer for scripting hosts, speaking line-delimited JSON over stdio",
    version,
    author
)]
pub struct Config {
    /// Database server host
    #[arg(long, default_value = DEFAULT_DB_HOST, env = "PGBRIDGE_DB_HOST")]
    pub db_host: String,

    /// Database server port
    #[arg(long, default_value_t = DEFAULT_DB_PORT, env = "PGBRIDGE_DB_PORT")]
    pub db_port: u16,

    /// Database name
    #[arg(long, default_value = DEFAULT_DB_NAME, env = "PGBRIDGE_DB_NAME")]
    pub db_name: String,

    /// Database user
    #[arg(long, default_value = DEFAULT_DB_USER, env = "PGBRIDGE_DB_USER")]
    pub db_user: String,

    /// Database password
    #[arg(
        long,
        default_value = "",
        env = "PGBRIDGE_DB_PASSWORD",
        hide_env_values = true
    )]
    pub db_password: String,

    /// Maximum pooled connections
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_CONNECTIONS,
        env = "PGBRIDGE_DB_MAX_CONNECTIONS"
    )]
    pub db_max_connections: u32,

    /// Idle connection timeout in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_IDLE_TIMEOUT_MS,
        env = "PGBRIDGE_DB_IDLE_TIMEOUT"
    )]
    pub db_idle_timeout: u64,

    /// Connection acquisition timeout in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECTION_TIMEOUT_MS,
        env = "PGBRIDGE_DB_CONNECTION_TIMEOUT"
    )]
    pub db_connection_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "PGBRIDGE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "PGBRIDGE_JSON_LOGS")]
    pub json_logs: bool,
}

/// The binary's flags and environment act as the settings store.
impl SettingsStore for Config {
    fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            keys::HOST => self.db_host.clone(),
            keys::PORT => self.db_port.to_string(),
            keys::NAME => self.db_name.clone(),
            keys::USER => self.db_user.clone(),
            keys::PASSWORD => self.db_password.clone(),
            keys::MAX_CONNECTIONS => self.db_max_connections.to_string(),
            keys::IDLE_TIMEOUT => self.db_idle_timeout.to_string(),
            keys::CONNECTION_TIMEOUT => self.db_connection_timeout.to_string(),
            _ => return None,
        };
        Some(value)
    }
}
