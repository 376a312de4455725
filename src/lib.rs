//! pgbridge Library
//!
//! PostgreSQL access layer for scripting hosts: named-parameter queries,
//! a readiness-gated connection pool and scoped transactions, exposed to the
//! host through a sentinel-returning bridge.

pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod transport;

pub use bridge::Bridge;
pub use config::{Config, PoolSettings, SettingsStore};
pub use db::Database;
pub use error::{DbError, DbResult};
pub use models::{NamedParams, QueryParam, Row};
