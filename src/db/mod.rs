//! Database access layer.
//!
//! This module provides database access functionality:
//! - Named-parameter translation
//! - Connection pool management with readiness gating
//! - Single-statement execution
//! - Scoped transactions
//! - Postgres type mappings
//! - Parameter map macro

#[macro_use]
pub mod macros;

pub mod database;
pub mod executor;
pub(crate) mod params;
pub mod pool;
pub mod sql;
pub mod transaction;
pub mod translate;
pub mod types;

pub use database::Database;
pub use executor::QueryExecutor;
pub use pool::PoolManager;
pub use transaction::{TransactionCoordinator, TxConnection};
pub use translate::{TranslatedQuery, translate};
