//! Data models for pgbridge.
//!
//! This module re-exports all model types used throughout the crate.

pub mod query;

// Re-export commonly used types
pub use query::{MAX_BIND_PARAMS, NamedParams, PoolInfo, QueryParam, Row};
