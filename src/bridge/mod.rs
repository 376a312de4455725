//! Boundary between the scripting host and the database service.
//!
//! This module contains:
//! - `protocol`: the line-delimited JSON call and response types
//! - `service`: the `Bridge`, which maps calls onto `Database` and converts
//!   failures into sentinels

pub mod protocol;
pub mod service;

pub use protocol::{ExportCall, HostRequest, HostResponse, Statement, StatementMode};
pub use service::Bridge;
