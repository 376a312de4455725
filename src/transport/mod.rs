//! Transport layer between pgbridge and its host.
//!
//! - Stdio: line-delimited JSON over standard input/output

pub mod stdio;

pub use stdio::{StdioTransport, StopReason};

use crate::error::DbResult;
use std::future::Future;

/// Trait for host transport implementations.
pub trait Transport: Send + Sync {
    /// Start the transport and begin handling host calls.
    ///
    /// This method should block until the transport is shut down.
    fn run(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
