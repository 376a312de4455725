//! Error types for pgbridge.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! The core always propagates these errors; only the bridge layer converts them into
//! host sentinels.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database is not ready: {reason}")]
    NotReady { reason: String },

    #[error("Missing value for named parameter ':{parameter}'")]
    Translation { parameter: String },

    #[error("Timed out after {timeout_ms}ms waiting for a pooled connection")]
    AcquisitionTimeout { timeout_ms: u64 },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Transaction failed during {stage}: {source}")]
    Transaction {
        stage: TransactionStage,
        #[source]
        source: Box<DbError>,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Point of the transaction lifecycle where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStage {
    Begin,
    UnitOfWork,
    Commit,
}

impl std::fmt::Display for TransactionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Begin => write!(f, "BEGIN"),
            Self::UnitOfWork => write!(f, "unit of work"),
            Self::Commit => write!(f, "COMMIT"),
        }
    }
}

impl DbError {
    /// Create a not-ready error.
    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::NotReady {
            reason: reason.into(),
        }
    }

    /// Create a translation error for a placeholder without a value.
    pub fn translation(parameter: impl Into<String>) -> Self {
        Self::Translation {
            parameter: parameter.into(),
        }
    }

    /// Create an acquisition timeout error.
    pub fn acquisition_timeout(timeout_ms: u64) -> Self {
        Self::AcquisitionTimeout { timeout_ms }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Wrap a failure that ended a transaction.
    pub fn transaction(stage: TransactionStage, source: DbError) -> Self {
        Self::Transaction {
            stage,
            source: Box::new(source),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::NotReady { .. } => Some("Check the database settings and server availability"),
            Self::AcquisitionTimeout { .. } => {
                Some("Raise the connection timeout or the pool size, or shorten transactions")
            }
            Self::Transaction { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// Get the SQLSTATE reported by the server, looking through transaction wrappers.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            Self::Transaction { source, .. } => source.sql_state(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::AcquisitionTimeout { .. } => true,
            Self::Transaction { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the database host, port, name and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            // The configured wait is attached by the pool manager, which knows it.
            sqlx::Error::PoolTimedOut => DbError::acquisition_timeout(0),
            sqlx::Error::PoolClosed => DbError::not_ready("connection pool is closed"),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::internal(format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
