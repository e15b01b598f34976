//! Result and error types for the core library

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core library error type
///
/// Every component fails fast with one of these. Messages never carry the
/// connection secret or bound SQL parameter values.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database connection is not configured")]
    NotConfigured,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Connection pool exhausted: no connection available after {}s", .0.as_secs_f64())]
    PoolExhausted(Duration),

    #[error("Query failed during {statement}: {message}")]
    Query {
        statement: &'static str,
        message: String,
    },

    #[error("Cannot write {}: {reason}", .path.display())]
    FileWrite { path: PathBuf, reason: String },

    #[error("An extraction is already running")]
    Busy,

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a query error for the named statement
    pub fn query(statement: &'static str, msg: impl Into<String>) -> Self {
        Self::Query {
            statement,
            message: msg.into(),
        }
    }

    /// Create a file write error
    pub fn file_write(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileWrite {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Stable classification used in structured failure descriptions
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotConfigured => ErrorKind::NotConfigured,
            Error::Persistence(_) => ErrorKind::Persistence,
            Error::Decryption(_) => ErrorKind::Decryption,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::Network(_) => ErrorKind::Network,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::PoolExhausted(_) => ErrorKind::PoolExhausted,
            Error::Query { .. } => ErrorKind::Query,
            Error::FileWrite { .. } => ErrorKind::FileWrite,
            Error::Busy => ErrorKind::Busy,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the failure is a connectivity problem with the source database
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Authentication
                | ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::PoolExhausted
        )
    }
}

impl From<duckdb::Error> for Error {
    fn from(e: duckdb::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error classification exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotConfigured,
    Persistence,
    Decryption,
    Authentication,
    Network,
    Timeout,
    PoolExhausted,
    Query,
    FileWrite,
    Busy,
    Cancelled,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotConfigured => "not_configured",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Decryption => "decryption",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::Query => "query",
            ErrorKind::FileWrite => "file_write",
            ErrorKind::Busy => "busy",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_names_statement() {
        let err = Error::query("invoice extraction", "relation \"account_move\" does not exist");
        assert_eq!(err.kind(), ErrorKind::Query);
        let msg = err.to_string();
        assert!(msg.contains("invoice extraction"));
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(Error::Network("refused".into()).is_connectivity());
        assert!(Error::PoolExhausted(Duration::from_secs(5)).is_connectivity());
        assert!(!Error::validation("bad date").is_connectivity());
        assert!(!Error::Busy.is_connectivity());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::PoolExhausted).unwrap();
        assert_eq!(json, "\"pool_exhausted\"");
        assert_eq!(ErrorKind::FileWrite.as_str(), "file_write");
    }
}
