//! Crate-wide error type.
//!
//! Failures are classified so the operator can distinguish
//! "too slow" from "broken": transient network errors and backend timeouts
//! are retried, schema/protocol mismatches are fatal for the current read,
//! and authorization failures are downgraded or surfaced via the status
//! word depending on which query failed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("network error talking to backend: {0}")]
    Network(#[from] sqlx::Error),

    #[error("backend-side statement timeout")]
    StatementTimeout,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error("unexpected column count in replication status row: got {got}, expected {expected}")]
    UnexpectedColumnCount { got: usize, expected: usize },

    #[error("could not parse GTID list: {0}")]
    InvalidGtid(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("server {0} is not usable for this operation: {1}")]
    NotUsable(String, String),

    #[error("no such server: {0}")]
    NoSuchServer(String),

    #[error("orchestration step failed: {0}")]
    Orchestration(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// MariaDB error codes that mean "the connected user lacks a privilege",
/// whether the failure surfaces at connection time (1045) or against a
/// specific table/column once connected (1142, 1143, 1227).
const ACCESS_DENIED_CODES: &[&str] = &["1045", "1142", "1143", "1227"];

pub fn is_access_denied_code(code: &str) -> bool {
    ACCESS_DENIED_CODES.contains(&code)
}

impl Error {
    /// Transient network errors and backend statement-timeout interruptions
    /// are retried under the active budget; everything else (access-denied,
    /// other database errors) terminates the attempt immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::StatementTimeout)
    }
}
