//! Error type returned by every client operation.

use std::sync::Arc;

use sqlscope_diagnostics::{same_failure, Failure, ReportFailure};

/// Shorthand for client results.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What went wrong.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The connection string could not be parsed.
    #[error("invalid connection string: {0}")]
    ConnectionString(String),

    /// The engine rejected the operation.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The operation is not valid in the connection's current state.
    #[error("invalid operation: {0}")]
    InvalidState(&'static str),

    /// The blocking task running the engine call panicked or was cancelled.
    #[error("engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A client error.
///
/// Cheap to clone. The published `Exception` field of an Error event shares
/// this error's allocation, so [`Error::is_same`] can match the two.
#[derive(Debug, Clone)]
pub struct Error(Arc<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Whether `failure` is this very error.
    pub fn is_same(&self, failure: &Failure) -> bool {
        same_failure(&self.to_failure(), failure)
    }

    pub(crate) fn connection_string(message: impl Into<String>) -> Self {
        ErrorKind::ConnectionString(message.into()).into()
    }

    pub(crate) fn invalid_state(message: &'static str) -> Self {
        ErrorKind::InvalidState(message).into()
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self(Arc::new(kind))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        ErrorKind::Sqlite(e).into()
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        ErrorKind::Task(e).into()
    }
}

impl ReportFailure for Error {
    fn to_failure(&self) -> Failure {
        self.0.clone()
    }
}
