//! Failure types carried by Error-phase payloads.

use std::sync::Arc;

/// The failure detail published with an Error event.
///
/// Shared rather than copied: the instrumented code hands subscribers the
/// same allocation it returns to its caller, so identity survives the trip
/// through the listener.
pub type Failure = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Published as the failure detail when an operation is abandoned before it
/// settles, either because its future was dropped or because the work
/// panicked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} was cancelled before it completed")]
pub struct OperationCancelled {
    /// The operation label of the abandoned operation (e.g. `Commit`).
    pub operation: &'static str,
}

/// Converts an operation's error into the failure detail to publish.
///
/// Implementations must not summarise or rewrap the error; the returned
/// value should be the error itself (or share its allocation).
pub trait ReportFailure {
    /// Returns the failure detail for this error.
    fn to_failure(&self) -> Failure;
}

impl ReportFailure for Failure {
    fn to_failure(&self) -> Failure {
        Arc::clone(self)
    }
}

/// Whether two failures are the same object.
pub fn same_failure(a: &Failure, b: &Failure) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
