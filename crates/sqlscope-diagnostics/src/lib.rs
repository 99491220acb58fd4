//! Diagnostic event emission for the sqlscope database client.
//!
//! Announces the start, successful completion and failure of client
//! operations to passive subscribers. Subscribers observe; they never change
//! an operation's outcome, and when nobody is subscribed the instrumentation
//! allocates, formats and publishes nothing.
//!
//! # Event correlation
//!
//! Each announced operation gets a fresh [`OperationId`]. The Before event
//! carries it, and exactly one terminal event (After on success, Error on
//! failure or cancellation) carries it again once the work has settled.
//! Concurrent operations are told apart by identifier only, never by
//! ordering.
//!
//! # Channels
//!
//! | Category | Before | After | Error |
//! |----------|--------|-------|-------|
//! | Command | `WriteCommandBefore` | `WriteCommandAfter` | `WriteCommandError` |
//! | Open | `WriteConnectionOpenBefore` | `WriteConnectionOpenAfter` | `WriteConnectionOpenError` |
//! | Close | `WriteConnectionCloseBefore` | `WriteConnectionCloseAfter` | `WriteConnectionCloseError` |
//! | Commit | `WriteTransactionCommitBefore` | `WriteTransactionCommitAfter` | `WriteTransactionCommitError` |
//! | Rollback | `WriteTransactionRollbackBefore` | `WriteTransactionRollbackAfter` | `WriteTransactionRollbackError` |
//!
//! All names carry the `MySql.Data.MySqlClient.` prefix and are published on
//! the `MySqlClientDiagnosticListener` listener.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sqlscope_diagnostics::{DiagnosticListener, Instrumentation};
//! use sqlscope_types::OperationCategory;
//!
//! let listener = DiagnosticListener::global();
//! let mut events = listener.subscribe_all();
//!
//! let instrumentation = Instrumentation::new(listener);
//! let rows = instrumentation
//!     .run(OperationCategory::CommandExecute, || command.snapshot(), command.run())
//!     .await?;
//! ```

mod error;
pub mod instrument;
pub mod listener;
pub mod names;
mod operation_id;
pub mod payload;
mod timestamp;
pub mod trace;

pub use error::{same_failure, Failure, OperationCancelled, ReportFailure};
pub use instrument::{Instrumentation, OperationScope};
pub use listener::{DiagnosticEvent, DiagnosticListener, EventSubscription};
pub use operation_id::OperationId;
pub use payload::{CommandDescriptor, ConnectionDescriptor, Payload, Snapshot, Value};
pub use timestamp::{Timestamp, TICKS_PER_SECOND};
