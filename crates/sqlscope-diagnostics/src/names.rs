//! Channel names used for emission.
//!
//! The names follow the database-client diagnostic convention that generic
//! instrumentation consumers already understand: one listener name shared by
//! every event, and per-event names of the form
//! `MySql.Data.MySqlClient.<MethodName>`. These strings are a wire contract
//! and must not change.

use sqlscope_types::{EventPhase, OperationCategory};

/// Name of the listener every event is published on.
pub const LISTENER_NAME: &str = "MySqlClientDiagnosticListener";

// The one place the namespace is spelled out; `CHANNEL_PREFIX` and every
// channel constant expand from it.
macro_rules! channel {
    ($method:literal) => {
        concat!("MySql.Data.MySqlClient.", $method)
    };
}

/// Namespace prefix shared by every channel name.
pub const CHANNEL_PREFIX: &str = channel!("");

pub const COMMAND_BEFORE: &str = channel!("WriteCommandBefore");
pub const COMMAND_AFTER: &str = channel!("WriteCommandAfter");
pub const COMMAND_ERROR: &str = channel!("WriteCommandError");

pub const CONNECTION_OPEN_BEFORE: &str = channel!("WriteConnectionOpenBefore");
pub const CONNECTION_OPEN_AFTER: &str = channel!("WriteConnectionOpenAfter");
pub const CONNECTION_OPEN_ERROR: &str = channel!("WriteConnectionOpenError");

pub const CONNECTION_CLOSE_BEFORE: &str = channel!("WriteConnectionCloseBefore");
pub const CONNECTION_CLOSE_AFTER: &str = channel!("WriteConnectionCloseAfter");
pub const CONNECTION_CLOSE_ERROR: &str = channel!("WriteConnectionCloseError");

pub const TRANSACTION_COMMIT_BEFORE: &str = channel!("WriteTransactionCommitBefore");
pub const TRANSACTION_COMMIT_AFTER: &str = channel!("WriteTransactionCommitAfter");
pub const TRANSACTION_COMMIT_ERROR: &str = channel!("WriteTransactionCommitError");

pub const TRANSACTION_ROLLBACK_BEFORE: &str = channel!("WriteTransactionRollbackBefore");
pub const TRANSACTION_ROLLBACK_AFTER: &str = channel!("WriteTransactionRollbackAfter");
pub const TRANSACTION_ROLLBACK_ERROR: &str = channel!("WriteTransactionRollbackError");

/// Returns the channel name for a category and phase.
pub fn channel_name(category: OperationCategory, phase: EventPhase) -> &'static str {
    use EventPhase::*;
    use OperationCategory::*;

    match (category, phase) {
        (CommandExecute, Before) => COMMAND_BEFORE,
        (CommandExecute, After) => COMMAND_AFTER,
        (CommandExecute, Error) => COMMAND_ERROR,
        (ConnectionOpen, Before) => CONNECTION_OPEN_BEFORE,
        (ConnectionOpen, After) => CONNECTION_OPEN_AFTER,
        (ConnectionOpen, Error) => CONNECTION_OPEN_ERROR,
        (ConnectionClose, Before) => CONNECTION_CLOSE_BEFORE,
        (ConnectionClose, After) => CONNECTION_CLOSE_AFTER,
        (ConnectionClose, Error) => CONNECTION_CLOSE_ERROR,
        (TransactionCommit, Before) => TRANSACTION_COMMIT_BEFORE,
        (TransactionCommit, After) => TRANSACTION_COMMIT_AFTER,
        (TransactionCommit, Error) => TRANSACTION_COMMIT_ERROR,
        (TransactionRollback, Before) => TRANSACTION_ROLLBACK_BEFORE,
        (TransactionRollback, After) => TRANSACTION_ROLLBACK_AFTER,
        (TransactionRollback, Error) => TRANSACTION_ROLLBACK_ERROR,
    }
}

/// Maps a channel name back to its category and phase.
///
/// Returns `None` for names outside the registry.
pub fn parse_channel_name(name: &str) -> Option<(OperationCategory, EventPhase)> {
    if !name.starts_with(CHANNEL_PREFIX) {
        return None;
    }
    OperationCategory::ALL.into_iter().find_map(|category| {
        EventPhase::ALL
            .into_iter()
            .find(|&phase| channel_name(category, phase) == name)
            .map(|phase| (category, phase))
    })
}

/// Returns the default operation label published in the `Operation` field.
///
/// These labels mirror another client's defaults and are published as-is,
/// even when the executed method differs (every command reports
/// `ExecuteScalar`).
pub fn operation_label(category: OperationCategory) -> &'static str {
    match category {
        OperationCategory::CommandExecute => "ExecuteScalar",
        OperationCategory::ConnectionOpen => "Open",
        OperationCategory::ConnectionClose => "Close",
        OperationCategory::TransactionCommit => "Commit",
        OperationCategory::TransactionRollback => "Rollback",
    }
}
