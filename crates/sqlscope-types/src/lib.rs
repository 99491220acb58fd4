//! Shared types for the sqlscope workspace.
//!
//! This crate holds the small closed enumerations that both the diagnostics
//! core and the database client need: transaction isolation levels,
//! connection states, operation categories and event phases. Keeping them
//! here lets `sqlscope-diagnostics` describe a connection without depending on
//! the client that owns it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a textual label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseTypeError {
    /// The kind of value that was being parsed (e.g. "isolation level").
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl ParseTypeError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Transaction isolation levels.
///
/// The labels match the names generic database tooling expects to see in a
/// transaction payload (`ReadCommitted`, `Serializable`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// No level was requested; the engine default applies.
    #[default]
    Unspecified,
    /// Dirty reads are allowed.
    ReadUncommitted,
    /// Only committed data is visible.
    ReadCommitted,
    /// Reads within the transaction are repeatable.
    RepeatableRead,
    /// Full serializability.
    Serializable,
    /// Snapshot isolation.
    Snapshot,
}

impl IsolationLevel {
    /// Returns the canonical label for this level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "Unspecified",
            Self::ReadUncommitted => "ReadUncommitted",
            Self::ReadCommitted => "ReadCommitted",
            Self::RepeatableRead => "RepeatableRead",
            Self::Serializable => "Serializable",
            Self::Snapshot => "Snapshot",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unspecified" => Ok(Self::Unspecified),
            "ReadUncommitted" => Ok(Self::ReadUncommitted),
            "ReadCommitted" => Ok(Self::ReadCommitted),
            "RepeatableRead" => Ok(Self::RepeatableRead),
            "Serializable" => Ok(Self::Serializable),
            "Snapshot" => Ok(Self::Snapshot),
            _ => Err(ParseTypeError::new("isolation level", s)),
        }
    }
}

/// Lifecycle state of a database connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected. The initial state, and the state after `close`.
    #[default]
    Closed,
    /// An open is in progress.
    Connecting,
    /// Connected and usable.
    Open,
}

impl ConnectionState {
    /// Returns the canonical label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "Closed",
            Self::Connecting => "Connecting",
            Self::Open => "Open",
        }
    }

    /// Whether the connection holds a live session in this state.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectionState {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Closed" => Ok(Self::Closed),
            "Connecting" => Ok(Self::Connecting),
            "Open" => Ok(Self::Open),
            _ => Err(ParseTypeError::new("connection state", s)),
        }
    }
}

/// The kind of operation being instrumented.
///
/// Closed set: each category owns one group of three channel names and one
/// payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationCategory {
    /// A command sent to the engine.
    CommandExecute,
    /// Opening a connection.
    ConnectionOpen,
    /// Closing a connection.
    ConnectionClose,
    /// Committing a transaction.
    TransactionCommit,
    /// Rolling back a transaction.
    TransactionRollback,
}

impl OperationCategory {
    /// Every category, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::CommandExecute,
        Self::ConnectionOpen,
        Self::ConnectionClose,
        Self::TransactionCommit,
        Self::TransactionRollback,
    ];

    /// Returns the canonical label for this category.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CommandExecute => "CommandExecute",
            Self::ConnectionOpen => "ConnectionOpen",
            Self::ConnectionClose => "ConnectionClose",
            Self::TransactionCommit => "TransactionCommit",
            Self::TransactionRollback => "TransactionRollback",
        }
    }
}

impl std::fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationCategory {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CommandExecute" => Ok(Self::CommandExecute),
            "ConnectionOpen" => Ok(Self::ConnectionOpen),
            "ConnectionClose" => Ok(Self::ConnectionClose),
            "TransactionCommit" => Ok(Self::TransactionCommit),
            "TransactionRollback" => Ok(Self::TransactionRollback),
            _ => Err(ParseTypeError::new("operation category", s)),
        }
    }
}

/// Stage of a single instrumented operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventPhase {
    /// Emitted before the work starts.
    Before,
    /// Emitted after the work succeeded.
    After,
    /// Emitted after the work failed or was cancelled.
    Error,
}

impl EventPhase {
    /// Every phase, in emission order.
    pub const ALL: [Self; 3] = [Self::Before, Self::After, Self::Error];

    /// Returns the canonical label for this phase.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "Before",
            Self::After => "After",
            Self::Error => "Error",
        }
    }

    /// Whether this phase ends an operation.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Before)
    }
}

impl std::fmt::Display for EventPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventPhase {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Before" => Ok(Self::Before),
            "After" => Ok(Self::After),
            "Error" => Ok(Self::Error),
            _ => Err(ParseTypeError::new("event phase", s)),
        }
    }
}
