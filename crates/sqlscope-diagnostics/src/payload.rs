//! Payload model and per-event payload builders.
//!
//! A payload is an ordered list of named fields, snapshotted at emission
//! time. Every builder here is a pure function of its arguments; the caller
//! samples the clock and the connection state and passes them in.
//!
//! | Category | Before | After | Error |
//! |---|---|---|---|
//! | CommandExecute | `ConnectionId`, `Command` | + `Statistics`, `Timestamp` | + `Exception`, `Timestamp` |
//! | ConnectionOpen | `Connection`, `Timestamp` | `ConnectionId`, `Connection`, `Statistics`, `Timestamp` | `ConnectionId`, `Connection`, `Exception`, `Timestamp` |
//! | ConnectionClose | `ConnectionId`, `Connection`, `Statistics`, `Timestamp` | same as Before | + `Exception` |
//! | TransactionCommit | `IsolationLevel`, `Connection`, `Timestamp` | same as Before | + `Exception` |
//! | TransactionRollback | `IsolationLevel`, `Connection`, `TransactionName`, `Timestamp` | same as Before | + `Exception` |
//!
//! `OperationId` and `Operation` lead every payload.

use std::sync::Arc;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use sqlscope_types::{ConnectionState, EventPhase, IsolationLevel, OperationCategory};

use crate::error::{same_failure, Failure};
use crate::names::operation_label;
use crate::operation_id::OperationId;
use crate::timestamp::Timestamp;

/// Field names, as published.
pub mod fields {
    pub const OPERATION_ID: &str = "OperationId";
    pub const OPERATION: &str = "Operation";
    pub const CONNECTION_ID: &str = "ConnectionId";
    pub const COMMAND: &str = "Command";
    pub const CONNECTION: &str = "Connection";
    pub const STATISTICS: &str = "Statistics";
    pub const TIMESTAMP: &str = "Timestamp";
    pub const EXCEPTION: &str = "Exception";
    pub const ISOLATION_LEVEL: &str = "IsolationLevel";
    pub const TRANSACTION_NAME: &str = "TransactionName";
}

/// Snapshot of a command at emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandDescriptor {
    /// Client-local identity of the command object.
    pub handle: u64,
    /// The command text.
    pub text: Arc<str>,
    /// Handle of the connection the command runs on.
    pub connection_handle: u64,
}

/// Snapshot of a connection at emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionDescriptor {
    /// Client-local identity of the connection object.
    pub handle: u64,
    /// Data source named by the connection string, if it could be read.
    pub data_source: Option<Arc<str>>,
    /// Connection state when the snapshot was taken.
    pub state: ConnectionState,
}

/// A single field value.
#[derive(Debug, Clone)]
pub enum Value {
    /// An absent value (`Statistics`, `TransactionName`, a closed connection's id).
    Null,
    /// Correlation identifier.
    OperationId(OperationId),
    /// Operation label.
    Label(&'static str),
    /// Server-side session identifier of the connection.
    ConnectionId(u32),
    /// Monotonic emission time.
    Timestamp(Timestamp),
    /// The command being executed.
    Command(CommandDescriptor),
    /// The connection being operated on.
    Connection(ConnectionDescriptor),
    /// Isolation level of the transaction.
    IsolationLevel(IsolationLevel),
    /// The failure raised by the operation.
    Failure(Failure),
}

impl Value {
    fn connection_id(id: Option<u32>) -> Self {
        id.map_or(Self::Null, Self::ConnectionId)
    }

    /// Whether this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::OperationId(a), Self::OperationId(b)) => a == b,
            (Self::Label(a), Self::Label(b)) => a == b,
            (Self::ConnectionId(a), Self::ConnectionId(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Command(a), Self::Command(b)) => a == b,
            (Self::Connection(a), Self::Connection(b)) => a == b,
            (Self::IsolationLevel(a), Self::IsolationLevel(b)) => a == b,
            (Self::Failure(a), Self::Failure(b)) => same_failure(a, b),
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::OperationId(id) => id.serialize(serializer),
            Self::Label(label) => serializer.serialize_str(label),
            Self::ConnectionId(id) => serializer.serialize_u32(*id),
            Self::Timestamp(ts) => ts.serialize(serializer),
            Self::Command(command) => command.serialize(serializer),
            Self::Connection(connection) => connection.serialize(serializer),
            Self::IsolationLevel(level) => serializer.serialize_str(level.as_str()),
            Self::Failure(failure) => serializer.collect_str(failure),
        }
    }
}

/// Ordered field mapping published with one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    fields: Vec<(&'static str, Value)>,
}

impl Payload {
    fn with_capacity(id: OperationId, category: OperationCategory, capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity + 2);
        entries.push((fields::OPERATION_ID, Value::OperationId(id)));
        entries.push((fields::OPERATION, Value::Label(operation_label(category))));
        Self { fields: entries }
    }

    fn push(mut self, name: &'static str, value: Value) -> Self {
        self.fields.push((name, value));
        self
    }

    /// Looks up a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    /// Whether the payload carries a field with this name.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over fields in publication order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.fields.iter().map(|(name, value)| (*name, value))
    }

    /// Field names in publication order.
    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|(name, _)| *name).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `OperationId` field.
    pub fn operation_id(&self) -> Option<OperationId> {
        match self.get(fields::OPERATION_ID) {
            Some(Value::OperationId(id)) => Some(*id),
            _ => None,
        }
    }

    /// The `Operation` label.
    pub fn operation(&self) -> Option<&'static str> {
        match self.get(fields::OPERATION) {
            Some(Value::Label(label)) => Some(*label),
            _ => None,
        }
    }

    /// The `ConnectionId` field. `Some(None)` means the field is present but null.
    pub fn connection_id(&self) -> Option<Option<u32>> {
        match self.get(fields::CONNECTION_ID)? {
            Value::ConnectionId(id) => Some(Some(*id)),
            _ => Some(None),
        }
    }

    /// The `Timestamp` field.
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self.get(fields::TIMESTAMP) {
            Some(Value::Timestamp(ts)) => Some(*ts),
            _ => None,
        }
    }

    /// The `Command` field.
    pub fn command(&self) -> Option<&CommandDescriptor> {
        match self.get(fields::COMMAND) {
            Some(Value::Command(command)) => Some(command),
            _ => None,
        }
    }

    /// The `Connection` field.
    pub fn connection(&self) -> Option<&ConnectionDescriptor> {
        match self.get(fields::CONNECTION) {
            Some(Value::Connection(connection)) => Some(connection),
            _ => None,
        }
    }

    /// The `IsolationLevel` field.
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        match self.get(fields::ISOLATION_LEVEL) {
            Some(Value::IsolationLevel(level)) => Some(*level),
            _ => None,
        }
    }

    /// The `Exception` field.
    pub fn failure(&self) -> Option<&Failure> {
        match self.get(fields::EXCEPTION) {
            Some(Value::Failure(failure)) => Some(failure),
            _ => None,
        }
    }

    /// Renders the payload as a JSON object string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// What an operation is about, captured from the live objects.
///
/// The wrapper asks for a fresh snapshot at each emission so that state
/// changes made by the work (a connection acquiring a session id on open)
/// show up in the terminal payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// A command execution.
    Command {
        command: CommandDescriptor,
        connection_id: Option<u32>,
    },
    /// A connection open or close.
    Connection {
        connection: ConnectionDescriptor,
        connection_id: Option<u32>,
    },
    /// A transaction commit or rollback.
    Transaction {
        connection: ConnectionDescriptor,
        isolation_level: IsolationLevel,
    },
}

impl Snapshot {
    /// The session id carried by this snapshot, if the subject has one.
    pub fn connection_id(&self) -> Option<u32> {
        match self {
            Self::Command { connection_id, .. } | Self::Connection { connection_id, .. } => {
                *connection_id
            }
            Self::Transaction { .. } => None,
        }
    }

    /// Replaces the session id with a value captured earlier.
    pub fn with_connection_id(mut self, id: Option<u32>) -> Self {
        match &mut self {
            Self::Command { connection_id, .. } | Self::Connection { connection_id, .. } => {
                *connection_id = id;
            }
            Self::Transaction { .. } => {}
        }
        self
    }
}

pub fn command_before(id: OperationId, command: CommandDescriptor, connection_id: Option<u32>) -> Payload {
    Payload::with_capacity(id, OperationCategory::CommandExecute, 2)
        .push(fields::CONNECTION_ID, Value::connection_id(connection_id))
        .push(fields::COMMAND, Value::Command(command))
}

pub fn command_after(
    id: OperationId,
    command: CommandDescriptor,
    connection_id: Option<u32>,
    at: Timestamp,
) -> Payload {
    Payload::with_capacity(id, OperationCategory::CommandExecute, 4)
        .push(fields::CONNECTION_ID, Value::connection_id(connection_id))
        .push(fields::COMMAND, Value::Command(command))
        .push(fields::STATISTICS, Value::Null)
        .push(fields::TIMESTAMP, Value::Timestamp(at))
}

pub fn command_error(
    id: OperationId,
    command: CommandDescriptor,
    connection_id: Option<u32>,
    failure: Failure,
    at: Timestamp,
) -> Payload {
    Payload::with_capacity(id, OperationCategory::CommandExecute, 4)
        .push(fields::CONNECTION_ID, Value::connection_id(connection_id))
        .push(fields::COMMAND, Value::Command(command))
        .push(fields::EXCEPTION, Value::Failure(failure))
        .push(fields::TIMESTAMP, Value::Timestamp(at))
}

pub fn connection_open_before(id: OperationId, connection: ConnectionDescriptor, at: Timestamp) -> Payload {
    Payload::with_capacity(id, OperationCategory::ConnectionOpen, 2)
        .push(fields::CONNECTION, Value::Connection(connection))
        .push(fields::TIMESTAMP, Value::Timestamp(at))
}

pub fn connection_open_after(
    id: OperationId,
    connection: ConnectionDescriptor,
    connection_id: Option<u32>,
    at: Timestamp,
) -> Payload {
    Payload::with_capacity(id, OperationCategory::ConnectionOpen, 4)
        .push(fields::CONNECTION_ID, Value::connection_id(connection_id))
        .push(fields::CONNECTION, Value::Connection(connection))
        .push(fields::STATISTICS, Value::Null)
        .push(fields::TIMESTAMP, Value::Timestamp(at))
}

pub fn connection_open_error(
    id: OperationId,
    connection: ConnectionDescriptor,
    connection_id: Option<u32>,
    failure: Failure,
    at: Timestamp,
) -> Payload {
    Payload::with_capacity(id, OperationCategory::ConnectionOpen, 4)
        .push(fields::CONNECTION_ID, Value::connection_id(connection_id))
        .push(fields::CONNECTION, Value::Connection(connection))
        .push(fields::EXCEPTION, Value::Failure(failure))
        .push(fields::TIMESTAMP, Value::Timestamp(at))
}

fn with_failure(payload: Payload, failure: Option<Failure>) -> Payload {
    match failure {
        Some(failure) => payload.push(fields::EXCEPTION, Value::Failure(failure)),
        None => payload,
    }
}

/// Close payloads share one shape; After and Error reuse the id captured
/// for Before.
pub fn connection_close(
    id: OperationId,
    connection: ConnectionDescriptor,
    connection_id: Option<u32>,
    failure: Option<Failure>,
    at: Timestamp,
) -> Payload {
    let payload = Payload::with_capacity(id, OperationCategory::ConnectionClose, 5)
        .push(fields::CONNECTION_ID, Value::connection_id(connection_id))
        .push(fields::CONNECTION, Value::Connection(connection))
        .push(fields::STATISTICS, Value::Null);
    with_failure(payload, failure).push(fields::TIMESTAMP, Value::Timestamp(at))
}

pub fn transaction_commit(
    id: OperationId,
    isolation_level: IsolationLevel,
    connection: ConnectionDescriptor,
    failure: Option<Failure>,
    at: Timestamp,
) -> Payload {
    let payload = Payload::with_capacity(id, OperationCategory::TransactionCommit, 4)
        .push(fields::ISOLATION_LEVEL, Value::IsolationLevel(isolation_level))
        .push(fields::CONNECTION, Value::Connection(connection));
    with_failure(payload, failure).push(fields::TIMESTAMP, Value::Timestamp(at))
}

/// `TransactionName` is always null: named rollbacks are not supported, the
/// field only keeps the payload shape other tooling expects.
pub fn transaction_rollback(
    id: OperationId,
    isolation_level: IsolationLevel,
    connection: ConnectionDescriptor,
    failure: Option<Failure>,
    at: Timestamp,
) -> Payload {
    let payload = Payload::with_capacity(id, OperationCategory::TransactionRollback, 5)
        .push(fields::ISOLATION_LEVEL, Value::IsolationLevel(isolation_level))
        .push(fields::CONNECTION, Value::Connection(connection))
        .push(fields::TRANSACTION_NAME, Value::Null);
    with_failure(payload, failure).push(fields::TIMESTAMP, Value::Timestamp(at))
}

/// Builds the payload for any category and phase from a snapshot.
///
/// `failure` is only read for [`EventPhase::Error`], where it is required.
/// A missing failure, or a snapshot that does not fit the category (a
/// transaction snapshot for a command), yields `None`.
pub fn build(
    category: OperationCategory,
    phase: EventPhase,
    id: OperationId,
    snapshot: Snapshot,
    failure: Option<Failure>,
    at: Timestamp,
) -> Option<Payload> {
    use OperationCategory::*;

    let failure = match phase {
        EventPhase::Error => Some(failure?),
        EventPhase::Before | EventPhase::After => None,
    };

    let payload = match (category, snapshot) {
        (CommandExecute, Snapshot::Command { command, connection_id }) => match (phase, failure) {
            (EventPhase::Before, _) => command_before(id, command, connection_id),
            (EventPhase::After, _) => command_after(id, command, connection_id, at),
            (EventPhase::Error, failure) => {
                command_error(id, command, connection_id, failure?, at)
            }
        },
        (ConnectionOpen, Snapshot::Connection { connection, connection_id }) => {
            match (phase, failure) {
                (EventPhase::Before, _) => connection_open_before(id, connection, at),
                (EventPhase::After, _) => connection_open_after(id, connection, connection_id, at),
                (EventPhase::Error, failure) => {
                    connection_open_error(id, connection, connection_id, failure?, at)
                }
            }
        }
        (ConnectionClose, Snapshot::Connection { connection, connection_id }) => {
            connection_close(id, connection, connection_id, failure, at)
        }
        (TransactionCommit, Snapshot::Transaction { connection, isolation_level }) => {
            transaction_commit(id, isolation_level, connection, failure, at)
        }
        (TransactionRollback, Snapshot::Transaction { connection, isolation_level }) => {
            transaction_rollback(id, isolation_level, connection, failure, at)
        }
        _ => return None,
    };

    Some(payload)
}
