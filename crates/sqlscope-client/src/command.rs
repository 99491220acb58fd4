//! Commands executed on a connection.

use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use sqlscope_diagnostics::{CommandDescriptor, Snapshot};
use sqlscope_types::OperationCategory;

use crate::connection::{next_handle, Connection};
use crate::error::Result;

/// A row returned by [`Command::execute_query`].
pub type Row = Vec<SqlValue>;

/// A SQL command bound to a connection.
///
/// Every execution is one CommandExecute operation, whichever method runs it.
#[derive(Debug)]
pub struct Command<'c> {
    handle: u64,
    text: Arc<str>,
    connection: &'c Connection,
}

impl<'c> Command<'c> {
    pub(crate) fn new(connection: &'c Connection, text: String) -> Self {
        Self {
            handle: next_handle(),
            text: Arc::from(text),
            connection,
        }
    }

    /// Client-local identity, as published in `Command` descriptors.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn connection(&self) -> &'c Connection {
        self.connection
    }

    /// Snapshot of this command for a `Command` payload field.
    pub fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor {
            handle: self.handle,
            text: Arc::clone(&self.text),
            connection_handle: self.connection.handle(),
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::Command {
            command: self.descriptor(),
            connection_id: self.connection.server_thread(),
        }
    }

    /// Executes a statement that returns no rows. Returns the number of rows changed.
    pub async fn execute_non_query(&self) -> Result<usize> {
        let text = Arc::clone(&self.text);
        self.run(move |conn| conn.execute(&text, [])).await
    }

    /// Executes a query and returns the first column of the first row.
    ///
    /// `None` when the query produced no rows.
    pub async fn execute_scalar(&self) -> Result<Option<SqlValue>> {
        let text = Arc::clone(&self.text);
        self.run(move |conn| {
            let mut stmt = conn.prepare(&text)?;
            let mut rows = stmt.query([])?;
            let first = rows.next()?.map(|row| row.get::<_, SqlValue>(0)).transpose()?;
            Ok(first)
        })
        .await
    }

    /// Executes a query and collects every row.
    pub async fn execute_query(&self) -> Result<Vec<Row>> {
        let text = Arc::clone(&self.text);
        self.run(move |conn| {
            let mut stmt = conn.prepare(&text)?;
            let columns = stmt.column_count();
            let rows = stmt
                .query_map([], |row| {
                    (0..columns)
                        .map(|i| row.get::<_, SqlValue>(i))
                        .collect::<rusqlite::Result<Row>>()
                })?
                .collect::<rusqlite::Result<Vec<Row>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        tracing::debug!(command = self.handle, text = %self.text, "executing command");
        self.connection
            .instrumentation()
            .run(OperationCategory::CommandExecute, || self.snapshot(), self.connection.execute(f))
            .await
    }
}
