//! Transactions and their commit/rollback instrumentation.

use sqlscope_diagnostics::Snapshot;
use sqlscope_types::{IsolationLevel, OperationCategory};

use crate::connection::Connection;
use crate::error::{Error, Result};

/// An active transaction.
///
/// Dropping a transaction that was neither committed nor rolled back rolls
/// it back, publishing the same Rollback events as [`Transaction::rollback`].
/// A failed commit leaves the transaction active, so it is rolled back when
/// the consumed transaction drops.
///
/// A transaction only ever ends the engine transaction it began. Once the
/// connection closes, the handle is inert: committing or rolling it back
/// fails with `InvalidState` and dropping it does nothing, even if the
/// connection has since been reopened with a new transaction.
#[derive(Debug)]
pub struct Transaction<'c> {
    connection: &'c Connection,
    isolation_level: IsolationLevel,
    token: u64,
    finished: bool,
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(connection: &'c Connection, isolation_level: IsolationLevel, token: u64) -> Self {
        Self {
            connection,
            isolation_level,
            token,
            finished: false,
        }
    }

    pub fn connection(&self) -> &'c Connection {
        self.connection
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::Transaction {
            connection: self.connection.descriptor(),
            isolation_level: self.isolation_level,
        }
    }

    fn is_active(&self) -> bool {
        !self.finished && self.connection.owns_transaction(self.token)
    }

    async fn end(&self, sql: &'static str) -> Result<()> {
        if !self.is_active() {
            return Err(Error::invalid_state("transaction is no longer active"));
        }
        self.connection.execute(move |conn| conn.execute_batch(sql)).await
    }

    /// Commits the transaction.
    pub async fn commit(mut self) -> Result<()> {
        let result = self
            .connection
            .instrumentation()
            .run(
                OperationCategory::TransactionCommit,
                || self.snapshot(),
                self.end("COMMIT"),
            )
            .await;

        if result.is_ok() {
            self.finish();
        }
        result
    }

    /// Rolls the transaction back.
    ///
    /// The transaction is over afterwards even if the engine reports an
    /// error, so dropping it does not roll back a second time.
    pub async fn rollback(mut self) -> Result<()> {
        let result = self
            .connection
            .instrumentation()
            .run(
                OperationCategory::TransactionRollback,
                || self.snapshot(),
                self.end("ROLLBACK"),
            )
            .await;

        self.finish();
        result
    }

    fn finish(&mut self) {
        self.finished = true;
        self.connection.end_transaction(self.token);
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        // Closing the connection already rolled this transaction back.
        if !self.is_active() {
            return;
        }

        tracing::debug!(
            connection = self.connection.handle(),
            "rolling back transaction dropped without commit or rollback"
        );

        // Drop cannot await, so the rollback holds the session lock and runs
        // the engine call on the dropping thread, even inside the runtime.
        let result = self.connection.instrumentation().run_blocking(
            OperationCategory::TransactionRollback,
            || self.snapshot(),
            || {
                self.connection
                    .execute_blocking(|conn| conn.execute_batch("ROLLBACK"))
            },
        );
        self.finish();

        if let Err(e) = result {
            tracing::warn!(
                connection = self.connection.handle(),
                error = %e,
                "implicit rollback of dropped transaction failed"
            );
        }
    }
}
