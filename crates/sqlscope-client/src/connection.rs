//! Instrumented connections.
//!
//! A [`Connection`] owns at most one engine session at a time. Opening and
//! closing are announced on the connection's diagnostic listener; commands
//! and transactions created from it publish on the same listener.
//!
//! Engine calls are blocking, so they run on tokio's blocking pool with the
//! session behind a mutex. The connection's own bookkeeping lives behind a
//! separate mutex that is never held across an await.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use sqlscope_diagnostics::{ConnectionDescriptor, DiagnosticListener, Instrumentation, Snapshot};
use sqlscope_types::{ConnectionState, IsolationLevel, OperationCategory};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::options::{peek_data_source, ConnectionOptions};
use crate::transaction::Transaction;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);
static NEXT_SESSION: AtomicU32 = AtomicU32::new(1);

pub(crate) fn next_handle() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

pub(crate) type Session = Arc<Mutex<rusqlite::Connection>>;

/// The transaction the connection currently considers active.
///
/// `token` ties it to the one [`Transaction`] handle allowed to end it.
#[derive(Debug, Clone, Copy)]
struct ActiveTransaction {
    token: u64,
    isolation_level: IsolationLevel,
}

#[derive(Debug, Default)]
struct Inner {
    state: ConnectionState,
    session_id: Option<u32>,
    session: Option<Session>,
    data_source: Option<Arc<str>>,
    transaction: Option<ActiveTransaction>,
}

/// A database connection.
#[derive(Debug)]
pub struct Connection {
    handle: u64,
    connection_string: String,
    instrumentation: Instrumentation,
    inner: Mutex<Inner>,
}

impl Connection {
    /// Creates a closed connection that publishes on the global listener.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self::with_listener(connection_string, DiagnosticListener::global())
    }

    /// Creates a closed connection that publishes on `listener`.
    pub fn with_listener(connection_string: impl Into<String>, listener: Arc<DiagnosticListener>) -> Self {
        let connection_string = connection_string.into();
        let data_source = peek_data_source(&connection_string).map(Arc::from);
        Self {
            handle: next_handle(),
            connection_string,
            instrumentation: Instrumentation::new(listener),
            inner: Mutex::new(Inner {
                data_source,
                ..Inner::default()
            }),
        }
    }

    /// Client-local identity, as published in `Connection` descriptors.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// The session id assigned when the connection opened.
    ///
    /// `None` unless the connection is open.
    pub fn server_thread(&self) -> Option<u32> {
        let inner = self.lock();
        inner.session_id.filter(|_| inner.state.is_open())
    }

    /// Isolation level of the active transaction, if any.
    pub fn active_transaction(&self) -> Option<IsolationLevel> {
        self.lock().transaction.map(|active| active.isolation_level)
    }

    /// Snapshot of this connection for a `Connection` payload field.
    pub fn descriptor(&self) -> ConnectionDescriptor {
        let inner = self.lock();
        ConnectionDescriptor {
            handle: self.handle,
            data_source: inner.data_source.clone(),
            state: inner.state,
        }
    }

    pub(crate) fn instrumentation(&self) -> &Instrumentation {
        &self.instrumentation
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::Connection {
            connection: self.descriptor(),
            connection_id: self.server_thread(),
        }
    }

    /// Opens the connection.
    ///
    /// # Errors
    ///
    /// Fails if the connection is not closed, the connection string is
    /// invalid, or the engine cannot open the data source. The connection
    /// stays closed on failure.
    pub async fn open(&self) -> Result<()> {
        self.instrumentation
            .run(OperationCategory::ConnectionOpen, || self.snapshot(), self.open_session())
            .await
    }

    async fn open_session(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Closed {
                return Err(Error::invalid_state("connection is already open"));
            }
            inner.state = ConnectionState::Connecting;
        }
        // Puts the connection back to Closed on every exit except success,
        // including the open future being dropped mid-connect.
        let mut attempt = OpenAttempt {
            connection: self,
            succeeded: false,
        };

        let connected = match ConnectionOptions::parse(&self.connection_string) {
            Ok(options) => {
                self.lock().data_source = Some(Arc::from(options.data_source.as_str()));
                tokio::task::spawn_blocking(move || options.connect())
                    .await
                    .map_err(Error::from)
                    .and_then(|result| result.map_err(Error::from))
            }
            Err(e) => Err(e),
        };

        let mut inner = self.lock();
        match connected {
            Ok(conn) => {
                let session_id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
                inner.state = ConnectionState::Open;
                inner.session_id = Some(session_id);
                inner.session = Some(Arc::new(Mutex::new(conn)));
                attempt.succeeded = true;
                tracing::debug!(connection = self.handle, session_id, "connection opened");
                Ok(())
            }
            Err(e) => {
                tracing::debug!(connection = self.handle, error = %e, "connection open failed");
                Err(e)
            }
        }
    }

    /// Closes the connection, rolling back any active transaction first.
    ///
    /// Closing a closed connection does nothing and publishes nothing. The
    /// connection always ends up closed; a failed rollback of the active
    /// transaction is reported as the close error.
    pub async fn close(&self) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }
        self.instrumentation
            .run(OperationCategory::ConnectionClose, || self.snapshot(), self.close_session())
            .await
    }

    async fn close_session(&self) -> Result<()> {
        let (session, pending) = {
            let mut inner = self.lock();
            inner.state = ConnectionState::Closed;
            inner.session_id = None;
            (inner.session.take(), inner.transaction.take())
        };
        let Some(session) = session else {
            return Ok(());
        };

        tracing::debug!(connection = self.handle, "closing connection");

        tokio::task::spawn_blocking(move || {
            let rolled_back = match pending {
                Some(_) => lock_session(&session).execute_batch("ROLLBACK"),
                None => Ok(()),
            };
            let closed = match Arc::try_unwrap(session) {
                Ok(conn) => conn
                    .into_inner()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .close()
                    .map_err(|(_, e)| e),
                // A cancelled engine call still holds the session; it is
                // released when that call returns.
                Err(_) => Ok(()),
            };
            rolled_back.and(closed)
        })
        .await?
        .map_err(Error::from)
    }

    /// Creates a command bound to this connection.
    pub fn create_command(&self, text: impl Into<String>) -> Command<'_> {
        Command::new(self, text.into())
    }

    /// Starts a transaction.
    ///
    /// `ReadUncommitted` enables dirty reads for the session, `Serializable`
    /// takes the write lock up front (`BEGIN IMMEDIATE`), every other level
    /// begins a deferred transaction.
    ///
    /// # Errors
    ///
    /// Fails if the connection is not open, a transaction is already active,
    /// or the engine rejects `BEGIN`.
    pub async fn begin_transaction(&self, isolation_level: IsolationLevel) -> Result<Transaction<'_>> {
        if self.active_transaction().is_some() {
            return Err(Error::invalid_state("a transaction is already active"));
        }

        let begin = match isolation_level {
            IsolationLevel::Serializable => "BEGIN IMMEDIATE",
            _ => "BEGIN DEFERRED",
        };
        let read_uncommitted = isolation_level == IsolationLevel::ReadUncommitted;

        let session = self.session()?;
        let pending = PendingBegin {
            session: Arc::clone(&session),
            abandoned: Arc::new(AtomicBool::new(false)),
            settled: false,
        };
        let abandoned = Arc::clone(&pending.abandoned);
        let begun = tokio::task::spawn_blocking(move || {
            let conn = lock_session(&session);
            if abandoned.load(Ordering::Acquire) {
                return Ok(());
            }
            conn.pragma_update(None, "read_uncommitted", read_uncommitted)?;
            conn.execute_batch(begin)
        })
        .await;
        pending.settle();
        begun??;

        let token = next_handle();
        self.lock().transaction = Some(ActiveTransaction {
            token,
            isolation_level,
        });
        tracing::debug!(connection = self.handle, %isolation_level, "transaction started");
        Ok(Transaction::new(self, isolation_level, token))
    }

    /// Whether the transaction identified by `token` is still the active one.
    pub(crate) fn owns_transaction(&self, token: u64) -> bool {
        self.lock()
            .transaction
            .is_some_and(|active| active.token == token)
    }

    /// Clears the active transaction if `token` still owns it.
    pub(crate) fn end_transaction(&self, token: u64) {
        let mut inner = self.lock();
        if inner.transaction.is_some_and(|active| active.token == token) {
            inner.transaction = None;
        }
    }

    /// Runs `f` against the session on the blocking pool.
    pub(crate) async fn execute<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let session = self.session()?;
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = lock_session(&session);
            f(&mut conn)
        })
        .await?;
        result.map_err(Error::from)
    }

    /// Runs `f` against the session on the current thread.
    pub(crate) fn execute_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T>,
    {
        let session = self.session()?;
        let mut conn = lock_session(&session);
        f(&mut conn).map_err(Error::from)
    }

    fn session(&self) -> Result<Session> {
        self.lock()
            .session
            .clone()
            .ok_or_else(|| Error::invalid_state("connection is not open"))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn lock_session(session: &Session) -> MutexGuard<'_, rusqlite::Connection> {
    session
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct OpenAttempt<'a> {
    connection: &'a Connection,
    succeeded: bool,
}

impl Drop for OpenAttempt<'_> {
    fn drop(&mut self) {
        if self.succeeded {
            return;
        }
        let mut inner = self.connection.lock();
        if inner.state == ConnectionState::Connecting {
            inner.state = ConnectionState::Closed;
        }
    }
}

/// Undoes a `BEGIN` whose caller went away before learning the outcome.
///
/// The blocking task checks `abandoned` under the session lock before it
/// begins, and the drop path sets it before taking that lock, so either the
/// task never begins or the drop path finds the transaction and rolls it back.
struct PendingBegin {
    session: Session,
    abandoned: Arc<AtomicBool>,
    settled: bool,
}

impl PendingBegin {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for PendingBegin {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.abandoned.store(true, Ordering::Release);
        // Blocks the dropping thread until an in-flight BEGIN releases the session.
        let conn = lock_session(&self.session);
        if conn.is_autocommit() {
            return;
        }
        if let Err(e) = conn.execute_batch("ROLLBACK") {
            tracing::warn!(error = %e, "failed to roll back abandoned transaction start");
        }
    }
}
