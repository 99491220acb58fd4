//! Instrumented SQL client.
//!
//! Connections, commands and transactions run against an embedded SQLite
//! engine and announce every open, close, command execution, commit and
//! rollback on a [`DiagnosticListener`](sqlscope_diagnostics::DiagnosticListener).
//! Connections publish on the process-wide listener unless given their own.
//!
//! ```rust,ignore
//! use sqlscope_client::{Connection, IsolationLevel};
//!
//! let conn = Connection::new("Data Source=app.db");
//! conn.open().await?;
//!
//! let tx = conn.begin_transaction(IsolationLevel::ReadCommitted).await?;
//! conn.create_command("INSERT INTO users (name) VALUES ('ada')")
//!     .execute_non_query()
//!     .await?;
//! tx.commit().await?;
//!
//! conn.close().await?;
//! ```

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod options;
pub mod transaction;

pub use command::{Command, Row};
pub use config::{
    init_tracing, load_config, ClientConfig, ConfigError, DatabaseConfig, DiagnosticsConfig,
    LoggingConfig,
};
pub use connection::Connection;
pub use error::{Error, ErrorKind, Result};
pub use options::ConnectionOptions;
pub use sqlscope_types::{ConnectionState, IsolationLevel};
pub use transaction::Transaction;
