//! Connection string parsing.
//!
//! A connection string is a `;`-separated list of `key=value` pairs. Keys are
//! case-insensitive and spaces inside them are ignored, so `Data Source`,
//! `datasource` and `DATA SOURCE` name the same setting.
//!
//! | Key | Meaning | Default |
//! |-----|---------|---------|
//! | `Data Source` (`Server`) | database file, or `:memory:` | required |
//! | `Busy Timeout` | milliseconds to wait on a locked database | `5000` |
//! | `Foreign Keys` | enforce foreign key constraints | `true` |
//! | `Read Only` | open without write access | `false` |

use std::time::Duration;

use rusqlite::OpenFlags;

use crate::error::{Error, Result};

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Parsed connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Database file path, or `:memory:`.
    pub data_source: String,
    /// How long to wait on a locked database before failing.
    pub busy_timeout: Duration,
    /// Whether foreign key constraints are enforced.
    pub foreign_keys: bool,
    /// Whether the database is opened read-only.
    pub read_only: bool,
}

impl ConnectionOptions {
    /// Parses a connection string.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::ConnectionString` for malformed pairs, unknown
    /// keys, unparsable values, or a missing data source.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut data_source = None;
        let mut busy_timeout = Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS);
        let mut foreign_keys = true;
        let mut read_only = false;

        for pair in connection_string.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(Error::connection_string(format!(
                    "expected `key=value`, found `{pair}`"
                )));
            };
            let value = value.trim();

            match normalize_key(key).as_str() {
                "datasource" | "server" => data_source = Some(value.to_string()),
                "busytimeout" => {
                    let ms = value.parse::<u64>().map_err(|_| {
                        Error::connection_string(format!("`Busy Timeout` must be milliseconds, found `{value}`"))
                    })?;
                    busy_timeout = Duration::from_millis(ms);
                }
                "foreignkeys" => foreign_keys = parse_bool("Foreign Keys", value)?,
                "readonly" => read_only = parse_bool("Read Only", value)?,
                _ => {
                    return Err(Error::connection_string(format!(
                        "unknown key `{}`",
                        key.trim()
                    )))
                }
            }
        }

        let data_source = data_source
            .filter(|ds| !ds.is_empty())
            .ok_or_else(|| Error::connection_string("missing `Data Source`"))?;

        Ok(Self {
            data_source,
            busy_timeout,
            foreign_keys,
            read_only,
        })
    }

    /// Opens an engine connection with these settings.
    pub(crate) fn connect(&self) -> rusqlite::Result<rusqlite::Connection> {
        let flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };

        let conn = rusqlite::Connection::open_with_flags(&self.data_source, flags)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", self.foreign_keys)?;
        Ok(conn)
    }
}

/// Best-effort extraction of the data source, used to describe connections
/// whose string does not fully parse.
pub(crate) fn peek_data_source(connection_string: &str) -> Option<String> {
    connection_string
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| matches!(normalize_key(key).as_str(), "datasource" | "server"))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::connection_string(format!(
            "`{key}` must be a boolean, found `{value}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_all_known_keys() {
        let options = ConnectionOptions::parse(
            "Data Source=app.db; Busy Timeout=250;foreign keys=false;ReadOnly=yes",
        )
        .expect("connection string should parse");

        assert_eq!(options.data_source, "app.db");
        assert_eq!(options.busy_timeout, Duration::from_millis(250));
        assert!(!options.foreign_keys);
        assert!(options.read_only);
    }

    #[test]
    fn applies_defaults() {
        let options = ConnectionOptions::parse("Server=:memory:").expect("should parse");
        assert_eq!(options.data_source, ":memory:");
        assert_eq!(options.busy_timeout, Duration::from_millis(5_000));
        assert!(options.foreign_keys);
        assert!(!options.read_only);
    }

    #[test]
    fn rejects_malformed_strings() {
        for bad in [
            "some error connection string",
            "Data Source=:memory:;Colour=blue",
            "Data Source=:memory:;Busy Timeout=soon",
            "Data Source=:memory:;Read Only=maybe",
            "Busy Timeout=10",
            "Data Source=",
        ] {
            let err = ConnectionOptions::parse(bad).expect_err(bad);
            assert!(
                matches!(err.kind(), ErrorKind::ConnectionString(_)),
                "unexpected error for {bad}: {err}"
            );
        }
    }

    #[test]
    fn peeks_data_source_from_partial_strings() {
        assert_eq!(
            peek_data_source("Data Source=app.db;Colour=blue").as_deref(),
            Some("app.db")
        );
        assert_eq!(peek_data_source("some error connection string"), None);
    }
}
