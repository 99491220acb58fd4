//! Client configuration loading from file and environment variables.

use std::sync::Arc;

use serde::Deserialize;
use sqlscope_diagnostics::listener::DEFAULT_SUBSCRIBER_CAPACITY;
use sqlscope_diagnostics::trace::TracingObserver;
use sqlscope_diagnostics::DiagnosticListener;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::connection::Connection;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Diagnostic event settings.
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string used by [`ClientConfig::connection`].
    #[serde(default = "default_connection_string")]
    pub connection_string: String,
}

/// Diagnostic event configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosticsConfig {
    /// Queue depth for subscriptions created from this configuration.
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    /// Whether to forward every diagnostic event to the log.
    #[serde(default)]
    pub trace_events: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "sqlscope_client=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_connection_string() -> String {
    "Data Source=:memory:".to_string()
}

fn default_subscriber_capacity() -> usize {
    DEFAULT_SUBSCRIBER_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: default_connection_string(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: default_subscriber_capacity(),
            trace_events: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ClientConfig {
    /// Creates a closed connection from the configured connection string.
    pub fn connection(&self, listener: Arc<DiagnosticListener>) -> Connection {
        Connection::with_listener(self.database.connection_string.clone(), listener)
    }
}

impl DiagnosticsConfig {
    /// Starts logging `listener`'s events when `trace_events` is set.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start_tracing(&self, listener: &Arc<DiagnosticListener>) -> Option<TracingObserver> {
        if !self.trace_events {
            return None;
        }
        let subscription = listener.subscribe_with_capacity(|_| true, self.subscriber_capacity);
        Some(TracingObserver::spawn_with(subscription))
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `SQLSCOPE_CONNECTION_STRING` overrides `database.connection_string`
/// - `SQLSCOPE_SUBSCRIBER_CAPACITY` overrides `diagnostics.subscriber_capacity`
/// - `SQLSCOPE_LOG_LEVEL` overrides `logging.level`
/// - `SQLSCOPE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<ClientConfig, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                ClientConfig::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => ClientConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut ClientConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(connection_string) = var("SQLSCOPE_CONNECTION_STRING") {
        config.database.connection_string = connection_string;
    }
    if let Some(capacity) = var("SQLSCOPE_SUBSCRIBER_CAPACITY") {
        if let Ok(parsed) = capacity.parse() {
            config.diagnostics.subscriber_capacity = parsed;
        }
    }
    if let Some(level) = var("SQLSCOPE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("SQLSCOPE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

/// Installs the global `tracing` subscriber described by `config`.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = ClientConfig::default();
        let env: HashMap<&str, &str> = [
            ("SQLSCOPE_CONNECTION_STRING", "Data Source=override.db"),
            ("SQLSCOPE_SUBSCRIBER_CAPACITY", "16"),
            ("SQLSCOPE_LOG_LEVEL", "debug"),
            ("SQLSCOPE_LOG_JSON", "1"),
        ]
        .into_iter()
        .collect();

        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.connection_string, "Data Source=override.db");
        assert_eq!(config.diagnostics.subscriber_capacity, 16);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn unparsable_capacity_is_ignored() {
        let mut config = ClientConfig::default();
        apply_env_overrides(&mut config, |key| {
            (key == "SQLSCOPE_SUBSCRIBER_CAPACITY").then(|| "lots".to_string())
        });
        assert_eq!(config.diagnostics.subscriber_capacity, DEFAULT_SUBSCRIBER_CAPACITY);
    }
}
