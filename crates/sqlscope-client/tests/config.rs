use std::io::Write;
use std::time::Duration;

use sqlscope_client::{load_config, ConnectionState};
use sqlscope_diagnostics::names::LISTENER_NAME;
use sqlscope_diagnostics::DiagnosticListener;

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("absent.toml");

    let config = load_config(path.to_str()).expect("missing file is not an error");
    assert_eq!(config.diagnostics.subscriber_capacity, 1024);
    assert!(!config.diagnostics.trace_events);
}

#[test]
fn reads_every_section() {
    let mut file = tempfile::NamedTempFile::new().expect("failed to create temp file");
    writeln!(
        file,
        r#"
[database]
connection_string = "Data Source=app.db;Busy Timeout=100"

[diagnostics]
subscriber_capacity = 8
trace_events = true

[logging]
level = "debug"
"#
    )
    .expect("failed to write config");

    let config = load_config(file.path().to_str()).expect("config should load");
    assert_eq!(config.diagnostics.subscriber_capacity, 8);
    assert!(config.diagnostics.trace_events);
    assert!(!config.logging.json);
}

#[test]
fn rejects_malformed_toml() {
    let mut file = tempfile::NamedTempFile::new().expect("failed to create temp file");
    writeln!(file, "[diagnostics\nsubscriber_capacity = ").expect("failed to write config");

    let err = load_config(file.path().to_str()).expect_err("malformed TOML should fail");
    assert!(matches!(err, sqlscope_client::ConfigError::Parse(_)));
}

#[tokio::test]
async fn configured_connection_and_tracing_observer() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let mut file = tempfile::NamedTempFile::new_in(dir.path()).expect("failed to create temp file");
    let db_path = dir.path().join("configured.db");
    writeln!(
        file,
        "[database]\nconnection_string = \"Data Source={}\"\n\n[diagnostics]\ntrace_events = true\nsubscriber_capacity = 4",
        db_path.display()
    )
    .expect("failed to write config");

    let config = load_config(file.path().to_str()).expect("config should load");
    let listener = DiagnosticListener::new(LISTENER_NAME);
    let observer = config
        .diagnostics
        .start_tracing(&listener)
        .expect("trace_events starts an observer");

    let conn = config.connection(listener.clone());
    conn.open().await.expect("open should succeed");
    assert_eq!(conn.state(), ConnectionState::Open);
    conn.close().await.expect("close should succeed");
    assert!(db_path.exists(), "the configured data source was created");

    for _ in 0..100 {
        if observer.forwarded() == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(observer.shutdown().await, 4);
    assert_eq!(listener.subscriber_count(), 0);
}
