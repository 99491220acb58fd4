use std::collections::HashMap;
use std::sync::Arc;

use sqlscope_client::{Connection, IsolationLevel};
use sqlscope_diagnostics::names::{self, LISTENER_NAME};
use sqlscope_diagnostics::payload::fields;
use sqlscope_diagnostics::{DiagnosticEvent, DiagnosticListener, EventSubscription, OperationId, Value};

fn setup() -> (Arc<DiagnosticListener>, Connection) {
    let listener = DiagnosticListener::new(LISTENER_NAME);
    let conn = Connection::with_listener("Data Source=:memory:", Arc::clone(&listener));
    (listener, conn)
}

fn subscribe_to(listener: &Arc<DiagnosticListener>, channels: &'static [&'static str]) -> EventSubscription {
    listener.subscribe(move |name| channels.iter().any(|channel| *channel == name))
}

fn event_names(events: &[DiagnosticEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name).collect()
}

fn operation_id(event: &DiagnosticEvent) -> OperationId {
    event.payload.operation_id().expect("every payload carries an OperationId")
}

const COMMAND: &[&str] = &[names::COMMAND_BEFORE, names::COMMAND_AFTER, names::COMMAND_ERROR];
const OPEN: &[&str] = &[
    names::CONNECTION_OPEN_BEFORE,
    names::CONNECTION_OPEN_AFTER,
    names::CONNECTION_OPEN_ERROR,
];
const CLOSE: &[&str] = &[
    names::CONNECTION_CLOSE_BEFORE,
    names::CONNECTION_CLOSE_AFTER,
    names::CONNECTION_CLOSE_ERROR,
];
const COMMIT: &[&str] = &[
    names::TRANSACTION_COMMIT_BEFORE,
    names::TRANSACTION_COMMIT_AFTER,
    names::TRANSACTION_COMMIT_ERROR,
];
const ROLLBACK: &[&str] = &[
    names::TRANSACTION_ROLLBACK_BEFORE,
    names::TRANSACTION_ROLLBACK_AFTER,
    names::TRANSACTION_ROLLBACK_ERROR,
];

#[tokio::test]
async fn scalar_command_publishes_before_and_after() {
    let (listener, conn) = setup();
    conn.open().await.expect("open should succeed");
    let session = conn.server_thread();
    let mut events = subscribe_to(&listener, COMMAND);

    let value = conn
        .create_command("SELECT 1")
        .execute_scalar()
        .await
        .expect("SELECT 1 should succeed");
    assert_eq!(value, Some(rusqlite::types::Value::Integer(1)));

    let published = events.drain();
    assert_eq!(event_names(&published), [names::COMMAND_BEFORE, names::COMMAND_AFTER]);

    let (before, after) = (&published[0], &published[1]);
    assert_eq!(before.listener, LISTENER_NAME);
    assert_eq!(operation_id(before), operation_id(after));
    assert!(!operation_id(before).is_empty());

    for event in &published {
        assert_eq!(event.payload.operation(), Some("ExecuteScalar"));
        assert_eq!(event.payload.connection_id(), Some(session));
        assert_eq!(event.payload.command().map(|c| &*c.text), Some("SELECT 1"));
    }
    assert_eq!(after.payload.get(fields::STATISTICS), Some(&Value::Null));
    assert!(after.payload.timestamp().is_some());
    assert!(!before.payload.contains(fields::TIMESTAMP));
}

#[tokio::test]
async fn failing_command_publishes_the_returned_error() {
    let (listener, conn) = setup();
    conn.open().await.expect("open should succeed");
    let mut events = subscribe_to(&listener, COMMAND);

    let err = conn
        .create_command("SELEKT nothing")
        .execute_scalar()
        .await
        .expect_err("invalid SQL should fail");

    let published = events.drain();
    assert_eq!(event_names(&published), [names::COMMAND_BEFORE, names::COMMAND_ERROR]);
    assert_eq!(operation_id(&published[0]), operation_id(&published[1]));

    let failure = published[1].payload.failure().expect("error payload carries the failure");
    assert!(err.is_same(failure), "published failure must be the returned error");
    assert!(published[1].payload.timestamp().is_some());
}

#[tokio::test]
async fn open_publishes_before_and_after() {
    let (listener, conn) = setup();
    let mut events = subscribe_to(&listener, OPEN);

    conn.open().await.expect("open should succeed");

    let published = events.drain();
    assert_eq!(
        event_names(&published),
        [names::CONNECTION_OPEN_BEFORE, names::CONNECTION_OPEN_AFTER]
    );
    let (before, after) = (&published[0], &published[1]);
    assert_eq!(operation_id(before), operation_id(after));
    assert_eq!(before.payload.operation(), Some("Open"));
    assert!(!before.payload.contains(fields::CONNECTION_ID));
    assert_eq!(after.payload.connection_id(), Some(conn.server_thread()));
    assert!(conn.server_thread().is_some());
    assert!(before.payload.timestamp() <= after.payload.timestamp());
}

#[tokio::test]
async fn failed_open_publishes_error_without_a_session() {
    let listener = DiagnosticListener::new(LISTENER_NAME);
    let conn = Connection::with_listener("some error connection string", Arc::clone(&listener));
    let mut events = subscribe_to(&listener, OPEN);

    let err = conn.open().await.expect_err("open should fail");

    let published = events.drain();
    assert_eq!(
        event_names(&published),
        [names::CONNECTION_OPEN_BEFORE, names::CONNECTION_OPEN_ERROR]
    );
    let error = &published[1];
    assert_eq!(operation_id(&published[0]), operation_id(error));
    assert_eq!(error.payload.connection_id(), Some(None));
    assert!(err.is_same(error.payload.failure().expect("failure field")));
}

#[tokio::test]
async fn close_publishes_the_session_it_closed() {
    let (listener, conn) = setup();
    conn.open().await.expect("open should succeed");
    let session = conn.server_thread().expect("open connection has a session");
    let mut events = subscribe_to(&listener, CLOSE);

    conn.close().await.expect("close should succeed");

    let published = events.drain();
    assert_eq!(
        event_names(&published),
        [names::CONNECTION_CLOSE_BEFORE, names::CONNECTION_CLOSE_AFTER]
    );
    assert_eq!(operation_id(&published[0]), operation_id(&published[1]));
    for event in &published {
        assert_eq!(event.payload.operation(), Some("Close"));
        assert_eq!(event.payload.connection_id(), Some(Some(session)));
        assert_eq!(event.payload.get(fields::STATISTICS), Some(&Value::Null));
    }

    // Closing again is a no-op and announces nothing.
    conn.close().await.expect("second close should succeed");
    assert!(events.drain().is_empty());
}

#[tokio::test]
async fn close_reports_a_failed_rollback() {
    let (listener, conn) = setup();
    conn.open().await.expect("open should succeed");
    let session = conn.server_thread();
    let tx = conn
        .begin_transaction(IsolationLevel::ReadCommitted)
        .await
        .expect("begin should succeed");

    // End the engine transaction behind the client's back.
    conn.create_command("COMMIT")
        .execute_non_query()
        .await
        .expect("out-of-band COMMIT should succeed");

    let mut events = subscribe_to(&listener, CLOSE);
    let err = conn.close().await.expect_err("rollback during close should fail");
    drop(tx);

    let published = events.drain();
    assert_eq!(
        event_names(&published),
        [names::CONNECTION_CLOSE_BEFORE, names::CONNECTION_CLOSE_ERROR]
    );
    let error = &published[1];
    assert_eq!(error.payload.connection_id(), Some(session));
    assert!(err.is_same(error.payload.failure().expect("failure field")));
    assert_eq!(conn.state(), sqlscope_client::ConnectionState::Closed);
}

#[tokio::test]
async fn commit_publishes_before_and_after() {
    let (listener, conn) = setup();
    conn.open().await.expect("open should succeed");
    let tx = conn
        .begin_transaction(IsolationLevel::ReadCommitted)
        .await
        .expect("begin should succeed");
    let mut events = subscribe_to(&listener, COMMIT);

    tx.commit().await.expect("commit should succeed");

    let published = events.drain();
    assert_eq!(
        event_names(&published),
        [names::TRANSACTION_COMMIT_BEFORE, names::TRANSACTION_COMMIT_AFTER]
    );
    assert_eq!(operation_id(&published[0]), operation_id(&published[1]));
    for event in &published {
        assert_eq!(event.payload.operation(), Some("Commit"));
        assert_eq!(event.payload.isolation_level(), Some(IsolationLevel::ReadCommitted));
        assert_eq!(
            event.payload.connection().map(|c| c.handle),
            Some(conn.handle())
        );
    }
    assert_eq!(conn.active_transaction(), None);
}

#[tokio::test]
async fn failed_commit_publishes_error_then_rolls_back() {
    let (listener, conn) = setup();
    conn.open().await.expect("open should succeed");
    for sql in [
        "CREATE TABLE parent (id INTEGER PRIMARY KEY)",
        "CREATE TABLE child (parent_id INTEGER REFERENCES parent(id))",
    ] {
        conn.create_command(sql)
            .execute_non_query()
            .await
            .expect("schema setup should succeed");
    }

    let tx = conn
        .begin_transaction(IsolationLevel::Serializable)
        .await
        .expect("begin should succeed");
    for sql in [
        "PRAGMA defer_foreign_keys = ON",
        "INSERT INTO child (parent_id) VALUES (42)",
    ] {
        conn.create_command(sql)
            .execute_non_query()
            .await
            .expect("deferred violation is accepted until commit");
    }

    let mut commits = subscribe_to(&listener, COMMIT);
    let mut rollbacks = subscribe_to(&listener, ROLLBACK);
    let err = tx.commit().await.expect_err("commit should hit the deferred violation");

    let published = commits.drain();
    assert_eq!(
        event_names(&published),
        [names::TRANSACTION_COMMIT_BEFORE, names::TRANSACTION_COMMIT_ERROR]
    );
    assert_eq!(operation_id(&published[0]), operation_id(&published[1]));
    assert_eq!(
        published[1].payload.isolation_level(),
        Some(IsolationLevel::Serializable)
    );
    assert!(err.is_same(published[1].payload.failure().expect("failure field")));

    let rolled_back = rollbacks.drain();
    assert_eq!(
        event_names(&rolled_back),
        [names::TRANSACTION_ROLLBACK_BEFORE, names::TRANSACTION_ROLLBACK_AFTER]
    );
    assert_ne!(operation_id(&rolled_back[0]), operation_id(&published[0]));
    assert_eq!(conn.active_transaction(), None);
}

#[tokio::test]
async fn rollback_publishes_before_and_after() {
    let (listener, conn) = setup();
    conn.open().await.expect("open should succeed");
    let tx = conn
        .begin_transaction(IsolationLevel::RepeatableRead)
        .await
        .expect("begin should succeed");
    let mut events = subscribe_to(&listener, ROLLBACK);

    tx.rollback().await.expect("rollback should succeed");

    let published = events.drain();
    assert_eq!(
        event_names(&published),
        [names::TRANSACTION_ROLLBACK_BEFORE, names::TRANSACTION_ROLLBACK_AFTER]
    );
    assert_eq!(operation_id(&published[0]), operation_id(&published[1]));
    for event in &published {
        assert_eq!(event.payload.operation(), Some("Rollback"));
        assert_eq!(event.payload.isolation_level(), Some(IsolationLevel::RepeatableRead));
        assert_eq!(event.payload.get(fields::TRANSACTION_NAME), Some(&Value::Null));
    }
}

#[tokio::test]
async fn failed_rollback_publishes_error() {
    let (listener, conn) = setup();
    conn.open().await.expect("open should succeed");
    let tx = conn
        .begin_transaction(IsolationLevel::ReadCommitted)
        .await
        .expect("begin should succeed");
    conn.create_command("COMMIT")
        .execute_non_query()
        .await
        .expect("out-of-band COMMIT should succeed");
    let mut events = subscribe_to(&listener, ROLLBACK);

    let err = tx.rollback().await.expect_err("nothing left to roll back");

    let published = events.drain();
    assert_eq!(
        event_names(&published),
        [names::TRANSACTION_ROLLBACK_BEFORE, names::TRANSACTION_ROLLBACK_ERROR]
    );
    assert!(err.is_same(published[1].payload.failure().expect("failure field")));
    assert_eq!(conn.active_transaction(), None);
}

#[tokio::test]
async fn dropped_transaction_is_rolled_back_and_announced() {
    let (listener, conn) = setup();
    conn.open().await.expect("open should succeed");
    conn.create_command("CREATE TABLE t (x INTEGER)")
        .execute_non_query()
        .await
        .expect("create should succeed");

    let tx = conn
        .begin_transaction(IsolationLevel::Unspecified)
        .await
        .expect("begin should succeed");
    conn.create_command("INSERT INTO t VALUES (1)")
        .execute_non_query()
        .await
        .expect("insert should succeed");
    let mut events = subscribe_to(&listener, ROLLBACK);

    drop(tx);

    let published = events.drain();
    assert_eq!(
        event_names(&published),
        [names::TRANSACTION_ROLLBACK_BEFORE, names::TRANSACTION_ROLLBACK_AFTER]
    );
    assert_eq!(conn.active_transaction(), None);

    let count = conn
        .create_command("SELECT COUNT(*) FROM t")
        .execute_scalar()
        .await
        .expect("count should succeed");
    assert_eq!(count, Some(rusqlite::types::Value::Integer(0)));
}

#[tokio::test]
async fn transaction_from_a_closed_session_leaves_the_new_one_alone() {
    let (listener, conn) = setup();
    conn.open().await.expect("open should succeed");
    let stale = conn
        .begin_transaction(IsolationLevel::ReadCommitted)
        .await
        .expect("begin should succeed");
    conn.close().await.expect("close should succeed");

    conn.open().await.expect("reopen should succeed");
    let current = conn
        .begin_transaction(IsolationLevel::Serializable)
        .await
        .expect("begin on the new session should succeed");
    let mut rollbacks = subscribe_to(&listener, ROLLBACK);

    drop(stale);

    assert!(rollbacks.drain().is_empty(), "stale handle must not roll anything back");
    assert_eq!(conn.active_transaction(), Some(IsolationLevel::Serializable));
    current.commit().await.expect("the live transaction should still commit");
    assert_eq!(conn.active_transaction(), None);
}

#[tokio::test]
async fn committing_a_stale_transaction_fails_without_touching_the_live_one() {
    let (listener, conn) = setup();
    conn.open().await.expect("open should succeed");
    let stale = conn
        .begin_transaction(IsolationLevel::ReadCommitted)
        .await
        .expect("begin should succeed");
    conn.close().await.expect("close should succeed");
    conn.open().await.expect("reopen should succeed");
    let current = conn
        .begin_transaction(IsolationLevel::Serializable)
        .await
        .expect("begin on the new session should succeed");
    let mut commits = subscribe_to(&listener, COMMIT);

    let err = stale.commit().await.expect_err("stale commit should fail");
    assert!(matches!(err.kind(), sqlscope_client::ErrorKind::InvalidState(_)));

    let published = commits.drain();
    assert_eq!(
        event_names(&published),
        [names::TRANSACTION_COMMIT_BEFORE, names::TRANSACTION_COMMIT_ERROR]
    );
    assert!(err.is_same(published[1].payload.failure().expect("failure field")));
    assert_eq!(
        published[1].payload.isolation_level(),
        Some(IsolationLevel::ReadCommitted)
    );

    assert_eq!(conn.active_transaction(), Some(IsolationLevel::Serializable));
    current.rollback().await.expect("the live transaction should still roll back");
}

#[tokio::test]
async fn unobserved_channels_publish_nothing() {
    let (listener, conn) = setup();
    let mut commits = subscribe_to(&listener, COMMIT);

    conn.open().await.expect("open should succeed");
    conn.create_command("SELECT 1")
        .execute_scalar()
        .await
        .expect("query should succeed");
    conn.close().await.expect("close should succeed");

    assert!(commits.drain().is_empty());
}

#[tokio::test]
async fn operations_without_subscribers_still_succeed() {
    let (listener, conn) = setup();
    assert_eq!(listener.subscriber_count(), 0);

    conn.open().await.expect("open should succeed");
    let tx = conn
        .begin_transaction(IsolationLevel::ReadCommitted)
        .await
        .expect("begin should succeed");
    conn.create_command("SELECT 1")
        .execute_query()
        .await
        .expect("query should succeed");
    tx.commit().await.expect("commit should succeed");
    conn.close().await.expect("close should succeed");

    // A late subscriber sees none of it.
    let mut events = listener.subscribe_all();
    assert!(events.drain().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commands_are_correlated_by_id() {
    let (listener, conn) = setup();
    conn.open().await.expect("open should succeed");
    let conn = Arc::new(conn);
    let mut events = subscribe_to(&listener, COMMAND);

    let tasks: Vec<_> = (0..32)
        .map(|n| {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                conn.create_command(format!("SELECT {n}"))
                    .execute_scalar()
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await
            .expect("task should not panic")
            .expect("query should succeed");
    }

    let mut by_id: HashMap<OperationId, Vec<DiagnosticEvent>> = HashMap::new();
    for event in events.drain() {
        by_id.entry(operation_id(&event)).or_default().push(event);
    }

    assert_eq!(by_id.len(), 32, "every command gets its own id");
    for (_, pair) in by_id {
        assert_eq!(event_names(&pair), [names::COMMAND_BEFORE, names::COMMAND_AFTER]);
        assert_eq!(pair[0].payload.command(), pair[1].payload.command());
    }
}
