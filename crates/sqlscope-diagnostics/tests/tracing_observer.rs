use std::sync::Arc;
use std::time::Duration;

use sqlscope_diagnostics::trace::TracingObserver;
use sqlscope_diagnostics::{
    DiagnosticListener, Failure, Instrumentation, Snapshot, CommandDescriptor,
};
use sqlscope_types::OperationCategory;

fn snapshot() -> Snapshot {
    Snapshot::Command {
        command: CommandDescriptor {
            handle: 1,
            text: Arc::from("SELECT 1"),
            connection_handle: 1,
        },
        connection_id: Some(1),
    }
}

#[tokio::test]
async fn observer_forwards_every_published_event() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let listener = DiagnosticListener::new("observer-test");
    let observer = TracingObserver::spawn(&listener);
    assert_eq!(listener.subscriber_count(), 1);

    let instrumentation = Instrumentation::new(Arc::clone(&listener));
    let _: Result<(), Failure> = instrumentation
        .run(OperationCategory::CommandExecute, snapshot, async { Ok(()) })
        .await;

    for _ in 0..100 {
        if observer.forwarded() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(observer.shutdown().await, 2);
    assert_eq!(listener.subscriber_count(), 0, "shutdown should detach the observer");
}
