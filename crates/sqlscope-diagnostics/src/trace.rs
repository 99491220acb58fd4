//! Forwards diagnostic events to `tracing`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::listener::{DiagnosticEvent, DiagnosticListener, EventSubscription};

/// `tracing` target used for forwarded events.
pub const TRACE_TARGET: &str = "sqlscope::diagnostics";

/// A subscriber that logs every event it receives.
#[derive(Debug)]
pub struct TracingObserver {
    handle: JoinHandle<()>,
    forwarded: Arc<AtomicUsize>,
}

impl TracingObserver {
    /// Subscribes to every channel on `listener` and starts forwarding on
    /// the current tokio runtime.
    pub fn spawn(listener: &Arc<DiagnosticListener>) -> Self {
        Self::spawn_with(listener.subscribe_all())
    }

    /// Starts forwarding an existing subscription.
    pub fn spawn_with(mut subscription: EventSubscription) -> Self {
        let forwarded = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&forwarded);
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                log_event(&event);
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });
        Self { handle, forwarded }
    }

    /// Number of events logged so far.
    pub fn forwarded(&self) -> usize {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Stops forwarding and drops the subscription. Returns how many events
    /// were logged.
    pub async fn shutdown(self) -> usize {
        self.handle.abort();
        // The task either finished or was cancelled; both are fine here.
        let _ = self.handle.await;
        self.forwarded.load(Ordering::Relaxed)
    }
}

/// Logs one event as a structured record.
pub fn log_event(event: &DiagnosticEvent) {
    match event.payload.to_json() {
        Ok(payload) => tracing::info!(
            target: TRACE_TARGET,
            listener = event.listener,
            event = event.name,
            %payload,
            "diagnostic event"
        ),
        Err(e) => tracing::warn!(
            target: TRACE_TARGET,
            listener = event.listener,
            event = event.name,
            "failed to serialize diagnostic payload: {}",
            e
        ),
    }
}
