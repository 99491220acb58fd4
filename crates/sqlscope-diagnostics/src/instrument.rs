//! Before/after/error emission around a unit of work.
//!
//! Every instrumented call follows one state machine:
//!
//! ```text
//! Idle ──► Announced ──► Succeeded ─┐
//!              │                    ├──► Done
//!              └───────► Failed ────┘
//! ```
//!
//! `Idle → Announced` publishes the Before event, but only when its channel
//! is enabled; otherwise the work runs unannounced and nothing is published
//! for it at all. Once announced, an [`OperationScope`] guarantees exactly
//! one terminal event: After or Error from [`OperationScope::complete`], or
//! Error carrying [`OperationCancelled`] if the scope is dropped first.

use std::future::Future;
use std::sync::Arc;

use sqlscope_types::{EventPhase, OperationCategory};

use crate::error::{Failure, OperationCancelled, ReportFailure};
use crate::listener::DiagnosticListener;
use crate::names::{channel_name, operation_label};
use crate::operation_id::OperationId;
use crate::payload::{self, Snapshot};
use crate::timestamp::Timestamp;

/// Emits instrumentation events on a listener.
#[derive(Debug, Clone)]
pub struct Instrumentation {
    listener: Arc<DiagnosticListener>,
}

impl Default for Instrumentation {
    fn default() -> Self {
        Self::new(DiagnosticListener::global())
    }
}

impl Instrumentation {
    pub fn new(listener: Arc<DiagnosticListener>) -> Self {
        Self { listener }
    }

    pub fn listener(&self) -> &Arc<DiagnosticListener> {
        &self.listener
    }

    /// Announces an operation and returns the scope that will close it.
    ///
    /// `snapshot` is called once per emitted event and never when the
    /// Before channel has no subscriber.
    pub fn begin<S>(&self, category: OperationCategory, snapshot: S) -> OperationScope<'_, S>
    where
        S: Fn() -> Snapshot,
    {
        let before = channel_name(category, EventPhase::Before);
        if !self.listener.is_enabled(before) {
            return OperationScope {
                listener: &self.listener,
                category,
                announced: None,
            };
        }

        let id = OperationId::allocate();
        let captured = snapshot();
        // Close must report the session id the connection had before it
        // started closing; it no longer has one afterwards.
        let pinned_connection_id = match category {
            OperationCategory::ConnectionClose => Some(captured.connection_id()),
            _ => None,
        };

        publish(&self.listener, category, EventPhase::Before, id, captured, None);

        OperationScope {
            listener: &self.listener,
            category,
            announced: Some(Announced {
                id,
                snapshot,
                pinned_connection_id,
            }),
        }
    }

    /// Runs `work` between a Before and a terminal event.
    ///
    /// The result is returned untouched. If the returned future is dropped
    /// before `work` settles, an Error event reports the cancellation.
    pub async fn run<S, Fut, T, E>(&self, category: OperationCategory, snapshot: S, work: Fut) -> Result<T, E>
    where
        S: Fn() -> Snapshot,
        Fut: Future<Output = Result<T, E>>,
        E: ReportFailure,
    {
        let scope = self.begin(category, snapshot);
        let result = work.await;
        scope.complete(&result);
        result
    }

    /// Synchronous form of [`Instrumentation::run`], for callers that cannot
    /// await (drop glue).
    pub fn run_blocking<S, W, T, E>(&self, category: OperationCategory, snapshot: S, work: W) -> Result<T, E>
    where
        S: Fn() -> Snapshot,
        W: FnOnce() -> Result<T, E>,
        E: ReportFailure,
    {
        let scope = self.begin(category, snapshot);
        let result = work();
        scope.complete(&result);
        result
    }
}

struct Announced<S> {
    id: OperationId,
    snapshot: S,
    pinned_connection_id: Option<Option<u32>>,
}

/// Guard for one announced operation.
///
/// Emits the terminal event on [`complete`](OperationScope::complete), or an
/// Error event on drop if the operation never completed.
#[must_use = "dropping the scope reports the operation as cancelled"]
pub struct OperationScope<'a, S>
where
    S: Fn() -> Snapshot,
{
    listener: &'a DiagnosticListener,
    category: OperationCategory,
    announced: Option<Announced<S>>,
}

impl<S> OperationScope<'_, S>
where
    S: Fn() -> Snapshot,
{
    /// The identifier published with Before, or [`OperationId::EMPTY`] if the
    /// operation was not announced.
    pub fn operation_id(&self) -> OperationId {
        self.announced
            .as_ref()
            .map_or(OperationId::EMPTY, |announced| announced.id)
    }

    /// Whether a Before event was published.
    pub fn is_announced(&self) -> bool {
        self.announced.is_some()
    }

    /// Publishes After for `Ok`, Error for `Err`.
    pub fn complete<T, E>(self, result: &Result<T, E>)
    where
        E: ReportFailure,
    {
        match result {
            Ok(_) => self.succeed(),
            Err(e) => self.fail(e.to_failure()),
        }
    }

    /// Publishes After.
    pub fn succeed(mut self) {
        self.finish(EventPhase::After, None);
    }

    /// Publishes Error with `failure` as the detail.
    pub fn fail(mut self, failure: Failure) {
        self.finish(EventPhase::Error, Some(failure));
    }

    fn finish(&mut self, phase: EventPhase, failure: Option<Failure>) {
        debug_assert!(phase.is_terminal());
        let Some(announced) = self.announced.take() else {
            return;
        };
        if !self.listener.is_enabled(channel_name(self.category, phase)) {
            return;
        }

        let mut captured = (announced.snapshot)();
        if let Some(connection_id) = announced.pinned_connection_id {
            captured = captured.with_connection_id(connection_id);
        }
        publish(self.listener, self.category, phase, announced.id, captured, failure);
    }
}

impl<S> Drop for OperationScope<'_, S>
where
    S: Fn() -> Snapshot,
{
    fn drop(&mut self) {
        if self.announced.is_some() {
            let cancelled: Failure = Arc::new(OperationCancelled {
                operation: operation_label(self.category),
            });
            self.finish(EventPhase::Error, Some(cancelled));
        }
    }
}

fn publish(
    listener: &DiagnosticListener,
    category: OperationCategory,
    phase: EventPhase,
    id: OperationId,
    snapshot: Snapshot,
    failure: Option<Failure>,
) {
    let name = channel_name(category, phase);
    match payload::build(category, phase, id, snapshot, failure, Timestamp::now()) {
        Some(payload) => {
            tracing::debug!(event = name, operation_id = %id, "publishing diagnostic event");
            listener.write(name, payload);
        }
        None => {
            tracing::warn!(
                event = name,
                operation_id = %id,
                "snapshot does not describe a {} operation, event skipped",
                category
            );
        }
    }
}
