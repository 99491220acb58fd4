//! The named publish point subscribers attach to.
//!
//! A [`DiagnosticListener`] keeps a list of subscribers, each with a
//! channel-name filter and a bounded queue. Publishing is fire-and-forget:
//! every matching subscriber gets the event via `try_send`, and a subscriber
//! whose queue is full or gone simply misses it. The instrumented operation
//! never waits on a subscriber.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use tokio::sync::mpsc;

use crate::names::LISTENER_NAME;
use crate::payload::Payload;

/// Default queue depth for a subscription.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

type NameFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// One published event, as seen by a subscriber.
#[derive(Debug, Clone)]
pub struct DiagnosticEvent {
    /// Name of the listener the event was published on.
    pub listener: &'static str,
    /// Channel name, e.g. `MySql.Data.MySqlClient.WriteCommandBefore`.
    pub name: &'static str,
    /// The published payload, shared between subscribers.
    pub payload: Arc<Payload>,
}

struct Subscriber {
    id: u64,
    filter: NameFilter,
    tx: mpsc::Sender<DiagnosticEvent>,
}

/// A named publish point.
pub struct DiagnosticListener {
    name: &'static str,
    subscribers: RwLock<Vec<Subscriber>>,
    // Mirrors `subscribers.len()` so the disabled path never touches the lock.
    active: AtomicUsize,
    next_id: AtomicU64,
}

impl std::fmt::Debug for DiagnosticListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticListener")
            .field("name", &self.name)
            .field("subscribers", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

impl DiagnosticListener {
    /// Creates a listener with no subscribers.
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            subscribers: RwLock::new(Vec::new()),
            active: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        })
    }

    /// The process-wide listener connections publish on by default.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<DiagnosticListener>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Self::new(LISTENER_NAME)))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Whether any subscriber wants events published under `name`.
    pub fn is_enabled(&self, name: &str) -> bool {
        if self.active.load(Ordering::Acquire) == 0 {
            return false;
        }
        self.read_subscribers(|subscribers| {
            subscribers
                .iter()
                .any(|s| !s.tx.is_closed() && (s.filter)(name))
        })
    }

    /// Publishes `payload` to every subscriber whose filter accepts `name`.
    pub fn write(&self, name: &'static str, payload: Payload) {
        let event = DiagnosticEvent {
            listener: self.name,
            name,
            payload: Arc::new(payload),
        };

        self.read_subscribers(|subscribers| {
            for subscriber in subscribers.iter().filter(|s| (s.filter)(name)) {
                if let Err(e) = subscriber.tx.try_send(event.clone()) {
                    tracing::warn!(
                        listener = self.name,
                        event = name,
                        subscriber = subscriber.id,
                        "dropping diagnostic event for subscriber: {}",
                        e
                    );
                }
            }
        });
    }

    /// Subscribes to every channel name accepted by `filter`.
    pub fn subscribe<F>(self: &Arc<Self>, filter: F) -> EventSubscription
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.subscribe_with_capacity(filter, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Subscribes to every channel name on this listener.
    pub fn subscribe_all(self: &Arc<Self>) -> EventSubscription {
        self.subscribe(|_| true)
    }

    /// Subscribes with an explicit queue depth. A zero capacity is raised to one.
    pub fn subscribe_with_capacity<F>(self: &Arc<Self>, filter: F, capacity: usize) -> EventSubscription
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.push(Subscriber {
            id,
            filter: Arc::new(filter),
            tx,
        });
        self.active.store(subscribers.len(), Ordering::Release);
        drop(subscribers);

        tracing::debug!(listener = self.name, subscriber = id, "subscriber attached");

        EventSubscription {
            id,
            listener: Arc::downgrade(self),
            rx,
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|s| s.id != id);
        self.active.store(subscribers.len(), Ordering::Release);
        drop(subscribers);

        tracing::debug!(listener = self.name, subscriber = id, "subscriber detached");
    }

    fn read_subscribers<R>(&self, f: impl FnOnce(&[Subscriber]) -> R) -> R {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&subscribers)
    }
}

/// A standing registration on a listener.
///
/// Receives every matching event until dropped or [`unsubscribe`]d.
///
/// [`unsubscribe`]: EventSubscription::unsubscribe
#[derive(Debug)]
pub struct EventSubscription {
    id: u64,
    listener: Weak<DiagnosticListener>,
    rx: mpsc::Receiver<DiagnosticEvent>,
}

impl EventSubscription {
    /// Waits for the next event. Returns `None` once the listener is gone.
    pub async fn recv(&mut self) -> Option<DiagnosticEvent> {
        self.rx.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<DiagnosticEvent> {
        self.rx.try_recv().ok()
    }

    /// Takes every event queued so far.
    pub fn drain(&mut self) -> Vec<DiagnosticEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Cancels the subscription. Events already queued are discarded.
    pub fn unsubscribe(self) {}
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.upgrade() {
            listener.unsubscribe(self.id);
        }
    }
}
