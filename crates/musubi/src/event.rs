//! Lifecycle events and the emitter that delivers them to subscribers.
//!
//! Events are observational only: delivering them never changes how a run is
//! scheduled, and a subscriber that panics is logged and skipped.

use musubi_core::{StepExecutionError, StepName};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Kind of lifecycle occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A run began.
    Start,
    /// A step attempt was dispatched.
    StartStep,
    /// A step's guard returned `false`.
    SkipStep,
    /// A step attempt failed and another one is scheduled.
    RetryStep,
    /// A step returned a value.
    Success,
    /// A step failed terminally.
    Error,
    /// A run ended with a result.
    Finish,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventKind::Start => "start",
            EventKind::StartStep => "start_step",
            EventKind::SkipStep => "skip_step",
            EventKind::RetryStep => "retry_step",
            EventKind::Success => "success",
            EventKind::Error => "error",
            EventKind::Finish => "finish",
        };
        f.write_str(label)
    }
}

/// An immutable record of a lifecycle occurrence.
#[derive(Debug, Clone)]
pub struct Event {
    /// Run that produced the event.
    pub run_id: Uuid,
    /// What happened.
    pub kind: EventKind,
    /// Step concerned, absent for run-level events.
    pub step: Option<StepName>,
    /// Attempt number. For `RetryStep` this is the attempt about to start.
    pub attempt: Option<u32>,
    /// Cause, for `RetryStep` and `Error`.
    pub error: Option<StepExecutionError>,
}

impl Event {
    pub(crate) fn run(run_id: Uuid, kind: EventKind) -> Self {
        Self {
            run_id,
            kind,
            step: None,
            attempt: None,
            error: None,
        }
    }

    pub(crate) fn step(run_id: Uuid, kind: EventKind, step: &StepName) -> Self {
        Self {
            step: Some(step.clone()),
            ..Self::run(run_id, kind)
        }
    }

    pub(crate) fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub(crate) fn with_error(mut self, error: StepExecutionError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Token returned by [`EventEmitter::subscribe`]; pass it back to
/// [`EventEmitter::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<Subscription>,
}

/// Synchronous publish/subscribe hub for [`Event`]s.
///
/// Clones share the same subscriber list.
///
/// # Examples
///
/// ```
/// use musubi::{EventEmitter, EventKind};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let emitter = EventEmitter::new();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
/// let id = emitter.subscribe(EventKind::Success, move |_event| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// assert_eq!(emitter.subscriber_count(), 1);
/// assert!(emitter.unsubscribe(id));
/// ```
#[derive(Clone, Default)]
pub struct EventEmitter {
    subscribers: Arc<RwLock<Subscribers>>,
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventEmitter {
    /// Creates an emitter with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one event kind.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.insert(Some(kind), Arc::new(handler))
    }

    /// Registers a handler for every event kind.
    pub fn subscribe_all(&self, handler: impl Fn(&Event) + Send + Sync + 'static) -> SubscriptionId {
        self.insert(None, Arc::new(handler))
    }

    /// Forwards events of one kind (or all kinds, for `None`) to a channel.
    ///
    /// The subscription stays registered after the receiver is dropped; send
    /// errors are ignored.
    pub fn channel(&self, kind: Option<EventKind>) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.insert(
            kind,
            Arc::new(move |event: &Event| {
                let _ = sender.send(event.clone());
            }),
        );
        (id, receiver)
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.write();
        let before = subscribers.entries.len();
        subscribers.entries.retain(|s| s.id != id);
        subscribers.entries.len() != before
    }

    /// Number of registered subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Delivers an event to matching subscribers in registration order.
    ///
    /// Handlers run on the caller's thread after the subscriber list has been
    /// snapshotted, so a handler may subscribe or unsubscribe without
    /// deadlocking; the change applies from the next event on.
    pub fn emit(&self, event: &Event) {
        let handlers: Vec<Handler> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .filter(|s| s.kind.map_or(true, |kind| kind == event.kind))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(
                    kind = %event.kind,
                    step = ?event.step,
                    "Event subscriber panicked; continuing"
                );
            }
        }
    }

    fn insert(&self, kind: Option<EventKind>, handler: Handler) -> SubscriptionId {
        let mut subscribers = self.write();
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        subscribers.entries.push(Subscription { id, kind, handler });
        id
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Subscribers> {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn success(step: &str) -> Event {
        Event::step(Uuid::new_v4(), EventKind::Success, &StepName::new(step))
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let emitter = EventEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            emitter.subscribe(EventKind::Success, move |_| {
                log.lock().expect("log lock").push(label);
            });
        }

        emitter.emit(&success("a"));
        assert_eq!(*log.lock().expect("log lock"), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_kind_filter_and_subscribe_all() {
        let emitter = EventEmitter::new();
        let kinds = Arc::new(Mutex::new(Vec::new()));

        let only_errors = Arc::clone(&kinds);
        emitter.subscribe(EventKind::Error, move |e| {
            only_errors.lock().expect("lock").push(("error-only", e.kind));
        });
        let everything = Arc::clone(&kinds);
        emitter.subscribe_all(move |e| {
            everything.lock().expect("lock").push(("all", e.kind));
        });

        emitter.emit(&success("a"));
        emitter.emit(&Event::run(Uuid::new_v4(), EventKind::Finish));

        assert_eq!(
            *kinds.lock().expect("lock"),
            vec![("all", EventKind::Success), ("all", EventKind::Finish)]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let emitter = EventEmitter::new();
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let id = emitter.subscribe(EventKind::Success, move |_| {
            *counter.lock().expect("lock") += 1;
        });

        emitter.emit(&success("a"));
        assert!(emitter.unsubscribe(id));
        assert!(!emitter.unsubscribe(id));
        emitter.emit(&success("a"));

        assert_eq!(*count.lock().expect("lock"), 1);
        assert_eq!(emitter.subscriber_count(), 0);
    }

    #[test]
    fn test_panicking_subscriber_is_swallowed() {
        let emitter = EventEmitter::new();
        let reached = Arc::new(Mutex::new(false));

        emitter.subscribe(EventKind::Success, |_| panic!("observer bug"));
        let flag = Arc::clone(&reached);
        emitter.subscribe(EventKind::Success, move |_| {
            *flag.lock().expect("lock") = true;
        });

        emitter.emit(&success("a"));
        assert!(*reached.lock().expect("lock"));
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let emitter = EventEmitter::new();
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let inner = emitter.clone();
        let own = Arc::clone(&slot);
        let id = emitter.subscribe(EventKind::Success, move |_| {
            if let Some(id) = *own.lock().expect("lock") {
                inner.unsubscribe(id);
            }
        });
        *slot.lock().expect("lock") = Some(id);

        emitter.emit(&success("a"));
        assert_eq!(emitter.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_channel_forwards_events() {
        let emitter = EventEmitter::new();
        let (_, mut receiver) = emitter.channel(Some(EventKind::Success));

        emitter.emit(&success("draft"));
        emitter.emit(&Event::run(Uuid::new_v4(), EventKind::Start));

        let event = receiver.recv().await.expect("forwarded event");
        assert_eq!(event.kind, EventKind::Success);
        assert_eq!(event.step, Some(StepName::new("draft")));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_event_builders() {
        let run_id = Uuid::new_v4();
        let error = StepExecutionError::new(StepName::new("s"), 2, "boom".into());
        let event = Event::step(run_id, EventKind::RetryStep, &StepName::new("s"))
            .with_attempt(3)
            .with_error(error);

        assert_eq!(event.run_id, run_id);
        assert_eq!(event.attempt, Some(3));
        assert_eq!(event.error.map(|e| e.attempt), Some(2));
        assert_eq!(EventKind::RetryStep.to_string(), "retry_step");
    }
}
