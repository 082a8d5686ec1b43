//! Ordered, failure-isolating listener fan-out.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::broadcast;

use super::{Listener, ListenerFailure};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a registered listener; ids grow with registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocate the next id
    pub fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Entry<E> {
    id: ListenerId,
    listener: Weak<dyn Listener<E>>,
}

/// Delivers events of type `E` to listeners in registration order
pub struct ListenerDispatcher<E> {
    entries: Mutex<Vec<Entry<E>>>,
    failures: broadcast::Sender<ListenerFailure>,
}

impl<E> ListenerDispatcher<E> {
    /// Create a dispatcher reporting failures on `failures`
    pub fn new(failures: broadcast::Sender<ListenerFailure>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            failures,
        }
    }

    /// Register a listener; only a weak reference is kept.
    pub fn add(&self, listener: &Arc<dyn Listener<E>>) -> ListenerId {
        let id = ListenerId::next();
        self.lock().push(Entry {
            id,
            listener: Arc::downgrade(listener),
        });
        id
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    /// Number of live listeners
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether no live listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every live listener.
    ///
    /// The listener list is snapshotted first, so listeners may register or
    /// unregister from inside a callback.
    pub fn notify(&self, event: &E, context: &str) {
        deliver(self.snapshot(), event, context, &self.failures);
    }

    fn snapshot(&self) -> Vec<(ListenerId, Arc<dyn Listener<E>>)> {
        let mut entries = self.lock();
        entries.retain(|entry| entry.listener.strong_count() > 0);
        entries
            .iter()
            .filter_map(|entry| entry.listener.upgrade().map(|l| (entry.id, l)))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry<E>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deliver `event` to each listener in turn, isolating failures.
pub fn deliver<E, I>(
    listeners: I,
    event: &E,
    context: &str,
    failures: &broadcast::Sender<ListenerFailure>,
) where
    I: IntoIterator<Item = (ListenerId, Arc<dyn Listener<E>>)>,
{
    for (id, listener) in listeners {
        let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
        let error = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };

        let failure = ListenerFailure {
            listener: id,
            context: context.to_string(),
            error,
        };
        tracing::warn!(listener = %id, context, error = %failure.error, "listener failed");
        // No receiver is fine: the warning above already recorded it.
        let _ = failures.send(failure);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerResult;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn Listener<u32>> {
        let log = log.clone();
        Arc::new(move |event: &u32| -> ListenerResult {
            log.lock().unwrap().push(format!("{name}:{event}"));
            Ok(())
        })
    }

    #[test]
    fn test_registration_order() {
        let (tx, _rx) = broadcast::channel(8);
        let dispatcher = ListenerDispatcher::new(tx);
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder(&log, "a");
        let b = recorder(&log, "b");
        dispatcher.add(&a);
        dispatcher.add(&b);

        dispatcher.notify(&1, "test");
        assert_eq!(*log.lock().unwrap(), vec!["a:1", "b:1"]);
    }

    #[test]
    fn test_failure_isolated_and_reported() {
        let (tx, mut rx) = broadcast::channel(8);
        let dispatcher = ListenerDispatcher::new(tx);
        let log = Arc::new(Mutex::new(Vec::new()));

        let failing: Arc<dyn Listener<u32>> =
            Arc::new(|_: &u32| -> ListenerResult { Err("boom".into()) });
        let panicking: Arc<dyn Listener<u32>> =
            Arc::new(|_: &u32| -> ListenerResult { panic!("kaput") });
        let ok = recorder(&log, "ok");

        let failing_id = dispatcher.add(&failing);
        let panicking_id = dispatcher.add(&panicking);
        dispatcher.add(&ok);

        dispatcher.notify(&7, "/chat");

        assert_eq!(*log.lock().unwrap(), vec!["ok:7"]);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.listener, failing_id);
        assert_eq!(first.context, "/chat");
        assert_eq!(first.error, "boom");

        let second = rx.try_recv().unwrap();
        assert_eq!(second.listener, panicking_id);
        assert!(second.error.contains("kaput"));
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let (tx, _rx) = broadcast::channel(8);
        let dispatcher = ListenerDispatcher::new(tx);
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder(&log, "a");
        dispatcher.add(&a);
        assert_eq!(dispatcher.len(), 1);

        drop(a);
        dispatcher.notify(&1, "test");
        assert!(dispatcher.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_remove() {
        let (tx, _rx) = broadcast::channel(8);
        let dispatcher = ListenerDispatcher::new(tx);
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder(&log, "a");
        let id = dispatcher.add(&a);

        assert!(dispatcher.remove(id));
        assert!(!dispatcher.remove(id));
        dispatcher.notify(&1, "test");
        assert!(log.lock().unwrap().is_empty());
    }
}
