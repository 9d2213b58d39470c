//! Event bus - in-process typed publish/subscribe
//!
//! Dispatch is synchronous: `emit` calls every live subscriber in
//! registration order before returning. Each handler invocation is
//! guarded, so a panicking subscriber cannot take down the producer or
//! starve its peers. Delivery is at-most-once and in-memory only.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::{debug, warn};

use super::types::Event;

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Registry {
    subscribers: Vec<(u64, Handler)>,
}

/// Central event bus shared by all components
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Emit an event to every subscriber
    ///
    /// Never fails: a bus with no subscribers drops the event, and a
    /// panicking handler is contained.
    pub fn emit(&self, event: Event) {
        debug!(kind = event.kind(), task_id = %event.task_id, "EventBus::emit");

        // Snapshot handlers so emit never holds the lock across callbacks
        let handlers: Vec<(u64, Handler)> = {
            let registry = match self.registry.read() {
                Ok(r) => r,
                Err(poisoned) => poisoned.into_inner(),
            };
            registry.subscribers.clone()
        };

        for (id, handler) in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if outcome.is_err() {
                warn!(subscriber = id, kind = event.kind(), "Subscriber panicked during dispatch");
            }
        }
    }

    /// Register a callback; the returned handle unsubscribes on drop
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut registry = match self.registry.write() {
                Ok(r) => r,
                Err(poisoned) => poisoned.into_inner(),
            };
            registry.subscribers.push((id, Arc::new(handler)));
        }
        debug!(subscriber = id, "EventBus::subscribe");

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Subscribe through an unbounded channel for async consumers
    pub fn channel_subscriber(&self) -> (Subscription, tokio::sync::mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sub = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (sub, rx)
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        match self.registry.read() {
            Ok(r) => r.subscribers.len(),
            Err(poisoned) => poisoned.into_inner().subscribers.len(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `subscribe`; dropping it unsubscribes
pub struct Subscription {
    id: u64,
    registry: Weak<RwLock<Registry>>,
}

impl Subscription {
    /// Explicitly unsubscribe
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    fn remove(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = match registry.write() {
                Ok(r) => r,
                Err(poisoned) => poisoned.into_inner(),
            };
            registry.subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Create a bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_with_no_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.emit(Event::task_queued("task-1"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let _sub = bus.subscribe(move |event| {
            seen_clone.lock().unwrap().push(event.kind().to_string());
        });

        bus.emit(Event::task_queued("task-1"));
        bus.emit(Event::task_started("task-1", "agent-1", "nexus/task-1"));
        bus.emit(Event::task_completed("task-1", "abc123", 1));

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "task_queued".to_string(),
                "task_started".to_string(),
                "task_completed".to_string()
            ]
        );
    }

    #[test]
    fn test_unsubscribe_on_drop() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        let sub = bus.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(Event::task_queued("task-1"));
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);

        bus.emit(Event::task_queued("task-2"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_subscriber_does_not_poison_bus() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let _bad = bus.subscribe(|_| {
            panic!("subscriber bug");
        });

        let count_clone = count.clone();
        let _good = bus.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Emit returns normally and the healthy subscriber still sees the event
        bus.emit(Event::task_queued("task-1"));
        bus.emit(Event::task_queued("task-2"));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_multiple_subscribers_all_receive() {
        let bus = EventBus::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let a_clone = a.clone();
        let _sub_a = bus.subscribe(move |_| {
            a_clone.fetch_add(1, Ordering::SeqCst);
        });
        let b_clone = b.clone();
        let _sub_b = bus.subscribe(move |_| {
            b_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::task_queued("task-1"));

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_subscriber_bridges_to_async() {
        let bus = EventBus::new();
        let (_sub, mut rx) = bus.channel_subscriber();

        bus.emit(Event::task_queued("task-1"));
        bus.emit(Event::task_failed("task-1", "boom"));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind(), "task_queued");
        assert_eq!(second.kind(), "task_failed");
    }

    #[test]
    fn test_subscription_outliving_bus_is_harmless() {
        let bus = EventBus::new();
        let sub = bus.subscribe(|_| {});
        drop(bus);
        // Dropping after the bus is gone must not panic
        drop(sub);
    }
}
