//! # Event Bus
//!
//! Topic-based publish/subscribe with synchronous, in-registration-order
//! delivery and per-subscriber failure isolation.
//!
//! ## Design Notes:
//! The bus is an explicitly constructed instance owned by the composition
//! code in `main` and handed to each component that needs it — there is no
//! process-wide singleton, so its lifecycle is tied to process start/stop
//! rather than module-load side effects.
//!
//! ## Delivery Contract:
//! - `publish` invokes every current subscriber of the topic within the
//!   call, in the order they subscribed.
//! - A subscriber returning an error is logged and does not prevent
//!   delivery to remaining subscribers, nor propagate to the publisher.
//! - Publishing to a topic with no subscribers is a no-op.

use crate::events::Event;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, warn};

/// Callback signature for subscribers.
///
/// Returning `Err` marks the delivery as failed for this subscriber only;
/// the bus logs it and moves on.
pub type SubscriberFn = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// One registered subscription on a topic.
struct Entry {
    id: u64,
    callback: SubscriberFn,
}

/// Internal bus state, shared between the bus and its subscription handles.
struct BusInner {
    topics: RwLock<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

/// The event router. Cheap to clone; clones share the same subscriber
/// lists.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a callback under a topic.
    ///
    /// Returns a [`Subscription`] disposer with stable identity: disposing
    /// it removes exactly this registration without affecting co-registered
    /// subscribers, and is safe to call more than once.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut topics = self.inner.topics.write().unwrap();
        topics.entry(topic.to_string()).or_default().push(Entry {
            id,
            callback: Arc::new(callback),
        });

        debug!("Subscribed {} to topic '{}'", id, topic);

        Subscription {
            inner: Arc::downgrade(&self.inner),
            topic: topic.to_string(),
            id,
        }
    }

    /// Deliver an event to every current subscriber of `topic`.
    ///
    /// Callbacks are collected under the lock and invoked after it is
    /// released, so a subscriber may publish or (un)subscribe reentrantly
    /// without deadlocking.
    pub fn publish(&self, topic: &str, event: &Event) {
        let callbacks: Vec<SubscriberFn> = {
            let topics = self.inner.topics.read().unwrap();
            match topics.get(topic) {
                Some(entries) => entries.iter().map(|e| e.callback.clone()).collect(),
                None => return,
            }
        };

        for callback in callbacks {
            if let Err(err) = callback(event) {
                // Subscriber failures are isolated: log and keep delivering.
                warn!("Subscriber on topic '{}' failed: {:#}", topic, err);
            }
        }
    }

    /// Number of current subscribers on a topic (diagnostics and tests).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.inner.topics.read().unwrap();
        topics.get(topic).map_or(0, |entries| entries.len())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposer handle for one subscription.
///
/// Holds a weak reference to the bus so a forgotten handle never keeps the
/// bus alive. Dropping the handle does NOT unsubscribe — removal is always
/// explicit via [`Subscription::dispose`].
pub struct Subscription {
    inner: Weak<BusInner>,
    topic: String,
    id: u64,
}

impl Subscription {
    /// Remove this subscription from its topic. Idempotent.
    pub fn dispose(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return; // bus already gone
        };

        let mut topics = inner.topics.write().unwrap();
        if let Some(entries) = topics.get_mut(&self.topic) {
            entries.retain(|entry| entry.id != self.id);
            if entries.is_empty() {
                topics.remove(&self.topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn audio_event(tag: &str) -> Event {
        Event::AudioReceived {
            session_id: "S1".to_string(),
            audio_data: tag.to_string(),
        }
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe("t", move |_| {
                seen.lock().unwrap().push(label);
                Ok(())
            });
        }

        bus.publish("t", &audio_event("x"));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_subscriber_is_isolated() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("t", |_| Err(anyhow::anyhow!("subscriber blew up")));

        let seen_ok = seen.clone();
        bus.subscribe("t", move |_| {
            seen_ok.lock().unwrap().push("survivor");
            Ok(())
        });

        // Must not panic or skip the second subscriber.
        bus.publish("t", &audio_event("x"));
        assert_eq!(*seen.lock().unwrap(), vec!["survivor"]);
    }

    #[test]
    fn test_dispose_removes_exactly_one_and_is_idempotent() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0u32));

        let c1 = count.clone();
        let sub1 = bus.subscribe("t", move |_| {
            *c1.lock().unwrap() += 1;
            Ok(())
        });
        let c2 = count.clone();
        let _sub2 = bus.subscribe("t", move |_| {
            *c2.lock().unwrap() += 10;
            Ok(())
        });

        sub1.dispose();
        sub1.dispose(); // second call is a no-op

        bus.publish("t", &audio_event("x"));
        assert_eq!(*count.lock().unwrap(), 10);
        assert_eq!(bus.subscriber_count("t"), 1);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.publish("nobody-home", &audio_event("x"));
        assert_eq!(bus.subscriber_count("nobody-home"), 0);
    }

    #[test]
    fn test_reentrant_publish_does_not_deadlock() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner_bus = bus.clone();
        let seen_outer = seen.clone();
        bus.subscribe("outer", move |_| {
            seen_outer.lock().unwrap().push("outer");
            inner_bus.publish("inner", &audio_event("nested"));
            Ok(())
        });

        let seen_inner = seen.clone();
        bus.subscribe("inner", move |_| {
            seen_inner.lock().unwrap().push("inner");
            Ok(())
        });

        bus.publish("outer", &audio_event("x"));
        assert_eq!(*seen.lock().unwrap(), vec!["outer", "inner"]);
    }
}
