//! Publish/subscribe notification bus.
//!
//! Caches and searches announce mutations through an [`EventBus`] so UI-style
//! consumers can react without polling. Subscription lifetime is explicit:
//! [`EventBus::subscribe`] hands back an id that must be passed to
//! [`EventBus::unsubscribe`] when the consumer goes away.

use std::sync::{Arc, Mutex};

/// What happened to the observed collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// An item was inserted or replaced with a newer revision.
    Update,
    /// An item was removed.
    Remove,
    /// The whole collection was cleared.
    Clear,
    /// Something changed; also emitted once as a catch-up signal after a
    /// suppressed bulk load.
    Change,
    /// A search recorded a new result.
    Result,
}

/// One emitted notification.
#[derive(Debug, Clone)]
pub struct Notice {
    /// Event topic.
    pub topic: Topic,
    /// Identifier of the affected document, when the topic concerns one.
    pub id: Option<String>,
}

impl Notice {
    /// Notice about one document.
    pub fn about(topic: Topic, id: &str) -> Self {
        Notice {
            topic,
            id: Some(id.to_string()),
        }
    }

    /// Notice about the collection as a whole.
    pub fn broad(topic: Topic) -> Self {
        Notice { topic, id: None }
    }
}

/// Handle identifying one subscription.
pub type SubscriptionId = u64;

type Callback = Arc<dyn Fn(&Notice) + Send + Sync>;

struct BusInner {
    next_id: SubscriptionId,
    subscribers: Vec<(SubscriptionId, Callback)>,
}

/// Callback registry with explicit register/unregister.
///
/// Callbacks run synchronously on the emitting thread. The subscriber list is
/// copied out of the lock before invocation, so a callback may subscribe or
/// unsubscribe without deadlocking.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        EventBus {
            inner: Mutex::new(BusInner {
                next_id: 1,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Registers a callback and returns its subscription id.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Notice) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        id
    }

    /// Drops one subscription. Returns false when the id is unknown, which
    /// usually means a double unsubscribe.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sub_id, _)| *sub_id != id);
        let removed = inner.subscribers.len() < before;
        if !removed {
            log::debug!("unsubscribe for unknown subscription id {}", id);
        }
        removed
    }

    /// Delivers a notice to every current subscriber.
    pub fn emit(&self, notice: Notice) {
        let callbacks: Vec<Callback> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .subscribers
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect()
        };
        for callback in callbacks {
            callback(&notice);
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribers
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
