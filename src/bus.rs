use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

pub mod topic {
    /// Emitted after a successful project-scoped mutation (roster changes);
    /// server-computed aggregates subscribe and refetch rather than trying
    /// to patch themselves locally.
    pub const PROJECT_CHANGED: &str = "project.changed";
}

type Handler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: u64,
    handlers: HashMap<String, Vec<(u64, Handler)>>,
}

/// In-process publish/subscribe channel decoupling unrelated entity stores.
/// Delivery is synchronous, in-process, best-effort; handlers are expected
/// to perform idempotent refetch requests, not incremental applies.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, topic: &str) {
        // Handlers run outside the lock so one may re-enter the bus.
        let handlers: Vec<Handler> = {
            let inner = self.inner.lock().expect("event bus lock");
            inner
                .handlers
                .get(topic)
                .map(|entries| entries.iter().map(|(_, handler)| handler.clone()).collect())
                .unwrap_or_default()
        };
        tracing::debug!(topic, handlers = handlers.len(), "event bus emit");
        for handler in handlers {
            handler();
        }
    }

    pub fn on(&self, topic: &str, handler: impl Fn() + Send + Sync + 'static) -> BusSubscription {
        let mut inner = self.inner.lock().expect("event bus lock");
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .handlers
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        BusSubscription {
            topic: topic.to_string(),
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        let inner = self.inner.lock().expect("event bus lock");
        inner.handlers.get(topic).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("event bus lock");
        inner.handlers.clear();
    }
}

/// Deregisters its handler on drop, matching the subscription-handle
/// lifecycle discipline of the change feed.
pub struct BusSubscription {
    topic: String,
    id: u64,
    bus: Weak<Mutex<BusInner>>,
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let mut inner = bus.lock().expect("event bus lock");
        if let Some(entries) = inner.handlers.get_mut(&self.topic) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                inner.handlers.remove(&self.topic);
            }
        }
    }
}
