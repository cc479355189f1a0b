use crate::gateway::Filter;
use crate::models::Table;
use crate::poll::Refetcher;
use crate::store::{Entity, EntityStore};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One notification from the live change feed. Carries no sequence number
/// and may be a duplicate or a stale replay; it is a hint to merge or
/// refetch, never an authoritative diff.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: Table,
    pub op: ChangeOp,
    pub row: Value,
}

struct FeedSub {
    table: Table,
    filter: Option<Filter>,
    sender: mpsc::Sender<ChangeEvent>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    subs: HashMap<u64, FeedSub>,
    connected: bool,
}

/// Per-context registry of live (table, filter) subscriptions. The hosting
/// application pushes every change notification it receives into `publish`;
/// the hub fans each one out to matching subscriptions over bounded
/// channels. A full channel drops the event with a warning — the poll
/// backstop covers the loss.
pub struct FeedHub {
    inner: Mutex<HubInner>,
    buffer: usize,
}

impl FeedHub {
    pub fn new(buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HubInner {
                connected: true,
                ..HubInner::default()
            }),
            buffer: buffer.max(1),
        })
    }

    pub fn subscribe(self: &Arc<Self>, table: Table, filter: Option<Filter>) -> SubscriptionHandle {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let mut inner = self.inner.lock().expect("feed hub lock");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subs.insert(id, FeedSub { table, filter, sender });
        tracing::debug!(table = table.as_str(), id, "change feed subscription opened");
        SubscriptionHandle {
            id,
            hub: Arc::downgrade(self),
            receiver,
        }
    }

    pub fn publish(&self, event: ChangeEvent) {
        let mut closed = Vec::new();
        {
            let inner = self.inner.lock().expect("feed hub lock");
            for (id, sub) in &inner.subs {
                if sub.table != event.table || !matches_filter(sub.filter.as_ref(), &event.row) {
                    continue;
                }
                match sub.sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            table = event.table.as_str(),
                            id,
                            "subscription buffer full; notification dropped"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        for id in closed {
            self.unsubscribe(id);
        }
    }

    /// Connection-state changes are logged, never acted on: the poll
    /// scheduler is the correctness backstop for missed notifications.
    pub fn set_connected(&self, connected: bool) {
        let mut inner = self.inner.lock().expect("feed hub lock");
        if inner.connected == connected {
            return;
        }
        inner.connected = connected;
        if connected {
            tracing::info!("change feed connected");
        } else {
            tracing::warn!("change feed disconnected; polling covers until reconnect");
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.lock().expect("feed hub lock").subs.len()
    }

    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("feed hub lock");
        inner.subs.clear();
    }

    fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().expect("feed hub lock");
        if inner.subs.remove(&id).is_some() {
            tracing::debug!(id, "change feed subscription released");
        }
    }
}

fn matches_filter(filter: Option<&Filter>, row: &Value) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    match row.get(&filter.column) {
        Some(Value::String(value)) => *value == filter.value,
        Some(Value::Number(value)) => value.to_string() == filter.value,
        // Partial rows (delete events often carry only the id) cannot prove
        // a mismatch; deliver and rely on idempotent application.
        Some(Value::Null) | None => true,
        Some(_) => false,
    }
}

/// Owns one live channel; dropping the handle releases the registration so
/// an unmounted view can never keep receiving notifications.
pub struct SubscriptionHandle {
    id: u64,
    hub: Weak<FeedHub>,
    receiver: mpsc::Receiver<ChangeEvent>,
}

impl SubscriptionHandle {
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

/// Apply one notification to a store. Inserts and updates are the same
/// idempotent merge; deletes are no-ops for unknown ids. A row that fails to
/// decode downgrades the notification to a refetch hint.
pub(crate) fn apply_change<T>(store: &EntityStore<T>, refetcher: &Refetcher, event: ChangeEvent)
where
    T: Entity + DeserializeOwned,
{
    match event.op {
        ChangeOp::Insert | ChangeOp::Update => match serde_json::from_value::<T>(event.row) {
            Ok(row) => store.upsert_one(row),
            Err(error) => {
                tracing::warn!(
                    table = T::table().as_str(),
                    error = %error,
                    "change row failed to decode; scheduling refetch"
                );
                refetcher.request();
            }
        },
        ChangeOp::Delete => match row_id(&event.row) {
            Some(id) => store.remove_one(&id),
            None => {
                tracing::warn!(
                    table = T::table().as_str(),
                    "delete notification without id; scheduling refetch"
                );
                refetcher.request();
            }
        },
    }
}

fn row_id(row: &Value) -> Option<String> {
    match row.get("id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    }
}

pub(crate) fn spawn_change_router<T>(
    mut subscription: SubscriptionHandle,
    store: Arc<EntityStore<T>>,
    refetcher: Refetcher,
) -> JoinHandle<()>
where
    T: Entity + DeserializeOwned,
{
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            apply_change(store.as_ref(), &refetcher, event);
        }
        tracing::debug!(table = T::table().as_str(), "change router stopped");
    })
}
