use crate::models::{ManpowerRecord, RosterMember, Table, Task, TaskComment};
use std::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

const TEMP_ID_PREFIX: &str = "temp-";

pub fn temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

pub trait Entity: Clone + Send + Sync + 'static {
    fn table() -> Table;
    fn id(&self) -> &str;
}

impl Entity for Task {
    fn table() -> Table {
        Table::Tasks
    }

    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for TaskComment {
    fn table() -> Table {
        Table::TaskComments
    }

    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for ManpowerRecord {
    fn table() -> Table {
        Table::Manpower
    }

    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for RosterMember {
    fn table() -> Table {
        Table::ProjectRoster
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Ordered in-memory collection for one entity kind; the single source of UI
/// truth for that kind. Writes publish a fresh snapshot on a watch channel so
/// subscribed readers re-render without observing intermediate states.
pub struct EntityStore<T: Entity> {
    rows: Mutex<Vec<T>>,
    items_tx: watch::Sender<Vec<T>>,
}

impl<T: Entity> Default for EntityStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> EntityStore<T> {
    pub fn new() -> Self {
        let (items_tx, _) = watch::channel(Vec::new());
        Self {
            rows: Mutex::new(Vec::new()),
            items_tx,
        }
    }

    pub fn items(&self) -> Vec<T> {
        self.rows.lock().expect("entity store lock").clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<T>> {
        self.items_tx.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        let rows = self.rows.lock().expect("entity store lock");
        rows.iter().find(|row| row.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("entity store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or merge by id. An existing row keeps its position and is
    /// replaced wholesale (the incoming payload wins); an unknown id appends.
    pub fn upsert_one(&self, entity: T) {
        let mut rows = self.rows.lock().expect("entity store lock");
        match rows.iter_mut().find(|row| row.id() == entity.id()) {
            Some(existing) => *existing = entity,
            None => rows.push(entity),
        }
        self.publish(&rows);
    }

    /// Idempotent removal: an absent id is a no-op, never an error.
    pub fn remove_one(&self, id: &str) {
        let mut rows = self.rows.lock().expect("entity store lock");
        rows.retain(|row| row.id() != id);
        self.publish(&rows);
    }

    /// Apply a field-level patch in place. Returns false when the id is not
    /// present (nothing published).
    pub fn patch_one(&self, id: &str, patch: impl FnOnce(&mut T)) -> bool {
        let mut rows = self.rows.lock().expect("entity store lock");
        let Some(row) = rows.iter_mut().find(|row| row.id() == id) else {
            return false;
        };
        patch(row);
        self.publish(&rows);
        true
    }

    /// Replace the whole collection from a full refetch. Unresolved temp-id
    /// rows are re-appended so a backstop poll landing mid-mutation cannot
    /// flicker an optimistic row out of the UI.
    pub fn replace_all(&self, entities: Vec<T>) {
        let mut rows = self.rows.lock().expect("entity store lock");
        let pending: Vec<T> = rows
            .iter()
            .filter(|row| is_temp_id(row.id()))
            .filter(|row| !entities.iter().any(|entity| entity.id() == row.id()))
            .cloned()
            .collect();
        *rows = entities;
        rows.extend(pending);
        self.publish(&rows);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.rows.lock().expect("entity store lock").clone()
    }

    pub fn restore(&self, snapshot: Vec<T>) {
        let mut rows = self.rows.lock().expect("entity store lock");
        *rows = snapshot;
        self.publish(&rows);
    }

    fn publish(&self, rows: &[T]) {
        let _ = self.items_tx.send(rows.to_vec());
    }
}
