use crate::core::store::stream::{ChangeStream, ChangeWatcher, StoreChange, Waiter};
use crate::core::store::table::{KeyedTable, Query, TableItem};
use crate::core::types::Operation;
use parking_lot::RwLock;
use serde_json::Value;

/// A [`KeyedTable`] behind a lock together with its [`ChangeStream`].
///
/// Mutations publish while still holding the write lock, so watchers see
/// changes in the order they were applied.
#[derive(Debug)]
pub struct DataStore<R: TableItem> {
    name: String,
    table: RwLock<KeyedTable<R>>,
    changes: ChangeStream<R>,
}

impl<R: TableItem> DataStore<R> {
    pub fn new<I, S>(name: impl Into<String>, key_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_table(name, KeyedTable::new(key_fields))
    }

    pub fn from_table(name: impl Into<String>, table: KeyedTable<R>) -> Self {
        Self {
            name: name.into(),
            table: RwLock::new(table),
            changes: ChangeStream::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(&self, items: Vec<R>) -> usize {
        self.mutate(|table| table.insert(items))
    }

    pub fn update(&self, items: Vec<R>) -> usize {
        self.mutate(|table| table.update(items))
    }

    pub fn delete(&self, items: Vec<R>) -> usize {
        self.mutate(|table| table.delete(items))
    }

    pub fn apply(&self, operation: Operation, items: Vec<R>) -> usize {
        match operation {
            Operation::Insert => self.insert(items),
            Operation::Update => self.update(items),
            Operation::Delete => self.delete(items),
        }
    }

    pub fn clear(&self) -> usize {
        self.mutate(KeyedTable::clear)
    }

    /// Swap the contents in one mutation, publishing only the net difference.
    /// See [`KeyedTable::replace`].
    pub fn replace<F, A>(&self, items: Vec<R>, fingerprint: F, allows: A) -> usize
    where
        F: Fn(&R) -> String,
        A: Fn(Operation) -> bool,
    {
        self.mutate(|table| table.replace(items, fingerprint, allows))
    }

    pub fn replace_where<F, A>(&self, query: &Query<'_>, items: Vec<R>, fingerprint: F, allows: A) -> usize
    where
        F: Fn(&R) -> String,
        A: Fn(Operation) -> bool,
    {
        self.mutate(|table| table.replace_where(query, items, fingerprint, allows))
    }

    pub fn clear_where(&self, query: &Query<'_>) -> usize {
        self.mutate(|table| table.clear_where(query))
    }

    pub fn get(&self, item: &R) -> Option<R> {
        self.table.read().get(item).cloned()
    }

    pub fn find(&self, query: &Query<'_>) -> Vec<R> {
        self.table.read().find(query)
    }

    /// Consistent copy of every row in insertion order
    pub fn snapshot(&self) -> Vec<R> {
        self.table.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn watch(&self) -> ChangeWatcher<R> {
        self.changes.watch()
    }

    pub fn waiter(&self) -> Waiter {
        self.changes.waiter()
    }

    /// Resolve after the next mutation, returning the rows at that point
    pub async fn wait(&self) -> Vec<R> {
        let mut waiter = self.waiter();
        // the sender lives in `self`, so the wait cannot fail here
        let _ = waiter.wait().await;
        self.snapshot()
    }

    /// Snapshot the rows and drop the watcher's backlog atomically.
    ///
    /// Everything discarded from `watcher` is already reflected in the
    /// returned rows, and every later change will still be delivered.
    pub fn resync_snapshot(&self, watcher: &mut ChangeWatcher<R>) -> Vec<R> {
        let table = self.table.read();
        watcher.drain();
        table.iter().cloned().collect()
    }

    /// Run `f` against the table under the read lock
    pub fn with_table<T>(&self, f: impl FnOnce(&KeyedTable<R>) -> T) -> T {
        f(&*self.table.read())
    }

    fn mutate(&self, f: impl FnOnce(&mut KeyedTable<R>) -> Vec<StoreChange<R>>) -> usize {
        let mut table = self.table.write();
        let changes = f(&mut *table);
        self.changes.publish(&changes);
        changes.len()
    }
}

impl DataStore<Value> {
    /// Load a REST or stream snapshot over the rows matching `query`.
    ///
    /// Rows identical to the snapshot are left alone, so a re-seed only
    /// publishes what actually moved.
    pub fn reseed(&self, query: &Query<'_>, rows: Vec<Value>) -> usize {
        self.replace_where(query, rows, Value::to_string, |_| true)
    }
}
