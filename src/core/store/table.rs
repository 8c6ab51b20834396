use crate::core::store::stream::StoreChange;
use crate::core::types::Operation;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::str::FromStr;

/// Canonical key of a row: one string per key field
pub type RecordKey = Vec<String>;

/// Exact-match filter: every `(field, value)` pair must match
pub type Query<'a> = [(&'a str, Value)];

/// A row that can live in a [`KeyedTable`].
///
/// `field` drives key computation and `find` queries. `merge` is what
/// `update` does with an existing row: raw JSON rows merge field by field,
/// typed records replace.
pub trait TableItem: Clone + Send + Sync + 'static {
    fn field(&self, name: &str) -> Option<Value>;

    fn merge(&mut self, other: Self) {
        *self = other;
    }
}

impl TableItem for Value {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn merge(&mut self, other: Self) {
        match (self.as_object_mut(), other) {
            (Some(current), Value::Object(incoming)) => current.extend(incoming),
            (_, other) => *self = other,
        }
    }
}

/// Canonical string for a key part or query value.
///
/// Numeric values (numbers or numeric strings) are normalized so that
/// `"100.0"`, `"100"` and `100` compare equal.
pub fn key_part(value: &Value) -> String {
    match value {
        Value::String(s) => Decimal::from_str(s)
            .map(|d| d.normalize().to_string())
            .unwrap_or_else(|_| s.clone()),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .map(|d| d.normalize().to_string())
            .unwrap_or_else(|_| n.to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn decimal_value(value: Decimal) -> Value {
    Value::String(value.normalize().to_string())
}

/// In-memory collection keyed by a composite key, in insertion order.
///
/// A table with no key fields is append-only: every insert adds a row and
/// `update`/`delete` cannot address existing rows.
#[derive(Debug, Clone)]
pub struct KeyedTable<R> {
    key_fields: Vec<String>,
    rows: BTreeMap<u64, R>,
    index: HashMap<RecordKey, u64>,
    next_seq: u64,
    max_len: Option<usize>,
}

impl<R: TableItem> KeyedTable<R> {
    pub fn new<I, S>(key_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_fields: key_fields.into_iter().map(Into::into).collect(),
            rows: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            max_len: None,
        }
    }

    /// Evict the oldest rows once the table holds more than `max_len`
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    pub fn is_keyed(&self) -> bool {
        !self.key_fields.is_empty()
    }

    /// `None` for append-only tables
    pub fn key_of(&self, item: &R) -> Option<RecordKey> {
        if self.key_fields.is_empty() {
            return None;
        }
        Some(
            self.key_fields
                .iter()
                .map(|name| item.field(name).as_ref().map_or_else(String::new, key_part))
                .collect(),
        )
    }

    pub fn insert<I>(&mut self, items: I) -> Vec<StoreChange<R>>
    where
        I: IntoIterator<Item = R>,
    {
        let changes = items
            .into_iter()
            .map(|item| match self.slot(&item) {
                Some(seq) => {
                    let before = self.rows.insert(seq, item.clone());
                    StoreChange::new(Operation::Insert, before, item)
                }
                None => {
                    self.append(item.clone());
                    StoreChange::new(Operation::Insert, None, item)
                }
            })
            .collect();
        self.evict();
        changes
    }

    /// Merge into existing rows; a row with an unknown key is inserted
    pub fn update<I>(&mut self, items: I) -> Vec<StoreChange<R>>
    where
        I: IntoIterator<Item = R>,
    {
        let mut changes = Vec::new();
        for item in items {
            let existing = self.slot(&item).and_then(|seq| self.rows.get_mut(&seq));
            match existing {
                Some(row) => {
                    let before = row.clone();
                    row.merge(item);
                    changes.push(StoreChange::new(Operation::Update, Some(before), row.clone()));
                }
                None => {
                    self.append(item.clone());
                    changes.push(StoreChange::new(Operation::Update, None, item));
                }
            }
        }
        self.evict();
        changes
    }

    /// Remove rows by key; unknown keys are ignored
    pub fn delete<I>(&mut self, items: I) -> Vec<StoreChange<R>>
    where
        I: IntoIterator<Item = R>,
    {
        items
            .into_iter()
            .filter_map(|item| {
                let key = self.key_of(&item)?;
                let seq = self.index.remove(&key)?;
                let removed = self.rows.remove(&seq)?;
                Some(StoreChange::new(Operation::Delete, None, removed))
            })
            .collect()
    }

    pub fn clear(&mut self) -> Vec<StoreChange<R>> {
        self.index.clear();
        std::mem::take(&mut self.rows)
            .into_values()
            .map(|row| StoreChange::new(Operation::Delete, None, row))
            .collect()
    }

    /// Remove every row matching `query`
    pub fn clear_where(&mut self, query: &Query<'_>) -> Vec<StoreChange<R>> {
        let doomed: Vec<u64> = self
            .rows
            .iter()
            .filter(|(_, row)| matches(*row, query))
            .map(|(seq, _)| *seq)
            .collect();

        doomed
            .into_iter()
            .filter_map(|seq| {
                let row = self.rows.remove(&seq)?;
                if let Some(key) = self.key_of(&row) {
                    self.index.remove(&key);
                }
                Some(StoreChange::new(Operation::Delete, None, row))
            })
            .collect()
    }

    /// Swap the contents for `items`, returning only the net difference.
    ///
    /// Rows whose `fingerprint` is unchanged emit nothing. A changed keyed
    /// row becomes an `Update` and a missing row an `Insert`. Rows absent
    /// from `items` are removed as `Delete`s. Operations rejected by
    /// `allows` are skipped and the current row is kept, so an insert-only
    /// table only ever gains rows. Append-only tables pair rows by
    /// fingerprint.
    pub fn replace<I, F, A>(&mut self, items: I, fingerprint: F, allows: A) -> Vec<StoreChange<R>>
    where
        I: IntoIterator<Item = R>,
        F: Fn(&R) -> String,
        A: Fn(Operation) -> bool,
    {
        self.replace_where(&[], items, fingerprint, allows)
    }

    /// [`replace`](Self::replace) limited to the rows matching `query`;
    /// other rows are never removed.
    pub fn replace_where<I, F, A>(
        &mut self,
        query: &Query<'_>,
        items: I,
        fingerprint: F,
        allows: A,
    ) -> Vec<StoreChange<R>>
    where
        I: IntoIterator<Item = R>,
        F: Fn(&R) -> String,
        A: Fn(Operation) -> bool,
    {
        let mut pool: HashMap<String, VecDeque<u64>> = HashMap::new();
        if !self.is_keyed() {
            for (seq, row) in self.rows.iter().filter(|(_, row)| matches(*row, query)) {
                pool.entry(fingerprint(row)).or_default().push_back(*seq);
            }
        }

        let mut changes = Vec::new();
        let mut kept = HashSet::new();
        for item in items {
            let slot = if self.is_keyed() {
                self.slot(&item)
            } else {
                pool.get_mut(&fingerprint(&item)).and_then(VecDeque::pop_front)
            };
            match slot.and_then(|seq| Some(seq).zip(self.rows.get_mut(&seq))) {
                Some((seq, row)) => {
                    kept.insert(seq);
                    if fingerprint(row) == fingerprint(&item) || !allows(Operation::Update) {
                        continue;
                    }
                    let before = std::mem::replace(row, item.clone());
                    changes.push(StoreChange::new(Operation::Update, Some(before), item));
                }
                None if allows(Operation::Insert) => {
                    kept.insert(self.next_seq);
                    self.append(item.clone());
                    changes.push(StoreChange::new(Operation::Insert, None, item));
                }
                None => {}
            }
        }

        if allows(Operation::Delete) {
            let stale: Vec<u64> = self
                .rows
                .iter()
                .filter(|(seq, row)| !kept.contains(*seq) && matches(*row, query))
                .map(|(seq, _)| *seq)
                .collect();
            for seq in stale {
                if let Some(row) = self.rows.remove(&seq) {
                    if let Some(key) = self.key_of(&row) {
                        self.index.remove(&key);
                    }
                    changes.push(StoreChange::new(Operation::Delete, None, row));
                }
            }
        }
        self.evict();
        changes
    }

    /// Exact key lookup using the key fields of `item`
    pub fn get(&self, item: &R) -> Option<&R> {
        let key = self.key_of(item)?;
        self.index.get(&key).and_then(|seq| self.rows.get(seq))
    }

    pub fn find(&self, query: &Query<'_>) -> Vec<R> {
        self.rows
            .values()
            .filter(|row| matches(*row, query))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &R> + '_ {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn slot(&self, item: &R) -> Option<u64> {
        self.key_of(item).and_then(|key| self.index.get(&key).copied())
    }

    fn append(&mut self, item: R) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(key) = self.key_of(&item) {
            self.index.insert(key, seq);
        }
        self.rows.insert(seq, item);
    }

    fn evict(&mut self) {
        let Some(max_len) = self.max_len else {
            return;
        };
        while self.rows.len() > max_len {
            let Some((_, row)) = self.rows.pop_first() else {
                break;
            };
            if let Some(key) = self.key_of(&row) {
                self.index.remove(&key);
            }
        }
    }
}

fn matches<R: TableItem>(row: &R, query: &Query<'_>) -> bool {
    query.iter().all(|(name, expected)| {
        row.field(name)
            .is_some_and(|actual| key_part(&actual) == key_part(expected))
    })
}
