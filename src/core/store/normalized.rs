use crate::core::errors::ExchangeError;
use crate::core::store::datastore::DataStore;
use crate::core::store::mapper::{FieldMapper, MapContext, MessageFeed, StoreBinding, StoreSource};
use crate::core::store::stream::{ChangeWatcher, StoreChange, Waiter};
use crate::core::store::table::{KeyedTable, Query};
use crate::core::types::{NormalizedItem, Operation, StoreKind};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreState {
    Created,
    Started,
    Running,
    Closed,
    /// A loop stopped on an invariant violation
    Faulted(String),
}

type ReadyHook<R> = Arc<dyn Fn(&NormalizedStore<R>) + Send + Sync>;
type SyncReply = oneshot::Sender<Result<usize, ExchangeError>>;

enum Command {
    Synchronize(SyncReply),
}

/// A canonical table kept in sync with one exchange source.
///
/// Cheap to clone; clones share the same table and loops.
pub struct NormalizedStore<R: NormalizedItem> {
    inner: Arc<Inner<R>>,
}

impl<R: NormalizedItem> Clone for NormalizedStore<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: NormalizedItem> fmt::Debug for NormalizedStore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizedStore")
            .field("exchange", &self.inner.exchange)
            .field("kind", &R::KIND)
            .field("state", &*self.inner.state.lock())
            .field("len", &self.inner.table.len())
            .finish()
    }
}

struct Inner<R: NormalizedItem> {
    exchange: String,
    table: DataStore<R>,
    base: Option<Arc<DataStore<Value>>>,
    source: StoreSource<R>,
    state: Mutex<StoreState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    feed_tx: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    ready_hooks: Mutex<Vec<ReadyHook<R>>>,
}

impl<R: NormalizedItem> NormalizedStore<R> {
    /// `base` is the upstream raw table; required when the binding follows one
    pub fn new(
        exchange: &str,
        base: Option<Arc<DataStore<Value>>>,
        binding: StoreBinding<R>,
    ) -> Result<Self, ExchangeError> {
        if let StoreSource::Store { name, .. } = &binding.source {
            match &base {
                Some(table) if table.name() == name => {}
                Some(table) => {
                    return Err(ExchangeError::ConfigurationError(format!(
                        "{} {} store expects base table '{}', got '{}'",
                        exchange,
                        R::KIND,
                        name,
                        table.name()
                    )))
                }
                None => {
                    return Err(ExchangeError::ConfigurationError(format!(
                        "{} {} store needs base table '{}'",
                        exchange,
                        R::KIND,
                        name
                    )))
                }
            }
        }

        let mut table = KeyedTable::new(binding.key_fields());
        if let Some(max_len) = binding.max_len {
            table = table.with_max_len(max_len);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                exchange: exchange.to_string(),
                table: DataStore::from_table(R::KIND.name(), table),
                base,
                source: binding.source,
                state: Mutex::new(StoreState::Created),
                tasks: Mutex::new(Vec::new()),
                commands: Mutex::new(None),
                feed_tx: Mutex::new(None),
                ready_hooks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn kind(&self) -> StoreKind {
        R::KIND
    }

    pub fn exchange(&self) -> &str {
        &self.inner.exchange
    }

    pub fn state(&self) -> StoreState {
        self.inner.state.lock().clone()
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self.inner.source, StoreSource::Unsupported)
    }

    /// Spawn the background loops. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<(), ExchangeError> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        match &*state {
            StoreState::Created => {}
            StoreState::Started | StoreState::Running => {
                debug!(exchange = %inner.exchange, store = %R::KIND, "Store already running");
                return Ok(());
            }
            StoreState::Closed | StoreState::Faulted(_) => {
                return Err(ExchangeError::StoreClosed(format!(
                    "{} {} store cannot be restarted",
                    inner.exchange,
                    R::KIND
                )));
            }
        }
        *state = StoreState::Started;

        let mut tasks = Vec::new();
        match &inner.source {
            StoreSource::Store { mapper, .. } => {
                if let Some(base) = &inner.base {
                    let watcher = base.watch();
                    let (tx, rx) = mpsc::unbounded_channel();
                    *inner.commands.lock() = Some(tx);
                    tasks.push(tokio::spawn(run_changes(
                        self.clone(),
                        base.clone(),
                        mapper.clone(),
                        watcher,
                        rx,
                    )));
                }
            }
            StoreSource::Messages(feed) => {
                let (tx, rx) = mpsc::unbounded_channel();
                *inner.feed_tx.lock() = Some(tx);
                tasks.push(tokio::spawn(run_feed(self.clone(), feed.clone(), rx)));
            }
            StoreSource::Unsupported => {}
        }

        let waiter = inner
            .base
            .as_ref()
            .map_or_else(|| inner.table.waiter(), |base| base.waiter());
        tasks.push(tokio::spawn(run_ready(self.clone(), waiter)));

        *inner.tasks.lock() = tasks;
        *state = StoreState::Running;
        info!(exchange = %inner.exchange, store = %R::KIND, "Store started");
        Ok(())
    }

    /// Re-normalize the base table's current rows into this store.
    ///
    /// The table is swapped in one mutation and watchers only see the net
    /// difference: unchanged rows emit nothing, and kinds that reject
    /// `Update` or `Delete` only gain missing rows. While running, the resync
    /// is serialized with streamed changes on the change loop, so nothing is
    /// applied twice or lost. Returns the row count afterwards.
    pub async fn synchronize(&self) -> Result<usize, ExchangeError> {
        let sender = match self.state() {
            StoreState::Closed | StoreState::Faulted(_) => {
                return Err(ExchangeError::StoreClosed(format!(
                    "{} {} store is not running",
                    self.inner.exchange,
                    R::KIND
                )))
            }
            _ => self.inner.commands.lock().clone(),
        };

        match sender {
            Some(commands) => {
                let (reply, response) = oneshot::channel();
                commands.send(Command::Synchronize(reply)).map_err(|_| self.closed_error())?;
                response.await.map_err(|_| self.closed_error())?
            }
            None => match (&self.inner.source, &self.inner.base) {
                (StoreSource::Store { mapper, .. }, Some(base)) => {
                    self.resync(base, mapper, base.snapshot())
                }
                _ => Ok(0),
            },
        }
    }

    /// Stop every loop; safe to call more than once
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == StoreState::Closed {
                return;
            }
            *state = StoreState::Closed;
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.commands.lock().take();
        self.inner.feed_tx.lock().take();
        info!(exchange = %self.inner.exchange, store = %R::KIND, "Store closed");
    }

    /// Hand a raw frame to the side-channel, if this store has one
    pub fn on_message(&self, message: &Value) {
        if let Some(tx) = self.inner.feed_tx.lock().as_ref() {
            let _ = tx.send(message.clone());
        }
    }

    /// Run `hook` every time the upstream table reports new data
    pub fn on_ready<F>(&self, hook: F)
    where
        F: Fn(&Self) + Send + Sync + 'static,
    {
        self.inner.ready_hooks.lock().push(Arc::new(hook));
    }

    /// Mutate the table after checking the kind's operation allow-list
    pub fn apply(&self, operation: Operation, items: Vec<R>) -> Result<usize, ExchangeError> {
        if !R::KIND.allows(operation) {
            return Err(ExchangeError::InvariantViolation {
                store: R::KIND,
                operation,
            });
        }
        Ok(self.inner.table.apply(operation, items))
    }

    pub fn find(&self, query: &Query<'_>) -> Vec<R> {
        self.inner.table.find(query)
    }

    pub fn get(&self, item: &R) -> Option<R> {
        self.inner.table.get(item)
    }

    /// Rows in insertion order
    pub fn snapshot(&self) -> Vec<R> {
        self.inner.table.snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.table.is_empty()
    }

    pub fn watch(&self) -> ChangeWatcher<R> {
        self.inner.table.watch()
    }

    pub fn waiter(&self) -> Waiter {
        self.inner.table.waiter()
    }

    pub async fn wait(&self) -> Vec<R> {
        self.inner.table.wait().await
    }

    pub fn table(&self) -> &DataStore<R> {
        &self.inner.table
    }

    fn apply_change(
        &self,
        base: &DataStore<Value>,
        mapper: &FieldMapper<R>,
        change: StoreChange<Value>,
    ) -> Result<(), ExchangeError> {
        let StoreChange {
            operation,
            source,
            data,
        } = change;
        let Some(effective) = mapper.operation(operation, &data) else {
            return Ok(());
        };
        let ctx = MapContext {
            table: Some(base),
            operation,
            source: source.as_ref(),
            data: &data,
        };
        self.map_and_apply(mapper, effective, &ctx)
    }

    fn apply_message(&self, feed: &MessageFeed<R>, message: &Value) -> Result<(), ExchangeError> {
        for (operation, row) in feed.extract(message) {
            let Some(effective) = feed.mapper().operation(operation, &row) else {
                continue;
            };
            self.map_and_apply(feed.mapper(), effective, &MapContext::new(operation, &row))?;
        }
        Ok(())
    }

    fn map_and_apply(
        &self,
        mapper: &FieldMapper<R>,
        operation: Operation,
        ctx: &MapContext<'_>,
    ) -> Result<(), ExchangeError> {
        match mapper.normalize(ctx) {
            Ok(item) => self.apply(operation, vec![item]).map(|_| ()),
            Err(e) => {
                warn!(
                    exchange = %self.inner.exchange,
                    store = %R::KIND,
                    error = %e,
                    "Dropping row that failed to normalize"
                );
                Ok(())
            }
        }
    }

    fn resync(
        &self,
        base: &DataStore<Value>,
        mapper: &FieldMapper<R>,
        rows: Vec<Value>,
    ) -> Result<usize, ExchangeError> {
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            match mapper.operation(Operation::Insert, row) {
                None | Some(Operation::Delete) => continue,
                Some(_) => {}
            }
            let ctx = MapContext {
                table: Some(base),
                operation: Operation::Insert,
                source: None,
                data: row,
            };
            match mapper.normalize(&ctx) {
                Ok(item) => items.push(item),
                Err(e) => warn!(
                    exchange = %self.inner.exchange,
                    store = %R::KIND,
                    error = %e,
                    "Skipping row during synchronize"
                ),
            }
        }

        let changed = self
            .inner
            .table
            .replace(items, fingerprint::<R>, |op| R::KIND.allows(op));
        let rows = self.inner.table.len();
        debug!(exchange = %self.inner.exchange, store = %R::KIND, rows, changed, "Store synchronized");
        Ok(rows)
    }

    fn fault(&self, err: &ExchangeError) {
        error!(exchange = %self.inner.exchange, store = %R::KIND, error = %err, "Store loop stopped");
        let mut state = self.inner.state.lock();
        if *state != StoreState::Closed {
            *state = StoreState::Faulted(err.to_string());
        }
        drop(state);
        self.inner.commands.lock().take();
        self.inner.feed_tx.lock().take();
    }

    fn closed_error(&self) -> ExchangeError {
        ExchangeError::StoreClosed(format!("{} {} store loop has stopped", self.inner.exchange, R::KIND))
    }
}

async fn run_changes<R: NormalizedItem>(
    store: NormalizedStore<R>,
    base: Arc<DataStore<Value>>,
    mapper: FieldMapper<R>,
    mut watcher: ChangeWatcher<Value>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::Synchronize(reply)) => {
                    let rows = base.resync_snapshot(&mut watcher);
                    let result = store.resync(&base, &mapper, rows);
                    if let Err(e) = &result {
                        if e.is_fatal() {
                            store.fault(e);
                            let _ = reply.send(result);
                            return;
                        }
                    }
                    let _ = reply.send(result);
                }
                None => return,
            },
            change = watcher.next() => match change {
                Some(change) => {
                    if let Err(e) = store.apply_change(&base, &mapper, change) {
                        store.fault(&e);
                        return;
                    }
                }
                None => return,
            },
        }
    }
}

async fn run_feed<R: NormalizedItem>(
    store: NormalizedStore<R>,
    feed: MessageFeed<R>,
    mut messages: mpsc::UnboundedReceiver<Value>,
) {
    while let Some(message) = messages.recv().await {
        if let Err(e) = store.apply_message(&feed, &message) {
            store.fault(&e);
            return;
        }
    }
}

async fn run_ready<R: NormalizedItem>(store: NormalizedStore<R>, mut waiter: Waiter) {
    while waiter.wait().await.is_ok() {
        let hooks: Vec<ReadyHook<R>> = store.inner.ready_hooks.lock().clone();
        for hook in hooks {
            hook(&store);
        }
    }
}

/// Identity of a record for resync diffing; the previous-row payload is
/// ignored since it depends on how the row arrived.
fn fingerprint<R: NormalizedItem>(item: &R) -> String {
    let mut item = item.clone();
    item.info_mut().source = Value::Null;
    serde_json::to_string(&item).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::mapper::FieldSource;
    use crate::core::types::{ExecutionItem, OrderbookItem, Side, TickerItem};
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ticker_binding() -> StoreBinding<TickerItem> {
        StoreBinding::store(
            "ticker",
            FieldMapper::fields()
                .field("symbol", FieldSource::path("s"))
                .field("price", FieldSource::path("c")),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_follows_base_changes() {
        let base = Arc::new(DataStore::new("ticker", ["s"]));
        let store = NormalizedStore::new("test", Some(base.clone()), ticker_binding()).unwrap();
        store.start().unwrap();
        assert_eq!(store.state(), StoreState::Running);

        base.update(vec![json!({"s": "BTCUSDT", "c": "100"})]);
        base.update(vec![json!({"s": "BTCUSDT", "c": "101"})]);
        settle().await;

        let rows = store.find(&[("symbol", json!("BTCUSDT"))]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, Decimal::from(101));
        assert_eq!(rows[0].info.source["c"], json!("100"));
        store.close();
    }

    #[tokio::test]
    async fn test_mapping_error_drops_row_and_continues() {
        let base = Arc::new(DataStore::new("ticker", ["s"]));
        let store = NormalizedStore::new("test", Some(base.clone()), ticker_binding()).unwrap();
        store.start().unwrap();

        base.insert(vec![json!({"s": "BTCUSDT"})]);
        base.insert(vec![json!({"s": "ETHUSDT", "c": "5"})]);
        settle().await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.state(), StoreState::Running);
        store.close();
    }

    #[tokio::test]
    async fn test_synchronize_without_start() {
        let base = Arc::new(DataStore::new("ticker", ["s"]));
        base.insert(vec![json!({"s": "BTCUSDT", "c": "1"}), json!({"s": "ETHUSDT", "c": "2"})]);
        let store = NormalizedStore::new("test", Some(base), ticker_binding()).unwrap();

        assert_eq!(store.synchronize().await.unwrap(), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_synchronize_while_running_does_not_double_apply() {
        let base = Arc::new(DataStore::new("ticker", ["s"]));
        let store = NormalizedStore::new("test", Some(base.clone()), ticker_binding()).unwrap();
        store.start().unwrap();
        let mut watcher = store.watch();

        base.insert(vec![json!({"s": "BTCUSDT", "c": "1"})]);
        assert_eq!(store.synchronize().await.unwrap(), 1);
        base.update(vec![json!({"s": "BTCUSDT", "c": "2"})]);
        settle().await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot()[0].price, Decimal::from(2));
        let mut inserts = 0;
        while let Some(change) = watcher.try_next() {
            if change.operation == Operation::Insert {
                inserts += 1;
            }
        }
        // streamed or resynced, never both
        assert_eq!(inserts, 1);
        store.close();
    }

    fn execution_binding() -> StoreBinding<ExecutionItem> {
        StoreBinding::store(
            "execution",
            FieldMapper::<ExecutionItem>::fields()
                .field("id", FieldSource::string("i"))
                .field("symbol", FieldSource::path("s"))
                .field("side", FieldSource::side("S"))
                .field("price", FieldSource::path("p"))
                .field("size", FieldSource::path("q"))
                .field("timestamp", FieldSource::timestamp("T")),
        )
    }

    #[tokio::test]
    async fn test_synchronize_execution_keeps_fills() {
        let base = Arc::new(DataStore::new("execution", Vec::<String>::new()));
        let store = NormalizedStore::new("test", Some(base.clone()), execution_binding()).unwrap();
        store.start().unwrap();
        let mut watcher = store.watch();

        base.insert(vec![json!({"i": 1, "s": "BTCUSDT", "S": "BUY", "p": "1", "q": "1", "T": 0})]);
        settle().await;
        assert_eq!(watcher.try_next().unwrap().operation, Operation::Insert);

        assert_eq!(store.synchronize().await.unwrap(), 1);
        assert_eq!(store.synchronize().await.unwrap(), 1);
        settle().await;

        assert!(watcher.try_next().is_none());
        assert_eq!(store.state(), StoreState::Running);
        store.close();
    }

    #[tokio::test]
    async fn test_synchronize_publishes_net_difference() {
        let base = Arc::new(DataStore::new("depth", ["s", "S", "p"]));
        base.insert(vec![
            json!({"s": "BTC", "S": "bid", "p": "99", "q": "1"}),
            json!({"s": "BTC", "S": "bid", "p": "98", "q": "1"}),
            json!({"s": "BTC", "S": "ask", "p": "101", "q": "1"}),
        ]);
        let binding = StoreBinding::store(
            "depth",
            FieldMapper::<OrderbookItem>::fields()
                .field("symbol", FieldSource::path("s"))
                .field("side", FieldSource::side("S"))
                .field("price", FieldSource::path("p"))
                .field("size", FieldSource::path("q")),
        );
        let store = NormalizedStore::new("test", Some(base.clone()), binding).unwrap();
        assert_eq!(store.synchronize().await.unwrap(), 3);
        let mut watcher = store.watch();

        base.update(vec![json!({"s": "BTC", "S": "bid", "p": "99", "q": "4"})]);
        base.delete(vec![json!({"s": "BTC", "S": "bid", "p": "98"})]);
        assert_eq!(store.synchronize().await.unwrap(), 2);

        let updated = watcher.try_next().unwrap();
        assert_eq!(updated.operation, Operation::Update);
        assert_eq!(updated.data.size, Decimal::from(4));
        assert_eq!(updated.source.unwrap().size, Decimal::from(1));
        let deleted = watcher.try_next().unwrap();
        assert_eq!(deleted.operation, Operation::Delete);
        assert_eq!(deleted.data.price, Decimal::from(98));
        assert!(watcher.try_next().is_none());

        let prices: Vec<_> = store.snapshot().iter().map(|row| row.price).collect();
        assert_eq!(prices, vec![Decimal::from(99), Decimal::from(101)]);
    }

    #[tokio::test]
    async fn test_execution_invariant_faults_loop() {
        let base = Arc::new(DataStore::new("execution", Vec::<String>::new()));
        let store = NormalizedStore::new("test", Some(base.clone()), execution_binding()).unwrap();
        store.start().unwrap();

        let row = json!({"i": 1, "s": "BTCUSDT", "S": "BUY", "p": "1", "q": "1", "T": 0});
        base.insert(vec![row.clone()]);
        base.insert(vec![row.clone()]);
        settle().await;
        assert_eq!(store.len(), 2);

        base.update(vec![row]);
        settle().await;
        assert!(matches!(store.state(), StoreState::Faulted(_)));
        assert!(store.synchronize().await.is_err());
    }

    #[tokio::test]
    async fn test_apply_rejects_disallowed_operation() {
        let store = NormalizedStore::<ExecutionItem>::new("test", None, StoreBinding::unsupported()).unwrap();
        let err = store.apply(Operation::Delete, Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::InvariantViolation {
                store: StoreKind::Execution,
                operation: Operation::Delete
            }
        ));
    }

    #[tokio::test]
    async fn test_message_feed_side_channel() {
        let feed = MessageFeed::new(
            |message: &Value| match message.get("book") {
                Some(rows) => rows
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|row| (Operation::Insert, row.clone()))
                    .collect(),
                None => Vec::new(),
            },
            FieldMapper::<OrderbookItem>::fields()
                .field("symbol", FieldSource::path("s"))
                .field("side", FieldSource::side("S"))
                .field("price", FieldSource::path("p"))
                .field("size", FieldSource::path("q")),
        );
        let store = NormalizedStore::new("test", None, StoreBinding::messages(feed)).unwrap();

        // frames before start are not queued
        store.on_message(&json!({"book": [{"s": "BTC", "S": "ask", "p": "1", "q": "1"}]}));
        store.start().unwrap();
        store.on_message(&json!({"book": [{"s": "BTC", "S": "bid", "p": "2", "q": "1"}]}));
        store.on_message(&json!({"other": true}));
        settle().await;

        let rows = store.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].side, Side::Buy);
        store.close();
    }

    #[tokio::test]
    async fn test_ready_hooks_run_on_base_changes() {
        let base = Arc::new(DataStore::new("ticker", ["s"]));
        let store = NormalizedStore::new("test", Some(base.clone()), ticker_binding()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        store.on_ready(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.start().unwrap();

        base.insert(vec![json!({"s": "BTCUSDT", "c": "1"})]);
        settle().await;
        assert!(calls.load(Ordering::SeqCst) >= 1);
        store.close();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let base = Arc::new(DataStore::new("ticker", ["s"]));
        let store = NormalizedStore::new("test", Some(base), ticker_binding()).unwrap();
        store.start().unwrap();
        store.close();
        store.close();
        assert_eq!(store.state(), StoreState::Closed);
        assert!(store.start().is_err());
    }

    #[test]
    fn test_store_binding_must_match_base_table() {
        let base = Arc::new(DataStore::new("orderbook", ["s"]));
        let err = NormalizedStore::new("test", Some(base), ticker_binding()).unwrap_err();
        assert!(matches!(err, ExchangeError::ConfigurationError(_)));
        assert!(NormalizedStore::new("test", None, ticker_binding()).is_err());
    }
}
