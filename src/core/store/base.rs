use crate::core::errors::ExchangeError;
use crate::core::store::datastore::DataStore;
use crate::core::store::table::KeyedTable;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// The exchange-level raw store: named tables of upstream rows.
pub trait BaseStore: Send + Sync {
    fn exchange(&self) -> &str;

    fn store(&self, name: &str) -> Option<Arc<DataStore<Value>>>;

    fn store_names(&self) -> Vec<String>;

    /// Route one WebSocket frame into the tables
    fn on_message(&self, message: &Value);

    /// Feed one REST response; `url` identifies the endpoint it came from
    fn initialize(&self, url: &str, data: &Value) -> Result<(), ExchangeError>;
}

pub type MessageRouter = fn(&StoreCollection, &Value) -> Result<(), ExchangeError>;
pub type InitializeRouter = fn(&StoreCollection, &str, &Value) -> Result<(), ExchangeError>;

/// Table-driven [`BaseStore`]: a set of raw tables plus the exchange's
/// message and REST routers.
pub struct StoreCollection {
    exchange: String,
    stores: HashMap<String, Arc<DataStore<Value>>>,
    router: MessageRouter,
    initializer: InitializeRouter,
}

impl StoreCollection {
    pub fn builder(exchange: &str) -> StoreCollectionBuilder {
        StoreCollectionBuilder {
            exchange: exchange.to_string(),
            stores: HashMap::new(),
            router: |_, _| Ok(()),
            initializer: |_, _, _| Ok(()),
        }
    }

    /// Named table, or a configuration error when the exchange has none
    pub fn table(&self, name: &str) -> Result<&Arc<DataStore<Value>>, ExchangeError> {
        self.stores.get(name).ok_or_else(|| {
            ExchangeError::ConfigurationError(format!("{} has no '{}' table", self.exchange, name))
        })
    }
}

impl BaseStore for StoreCollection {
    fn exchange(&self) -> &str {
        &self.exchange
    }

    fn store(&self, name: &str) -> Option<Arc<DataStore<Value>>> {
        self.stores.get(name).cloned()
    }

    fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.keys().cloned().collect();
        names.sort();
        names
    }

    fn on_message(&self, message: &Value) {
        if let Err(e) = (self.router)(self, message) {
            warn!(exchange = %self.exchange, error = %e, "Failed to route message");
        }
    }

    fn initialize(&self, url: &str, data: &Value) -> Result<(), ExchangeError> {
        debug!(exchange = %self.exchange, url, "Initializing base store");
        (self.initializer)(self, url, data)
    }
}

pub struct StoreCollectionBuilder {
    exchange: String,
    stores: HashMap<String, Arc<DataStore<Value>>>,
    router: MessageRouter,
    initializer: InitializeRouter,
}

impl StoreCollectionBuilder {
    pub fn table(mut self, name: &str, key_fields: &[&str]) -> Self {
        self.stores.insert(
            name.to_string(),
            Arc::new(DataStore::new(name, key_fields.iter().copied())),
        );
        self
    }

    /// Unkeyed table that keeps only the newest `max_len` rows
    pub fn append_table(mut self, name: &str, max_len: usize) -> Self {
        let table = KeyedTable::new(Vec::<String>::new()).with_max_len(max_len);
        self.stores
            .insert(name.to_string(), Arc::new(DataStore::from_table(name, table)));
        self
    }

    pub fn on_message(mut self, router: MessageRouter) -> Self {
        self.router = router;
        self
    }

    pub fn on_initialize(mut self, initializer: InitializeRouter) -> Self {
        self.initializer = initializer;
        self
    }

    pub fn build(self) -> StoreCollection {
        StoreCollection {
            exchange: self.exchange,
            stores: self.stores,
            router: self.router,
            initializer: self.initializer,
        }
    }
}

/// Path part of an absolute or relative URL, without the query string
pub fn url_path(url: &str) -> &str {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| {
        rest.find('/').map_or("", |idx| &rest[idx..])
    });
    without_scheme
        .split_once('?')
        .map_or(without_scheme, |(path, _)| path)
}

/// First value of a query parameter
pub fn url_query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then(|| value.to_string())
    })
}

/// Rows of a JSON array (or a single object treated as one row)
pub fn rows(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}
