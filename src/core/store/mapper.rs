use crate::core::errors::ExchangeError;
use crate::core::store::datastore::DataStore;
use crate::core::types::{NormalizedItem, Operation, RecordInfo, Side};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;

pub type FieldFn = Arc<dyn Fn(&MapContext<'_>) -> Result<Value, ExchangeError> + Send + Sync>;
pub type RecordFn<R> = Arc<dyn Fn(&MapContext<'_>) -> Result<R, ExchangeError> + Send + Sync>;
pub type RemapFn = Arc<dyn Fn(Operation, &Value) -> Option<Operation> + Send + Sync>;
pub type ExtractFn = Arc<dyn Fn(&Value) -> Vec<(Operation, Value)> + Send + Sync>;

/// Everything a mapper may look at when building one record
#[derive(Debug, Clone, Copy)]
pub struct MapContext<'a> {
    /// Upstream raw table, when the store follows one
    pub table: Option<&'a DataStore<Value>>,
    pub operation: Operation,
    /// Upstream before-state
    pub source: Option<&'a Value>,
    pub data: &'a Value,
}

impl<'a> MapContext<'a> {
    pub fn new(operation: Operation, data: &'a Value) -> Self {
        Self {
            table: None,
            operation,
            source: None,
            data,
        }
    }

    /// Look up a dotted path (`"o.s"`) in the raw payload
    pub fn get(&self, path: &str) -> Option<&'a Value> {
        lookup(self.data, path)
    }

    pub fn require(&self, path: &str) -> Result<&'a Value, ExchangeError> {
        self.get(path)
            .filter(|value| !value.is_null())
            .ok_or_else(|| ExchangeError::MappingError(format!("missing field '{}'", path)))
    }

    pub fn str(&self, path: &str) -> Result<&'a str, ExchangeError> {
        self.require(path)?
            .as_str()
            .ok_or_else(|| ExchangeError::MappingError(format!("field '{}' is not a string", path)))
    }

    pub fn decimal(&self, path: &str) -> Result<Decimal, ExchangeError> {
        parse_decimal(self.require(path)?)
            .ok_or_else(|| ExchangeError::MappingError(format!("field '{}' is not a decimal", path)))
    }
}

pub fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(value, |current, segment| current.get(segment))
}

pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s)
            .or_else(|_| Decimal::from_scientific(s))
            .ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    }
}

/// Epoch milliseconds (number or numeric string) or an RFC3339 string
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => match s.parse::<i64>() {
            Ok(millis) => Some(millis),
            Err(_) => {
                return DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|ts| ts.with_timezone(&Utc))
            }
        },
        _ => None,
    }?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Value for one output field: a constant or a function of the context
#[derive(Clone)]
pub enum FieldSource {
    Constant(Value),
    Func(FieldFn),
}

impl FieldSource {
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant(value.into())
    }

    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&MapContext<'_>) -> Result<Value, ExchangeError> + Send + Sync + 'static,
    {
        Self::Func(Arc::new(f))
    }

    /// Copy a raw value as-is
    pub fn path(path: &str) -> Self {
        let path = path.to_string();
        Self::func(move |ctx| ctx.require(&path).cloned())
    }

    /// Copy a raw value, rendering numbers as strings (ids)
    pub fn string(path: &str) -> Self {
        let path = path.to_string();
        Self::func(move |ctx| match ctx.require(&path)? {
            Value::String(s) => Ok(Value::String(s.clone())),
            other => Ok(Value::String(other.to_string())),
        })
    }

    /// Copy a raw string upper-cased
    pub fn upper(path: &str) -> Self {
        let path = path.to_string();
        Self::func(move |ctx| Ok(Value::String(ctx.str(&path)?.to_uppercase())))
    }

    /// Exchange side spelling to `"BUY"` / `"SELL"`
    pub fn side(path: &str) -> Self {
        let path = path.to_string();
        Self::func(move |ctx| {
            let raw = ctx.str(&path)?;
            Side::from_exchange(raw)
                .map(|side| Value::String(side.as_str().to_string()))
                .ok_or_else(|| ExchangeError::MappingError(format!("unknown side '{}'", raw)))
        })
    }

    /// Epoch millis or RFC3339 to an RFC3339 UTC string
    pub fn timestamp(path: &str) -> Self {
        let path = path.to_string();
        Self::func(move |ctx| {
            let raw = ctx.require(&path)?;
            parse_timestamp(raw)
                .map(|ts| Value::String(ts.to_rfc3339()))
                .ok_or_else(|| ExchangeError::MappingError(format!("bad timestamp {}", raw)))
        })
    }

    /// Absolute value of a decimal field
    pub fn abs(path: &str) -> Self {
        let path = path.to_string();
        Self::func(move |ctx| Ok(Value::String(ctx.decimal(&path)?.abs().normalize().to_string())))
    }
}

#[derive(Clone)]
enum MapStyle<R> {
    Fields(Vec<(String, FieldSource)>),
    Record(RecordFn<R>),
}

/// Exchange-specific mapping from a raw row to a canonical record.
///
/// Either per-field (each output field filled from a [`FieldSource`], the
/// assembled object then deserialized into `R`) or whole-record. An optional
/// remap function decides the effective operation, or skips the row.
#[derive(Clone)]
pub struct FieldMapper<R> {
    style: MapStyle<R>,
    remap: Option<RemapFn>,
}

impl<R: NormalizedItem> FieldMapper<R> {
    pub fn fields() -> Self {
        Self {
            style: MapStyle::Fields(Vec::new()),
            remap: None,
        }
    }

    pub fn record<F>(f: F) -> Self
    where
        F: Fn(&MapContext<'_>) -> Result<R, ExchangeError> + Send + Sync + 'static,
    {
        Self {
            style: MapStyle::Record(Arc::new(f)),
            remap: None,
        }
    }

    /// Add an output field. No effect on a whole-record mapper.
    pub fn field(mut self, name: &str, source: FieldSource) -> Self {
        if let MapStyle::Fields(fields) = &mut self.style {
            fields.retain(|(existing, _)| existing != name);
            fields.push((name.to_string(), source));
        }
        self
    }

    pub fn with_remap<F>(mut self, f: F) -> Self
    where
        F: Fn(Operation, &Value) -> Option<Operation> + Send + Sync + 'static,
    {
        self.remap = Some(Arc::new(f));
        self
    }

    /// Effective operation for a raw change; `None` skips it
    pub fn operation(&self, operation: Operation, raw: &Value) -> Option<Operation> {
        match &self.remap {
            Some(remap) => remap(operation, raw),
            None => Some(operation),
        }
    }

    pub fn normalize(&self, ctx: &MapContext<'_>) -> Result<R, ExchangeError> {
        let mut item = match &self.style {
            MapStyle::Fields(fields) => {
                let mut object = Map::new();
                for (name, source) in fields {
                    let value = match source {
                        FieldSource::Constant(value) => value.clone(),
                        FieldSource::Func(f) => f(ctx)?,
                    };
                    object.insert(name.clone(), value);
                }
                serde_json::from_value::<R>(Value::Object(object)).map_err(|e| {
                    ExchangeError::MappingError(format!("{} record: {}", R::KIND, e))
                })?
            }
            MapStyle::Record(f) => f(ctx)?,
        };
        *item.info_mut() = RecordInfo {
            data: ctx.data.clone(),
            source: ctx.source.cloned().unwrap_or(Value::Null),
        };
        Ok(item)
    }
}

/// Side-channel that pulls candidate rows straight out of WebSocket frames
#[derive(Clone)]
pub struct MessageFeed<R> {
    extract: ExtractFn,
    mapper: FieldMapper<R>,
}

impl<R: NormalizedItem> MessageFeed<R> {
    pub fn new<F>(extract: F, mapper: FieldMapper<R>) -> Self
    where
        F: Fn(&Value) -> Vec<(Operation, Value)> + Send + Sync + 'static,
    {
        Self {
            extract: Arc::new(extract),
            mapper,
        }
    }

    pub fn extract(&self, message: &Value) -> Vec<(Operation, Value)> {
        (self.extract)(message)
    }

    pub fn mapper(&self) -> &FieldMapper<R> {
        &self.mapper
    }
}

/// Where a normalized store gets its rows from. A store follows exactly one
/// source, so a raw row can never be processed twice.
#[derive(Clone)]
pub enum StoreSource<R> {
    /// Follow the change stream of a named base-store table
    Store { name: String, mapper: FieldMapper<R> },
    /// Extract rows from raw frames
    Messages(MessageFeed<R>),
    /// The exchange has no such data
    Unsupported,
}

/// A source plus table options for one normalized store
#[derive(Clone)]
pub struct StoreBinding<R> {
    pub source: StoreSource<R>,
    pub extra_keys: Vec<String>,
    pub max_len: Option<usize>,
}

impl<R: NormalizedItem> StoreBinding<R> {
    pub fn store(name: &str, mapper: FieldMapper<R>) -> Self {
        Self::with_source(StoreSource::Store {
            name: name.to_string(),
            mapper,
        })
    }

    pub fn messages(feed: MessageFeed<R>) -> Self {
        Self::with_source(StoreSource::Messages(feed))
    }

    pub fn unsupported() -> Self {
        Self::with_source(StoreSource::Unsupported)
    }

    fn with_source(source: StoreSource<R>) -> Self {
        Self {
            source,
            extra_keys: Vec::new(),
            max_len: R::KIND.default_max_len(),
        }
    }

    /// Exchange-specific key fields appended to the canonical ones
    pub fn with_extra_keys(mut self, keys: &[&str]) -> Self {
        self.extra_keys = keys.iter().map(|key| (*key).to_string()).collect();
        self
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    /// Canonical key fields followed by the extras
    pub fn key_fields(&self) -> Vec<String> {
        R::KEYS
            .iter()
            .map(|key| (*key).to_string())
            .chain(self.extra_keys.iter().cloned())
            .collect()
    }
}
