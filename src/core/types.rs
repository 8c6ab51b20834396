use crate::core::store::table::{decimal_value, TableItem};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// CRUD operation carried by every change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// The six canonical store kinds, which double as the canonical channel names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Ticker,
    Trades,
    Orderbook,
    Order,
    Execution,
    Position,
}

impl StoreKind {
    pub const ALL: [Self; 6] = [
        Self::Ticker,
        Self::Trades,
        Self::Orderbook,
        Self::Order,
        Self::Execution,
        Self::Position,
    ];
    pub const PUBLIC: [Self; 3] = [Self::Ticker, Self::Trades, Self::Orderbook];
    pub const PRIVATE: [Self; 3] = [Self::Order, Self::Execution, Self::Position];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trades => "trades",
            Self::Orderbook => "orderbook",
            Self::Order => "order",
            Self::Execution => "execution",
            Self::Position => "position",
        }
    }

    pub fn is_private(&self) -> bool {
        Self::PRIVATE.contains(self)
    }

    /// Executions are append-only: only inserts are legal
    pub fn allows(&self, operation: Operation) -> bool {
        match self {
            Self::Execution => operation == Operation::Insert,
            _ => true,
        }
    }

    /// Row cap for tables that would otherwise grow without bound
    pub fn default_max_len(&self) -> Option<usize> {
        match self {
            Self::Trades | Self::Execution => Some(DEFAULT_APPEND_LEN),
            _ => None,
        }
    }
}

/// Default row cap for append-style tables
pub const DEFAULT_APPEND_LEN: usize = 9_999;

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown channel '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Parse the many spellings exchanges use for a side
    pub fn from_exchange(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" | "b" | "bid" | "bids" | "long" => Some(Self::Buy),
            "sell" | "s" | "ask" | "asks" | "short" => Some(Self::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traceability envelope attached to every canonical record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordInfo {
    /// Raw upstream payload the record was built from
    #[serde(default)]
    pub data: Value,
    /// Upstream before-state (or null when there was none)
    #[serde(default)]
    pub source: Value,
}

/// A canonical record kind stored in a `NormalizedStore`
pub trait NormalizedItem: TableItem + Serialize + DeserializeOwned + fmt::Debug {
    const KIND: StoreKind;
    /// Key fields shared by every exchange; exchanges may append extra keys
    const KEYS: &'static [&'static str];

    fn info(&self) -> &RecordInfo;
    fn info_mut(&mut self) -> &mut RecordInfo;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerItem {
    pub symbol: String,
    pub price: Decimal,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub info: RecordInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradesItem {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub info: RecordInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookItem {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub info: RecordInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub info: RecordInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionItem {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub info: RecordInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionItem {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub info: RecordInfo,
}

fn side_value(side: Side) -> Value {
    Value::String(side.as_str().to_string())
}

fn timestamp_value(timestamp: &DateTime<Utc>) -> Value {
    Value::String(timestamp.to_rfc3339())
}

macro_rules! normalized_item {
    ($item:ty, $kind:expr, [$($key:literal),*], |$this:ident, $name:ident| { $($field:literal => $value:expr),* $(,)? }) => {
        impl TableItem for $item {
            fn field(&self, name: &str) -> Option<Value> {
                let $this = self;
                let $name = name;
                match $name {
                    $($field => Some($value),)*
                    _ => $this.extra.get($name).cloned(),
                }
            }
        }

        impl NormalizedItem for $item {
            const KIND: StoreKind = $kind;
            const KEYS: &'static [&'static str] = &[$($key),*];

            fn info(&self) -> &RecordInfo {
                &self.info
            }

            fn info_mut(&mut self) -> &mut RecordInfo {
                &mut self.info
            }
        }
    };
}

normalized_item!(TickerItem, StoreKind::Ticker, ["symbol"], |item, name| {
    "symbol" => Value::String(item.symbol.clone()),
    "price" => decimal_value(item.price),
});

normalized_item!(TradesItem, StoreKind::Trades, ["id", "symbol"], |item, name| {
    "id" => Value::String(item.id.clone()),
    "symbol" => Value::String(item.symbol.clone()),
    "side" => side_value(item.side),
    "price" => decimal_value(item.price),
    "size" => decimal_value(item.size),
    "timestamp" => timestamp_value(&item.timestamp),
});

normalized_item!(OrderbookItem, StoreKind::Orderbook, ["symbol", "side", "price"], |item, name| {
    "symbol" => Value::String(item.symbol.clone()),
    "side" => side_value(item.side),
    "price" => decimal_value(item.price),
    "size" => decimal_value(item.size),
});

normalized_item!(OrderItem, StoreKind::Order, ["id", "symbol"], |item, name| {
    "id" => Value::String(item.id.clone()),
    "symbol" => Value::String(item.symbol.clone()),
    "side" => side_value(item.side),
    "price" => decimal_value(item.price),
    "size" => decimal_value(item.size),
    "type" => Value::String(item.order_type.clone()),
});

normalized_item!(ExecutionItem, StoreKind::Execution, [], |item, name| {
    "id" => Value::String(item.id.clone()),
    "symbol" => Value::String(item.symbol.clone()),
    "side" => side_value(item.side),
    "price" => decimal_value(item.price),
    "size" => decimal_value(item.size),
    "timestamp" => timestamp_value(&item.timestamp),
});

normalized_item!(PositionItem, StoreKind::Position, ["symbol"], |item, name| {
    "symbol" => Value::String(item.symbol.clone()),
    "side" => side_value(item.side),
    "price" => decimal_value(item.price),
    "size" => decimal_value(item.size),
});
