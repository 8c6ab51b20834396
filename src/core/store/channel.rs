use crate::core::errors::ExchangeError;
use crate::core::types::StoreKind;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// One outgoing WebSocket request bound to the endpoint it must be sent on.
///
/// `endpoint` may contain a `{token}` placeholder, resolved at connect time.
/// A request with no payload only makes sure the endpoint is connected
/// (streams that push data without a subscribe command).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub payload: Option<Value>,
}

impl SubscribeRequest {
    pub fn new(endpoint: &str, payload: Value) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            payload: Some(payload),
        }
    }

    pub fn connect_only(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            payload: None,
        }
    }
}

/// Turns a canonical channel name into exchange subscribe requests
pub trait ChannelBuilder: Send + Sync {
    fn build(&self, kind: StoreKind, symbol: Option<&str>) -> Result<Vec<SubscribeRequest>, ExchangeError>;
}

/// Which canonical channels a `subscribe` call covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSpec {
    All,
    Public,
    Private,
    Only(Vec<StoreKind>),
}

impl ChannelSpec {
    pub fn kinds(&self) -> Vec<StoreKind> {
        match self {
            Self::All => StoreKind::ALL.to_vec(),
            Self::Public => StoreKind::PUBLIC.to_vec(),
            Self::Private => StoreKind::PRIVATE.to_vec(),
            Self::Only(kinds) => kinds.clone(),
        }
    }
}

impl From<StoreKind> for ChannelSpec {
    fn from(kind: StoreKind) -> Self {
        Self::Only(vec![kind])
    }
}

impl FromStr for ChannelSpec {
    type Err = ExchangeError;

    /// `"all"`, `"public"`, `"private"` or a comma-separated list of kinds
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            list => list
                .split(',')
                .map(str::parse::<StoreKind>)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Only)
                .map_err(ExchangeError::InvalidParameters),
        }
    }
}

impl fmt::Display for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Public => f.write_str("public"),
            Self::Private => f.write_str("private"),
            Self::Only(kinds) => {
                let names: Vec<&str> = kinds.iter().map(StoreKind::name).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

/// Symbol a public channel cannot be built without
pub fn require_symbol<'a>(kind: StoreKind, symbol: Option<&'a str>) -> Result<&'a str, ExchangeError> {
    symbol
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ExchangeError::InvalidParameters(format!("channel '{}' needs a symbol", kind)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_expansion() {
        assert_eq!(ChannelSpec::All.kinds().len(), 6);
        assert_eq!(
            ChannelSpec::Public.kinds(),
            vec![StoreKind::Ticker, StoreKind::Trades, StoreKind::Orderbook]
        );
        assert_eq!(
            ChannelSpec::Private.kinds(),
            vec![StoreKind::Order, StoreKind::Execution, StoreKind::Position]
        );
    }

    #[test]
    fn test_parse_spec() {
        assert_eq!("ALL".parse::<ChannelSpec>().unwrap(), ChannelSpec::All);
        assert_eq!(
            "ticker,orderbook".parse::<ChannelSpec>().unwrap(),
            ChannelSpec::Only(vec![StoreKind::Ticker, StoreKind::Orderbook])
        );
        assert!(matches!(
            "candles".parse::<ChannelSpec>(),
            Err(ExchangeError::InvalidParameters(_))
        ));
        assert_eq!(ChannelSpec::Only(vec![StoreKind::Order, StoreKind::Position]).to_string(), "order,position");
    }

    #[test]
    fn test_require_symbol() {
        assert_eq!(require_symbol(StoreKind::Ticker, Some("BTCUSDT")).unwrap(), "BTCUSDT");
        assert!(require_symbol(StoreKind::Ticker, Some("")).is_err());
        assert!(require_symbol(StoreKind::Trades, None).is_err());
    }
}
