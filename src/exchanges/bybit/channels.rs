use crate::core::errors::ExchangeError;
use crate::core::store::channel::{require_symbol, ChannelBuilder, SubscribeRequest};
use crate::core::types::StoreKind;
use serde_json::json;

pub const PUBLIC_WS_URL: &str = "wss://stream.bybit.com/v5/public/linear";
pub const PRIVATE_WS_URL: &str = "wss://stream.bybit.com/v5/private";
pub const TESTNET_PUBLIC_WS_URL: &str = "wss://stream-testnet.bybit.com/v5/public/linear";
pub const TESTNET_PRIVATE_WS_URL: &str = "wss://stream-testnet.bybit.com/v5/private";

/// v5 topics per canonical channel. Private topics need an `auth` login
/// payload on the private endpoint (see `StoreWrapper::login`).
pub struct BybitChannels {
    public_url: String,
    private_url: String,
}

impl BybitChannels {
    pub fn new(public_url: &str, private_url: &str) -> Self {
        Self {
            public_url: public_url.to_string(),
            private_url: private_url.to_string(),
        }
    }

    pub fn private_url(&self) -> &str {
        &self.private_url
    }

    pub fn topic(kind: StoreKind, symbol: Option<&str>) -> Result<String, ExchangeError> {
        Ok(match kind {
            StoreKind::Ticker => format!("tickers.{}", require_symbol(kind, symbol)?),
            StoreKind::Trades => format!("publicTrade.{}", require_symbol(kind, symbol)?),
            StoreKind::Orderbook => format!("orderbook.50.{}", require_symbol(kind, symbol)?),
            StoreKind::Order => "order".to_string(),
            StoreKind::Execution => "execution".to_string(),
            StoreKind::Position => "position".to_string(),
        })
    }
}

impl Default for BybitChannels {
    fn default() -> Self {
        Self::new(PUBLIC_WS_URL, PRIVATE_WS_URL)
    }
}

impl ChannelBuilder for BybitChannels {
    fn build(&self, kind: StoreKind, symbol: Option<&str>) -> Result<Vec<SubscribeRequest>, ExchangeError> {
        let endpoint = if kind.is_private() {
            &self.private_url
        } else {
            &self.public_url
        };
        let topic = Self::topic(kind, symbol)?;
        Ok(vec![SubscribeRequest::new(
            endpoint,
            json!({"op": "subscribe", "args": [topic]}),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        let channels = BybitChannels::default();
        let book = channels.build(StoreKind::Orderbook, Some("BTCUSDT")).unwrap();
        assert_eq!(book[0].endpoint, PUBLIC_WS_URL);
        assert_eq!(
            book[0].payload,
            Some(json!({"op": "subscribe", "args": ["orderbook.50.BTCUSDT"]}))
        );

        let position = channels.build(StoreKind::Position, None).unwrap();
        assert_eq!(position[0].endpoint, PRIVATE_WS_URL);
        assert_eq!(position[0].payload.as_ref().unwrap()["args"][0], "position");

        assert!(channels.build(StoreKind::Trades, None).is_err());
    }
}
