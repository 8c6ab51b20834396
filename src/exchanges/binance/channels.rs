use crate::core::errors::ExchangeError;
use crate::core::store::channel::{require_symbol, ChannelBuilder, SubscribeRequest};
use crate::core::types::StoreKind;
use serde_json::json;

pub const PUBLIC_WS_URL: &str = "wss://fstream.binance.com/ws";
pub const PRIVATE_WS_URL: &str = "wss://fstream.binance.com/ws/{token}";
pub const TESTNET_PUBLIC_WS_URL: &str = "wss://stream.binancefuture.com/ws";
pub const TESTNET_PRIVATE_WS_URL: &str = "wss://stream.binancefuture.com/ws/{token}";

/// Stream names per canonical channel. The user-data stream needs no
/// subscribe command: connecting with the listen key is enough.
pub struct BinanceChannels {
    public_url: String,
    private_url: String,
}

impl BinanceChannels {
    pub fn new(public_url: &str, private_url: &str) -> Self {
        Self {
            public_url: public_url.to_string(),
            private_url: private_url.to_string(),
        }
    }

    /// Stream name and request id; the id only echoes back in the reply
    pub fn stream_name(kind: StoreKind, symbol: &str) -> Option<(String, u64)> {
        let symbol = symbol.to_lowercase();
        match kind {
            StoreKind::Ticker => Some((format!("{}@ticker", symbol), 1)),
            StoreKind::Trades => Some((format!("{}@aggTrade", symbol), 2)),
            StoreKind::Orderbook => Some((format!("{}@depth@100ms", symbol), 3)),
            _ => None,
        }
    }
}

impl Default for BinanceChannels {
    fn default() -> Self {
        Self::new(PUBLIC_WS_URL, PRIVATE_WS_URL)
    }
}

impl ChannelBuilder for BinanceChannels {
    fn build(&self, kind: StoreKind, symbol: Option<&str>) -> Result<Vec<SubscribeRequest>, ExchangeError> {
        if kind.is_private() {
            return Ok(vec![SubscribeRequest::connect_only(&self.private_url)]);
        }
        let symbol = require_symbol(kind, symbol)?;
        let Some((stream, id)) = Self::stream_name(kind, symbol) else {
            return Ok(Vec::new());
        };
        Ok(vec![SubscribeRequest::new(
            &self.public_url,
            json!({"method": "SUBSCRIBE", "params": [stream], "id": id}),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_channels() {
        let channels = BinanceChannels::default();
        let ticker = channels.build(StoreKind::Ticker, Some("BTCUSDT")).unwrap();
        assert_eq!(ticker[0].endpoint, PUBLIC_WS_URL);
        assert_eq!(
            ticker[0].payload,
            Some(json!({"method": "SUBSCRIBE", "params": ["btcusdt@ticker"], "id": 1}))
        );
        let book = channels.build(StoreKind::Orderbook, Some("BTCUSDT")).unwrap();
        assert_eq!(book[0].payload.as_ref().unwrap()["params"][0], "btcusdt@depth@100ms");
        assert_eq!(book[0].payload.as_ref().unwrap()["id"], 3);
        // the same channel twice builds the same request
        assert_eq!(channels.build(StoreKind::Ticker, Some("btcusdt")).unwrap(), ticker);
    }

    #[test]
    fn test_private_channels_share_the_listen_key_stream() {
        let channels = BinanceChannels::default();
        for kind in StoreKind::PRIVATE {
            let requests = channels.build(kind, None).unwrap();
            assert_eq!(requests, vec![SubscribeRequest::connect_only(PRIVATE_WS_URL)]);
        }
    }
}
