use crate::core::errors::ExchangeError;
use crate::core::store::channel::{require_symbol, ChannelBuilder, SubscribeRequest};
use crate::core::types::StoreKind;
use serde_json::json;

pub const PUBLIC_WS_URL: &str = "wss://api.coin.z.com/ws/public/v1";
pub const PRIVATE_WS_URL: &str = "wss://api.coin.z.com/ws/private/v1/{token}";

pub struct GmoCoinChannels {
    public_url: String,
    private_url: String,
}

impl GmoCoinChannels {
    pub fn new(public_url: &str, private_url: &str) -> Self {
        Self {
            public_url: public_url.to_string(),
            private_url: private_url.to_string(),
        }
    }

    pub fn channel_name(kind: StoreKind) -> &'static str {
        match kind {
            StoreKind::Ticker => "ticker",
            StoreKind::Trades => "trades",
            StoreKind::Orderbook => "orderbooks",
            StoreKind::Order => "orderEvents",
            StoreKind::Execution => "executionEvents",
            StoreKind::Position => "positionEvents",
        }
    }
}

impl Default for GmoCoinChannels {
    fn default() -> Self {
        Self::new(PUBLIC_WS_URL, PRIVATE_WS_URL)
    }
}

impl ChannelBuilder for GmoCoinChannels {
    fn build(&self, kind: StoreKind, symbol: Option<&str>) -> Result<Vec<SubscribeRequest>, ExchangeError> {
        let channel = Self::channel_name(kind);
        if kind.is_private() {
            return Ok(vec![SubscribeRequest::new(
                &self.private_url,
                json!({"command": "subscribe", "channel": channel}),
            )]);
        }
        let symbol = require_symbol(kind, symbol)?;
        Ok(vec![SubscribeRequest::new(
            &self.public_url,
            json!({"command": "subscribe", "channel": channel, "symbol": symbol}),
        )])
    }
}
