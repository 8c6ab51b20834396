use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{ReqwestRest, RestClientBuilder, RestClientConfig, WsConfig};
use crate::core::store::initializer::{InitEndpoint, InitParams, StoreInitializer};
use crate::core::store::mapper::{FieldMapper, FieldSource, StoreBinding};
use crate::core::store::token::TokenPolicy;
use crate::core::store::wrapper::{ExchangeProfile, StoreBindings, StoreWrapper, TOKEN_KEY};
use crate::core::types::{
    ExecutionItem, OrderItem, OrderbookItem, PositionItem, TickerItem, TradesItem,
};
use crate::exchanges::gmocoin::channels::{GmoCoinChannels, PRIVATE_WS_URL, PUBLIC_WS_URL};
use crate::exchanges::gmocoin::store::{base_store, EXECUTION, ORDER, ORDERBOOK, POSITION, TICKER, TRADES};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const REST_URL: &str = "https://api.coin.z.com";

/// Access tokens expire after 60 minutes unless extended
pub const TOKEN_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// The public stream rejects subscribe commands sent faster than one per second
pub const SUBSCRIBE_INTERVAL_MS: u64 = 1_000;

fn ticker_mapper() -> FieldMapper<TickerItem> {
    FieldMapper::fields()
        .field("symbol", FieldSource::path("symbol"))
        .field("price", FieldSource::path("last"))
}

fn trades_mapper() -> FieldMapper<TradesItem> {
    FieldMapper::fields()
        .field("id", FieldSource::string("id"))
        .field("symbol", FieldSource::path("symbol"))
        .field("side", FieldSource::side("side"))
        .field("price", FieldSource::path("price"))
        .field("size", FieldSource::path("size"))
        .field("timestamp", FieldSource::timestamp("timestamp"))
}

fn orderbook_mapper() -> FieldMapper<OrderbookItem> {
    FieldMapper::fields()
        .field("symbol", FieldSource::path("symbol"))
        .field("side", FieldSource::side("side"))
        .field("price", FieldSource::path("price"))
        .field("size", FieldSource::path("size"))
}

fn order_mapper() -> FieldMapper<OrderItem> {
    FieldMapper::fields()
        .field("id", FieldSource::string("orderId"))
        .field("symbol", FieldSource::path("symbol"))
        .field("side", FieldSource::side("side"))
        .field("price", FieldSource::path("orderPrice"))
        .field("size", FieldSource::path("orderSize"))
        .field("type", FieldSource::path("executionType"))
}

fn execution_mapper() -> FieldMapper<ExecutionItem> {
    FieldMapper::fields()
        .field("id", FieldSource::string("executionId"))
        .field("symbol", FieldSource::path("symbol"))
        .field("side", FieldSource::side("side"))
        .field("price", FieldSource::path("executionPrice"))
        .field("size", FieldSource::path("executionSize"))
        .field("timestamp", FieldSource::timestamp("executionTimestamp"))
        .field("order_id", FieldSource::string("orderId"))
}

fn position_mapper() -> FieldMapper<PositionItem> {
    FieldMapper::fields()
        .field("symbol", FieldSource::path("symbol"))
        .field("side", FieldSource::side("side"))
        .field("price", FieldSource::path("price"))
        .field("size", FieldSource::path("size"))
        .field("position_id", FieldSource::string("positionId"))
}

pub fn bindings() -> StoreBindings {
    StoreBindings {
        ticker: StoreBinding::store(TICKER, ticker_mapper()),
        trades: StoreBinding::store(TRADES, trades_mapper()),
        orderbook: StoreBinding::store(ORDERBOOK, orderbook_mapper()),
        order: StoreBinding::store(ORDER, order_mapper()),
        execution: StoreBinding::store(EXECUTION, execution_mapper()),
        position: StoreBinding::store(POSITION, position_mapper()).with_extra_keys(&["position_id"]),
    }
}

pub fn initializer() -> StoreInitializer {
    StoreInitializer::new(
        "gmocoin",
        [
            ("ticker", InitEndpoint::get("/public/v1/ticker", &[])),
            ("orderbook", InitEndpoint::get("/public/v1/orderbooks", &["symbol"])),
            ("trades", InitEndpoint::get("/public/v1/trades", &["symbol"])),
            ("order", InitEndpoint::get("/private/v1/activeOrders", &["symbol"])),
            ("position", InitEndpoint::get("/private/v1/openPositions", &["symbol"])),
            (TOKEN_KEY, InitEndpoint::new(Method::POST, "/private/v1/ws-auth", &[])),
            ("token_extend", InitEndpoint::new(Method::PUT, "/private/v1/ws-auth", &["token"])),
        ],
    )
}

pub fn token_policy() -> TokenPolicy {
    TokenPolicy::new(
        TOKEN_KEY,
        |body| body.get("data").and_then(Value::as_str).map(str::to_string),
        TOKEN_INTERVAL,
    )
    .with_extend("token_extend", |token| {
        InitParams::from([("token".to_string(), token.to_string())])
    })
}

pub fn profile(config: &ExchangeConfig) -> ExchangeProfile {
    let public_url = config.ws_url.as_deref().unwrap_or(PUBLIC_WS_URL);
    ExchangeProfile {
        exchange: "gmocoin".to_string(),
        base: Arc::new(base_store()),
        bindings: bindings(),
        channels: Arc::new(GmoCoinChannels::new(public_url, PRIVATE_WS_URL)),
        initializer: initializer(),
        token: Some(token_policy()),
        ws_config: WsConfig::default().with_subscribe_interval(SUBSCRIBE_INTERVAL_MS),
    }
}

pub fn build_wrapper(config: ExchangeConfig) -> Result<StoreWrapper, ExchangeError> {
    StoreWrapper::new(profile(&config), config)
}

/// REST client for seeding. GMO has no testnet; `testnet` is ignored.
pub fn build_rest_client(config: &ExchangeConfig) -> Result<ReqwestRest, ExchangeError> {
    let base_url = config.base_url.clone().unwrap_or_else(|| REST_URL.to_string());
    let mut rest_config = RestClientConfig::new(base_url, "gmocoin".to_string()).with_timeout(30);
    if config.has_credentials() {
        rest_config = rest_config.with_header("API-KEY", config.api_key());
    }
    RestClientBuilder::new(rest_config).build()
}
