use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{ReqwestRest, RestClientBuilder, RestClientConfig, WsConfig};
use crate::core::store::initializer::{InitEndpoint, InitParams, StoreInitializer};
use crate::core::store::mapper::{parse_decimal, FieldMapper, FieldSource, MessageFeed, StoreBinding};
use crate::core::store::token::TokenPolicy;
use crate::core::store::wrapper::{ExchangeProfile, StoreBindings, StoreWrapper, TOKEN_KEY};
use crate::core::types::{
    ExecutionItem, Operation, OrderItem, OrderbookItem, PositionItem, TickerItem, TradesItem,
};
use crate::exchanges::binance::channels::{
    BinanceChannels, PRIVATE_WS_URL, PUBLIC_WS_URL, TESTNET_PRIVATE_WS_URL, TESTNET_PUBLIC_WS_URL,
};
use crate::exchanges::binance::conversions::{position_side, taker_side};
use crate::exchanges::binance::store::{base_store, AGG_TRADE, ORDER, ORDERBOOK, POSITION, TICKER};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const REST_URL: &str = "https://fapi.binance.com";
pub const TESTNET_REST_URL: &str = "https://testnet.binancefuture.com";

/// Listen keys expire after 60 minutes without a keep-alive
pub const LISTEN_KEY_INTERVAL: Duration = Duration::from_secs(30 * 60);

fn ticker_mapper() -> FieldMapper<TickerItem> {
    FieldMapper::fields()
        .field("symbol", FieldSource::path("s"))
        .field("price", FieldSource::path("c"))
}

fn trades_mapper() -> FieldMapper<TradesItem> {
    FieldMapper::fields()
        .field("id", FieldSource::string("a"))
        .field("symbol", FieldSource::path("s"))
        .field(
            "side",
            FieldSource::func(|ctx| {
                let buyer_is_maker = ctx.require("m")?.as_bool().unwrap_or_default();
                Ok(Value::String(taker_side(buyer_is_maker).as_str().to_string()))
            }),
        )
        .field("price", FieldSource::path("p"))
        .field("size", FieldSource::path("q"))
        .field("timestamp", FieldSource::timestamp("T"))
}

fn orderbook_mapper() -> FieldMapper<OrderbookItem> {
    FieldMapper::fields()
        .field("symbol", FieldSource::path("s"))
        .field("side", FieldSource::side("S"))
        .field("price", FieldSource::path("p"))
        .field("size", FieldSource::path("q"))
}

fn order_mapper() -> FieldMapper<OrderItem> {
    FieldMapper::fields()
        .field("id", FieldSource::string("i"))
        .field("symbol", FieldSource::path("s"))
        .field("side", FieldSource::side("S"))
        .field("price", FieldSource::path("p"))
        .field("size", FieldSource::path("q"))
        .field("type", FieldSource::path("o"))
}

fn execution_mapper() -> FieldMapper<ExecutionItem> {
    FieldMapper::fields()
        .field("id", FieldSource::string("t"))
        .field("symbol", FieldSource::path("s"))
        .field("side", FieldSource::side("S"))
        .field("price", FieldSource::path("L"))
        .field("size", FieldSource::path("l"))
        .field("timestamp", FieldSource::timestamp("T"))
        .field("order_id", FieldSource::string("i"))
}

/// Trade fills of `ORDER_TRADE_UPDATE` events.
///
/// Every `x == "TRADE"` event is one execution, so a partially filled order
/// yields one row per partial fill (`l` is the quantity of that fill, not
/// the cumulative `z`).
fn extract_executions(message: &Value) -> Vec<(Operation, Value)> {
    let event = message.get("data").unwrap_or(message);
    if event["e"] == "ORDER_TRADE_UPDATE" && event["o"]["x"] == "TRADE" {
        vec![(Operation::Insert, event["o"].clone())]
    } else {
        Vec::new()
    }
}

fn position_mapper() -> FieldMapper<PositionItem> {
    FieldMapper::fields()
        .field("symbol", FieldSource::path("s"))
        .field(
            "side",
            FieldSource::func(|ctx| {
                let side = position_side(ctx.str("ps")?, ctx.decimal("pa")?);
                Ok(Value::String(side.as_str().to_string()))
            }),
        )
        .field("price", FieldSource::path("ep"))
        .field("size", FieldSource::abs("pa"))
        .field("position_side", FieldSource::path("ps"))
        // a flat one-way position is reported as a zero-amount BOTH leg
        .with_remap(|operation, raw| {
            let flat = raw["ps"] == "BOTH"
                && raw.get("pa").and_then(parse_decimal).is_some_and(|amount| amount.is_zero());
            if flat {
                Some(Operation::Delete)
            } else {
                Some(operation)
            }
        })
}

pub fn bindings() -> StoreBindings {
    StoreBindings {
        ticker: StoreBinding::store(TICKER, ticker_mapper()),
        trades: StoreBinding::store(AGG_TRADE, trades_mapper()),
        orderbook: StoreBinding::store(ORDERBOOK, orderbook_mapper()),
        order: StoreBinding::store(ORDER, order_mapper()),
        execution: StoreBinding::messages(MessageFeed::new(extract_executions, execution_mapper())),
        position: StoreBinding::store(POSITION, position_mapper()).with_extra_keys(&["position_side"]),
    }
}

pub fn initializer() -> StoreInitializer {
    StoreInitializer::new(
        "binance",
        [
            ("orderbook", InitEndpoint::get("/fapi/v1/depth", &["symbol"])),
            ("order", InitEndpoint::get("/fapi/v1/openOrders", &[])),
            ("position", InitEndpoint::get("/fapi/v2/positionRisk", &[])),
            ("ticker", InitEndpoint::get("/fapi/v1/ticker/price", &[])),
            (TOKEN_KEY, InitEndpoint::new(Method::POST, "/fapi/v1/listenKey", &[])),
            ("token_extend", InitEndpoint::new(Method::PUT, "/fapi/v1/listenKey", &[])),
        ],
    )
}

pub fn token_policy() -> TokenPolicy {
    TokenPolicy::new(
        TOKEN_KEY,
        |body| body.get("listenKey").and_then(Value::as_str).map(str::to_string),
        LISTEN_KEY_INTERVAL,
    )
    .with_extend("token_extend", |_| InitParams::new())
}

pub fn profile(config: &ExchangeConfig) -> ExchangeProfile {
    let channels = match (&config.ws_url, config.testnet) {
        (Some(url), _) => BinanceChannels::new(url, &format!("{}/{{token}}", url.trim_end_matches('/'))),
        (None, true) => BinanceChannels::new(TESTNET_PUBLIC_WS_URL, TESTNET_PRIVATE_WS_URL),
        (None, false) => BinanceChannels::new(PUBLIC_WS_URL, PRIVATE_WS_URL),
    };

    ExchangeProfile {
        exchange: "binance".to_string(),
        base: Arc::new(base_store()),
        bindings: bindings(),
        channels: Arc::new(channels),
        initializer: initializer(),
        token: Some(token_policy()),
        ws_config: WsConfig::default(),
    }
}

/// Store wrapper for USDⓈ-M futures
pub fn build_wrapper(config: ExchangeConfig) -> Result<StoreWrapper, ExchangeError> {
    StoreWrapper::new(profile(&config), config)
}

/// REST client for seeding; sends the API-key header when credentials are set.
///
/// Signed endpoints (open orders, positions) still need a signing client.
pub fn build_rest_client(config: &ExchangeConfig) -> Result<ReqwestRest, ExchangeError> {
    let base_url = config.base_url.clone().unwrap_or_else(|| {
        if config.testnet {
            TESTNET_REST_URL.to_string()
        } else {
            REST_URL.to_string()
        }
    });

    let mut rest_config = RestClientConfig::new(base_url, "binance".to_string()).with_timeout(30);
    if config.has_credentials() {
        rest_config = rest_config.with_header("X-MBX-APIKEY", config.api_key());
    }
    RestClientBuilder::new(rest_config).build()
}
