use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{ReqwestRest, RestClientBuilder, RestClientConfig, WsConfig};
use crate::core::store::initializer::{InitEndpoint, StoreInitializer};
use crate::core::store::mapper::{parse_decimal, FieldMapper, FieldSource, StoreBinding};
use crate::core::store::wrapper::{ExchangeProfile, StoreBindings, StoreWrapper};
use crate::core::types::{
    ExecutionItem, Operation, OrderItem, OrderbookItem, PositionItem, TickerItem, TradesItem,
};
use crate::exchanges::bybit::channels::{
    BybitChannels, PRIVATE_WS_URL, PUBLIC_WS_URL, TESTNET_PRIVATE_WS_URL, TESTNET_PUBLIC_WS_URL,
};
use crate::exchanges::bybit::conversions::position_side;
use crate::exchanges::bybit::store::{base_store, EXECUTION, ORDER, ORDERBOOK, POSITION, TICKER, TRADE};
use serde_json::Value;
use std::sync::Arc;

pub const REST_URL: &str = "https://api.bybit.com";
pub const TESTNET_REST_URL: &str = "https://api-testnet.bybit.com";

fn ticker_mapper() -> FieldMapper<TickerItem> {
    FieldMapper::fields()
        .field("symbol", FieldSource::path("symbol"))
        .field("price", FieldSource::path("lastPrice"))
}

fn trades_mapper() -> FieldMapper<TradesItem> {
    FieldMapper::fields()
        .field("id", FieldSource::string("i"))
        .field("symbol", FieldSource::path("s"))
        .field("side", FieldSource::side("S"))
        .field("price", FieldSource::path("p"))
        .field("size", FieldSource::path("v"))
        .field("timestamp", FieldSource::timestamp("T"))
}

fn orderbook_mapper() -> FieldMapper<OrderbookItem> {
    FieldMapper::fields()
        .field("symbol", FieldSource::path("s"))
        .field("side", FieldSource::side("S"))
        .field("price", FieldSource::path("p"))
        .field("size", FieldSource::path("size"))
}

fn order_mapper() -> FieldMapper<OrderItem> {
    FieldMapper::fields()
        .field("id", FieldSource::string("orderId"))
        .field("symbol", FieldSource::path("symbol"))
        .field("side", FieldSource::side("side"))
        .field("price", FieldSource::path("price"))
        .field("size", FieldSource::path("qty"))
        .field("type", FieldSource::path("orderType"))
}

fn execution_mapper() -> FieldMapper<ExecutionItem> {
    FieldMapper::fields()
        .field("id", FieldSource::string("execId"))
        .field("symbol", FieldSource::path("symbol"))
        .field("side", FieldSource::side("side"))
        .field("price", FieldSource::path("execPrice"))
        .field("size", FieldSource::path("execQty"))
        .field("timestamp", FieldSource::timestamp("execTime"))
        .field("order_id", FieldSource::string("orderId"))
}

fn position_mapper() -> FieldMapper<PositionItem> {
    FieldMapper::fields()
        .field("symbol", FieldSource::path("symbol"))
        .field(
            "side",
            FieldSource::func(|ctx| {
                let side = ctx.get("side").and_then(Value::as_str).unwrap_or_default();
                let idx = ctx.get("positionIdx").and_then(Value::as_i64).unwrap_or_default();
                Ok(Value::String(position_side(side, idx).as_str().to_string()))
            }),
        )
        // REST reports avgPrice, the stream entryPrice
        .field(
            "price",
            FieldSource::func(|ctx| {
                ctx.get("avgPrice")
                    .or_else(|| ctx.get("entryPrice"))
                    .cloned()
                    .ok_or_else(|| ExchangeError::MappingError("position has no price".to_string()))
            }),
        )
        .field("size", FieldSource::path("size"))
        .field("position_idx", FieldSource::path("positionIdx"))
        .with_remap(|operation, raw| {
            let one_way = raw.get("positionIdx").and_then(Value::as_i64) == Some(0);
            let flat = raw.get("size").and_then(parse_decimal).is_some_and(|size| size.is_zero());
            if one_way && flat {
                Some(Operation::Delete)
            } else {
                Some(operation)
            }
        })
}

pub fn bindings() -> StoreBindings {
    StoreBindings {
        ticker: StoreBinding::store(TICKER, ticker_mapper()),
        trades: StoreBinding::store(TRADE, trades_mapper()),
        orderbook: StoreBinding::store(ORDERBOOK, orderbook_mapper()),
        order: StoreBinding::store(ORDER, order_mapper()),
        execution: StoreBinding::store(EXECUTION, execution_mapper()),
        position: StoreBinding::store(POSITION, position_mapper()).with_extra_keys(&["position_idx"]),
    }
}

pub fn initializer() -> StoreInitializer {
    StoreInitializer::new(
        "bybit",
        [
            ("ticker", InitEndpoint::get("/v5/market/tickers", &["category"])),
            ("orderbook", InitEndpoint::get("/v5/market/orderbook", &["category", "symbol"])),
            ("order", InitEndpoint::get("/v5/order/realtime", &["category"])),
            ("position", InitEndpoint::get("/v5/position/list", &["category"])),
        ],
    )
}

pub fn profile(config: &ExchangeConfig) -> ExchangeProfile {
    let channels = match (&config.ws_url, config.testnet) {
        (Some(url), _) => BybitChannels::new(url, PRIVATE_WS_URL),
        (None, true) => BybitChannels::new(TESTNET_PUBLIC_WS_URL, TESTNET_PRIVATE_WS_URL),
        (None, false) => BybitChannels::new(PUBLIC_WS_URL, PRIVATE_WS_URL),
    };

    ExchangeProfile {
        exchange: "bybit".to_string(),
        base: Arc::new(base_store()),
        bindings: bindings(),
        channels: Arc::new(channels),
        initializer: initializer(),
        token: None,
        // v5 drops connections that stay silent for 20 seconds
        ws_config: WsConfig::default().with_health_check_interval(15_000),
    }
}

/// Store wrapper for v5 linear contracts
pub fn build_wrapper(config: ExchangeConfig) -> Result<StoreWrapper, ExchangeError> {
    StoreWrapper::new(profile(&config), config)
}

pub fn build_rest_client(config: &ExchangeConfig) -> Result<ReqwestRest, ExchangeError> {
    let base_url = config.base_url.clone().unwrap_or_else(|| {
        if config.testnet {
            TESTNET_REST_URL.to_string()
        } else {
            REST_URL.to_string()
        }
    });

    let mut rest_config = RestClientConfig::new(base_url, "bybit".to_string()).with_timeout(30);
    if config.has_credentials() {
        rest_config = rest_config.with_header("X-BAPI-API-KEY", config.api_key());
    }
    RestClientBuilder::new(rest_config).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::stream::{ChangeWatcher, StoreChange};
    use crate::core::types::Side;
    use serde_json::json;
    use std::time::Duration;

    async fn next<R>(watcher: &mut ChangeWatcher<R>) -> StoreChange<R> {
        tokio::time::timeout(Duration::from_secs(1), watcher.next())
            .await
            .expect("change in time")
            .expect("stream open")
    }

    fn wrapper() -> StoreWrapper {
        let wrapper = build_wrapper(ExchangeConfig::new("key".into(), "secret".into())).unwrap();
        wrapper.start().unwrap();
        wrapper
    }

    #[tokio::test]
    async fn test_hedge_mode_positions_are_separate_rows() {
        let wrapper = wrapper();
        let mut positions = wrapper.position().watch();
        wrapper.on_message(&json!({
            "topic": "position",
            "data": [
                {"symbol": "BTCUSDT", "positionIdx": 1, "side": "Buy", "size": "2", "entryPrice": "100"},
                {"symbol": "BTCUSDT", "positionIdx": 2, "side": "Sell", "size": "1", "entryPrice": "110"}
            ]
        }));
        next(&mut positions).await;
        next(&mut positions).await;

        assert_eq!(wrapper.position().len(), 2);
        assert_eq!(wrapper.position().size("BTCUSDT").to_string(), "1");
        assert_eq!(wrapper.position().price("BTCUSDT", Side::Sell).unwrap().to_string(), "110");
        wrapper.close();
    }

    #[tokio::test]
    async fn test_flat_one_way_position_is_deleted() {
        let wrapper = wrapper();
        let mut positions = wrapper.position().watch();
        let update = |size: &str, side: &str| {
            json!({"topic": "position", "data": [
                {"symbol": "ETHUSDT", "positionIdx": 0, "side": side, "size": size, "entryPrice": "10"}
            ]})
        };
        wrapper.on_message(&update("3", "Buy"));
        assert_eq!(next(&mut positions).await.data.size.to_string(), "3");

        wrapper.on_message(&update("0", ""));
        assert_eq!(next(&mut positions).await.operation, Operation::Delete);
        assert!(wrapper.position().is_empty());
        wrapper.close();
    }

    #[tokio::test]
    async fn test_orderbook_and_orders_normalize() {
        let wrapper = wrapper();
        let mut book = wrapper.orderbook().watch();
        let mut orders = wrapper.order().watch();

        wrapper.on_message(&json!({
            "topic": "orderbook.50.BTCUSDT", "type": "snapshot",
            "data": {"s": "BTCUSDT", "b": [["100", "1"]], "a": [["101", "2"]]}
        }));
        next(&mut book).await;
        next(&mut book).await;
        assert_eq!(wrapper.orderbook().mid_price("BTCUSDT").unwrap().to_string(), "100.5");

        wrapper.on_message(&json!({"topic": "order", "data": [{
            "symbol": "BTCUSDT", "orderId": "abc", "side": "Sell", "orderType": "Limit",
            "price": "105", "qty": "0.1", "orderStatus": "New"
        }]}));
        let order = next(&mut orders).await.data;
        assert_eq!(order.order_type, "Limit");
        assert_eq!(order.side, Side::Sell);

        wrapper.on_message(&json!({"topic": "order", "data": [{
            "symbol": "BTCUSDT", "orderId": "abc", "side": "Sell", "orderType": "Limit",
            "price": "105", "qty": "0.1", "orderStatus": "Cancelled"
        }]}));
        assert_eq!(next(&mut orders).await.operation, Operation::Delete);
        wrapper.close();
    }
}
