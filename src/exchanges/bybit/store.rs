use crate::core::errors::ExchangeError;
use crate::core::store::base::{rows, url_path, StoreCollection};
use crate::core::types::DEFAULT_APPEND_LEN;
use crate::exchanges::bybit::conversions::{book_levels, check_response, is_closed_order, is_empty_level};
use serde_json::{json, Value};

pub const TICKER: &str = "ticker";
pub const TRADE: &str = "trade";
pub const ORDERBOOK: &str = "orderbook";
pub const ORDER: &str = "order";
pub const EXECUTION: &str = "execution";
pub const POSITION: &str = "position";

/// Raw tables of the v5 linear streams
pub fn base_store() -> StoreCollection {
    StoreCollection::builder("bybit")
        .table(TICKER, &["symbol"])
        .append_table(TRADE, DEFAULT_APPEND_LEN)
        .table(ORDERBOOK, &["s", "S", "p"])
        .table(ORDER, &["symbol", "orderId"])
        .append_table(EXECUTION, DEFAULT_APPEND_LEN)
        .table(POSITION, &["symbol", "positionIdx"])
        .on_message(route_message)
        .on_initialize(route_initialize)
        .build()
}

fn route_message(stores: &StoreCollection, message: &Value) -> Result<(), ExchangeError> {
    let Some(topic) = message.get("topic").and_then(Value::as_str) else {
        // op replies (subscribe, auth, pong)
        return Ok(());
    };
    let channel = topic.split('.').next().unwrap_or(topic);
    let data = &message["data"];

    match channel {
        "tickers" => {
            stores.table(TICKER)?.update(rows(data));
        }
        "publicTrade" => {
            stores.table(TRADE)?.insert(rows(data));
        }
        "orderbook" => {
            let book = stores.table(ORDERBOOK)?;
            if message["type"] == "snapshot" {
                book.reseed(&[("s", data["s"].clone())], book_levels(data));
            } else {
                let (empty, levels): (Vec<Value>, Vec<Value>) =
                    book_levels(data).into_iter().partition(is_empty_level);
                book.delete(empty);
                book.update(levels);
            }
        }
        "order" => {
            let (closed, open): (Vec<Value>, Vec<Value>) = rows(data).into_iter().partition(is_closed_order);
            let table = stores.table(ORDER)?;
            table.delete(closed);
            table.update(open);
        }
        "execution" => {
            let trades = rows(data)
                .into_iter()
                .filter(|row| row["execType"] == "Trade")
                .collect();
            stores.table(EXECUTION)?.insert(trades);
        }
        "position" => {
            stores.table(POSITION)?.update(rows(data));
        }
        _ => {}
    }
    Ok(())
}

fn route_initialize(stores: &StoreCollection, url: &str, body: &Value) -> Result<(), ExchangeError> {
    let result = check_response(url, body)?;
    match url_path(url) {
        "/v5/market/tickers" => {
            stores.table(TICKER)?.update(rows(&result["list"]));
        }
        "/v5/market/orderbook" => {
            stores
                .table(ORDERBOOK)?
                .reseed(&[("s", json!(result["s"]))], book_levels(result));
        }
        "/v5/order/realtime" => {
            stores.table(ORDER)?.reseed(
                &[],
                rows(&result["list"])
                    .into_iter()
                    .filter(|row| !is_closed_order(row))
                    .collect(),
            );
        }
        "/v5/position/list" => {
            stores.table(POSITION)?.reseed(&[], rows(&result["list"]));
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::base::BaseStore;

    fn book(kind: &str, bids: Value, asks: Value) -> Value {
        json!({
            "topic": "orderbook.50.BTCUSDT",
            "type": kind,
            "data": {"s": "BTCUSDT", "b": bids, "a": asks, "u": 1}
        })
    }

    #[test]
    fn test_orderbook_snapshot_then_delta() {
        let stores = base_store();
        stores.on_message(&book("snapshot", json!([["100", "1"], ["99", "1"]]), json!([["101", "1"]])));
        stores.on_message(&book("delta", json!([["99", "0"]]), json!([["102", "2"]])));
        let table = stores.table(ORDERBOOK).unwrap();
        assert_eq!(table.len(), 3);

        stores.on_message(&book("snapshot", json!([["98", "1"]]), json!([])));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_ticker_deltas_merge() {
        let stores = base_store();
        stores.on_message(&json!({
            "topic": "tickers.BTCUSDT", "type": "snapshot",
            "data": {"symbol": "BTCUSDT", "lastPrice": "100", "fundingRate": "0.0001"}
        }));
        stores.on_message(&json!({
            "topic": "tickers.BTCUSDT", "type": "delta",
            "data": {"symbol": "BTCUSDT", "fundingRate": "0.0002"}
        }));
        let ticker = &stores.table(TICKER).unwrap().snapshot()[0];
        assert_eq!(ticker["lastPrice"], "100");
        assert_eq!(ticker["fundingRate"], "0.0002");
    }

    #[test]
    fn test_execution_keeps_trades_only() {
        let stores = base_store();
        stores.on_message(&json!({
            "topic": "execution",
            "data": [
                {"symbol": "BTCUSDT", "execId": "a", "execType": "Trade"},
                {"symbol": "BTCUSDT", "execId": "b", "execType": "Funding"}
            ]
        }));
        assert_eq!(stores.table(EXECUTION).unwrap().len(), 1);
    }

    #[test]
    fn test_initialize_rejects_error_code() {
        let stores = base_store();
        let err = stores
            .initialize(
                "https://api.bybit.com/v5/position/list?category=linear",
                &json!({"retCode": 10003, "retMsg": "API key is invalid.", "result": {}}),
            )
            .unwrap_err();
        assert!(matches!(err, ExchangeError::ApiError { .. }));
    }

    #[test]
    fn test_initialize_orders_skips_closed() {
        let stores = base_store();
        stores
            .initialize(
                "https://api.bybit.com/v5/order/realtime?category=linear",
                &json!({"retCode": 0, "result": {"list": [
                    {"symbol": "BTCUSDT", "orderId": "1", "orderStatus": "New"},
                    {"symbol": "BTCUSDT", "orderId": "2", "orderStatus": "Cancelled"}
                ]}}),
            )
            .unwrap();
        assert_eq!(stores.table(ORDER).unwrap().len(), 1);
    }
}
