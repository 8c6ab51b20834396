use crate::core::errors::ExchangeError;
use crate::core::store::base::{rows, url_path, url_query_param, StoreCollection};
use crate::core::types::{Side, DEFAULT_APPEND_LEN};
use crate::exchanges::binance::conversions::{
    book_rows, is_closed_order, is_empty_level, order_from_rest, position_from_rest, ticker_from_rest,
};
use serde_json::{json, Value};
use tracing::trace;

pub const TICKER: &str = "ticker";
pub const AGG_TRADE: &str = "aggtrade";
pub const ORDERBOOK: &str = "orderbook";
pub const ORDER: &str = "order";
pub const POSITION: &str = "position";

/// Raw tables of the USDⓈ-M futures streams
pub fn base_store() -> StoreCollection {
    StoreCollection::builder("binance")
        .table(TICKER, &["s"])
        .append_table(AGG_TRADE, DEFAULT_APPEND_LEN)
        .table(ORDERBOOK, &["s", "S", "p"])
        .table(ORDER, &["s", "i"])
        .table(POSITION, &["s", "ps"])
        .on_message(route_message)
        .on_initialize(route_initialize)
        .build()
}

fn route_message(stores: &StoreCollection, message: &Value) -> Result<(), ExchangeError> {
    // combined-stream frames wrap the event in `data`
    let event = message.get("data").unwrap_or(message);
    let Some(kind) = event.get("e").and_then(Value::as_str) else {
        trace!(?message, "Frame without event type");
        return Ok(());
    };

    match kind {
        "24hrTicker" => {
            stores.table(TICKER)?.update(vec![event.clone()]);
        }
        "aggTrade" => {
            stores.table(AGG_TRADE)?.insert(vec![event.clone()]);
        }
        "depthUpdate" => {
            let symbol = event["s"].as_str().unwrap_or_default();
            let book = stores.table(ORDERBOOK)?;
            let (empty, levels): (Vec<Value>, Vec<Value>) = book_rows(symbol, Side::Buy, &event["b"])
                .into_iter()
                .chain(book_rows(symbol, Side::Sell, &event["a"]))
                .partition(is_empty_level);
            book.delete(empty);
            book.update(levels);
        }
        "ORDER_TRADE_UPDATE" => {
            let order = &event["o"];
            let table = stores.table(ORDER)?;
            if is_closed_order(order["X"].as_str().unwrap_or_default()) {
                table.delete(vec![order.clone()]);
            } else {
                table.update(vec![order.clone()]);
            }
        }
        "ACCOUNT_UPDATE" => {
            stores.table(POSITION)?.update(rows(&event["a"]["P"]));
        }
        _ => {}
    }
    Ok(())
}

fn route_initialize(stores: &StoreCollection, url: &str, data: &Value) -> Result<(), ExchangeError> {
    match url_path(url) {
        "/fapi/v1/depth" => {
            let symbol = url_query_param(url, "symbol").ok_or_else(|| {
                ExchangeError::InvalidParameters(format!("depth response from {} has no symbol", url))
            })?;
            stores.table(ORDERBOOK)?.reseed(
                &[("s", json!(symbol))],
                book_rows(&symbol, Side::Buy, &data["bids"])
                    .into_iter()
                    .chain(book_rows(&symbol, Side::Sell, &data["asks"]))
                    .collect(),
            );
        }
        "/fapi/v1/openOrders" => {
            stores
                .table(ORDER)?
                .reseed(&[], rows(data).iter().map(order_from_rest).collect());
        }
        "/fapi/v2/positionRisk" => {
            stores
                .table(POSITION)?
                .reseed(&[], rows(data).iter().map(position_from_rest).collect());
        }
        "/fapi/v1/ticker/price" => {
            stores
                .table(TICKER)?
                .update(rows(data).iter().map(ticker_from_rest).collect());
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::base::BaseStore;

    #[test]
    fn test_depth_update_deletes_zero_levels() {
        let stores = base_store();
        stores.on_message(&json!({
            "e": "depthUpdate", "s": "BTCUSDT",
            "b": [["100", "1"], ["99", "2"]], "a": [["101", "3"]]
        }));
        let book = stores.table(ORDERBOOK).unwrap();
        assert_eq!(book.len(), 3);

        stores.on_message(&json!({
            "e": "depthUpdate", "s": "BTCUSDT", "b": [["99.0", "0"]], "a": [["101", "4"]]
        }));
        assert_eq!(book.len(), 2);
        let asks = book.find(&[("S", json!("SELL"))]);
        assert_eq!(asks[0]["q"], "4");
    }

    #[test]
    fn test_order_lifecycle() {
        let stores = base_store();
        let order = |status: &str| {
            json!({"e": "ORDER_TRADE_UPDATE", "o": {"s": "BTCUSDT", "i": 7, "S": "BUY", "X": status}})
        };
        stores.on_message(&order("NEW"));
        stores.on_message(&order("PARTIALLY_FILLED"));
        let table = stores.table(ORDER).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.snapshot()[0]["X"], "PARTIALLY_FILLED");

        stores.on_message(&order("FILLED"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_combined_stream_frames_are_unwrapped() {
        let stores = base_store();
        stores.on_message(&json!({
            "stream": "btcusdt@ticker",
            "data": {"e": "24hrTicker", "s": "BTCUSDT", "c": "100"}
        }));
        assert_eq!(stores.table(TICKER).unwrap().len(), 1);
    }

    #[test]
    fn test_initialize_depth_replaces_symbol_book() {
        let stores = base_store();
        stores.on_message(&json!({"e": "depthUpdate", "s": "BTCUSDT", "b": [["90", "1"]], "a": []}));
        stores.on_message(&json!({"e": "depthUpdate", "s": "ETHUSDT", "b": [["9", "1"]], "a": []}));

        stores
            .initialize(
                "https://fapi.binance.com/fapi/v1/depth?limit=1000&symbol=BTCUSDT",
                &json!({"lastUpdateId": 1, "bids": [["100", "1"]], "asks": [["101", "1"], ["102", "1"]]}),
            )
            .unwrap();

        let book = stores.table(ORDERBOOK).unwrap();
        assert_eq!(book.find(&[("s", json!("BTCUSDT"))]).len(), 3);
        assert_eq!(book.find(&[("s", json!("ETHUSDT"))]).len(), 1);
        assert!(book.find(&[("p", json!("90"))]).is_empty());
    }

    #[test]
    fn test_initialize_positions() {
        let stores = base_store();
        stores
            .initialize(
                "https://fapi.binance.com/fapi/v2/positionRisk",
                &json!([{"symbol": "BTCUSDT", "positionAmt": "0.5", "entryPrice": "100", "positionSide": "BOTH"}]),
            )
            .unwrap();
        let positions = stores.table(POSITION).unwrap();
        assert_eq!(positions.snapshot()[0]["pa"], "0.5");
    }
}
