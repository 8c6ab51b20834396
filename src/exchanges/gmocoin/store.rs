use crate::core::errors::ExchangeError;
use crate::core::store::base::{rows, url_path, url_query_param, StoreCollection};
use crate::core::types::DEFAULT_APPEND_LEN;
use crate::exchanges::gmocoin::conversions::{
    book_levels, check_response, is_fully_executed, order_from_rest, with_trade_id,
};
use serde_json::{json, Value};

pub const TICKER: &str = "ticker";
pub const TRADES: &str = "trades";
pub const ORDERBOOK: &str = "orderbooks";
pub const ORDER: &str = "order";
pub const EXECUTION: &str = "execution";
pub const POSITION: &str = "position";

/// Raw tables of the public and private v1 streams
pub fn base_store() -> StoreCollection {
    StoreCollection::builder("gmocoin")
        .table(TICKER, &["symbol"])
        .append_table(TRADES, DEFAULT_APPEND_LEN)
        .table(ORDERBOOK, &["symbol", "side", "price"])
        .table(ORDER, &["orderId"])
        .append_table(EXECUTION, DEFAULT_APPEND_LEN)
        .table(POSITION, &["positionId"])
        .on_message(route_message)
        .on_initialize(route_initialize)
        .build()
}

fn replace_book(stores: &StoreCollection, data: &Value) -> Result<(), ExchangeError> {
    stores
        .table(ORDERBOOK)?
        .reseed(&[("symbol", data["symbol"].clone())], book_levels(data));
    Ok(())
}

fn route_message(stores: &StoreCollection, message: &Value) -> Result<(), ExchangeError> {
    let Some(channel) = message.get("channel").and_then(Value::as_str) else {
        return Ok(());
    };

    match channel {
        "ticker" => {
            stores.table(TICKER)?.update(vec![message.clone()]);
        }
        "trades" => {
            stores.table(TRADES)?.insert(vec![with_trade_id(message.clone())]);
        }
        // every orderbooks message is a full snapshot of the symbol
        "orderbooks" => replace_book(stores, message)?,
        "orderEvents" => {
            let table = stores.table(ORDER)?;
            let cancelled = message["msgType"] == "COR"
                || matches!(message["orderStatus"].as_str(), Some("CANCELED" | "EXPIRED"));
            if cancelled {
                table.delete(vec![message.clone()]);
            } else {
                table.update(vec![message.clone()]);
            }
        }
        "executionEvents" => {
            stores.table(EXECUTION)?.insert(vec![message.clone()]);
            let orders = stores.table(ORDER)?;
            let order = json!({
                "orderId": message["orderId"],
                "orderExecutedSize": message["orderExecutedSize"],
            });
            if is_fully_executed(message) {
                orders.delete(vec![order]);
            } else if orders.get(&order).is_some() {
                orders.update(vec![order]);
            }
        }
        "positionEvents" => {
            let table = stores.table(POSITION)?;
            match message["msgType"].as_str() {
                Some("OPR") => {
                    table.insert(vec![message.clone()]);
                }
                Some("CPR") => {
                    table.delete(vec![message.clone()]);
                }
                _ => {
                    table.update(vec![message.clone()]);
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn route_initialize(stores: &StoreCollection, url: &str, body: &Value) -> Result<(), ExchangeError> {
    let data = check_response(url, body)?;
    match url_path(url) {
        "/public/v1/ticker" => {
            stores.table(TICKER)?.update(rows(data));
        }
        "/public/v1/orderbooks" => replace_book(stores, data)?,
        "/public/v1/trades" => {
            let symbol = url_query_param(url, "symbol").unwrap_or_default();
            let trades = rows(&data["list"])
                .into_iter()
                .rev()
                .map(|mut trade| {
                    if let Some(fields) = trade.as_object_mut() {
                        fields.insert("symbol".to_string(), json!(symbol));
                    }
                    with_trade_id(trade)
                })
                .collect();
            stores.table(TRADES)?.insert(trades);
        }
        "/private/v1/activeOrders" => {
            stores
                .table(ORDER)?
                .reseed(&[], rows(&data["list"]).iter().map(order_from_rest).collect());
        }
        "/private/v1/openPositions" => {
            stores.table(POSITION)?.reseed(&[], rows(&data["list"]));
        }
        _ => {}
    }
    Ok(())
}
