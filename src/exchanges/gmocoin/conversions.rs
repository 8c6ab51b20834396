use crate::core::errors::ExchangeError;
use crate::core::store::mapper::parse_decimal;
use crate::core::types::Side;
use serde_json::{json, Value};
use uuid::Uuid;

/// `[{price, size}, ...]` levels to flat orderbook rows
pub fn book_rows(symbol: &str, side: Side, levels: &Value) -> Vec<Value> {
    levels
        .as_array()
        .map(|levels| {
            levels
                .iter()
                .map(|level| {
                    json!({
                        "symbol": symbol,
                        "side": side.as_str(),
                        "price": level["price"],
                        "size": level["size"],
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Both sides of an orderbook snapshot
pub fn book_levels(data: &Value) -> Vec<Value> {
    let symbol = data["symbol"].as_str().unwrap_or_default();
    book_rows(symbol, Side::Sell, &data["asks"])
        .into_iter()
        .chain(book_rows(symbol, Side::Buy, &data["bids"]))
        .collect()
}

/// Public trades carry no id; one is assigned on arrival
pub fn with_trade_id(mut trade: Value) -> Value {
    if let Some(fields) = trade.as_object_mut() {
        fields
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    }
    trade
}

/// `/private/v1/activeOrders` row in the shape of an `orderEvents` message
pub fn order_from_rest(order: &Value) -> Value {
    json!({
        "orderId": order["orderId"],
        "symbol": order["symbol"],
        "side": order["side"],
        "settleType": order["settleType"],
        "executionType": order["executionType"],
        "orderPrice": order["price"],
        "orderSize": order["size"],
        "orderExecutedSize": order["executedSize"],
        "orderStatus": order["status"],
        "orderTimestamp": order["timestamp"],
    })
}

/// An execution event that completed its order
pub fn is_fully_executed(event: &Value) -> bool {
    match (
        event.get("orderExecutedSize").and_then(parse_decimal),
        event.get("orderSize").and_then(parse_decimal),
    ) {
        (Some(executed), Some(size)) => executed >= size,
        _ => false,
    }
}

/// `data` of a response; a non-zero `status` is an API error even under
/// HTTP 200
pub fn check_response<'a>(url: &str, body: &'a Value) -> Result<&'a Value, ExchangeError> {
    match body.get("status").and_then(Value::as_i64) {
        Some(0) | None => Ok(&body["data"]),
        Some(_) => Err(ExchangeError::ApiError {
            url: url.to_string(),
            status: 200,
            body: Some(body.clone()),
        }),
    }
}
