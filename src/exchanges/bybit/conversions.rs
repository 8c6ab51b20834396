use crate::core::errors::ExchangeError;
use crate::core::store::mapper::parse_decimal;
use crate::core::types::Side;
use serde_json::{json, Value};

/// Order statuses after which an order leaves the open-order table
pub const CLOSED_ORDER_STATUSES: [&str; 5] = [
    "Filled",
    "Cancelled",
    "Rejected",
    "Deactivated",
    "PartiallyFilledCanceled",
];

pub fn is_closed_order(row: &Value) -> bool {
    row.get("orderStatus")
        .and_then(Value::as_str)
        .is_some_and(|status| CLOSED_ORDER_STATUSES.contains(&status))
}

/// `[[price, size], ...]` levels to flat orderbook rows
pub fn book_rows(symbol: &str, side: Side, levels: &Value) -> Vec<Value> {
    levels
        .as_array()
        .map(|levels| {
            levels
                .iter()
                .filter_map(|level| {
                    Some(json!({
                        "s": symbol,
                        "S": side.as_str(),
                        "p": level.get(0)?.clone(),
                        "size": level.get(1)?.clone(),
                    }))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Both sides of an orderbook payload (`b` bids, `a` asks)
pub fn book_levels(data: &Value) -> Vec<Value> {
    let symbol = data["s"].as_str().unwrap_or_default();
    book_rows(symbol, Side::Buy, &data["b"])
        .into_iter()
        .chain(book_rows(symbol, Side::Sell, &data["a"]))
        .collect()
}

pub fn is_empty_level(row: &Value) -> bool {
    row.get("size")
        .and_then(parse_decimal)
        .is_some_and(|size| size.is_zero())
}

/// Flat positions report an empty side; hedge-mode legs are identified by
/// `positionIdx` (1 buy, 2 sell).
pub fn position_side(side: &str, position_idx: i64) -> Side {
    Side::from_exchange(side).unwrap_or(if position_idx == 2 { Side::Sell } else { Side::Buy })
}

/// `result` of a v5 response; a non-zero `retCode` is an API error even
/// under HTTP 200
pub fn check_response<'a>(url: &str, body: &'a Value) -> Result<&'a Value, ExchangeError> {
    match body.get("retCode").and_then(Value::as_i64) {
        Some(0) | None => Ok(&body["result"]),
        Some(_) => Err(ExchangeError::ApiError {
            url: url.to_string(),
            status: 200,
            body: Some(body.clone()),
        }),
    }
}
