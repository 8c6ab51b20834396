use crate::core::store::mapper::parse_decimal;
use crate::core::types::Side;
use rust_decimal::Decimal;
use serde_json::{json, Value};

/// Order statuses after which an order leaves the open-order table
pub const CLOSED_ORDER_STATUSES: [&str; 4] = ["FILLED", "CANCELED", "EXPIRED", "EXPIRED_IN_MATCH"];

pub fn is_closed_order(status: &str) -> bool {
    CLOSED_ORDER_STATUSES.contains(&status)
}

/// `[[price, qty], ...]` levels to flat orderbook rows
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
                        "q": level.get(1)?.clone(),
                    }))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Quantity field `q` parses to zero
pub fn is_empty_level(row: &Value) -> bool {
    row.get("q")
        .and_then(parse_decimal)
        .is_some_and(|qty| qty.is_zero())
}

/// `m` (buyer is maker) means the taker sold
pub fn taker_side(buyer_is_maker: bool) -> Side {
    if buyer_is_maker {
        Side::Sell
    } else {
        Side::Buy
    }
}

/// Hedge-mode legs carry their side; one-way positions use the amount sign
pub fn position_side(position_side: &str, amount: Decimal) -> Side {
    match position_side {
        "LONG" => Side::Buy,
        "SHORT" => Side::Sell,
        _ if amount.is_sign_negative() && !amount.is_zero() => Side::Sell,
        _ => Side::Buy,
    }
}

/// `/fapi/v1/openOrders` row in the shape of an `ORDER_TRADE_UPDATE` order
pub fn order_from_rest(order: &Value) -> Value {
    json!({
        "s": order["symbol"],
        "i": order["orderId"],
        "c": order["clientOrderId"],
        "S": order["side"],
        "o": order["type"],
        "p": order["price"],
        "q": order["origQty"],
        "z": order["executedQty"],
        "X": order["status"],
        "ps": order["positionSide"],
        "T": order["updateTime"],
    })
}

/// `/fapi/v2/positionRisk` row in the shape of an `ACCOUNT_UPDATE` position
pub fn position_from_rest(position: &Value) -> Value {
    json!({
        "s": position["symbol"],
        "pa": position["positionAmt"],
        "ep": position["entryPrice"],
        "up": position["unRealizedProfit"],
        "mt": position["marginType"],
        "ps": position["positionSide"],
    })
}

/// `/fapi/v1/ticker/price` row in the shape of a `24hrTicker` event
pub fn ticker_from_rest(ticker: &Value) -> Value {
    json!({
        "s": ticker["symbol"],
        "c": ticker["price"],
        "E": ticker["time"],
    })
}
