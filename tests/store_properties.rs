mod common;

use common::within;
use exsync::core::store::{DataStore, KeyedTable, NormalizedStore, StoreBinding};
use exsync::{ExchangeError, ExecutionItem, Operation, OrderItem, OrderbookItem, PositionItem, Side};
use futures::StreamExt;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

fn record<R: DeserializeOwned>(value: Value) -> R {
    serde_json::from_value(value).unwrap()
}

fn order(id: &str, price: &str) -> OrderItem {
    record(json!({"id": id, "symbol": "BTCUSDT", "side": "BUY", "price": price, "size": "1", "type": "LIMIT"}))
}

fn store<R: exsync::core::types::NormalizedItem>(binding: StoreBinding<R>) -> NormalizedStore<R> {
    NormalizedStore::new("test", None, binding).unwrap()
}

#[test]
fn test_insert_update_delete_leaves_nothing_behind() {
    let mut table = KeyedTable::new(["id"]);
    let inserted = table.insert(vec![json!({"id": 1, "price": "100", "note": "a"})]);
    let updated = table.update(vec![json!({"id": 1, "price": "101"})]);
    let deleted = table.delete(vec![json!({"id": 1})]);

    assert_eq!(inserted[0].operation, Operation::Insert);
    assert_eq!(updated[0].operation, Operation::Update);
    assert_eq!(updated[0].source.as_ref().unwrap()["price"], "100");
    // updates merge into the existing row
    assert_eq!(updated[0].data, json!({"id": 1, "price": "101", "note": "a"}));
    assert_eq!(deleted[0].operation, Operation::Delete);
    assert_eq!(deleted[0].data["price"], "101");
    assert!(table.is_empty());
}

#[test]
fn test_delete_is_idempotent() {
    let mut table = KeyedTable::new(["id"]);
    table.insert(vec![json!({"id": "a"}), json!({"id": "b"})]);
    assert_eq!(table.delete(vec![json!({"id": "a"})]).len(), 1);
    assert!(table.delete(vec![json!({"id": "a"})]).is_empty());
    assert_eq!(table.len(), 1);
}

#[test]
fn test_update_of_unknown_key_inserts() {
    let mut table = KeyedTable::new(["id"]);
    let changes = table.update(vec![json!({"id": 9, "price": "1"})]);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].operation, Operation::Update);
    assert!(changes[0].source.is_none());
    assert_eq!(table.get(&json!({"id": "9"})), Some(&json!({"id": 9, "price": "1"})));
}

#[test]
fn test_numeric_keys_match_across_spellings() {
    let mut table = KeyedTable::new(["p"]);
    table.insert(vec![json!({"p": "100.0", "q": "1"})]);
    table.update(vec![json!({"p": 100, "q": "2"})]);
    assert_eq!(table.len(), 1);
    assert_eq!(table.find(&[("p", json!("100"))])[0]["q"], "2");
}

#[test]
fn test_append_only_table_evicts_oldest() {
    let mut table = KeyedTable::new(Vec::<String>::new()).with_max_len(2);
    for id in 0..3 {
        table.insert(vec![json!({"id": id})]);
    }
    let ids: Vec<Value> = table.iter().map(|row| row["id"].clone()).collect();
    assert_eq!(ids, vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_watchers_see_changes_in_order() {
    let data = DataStore::new("orders", ["id"]);
    let mut first = data.watch();
    let mut second = data.watch();

    data.insert(vec![json!({"id": 1})]);
    data.update(vec![json!({"id": 1, "state": "open"})]);
    data.delete(vec![json!({"id": 1})]);

    for watcher in [&mut first, &mut second] {
        let operations: Vec<Operation> = within(StreamExt::take(watcher, 3).map(|c| c.operation).collect()).await;
        assert_eq!(operations, vec![Operation::Insert, Operation::Update, Operation::Delete]);
    }
}

#[tokio::test]
async fn test_dropped_watcher_does_not_block_others() {
    let data = DataStore::new("orders", ["id"]);
    let dropped = data.watch();
    let mut kept = data.watch();
    drop(dropped);

    data.insert(vec![json!({"id": 1})]);
    assert_eq!(within(kept.next()).await.unwrap().data["id"], 1);
}

#[tokio::test]
async fn test_waiter_wakes_on_next_change() {
    let data = DataStore::new("orders", ["id"]);
    let mut waiter = data.waiter();
    data.insert(vec![json!({"id": 1})]);
    within(waiter.wait()).await.unwrap();
}

#[test]
fn test_execution_rejects_update_and_delete() {
    let executions: NormalizedStore<ExecutionItem> = store(StoreBinding::unsupported());
    let fill: ExecutionItem = record(json!({
        "id": "e1", "symbol": "BTCUSDT", "side": "SELL", "price": "100", "size": "1",
        "timestamp": "2024-01-01T00:00:00Z"
    }));

    assert_eq!(executions.apply(Operation::Insert, vec![fill.clone()]).unwrap(), 1);
    // the same fill twice is two rows: executions are append-only
    assert_eq!(executions.apply(Operation::Insert, vec![fill.clone()]).unwrap(), 1);
    assert_eq!(executions.len(), 2);

    for operation in [Operation::Update, Operation::Delete] {
        let err = executions.apply(operation, vec![fill.clone()]).unwrap_err();
        assert!(matches!(err, ExchangeError::InvariantViolation { .. }));
    }
    assert_eq!(executions.len(), 2);
}

#[test]
fn test_order_keys_and_replacement() {
    let orders: NormalizedStore<OrderItem> = store(StoreBinding::unsupported());
    orders.apply(Operation::Insert, vec![order("1", "100"), order("2", "99")]).unwrap();
    orders.apply(Operation::Update, vec![order("1", "101")]).unwrap();

    assert_eq!(orders.len(), 2);
    assert_eq!(orders.get(&order("1", "0")).unwrap().price, Decimal::from(101));
    orders.apply(Operation::Delete, vec![order("2", "0")]).unwrap();
    assert_eq!(orders.snapshot(), vec![order("1", "101")]);
}

#[test]
fn test_sorted_book_keeps_zero_size_levels() {
    let book: NormalizedStore<OrderbookItem> = store(StoreBinding::unsupported());
    let level = |side: &str, price: &str, size: &str| -> OrderbookItem {
        record(json!({"symbol": "BTCUSDT", "side": side, "price": price, "size": size}))
    };
    book.apply(
        Operation::Insert,
        vec![
            level("SELL", "102", "1"),
            level("SELL", "101", "0"),
            level("BUY", "99", "1"),
            level("BUY", "100", "2"),
        ],
    )
    .unwrap();

    let sorted = book.sorted(&[("symbol", json!("BTCUSDT"))]);
    let prices = |levels: &[OrderbookItem]| levels.iter().map(|l| l.price.to_string()).collect::<Vec<_>>();
    assert_eq!(prices(&sorted.sell), vec!["101", "102"]);
    assert_eq!(prices(&sorted.buy), vec!["100", "99"]);

    // best levels skip the empty ask
    let (ask, bid) = book.best("BTCUSDT");
    assert_eq!(ask.unwrap().price, Decimal::from(102));
    assert_eq!(bid.unwrap().side, Side::Buy);
    assert_eq!(book.mid_price("BTCUSDT"), Some(Decimal::from(101)));
}

#[test]
fn test_position_netting() {
    let positions: NormalizedStore<PositionItem> = store(StoreBinding::unsupported().with_extra_keys(&["side"]));
    let leg = |side: &str, size: &str, price: &str| -> PositionItem {
        record(json!({"symbol": "BTCUSDT", "side": side, "size": size, "price": price}))
    };
    positions
        .apply(Operation::Insert, vec![leg("BUY", "2", "100"), leg("SELL", "1", "110")])
        .unwrap();

    assert_eq!(positions.size("BTCUSDT"), Decimal::ONE);
    assert_eq!(positions.price("BTCUSDT", Side::Buy), Some(Decimal::from(100)));
    assert_eq!(positions.price("BTCUSDT", Side::Sell), Some(Decimal::from(110)));
    assert_eq!(positions.size("ETHUSDT"), Decimal::ZERO);
    assert_eq!(positions.price("ETHUSDT", Side::Buy), None);
}
