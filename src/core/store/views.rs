use crate::core::store::normalized::NormalizedStore;
use crate::core::store::table::Query;
use crate::core::types::{OrderbookItem, PositionItem, Side};
use rust_decimal::Decimal;
use serde_json::json;

/// Orderbook levels split by side: asks ascending, bids descending
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedBook {
    pub sell: Vec<OrderbookItem>,
    pub buy: Vec<OrderbookItem>,
}

impl NormalizedStore<OrderbookItem> {
    /// Zero-size levels are kept; filtering them is up to the caller.
    pub fn sorted(&self, query: &Query<'_>) -> SortedBook {
        let (mut sell, mut buy): (Vec<_>, Vec<_>) = self
            .find(query)
            .into_iter()
            .partition(|level| level.side == Side::Sell);
        sell.sort_by(|a, b| a.price.cmp(&b.price));
        buy.sort_by(|a, b| b.price.cmp(&a.price));
        SortedBook { sell, buy }
    }

    /// Best (ask, bid) for a symbol, ignoring empty levels
    pub fn best(&self, symbol: &str) -> (Option<OrderbookItem>, Option<OrderbookItem>) {
        let book = self.sorted(&[("symbol", json!(symbol))]);
        let first = |levels: Vec<OrderbookItem>| levels.into_iter().find(|l| !l.size.is_zero());
        (first(book.sell), first(book.buy))
    }

    pub fn mid_price(&self, symbol: &str) -> Option<Decimal> {
        match self.best(symbol) {
            (Some(ask), Some(bid)) => Some((ask.price + bid.price) / Decimal::TWO),
            _ => None,
        }
    }
}

/// Aggregated exposure for one symbol
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionSummary {
    pub buy_size: Decimal,
    pub buy_price: Option<Decimal>,
    pub sell_size: Decimal,
    pub sell_price: Option<Decimal>,
}

impl PositionSummary {
    /// One-way net size: buys minus sells
    pub fn net(&self) -> Decimal {
        self.buy_size - self.sell_size
    }
}

impl NormalizedStore<PositionItem> {
    pub fn summary(&self, symbol: &str) -> PositionSummary {
        let positions = self.find(&[("symbol", json!(symbol))]);
        let side_totals = |side: Side| {
            let (size, notional) = positions
                .iter()
                .filter(|p| p.side == side)
                .fold((Decimal::ZERO, Decimal::ZERO), |(size, notional), p| {
                    (size + p.size, notional + p.size * p.price)
                });
            let vwap = (!size.is_zero()).then(|| notional / size);
            (size, vwap)
        };
        let (buy_size, buy_price) = side_totals(Side::Buy);
        let (sell_size, sell_price) = side_totals(Side::Sell);
        PositionSummary {
            buy_size,
            buy_price,
            sell_size,
            sell_price,
        }
    }

    pub fn size(&self, symbol: &str) -> Decimal {
        self.summary(symbol).net()
    }

    /// Size-weighted average entry price of one side
    pub fn price(&self, symbol: &str, side: Side) -> Option<Decimal> {
        let summary = self.summary(symbol);
        match side {
            Side::Buy => summary.buy_price,
            Side::Sell => summary.sell_price,
        }
    }
}
