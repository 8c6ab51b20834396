pub mod binance;
pub mod bybit;
pub mod gmocoin;
