//! Bybit v5 linear contracts
pub mod builder; // profile, mappers, initializer table
pub mod channels; // canonical channel → v5 topic
pub mod conversions; // orderbook rows, position sides, retCode checks
pub mod store; // raw tables and message/REST routers

pub use builder::{build_rest_client, build_wrapper, profile};
pub use channels::BybitChannels;
