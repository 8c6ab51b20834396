//! Binance USDⓈ-M futures
pub mod builder; // profile, mappers, initializer table, token policy
pub mod channels; // canonical channel → stream subscription
pub mod conversions; // REST rows → stream row shapes
pub mod store; // raw tables and message/REST routers

pub use builder::{build_rest_client, build_wrapper, profile};
pub use channels::BinanceChannels;
