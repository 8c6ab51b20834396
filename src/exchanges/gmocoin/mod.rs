//! GMO Coin
pub mod builder; // profile, mappers, initializer table, token policy
pub mod channels; // canonical channel → subscribe command
pub mod conversions; // orderbook rows, trade ids, status checks
pub mod store; // raw tables and message/REST routers

pub use builder::{build_rest_client, build_wrapper, profile};
pub use channels::GmoCoinChannels;
