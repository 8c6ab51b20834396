pub mod core;
pub mod exchanges;
pub mod utils;

pub use crate::core::store::{ChannelSpec, InitRequest, NormalizedStore, StoreWrapper, TOKEN_KEY};
pub use crate::core::{config::ExchangeConfig, errors::ExchangeError, types::*};
pub use utils::{ExchangeFactory, ExchangeType};
