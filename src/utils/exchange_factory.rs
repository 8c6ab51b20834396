use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::RestClient;
use crate::core::store::StoreWrapper;
use crate::exchanges::{binance, bybit, gmocoin};
use std::str::FromStr;
use std::sync::Arc;

/// Supported exchange profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeType {
    Binance,
    Bybit,
    GmoCoin,
}

impl ExchangeType {
    pub const ALL: [Self; 3] = [Self::Binance, Self::Bybit, Self::GmoCoin];

    /// Prefix of the `{PREFIX}_API_KEY` style environment variables
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Self::Binance => "BINANCE",
            Self::Bybit => "BYBIT",
            Self::GmoCoin => "GMOCOIN",
        }
    }

    /// A symbol every profile lists, for demos and smoke tests
    pub fn default_symbol(&self) -> &'static str {
        match self {
            Self::Binance | Self::Bybit => "BTCUSDT",
            Self::GmoCoin => "BTC",
        }
    }
}

impl std::fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binance => write!(f, "Binance"),
            Self::Bybit => write!(f, "Bybit"),
            Self::GmoCoin => write!(f, "GMO Coin"),
        }
    }
}

impl FromStr for ExchangeType {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "binance" => Ok(Self::Binance),
            "bybit" => Ok(Self::Bybit),
            "gmo" | "gmocoin" => Ok(Self::GmoCoin),
            other => Err(ExchangeError::InvalidParameters(format!("unknown exchange '{}'", other))),
        }
    }
}

/// Factory for store wrappers and their seeding clients
pub struct ExchangeFactory;

impl ExchangeFactory {
    pub fn create_wrapper(
        exchange_type: ExchangeType,
        config: ExchangeConfig,
    ) -> Result<StoreWrapper, ExchangeError> {
        match exchange_type {
            ExchangeType::Binance => binance::build_wrapper(config),
            ExchangeType::Bybit => bybit::build_wrapper(config),
            ExchangeType::GmoCoin => gmocoin::build_wrapper(config),
        }
    }

    pub fn create_rest_client(
        exchange_type: ExchangeType,
        config: &ExchangeConfig,
    ) -> Result<Arc<dyn RestClient>, ExchangeError> {
        Ok(match exchange_type {
            ExchangeType::Binance => Arc::new(binance::build_rest_client(config)?),
            ExchangeType::Bybit => Arc::new(bybit::build_rest_client(config)?),
            ExchangeType::GmoCoin => Arc::new(gmocoin::build_rest_client(config)?),
        })
    }

    /// Credentials from `{PREFIX}_*` variables, or a read-only config when
    /// they are not set
    pub fn config_from_env(exchange_type: ExchangeType) -> ExchangeConfig {
        ExchangeConfig::from_env(exchange_type.env_prefix()).unwrap_or_else(|_| ExchangeConfig::read_only())
    }
}
