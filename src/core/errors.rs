use crate::core::types::{Operation, StoreKind};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API error: {status} from {url} - {}", .body.as_ref().map_or_else(|| "null".to_string(), Value::to_string))]
    ApiError {
        url: String,
        status: u16,
        body: Option<Value>,
    },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Missing required parameters for '{key}': {}", .missing.join(", "))]
    MissingParameters { key: String, missing: Vec<String> },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Operation '{operation}' is not allowed on the {store} store")]
    InvariantViolation {
        store: StoreKind,
        operation: Operation,
    },

    #[error("Mapping error: {0}")]
    MappingError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("Store closed: {0}")]
    StoreClosed(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Other error: {0}")]
    Other(String),
}

impl ExchangeError {
    /// Errors that mean the wiring itself is wrong and the owning loop must stop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolation { .. }
                | Self::ConfigurationError(_)
                | Self::MissingParameters { .. }
        )
    }
}
