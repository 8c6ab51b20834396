use crate::core::errors::ExchangeError;
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{instrument, trace};

/// Raw HTTP response handed back to the store initializer.
///
/// Status checking is left to the caller so that failures can be reported
/// together with the URL and decoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestResponse {
    /// Final request URL, including the query string
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl RestResponse {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
        }
    }

    /// Only 200 counts, not the whole 2xx range
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn json(&self) -> Result<Value, ExchangeError> {
        serde_json::from_str(&self.body).map_err(ExchangeError::from)
    }
}

/// HTTP transport used to seed stores and manage WebSocket tokens.
///
/// Implementations decide how credentials are attached; request signing is
/// not part of this crate, so private endpoints need a client that signs.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// `params` go to the query string for GET/DELETE and to a JSON body
    /// otherwise.
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<RestResponse, ExchangeError>;

    async fn get(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<RestResponse, ExchangeError> {
        self.request(Method::GET, endpoint, params).await
    }

    async fn post(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<RestResponse, ExchangeError> {
        self.request(Method::POST, endpoint, params).await
    }
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL every endpoint path is appended to
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    pub user_agent: String,
    /// Headers sent with every request (e.g. an API-key header)
    pub headers: Vec<(String, String)>,
}

impl RestClientConfig {
    pub fn new(base_url: String, exchange_name: String) -> Self {
        Self {
            base_url,
            exchange_name,
            timeout_seconds: 30,
            user_agent: "exsync/0.1".to_string(),
            headers: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self { config }
    }

    pub fn build(self) -> Result<ReqwestRest, ExchangeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.timeout_seconds))
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| {
                ExchangeError::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(ReqwestRest {
            client,
            config: self.config,
        })
    }
}

/// Implementation of `RestClient` using reqwest
#[derive(Clone, Debug)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
}

impl ReqwestRest {
    pub fn new(base_url: String, exchange_name: String) -> Result<Self, ExchangeError> {
        RestClientBuilder::new(RestClientConfig::new(base_url, exchange_name)).build()
    }

    pub fn config(&self) -> &RestClientConfig {
        &self.config
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url, endpoint)
    }

    #[instrument(skip(self, response), fields(exchange = %self.config.exchange_name, status = %response.status()))]
    async fn read_response(&self, response: Response) -> Result<RestResponse, ExchangeError> {
        let url = response.url().to_string();
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            ExchangeError::NetworkError(format!("Failed to read response body: {}", e))
        })?;

        trace!("Response body: {}", body);
        Ok(RestResponse { url, status, body })
    }
}

#[async_trait]
impl RestClient for ReqwestRest {
    #[instrument(skip(self, params), fields(exchange = %self.config.exchange_name, method = %method, endpoint = %endpoint, param_count = params.len()))]
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<RestResponse, ExchangeError> {
        let url = self.build_url(endpoint);
        let mut request = self.client.request(method.clone(), &url);

        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if method == Method::GET || method == Method::DELETE {
            request = request.query(params);
        } else if !params.is_empty() {
            let body: Map<String, Value> = params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("Request failed: {}", e)))?;

        self.read_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_status_and_json() {
        let ok = RestResponse::new("https://x/api", 200, r#"{"listenKey":"abc"}"#);
        assert!(ok.is_success());
        assert_eq!(ok.json().unwrap()["listenKey"], "abc");

        let failed = RestResponse::new("https://x/api", 418, "teapot");
        assert!(!failed.is_success());
        assert!(matches!(failed.json(), Err(ExchangeError::JsonError(_))));
    }

    #[test]
    fn test_builder_applies_config() {
        let config = RestClientConfig::new("https://fapi.binance.com".to_string(), "binance".to_string())
            .with_timeout(5)
            .with_header("X-MBX-APIKEY", "key");
        let client = RestClientBuilder::new(config).build().unwrap();

        assert_eq!(client.config().timeout_seconds, 5);
        assert_eq!(client.build_url("/fapi/v1/depth"), "https://fapi.binance.com/fapi/v1/depth");
        assert_eq!(client.config().headers.len(), 1);
    }
}
