use crate::core::errors::ExchangeError;
use crate::core::kernel::rest::{RestClient, RestResponse};
use futures_util::future::{join_all, BoxFuture};
use reqwest::Method;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument};

pub type InitParams = BTreeMap<String, String>;

/// One REST endpoint an exchange can be seeded from
#[derive(Debug, Clone)]
pub struct InitEndpoint {
    pub method: Method,
    pub path: String,
    pub required: BTreeSet<String>,
}

impl InitEndpoint {
    pub fn new(method: Method, path: &str, required: &[&str]) -> Self {
        Self {
            method,
            path: path.to_string(),
            required: required.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    pub fn get(path: &str, required: &[&str]) -> Self {
        Self::new(Method::GET, path, required)
    }
}

/// An item of an initialization request list
pub enum InitRequest {
    /// A request the caller already started
    Pending(BoxFuture<'static, Result<RestResponse, ExchangeError>>),
    /// Configured endpoint with no parameters
    Key(String),
    Keyed(String, InitParams),
}

impl InitRequest {
    pub fn key(key: &str) -> Self {
        Self::Key(key.to_string())
    }

    pub fn with_params<'a, I>(key: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self::Keyed(
            key.to_string(),
            params
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    pub fn pending(request: BoxFuture<'static, Result<RestResponse, ExchangeError>>) -> Self {
        Self::Pending(request)
    }

    pub fn endpoint_key(&self) -> Option<&str> {
        match self {
            Self::Key(key) | Self::Keyed(key, _) => Some(key.as_str()),
            Self::Pending(_) => None,
        }
    }
}

impl From<&str> for InitRequest {
    fn from(key: &str) -> Self {
        Self::key(key)
    }
}

impl std::fmt::Debug for InitRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending(_) => f.write_str("Pending"),
            Self::Key(key) => f.debug_tuple("Key").field(key).finish(),
            Self::Keyed(key, params) => f.debug_tuple("Keyed").field(key).field(params).finish(),
        }
    }
}

/// A validated request ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub method: Method,
    pub path: String,
    pub params: InitParams,
}

/// Config-driven REST seeding of an exchange's base store
#[derive(Debug, Clone)]
pub struct StoreInitializer {
    exchange: String,
    endpoints: HashMap<String, InitEndpoint>,
}

impl StoreInitializer {
    pub fn new<'a, I>(exchange: &str, endpoints: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, InitEndpoint)>,
    {
        Self {
            exchange: exchange.to_string(),
            endpoints: endpoints
                .into_iter()
                .map(|(key, endpoint)| (key.to_string(), endpoint))
                .collect(),
        }
    }

    pub fn endpoint(&self, key: &str) -> Result<&InitEndpoint, ExchangeError> {
        self.endpoints.get(key).ok_or_else(|| {
            ExchangeError::ConfigurationError(format!(
                "{} has no initialize endpoint '{}'",
                self.exchange, key
            ))
        })
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Check the key and required parameters without touching the network
    pub fn prepare(&self, key: &str, params: &InitParams) -> Result<PreparedRequest, ExchangeError> {
        let endpoint = self.endpoint(key)?;
        let missing: Vec<String> = endpoint
            .required
            .iter()
            .filter(|name| !params.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ExchangeError::MissingParameters {
                key: key.to_string(),
                missing,
            });
        }

        Ok(PreparedRequest {
            method: endpoint.method.clone(),
            path: endpoint.path.clone(),
            params: params.clone(),
        })
    }

    /// Send one configured request and require a successful status
    pub async fn request(
        &self,
        client: &Arc<dyn RestClient>,
        key: &str,
        params: &InitParams,
    ) -> Result<RestResponse, ExchangeError> {
        let prepared = self.prepare(key, params)?;
        let response = client
            .request(prepared.method, &prepared.path, &prepared.params)
            .await?;
        ensure_success(&response)?;
        Ok(response)
    }

    /// Validate every request, then run them all concurrently.
    ///
    /// Nothing is sent when any request is invalid. Any non-success response
    /// fails the whole batch.
    #[instrument(skip(self, requests, client), fields(exchange = %self.exchange, request_count = requests.len()))]
    pub async fn initialize(
        &self,
        requests: Vec<InitRequest>,
        client: Arc<dyn RestClient>,
    ) -> Result<Vec<RestResponse>, ExchangeError> {
        let mut calls: Vec<BoxFuture<'static, Result<RestResponse, ExchangeError>>> =
            Vec::with_capacity(requests.len());
        for request in requests {
            match request {
                InitRequest::Pending(call) => calls.push(call),
                InitRequest::Key(key) => calls.push(self.call(&client, &key, &InitParams::new())?),
                InitRequest::Keyed(key, params) => calls.push(self.call(&client, &key, &params)?),
            }
        }

        let responses = join_all(calls)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        for response in &responses {
            ensure_success(response)?;
        }
        debug!(exchange = %self.exchange, responses = responses.len(), "Initialize requests completed");
        Ok(responses)
    }

    fn call(
        &self,
        client: &Arc<dyn RestClient>,
        key: &str,
        params: &InitParams,
    ) -> Result<BoxFuture<'static, Result<RestResponse, ExchangeError>>, ExchangeError> {
        let prepared = self.prepare(key, params)?;
        let client = client.clone();
        Ok(Box::pin(async move {
            client
                .request(prepared.method, &prepared.path, &prepared.params)
                .await
        }))
    }
}

/// Anything but 200 becomes `ApiError` with the decoded body (or null).
pub fn ensure_success(response: &RestResponse) -> Result<(), ExchangeError> {
    if response.is_success() {
        return Ok(());
    }
    Err(ExchangeError::ApiError {
        url: response.url.clone(),
        status: response.status,
        body: response.json().ok(),
    })
}
