use crate::core::errors::ExchangeError;
use crate::core::kernel::rest::RestClient;
use crate::core::store::initializer::{InitParams, StoreInitializer};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub type TokenExtractor = fn(&Value) -> Option<String>;
pub type ExtendParams = fn(&str) -> InitParams;

/// How an exchange issues and keeps alive its WebSocket session token
#[derive(Debug, Clone)]
pub struct TokenPolicy {
    /// Initializer key that issues a new token
    pub issue_key: String,
    /// Initializer key that extends the current token, if the exchange has one
    pub extend_key: Option<String>,
    pub extend_params: ExtendParams,
    pub extract: TokenExtractor,
    pub interval: Duration,
}

impl TokenPolicy {
    pub fn new(issue_key: &str, extract: TokenExtractor, interval: Duration) -> Self {
        Self {
            issue_key: issue_key.to_string(),
            extend_key: None,
            extend_params: |_| InitParams::new(),
            extract,
            interval,
        }
    }

    pub fn with_extend(mut self, extend_key: &str, extend_params: ExtendParams) -> Self {
        self.extend_key = Some(extend_key.to_string());
        self.extend_params = extend_params;
        self
    }
}

/// Background task that keeps a WebSocket token valid.
///
/// Cheap to clone; clones share the token and the task.
#[derive(Clone)]
pub struct TokenRefresher {
    exchange: String,
    policy: TokenPolicy,
    initializer: Arc<StoreInitializer>,
    token: Arc<RwLock<Option<String>>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefresher")
            .field("exchange", &self.exchange)
            .field("policy", &self.policy)
            .field("has_token", &self.token.read().is_some())
            .finish_non_exhaustive()
    }
}

impl TokenRefresher {
    pub fn new(exchange: &str, policy: TokenPolicy, initializer: Arc<StoreInitializer>) -> Self {
        Self {
            exchange: exchange.to_string(),
            policy,
            initializer,
            token: Arc::new(RwLock::new(None)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn current_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Request a fresh token and store it
    pub async fn issue(&self, client: &Arc<dyn RestClient>) -> Result<String, ExchangeError> {
        let response = self
            .initializer
            .request(client, &self.policy.issue_key, &InitParams::new())
            .await?;
        let body = response.json()?;
        let token = (self.policy.extract)(&body).ok_or_else(|| ExchangeError::ApiError {
            url: response.url.clone(),
            status: response.status,
            body: Some(body.clone()),
        })?;
        *self.token.write() = Some(token.clone());
        debug!(exchange = %self.exchange, "Issued WebSocket token");
        Ok(token)
    }

    /// Extend the current token, or issue one when there is none to extend
    pub async fn extend(&self, client: &Arc<dyn RestClient>) -> Result<(), ExchangeError> {
        let (Some(extend_key), Some(token)) = (&self.policy.extend_key, self.current_token()) else {
            return self.issue(client).await.map(|_| ());
        };
        let params = (self.policy.extend_params)(&token);
        self.initializer.request(client, extend_key, &params).await?;
        debug!(exchange = %self.exchange, "Extended WebSocket token");
        Ok(())
    }

    /// Issue a token now, then keep it alive in the background.
    ///
    /// The first issue must succeed. Later failures are logged and the next
    /// tick falls back to issuing a fresh token.
    pub async fn start(&self, client: Arc<dyn RestClient>) -> Result<String, ExchangeError> {
        let token = self.issue(&client).await?;

        let refresher = self.clone();
        let interval = self.policy.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if let Err(e) = refresher.extend(&client).await {
                    warn!(exchange = %refresher.exchange, error = %e, "Token extend failed, issuing a new one");
                    if let Err(e) = refresher.issue(&client).await {
                        error!(exchange = %refresher.exchange, error = %e, "Token issue failed");
                    }
                }
            }
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        info!(exchange = %self.exchange, interval_secs = interval.as_secs(), "Token refresher started");
        Ok(token)
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!(exchange = %self.exchange, "Token refresher stopped");
        }
    }
}

/// Replace a `{token}` placeholder in an endpoint URL
pub fn resolve_token_url(template: &str, token: Option<&str>) -> Result<String, ExchangeError> {
    if !template.contains("{token}") {
        return Ok(template.to_string());
    }
    token
        .map(|token| template.replace("{token}", token))
        .ok_or_else(|| {
            ExchangeError::AuthenticationRequired(format!(
                "endpoint {} needs a session token; initialize with \"token\" first",
                template
            ))
        })
}
