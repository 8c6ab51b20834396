use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::JsonCodec;
use crate::core::kernel::rest::RestClient;
use crate::core::kernel::ws::{ReconnectHook, ReconnectWs, TungsteniteWs, WsConfig, WsSession};
use crate::core::store::base::BaseStore;
use crate::core::store::channel::{ChannelBuilder, ChannelSpec, SubscribeRequest};
use crate::core::store::initializer::{InitParams, InitRequest, StoreInitializer};
use crate::core::store::mapper::{StoreBinding, StoreSource};
use crate::core::store::normalized::NormalizedStore;
use crate::core::store::token::{resolve_token_url, TokenPolicy, TokenRefresher};
use crate::core::types::{
    ExecutionItem, NormalizedItem, OrderItem, OrderbookItem, PositionItem, TickerItem, TradesItem,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Initializer key that starts the token refresher instead of seeding tables
pub const TOKEN_KEY: &str = "token";

/// Source bindings for the six canonical stores
pub struct StoreBindings {
    pub ticker: StoreBinding<TickerItem>,
    pub trades: StoreBinding<TradesItem>,
    pub orderbook: StoreBinding<OrderbookItem>,
    pub order: StoreBinding<OrderItem>,
    pub execution: StoreBinding<ExecutionItem>,
    pub position: StoreBinding<PositionItem>,
}

/// Everything exchange-specific the wrapper is assembled from
pub struct ExchangeProfile {
    pub exchange: String,
    pub base: Arc<dyn BaseStore>,
    pub bindings: StoreBindings,
    pub channels: Arc<dyn ChannelBuilder>,
    pub initializer: StoreInitializer,
    pub token: Option<TokenPolicy>,
    pub ws_config: WsConfig,
}

/// Base store, the six normalized stores, channel builder, REST initializer
/// and WebSocket connections of one exchange behind one handle.
///
/// Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct StoreWrapper {
    inner: Arc<Inner>,
}

struct Inner {
    exchange: String,
    config: ExchangeConfig,
    base: Arc<dyn BaseStore>,
    channels: Arc<dyn ChannelBuilder>,
    initializer: Arc<StoreInitializer>,
    token: Option<TokenRefresher>,
    ws_config: WsConfig,
    ticker: NormalizedStore<TickerItem>,
    trades: NormalizedStore<TradesItem>,
    orderbook: NormalizedStore<OrderbookItem>,
    order: NormalizedStore<OrderItem>,
    execution: NormalizedStore<ExecutionItem>,
    position: NormalizedStore<PositionItem>,
    logins: Mutex<Vec<SubscribeRequest>>,
    subscriptions: Mutex<Vec<SubscribeRequest>>,
    connections: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for StoreWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreWrapper")
            .field("exchange", &self.inner.exchange)
            .field("subscriptions", &self.inner.subscriptions.lock().len())
            .field("connections", &self.inner.connections.lock().len())
            .finish_non_exhaustive()
    }
}

fn bind<R: NormalizedItem>(
    exchange: &str,
    base: &Arc<dyn BaseStore>,
    binding: StoreBinding<R>,
) -> Result<NormalizedStore<R>, ExchangeError> {
    let table = match &binding.source {
        StoreSource::Store { name, .. } => Some(base.store(name).ok_or_else(|| {
            ExchangeError::ConfigurationError(format!(
                "{} base store has no '{}' table for the {} store",
                exchange,
                name,
                R::KIND
            ))
        })?),
        StoreSource::Messages(_) | StoreSource::Unsupported => None,
    };
    NormalizedStore::new(exchange, table, binding)
}

impl StoreWrapper {
    pub fn new(profile: ExchangeProfile, config: ExchangeConfig) -> Result<Self, ExchangeError> {
        let ExchangeProfile {
            exchange,
            base,
            bindings,
            channels,
            initializer,
            token,
            ws_config,
        } = profile;

        let initializer = Arc::new(initializer);
        let token = token.map(|policy| TokenRefresher::new(&exchange, policy, initializer.clone()));

        Ok(Self {
            inner: Arc::new(Inner {
                ticker: bind(&exchange, &base, bindings.ticker)?,
                trades: bind(&exchange, &base, bindings.trades)?,
                orderbook: bind(&exchange, &base, bindings.orderbook)?,
                order: bind(&exchange, &base, bindings.order)?,
                execution: bind(&exchange, &base, bindings.execution)?,
                position: bind(&exchange, &base, bindings.position)?,
                exchange,
                config,
                base,
                channels,
                initializer,
                token,
                ws_config,
                logins: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                connections: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn exchange(&self) -> &str {
        &self.inner.exchange
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.inner.config
    }

    pub fn base(&self) -> &Arc<dyn BaseStore> {
        &self.inner.base
    }

    pub fn ticker(&self) -> &NormalizedStore<TickerItem> {
        &self.inner.ticker
    }

    pub fn trades(&self) -> &NormalizedStore<TradesItem> {
        &self.inner.trades
    }

    pub fn orderbook(&self) -> &NormalizedStore<OrderbookItem> {
        &self.inner.orderbook
    }

    pub fn order(&self) -> &NormalizedStore<OrderItem> {
        &self.inner.order
    }

    pub fn execution(&self) -> &NormalizedStore<ExecutionItem> {
        &self.inner.execution
    }

    pub fn position(&self) -> &NormalizedStore<PositionItem> {
        &self.inner.position
    }

    /// Start the loops of all six stores
    pub fn start(&self) -> Result<(), ExchangeError> {
        let inner = &self.inner;
        inner.ticker.start()?;
        inner.trades.start()?;
        inner.orderbook.start()?;
        inner.order.start()?;
        inner.execution.start()?;
        inner.position.start()?;
        info!(exchange = %inner.exchange, "Stores started");
        Ok(())
    }

    /// Stop connections, the token refresher and every store; idempotent
    pub fn close(&self) {
        self.inner.shutdown();
        info!(exchange = %self.inner.exchange, "Wrapper closed");
    }

    /// Route one frame: base store first, then every side-channel
    pub fn on_message(&self, message: &Value) {
        self.inner.on_message(message);
    }

    pub fn current_token(&self) -> Option<String> {
        self.inner.token.as_ref().and_then(TokenRefresher::current_token)
    }

    /// Recorded subscribe requests, in order
    pub fn subscriptions(&self) -> Vec<SubscribeRequest> {
        self.inner.subscriptions.lock().clone()
    }

    /// Record a payload sent on `endpoint` right after connecting, before any
    /// subscription
    pub fn login(&self, endpoint: &str, payload: Value) {
        let request = SubscribeRequest::new(endpoint, payload);
        let mut logins = self.inner.logins.lock();
        if !logins.contains(&request) {
            logins.push(request);
        }
    }

    /// Record the exchange requests for `spec`; returns how many were new.
    ///
    /// Private channels need credentials: `All` skips them with a warning,
    /// an explicit private request fails.
    pub fn subscribe(&self, spec: ChannelSpec, symbol: Option<&str>) -> Result<usize, ExchangeError> {
        let inner = &self.inner;
        let mut requests = Vec::new();
        for kind in spec.kinds() {
            if kind.is_private() && !inner.config.has_credentials() {
                if spec == ChannelSpec::All {
                    warn!(exchange = %inner.exchange, channel = %kind, "Skipping private channel without credentials");
                    continue;
                }
                return Err(ExchangeError::AuthenticationRequired(format!(
                    "{} channel '{}' needs API credentials",
                    inner.exchange, kind
                )));
            }
            requests.extend(inner.channels.build(kind, symbol)?);
        }

        let mut subscriptions = inner.subscriptions.lock();
        let mut added = 0;
        for request in requests {
            if !subscriptions.contains(&request) {
                subscriptions.push(request);
                added += 1;
            }
        }
        debug!(exchange = %inner.exchange, spec = %spec, added, "Recorded subscriptions");
        Ok(added)
    }

    /// Open one live connection per endpoint with the default transport
    pub async fn connect(&self, hook: Option<ReconnectHook>) -> Result<(), ExchangeError> {
        let exchange = self.inner.exchange.clone();
        let config = self.inner.ws_config.clone();
        self.connect_with(
            move |url| TungsteniteWs::new(url, exchange.clone(), JsonCodec).with_config(config.clone()),
            hook,
        )
        .await
    }

    /// Open one connection per distinct endpoint using `factory` for the
    /// transport, send logins then subscriptions, and pump frames into
    /// `on_message` until the wrapper is closed.
    #[instrument(skip(self, factory, hook), fields(exchange = %self.inner.exchange))]
    pub async fn connect_with<T, F>(&self, factory: F, hook: Option<ReconnectHook>) -> Result<(), ExchangeError>
    where
        T: WsSession<JsonCodec> + 'static,
        F: Fn(String) -> T,
    {
        let logins = self.inner.logins.lock().clone();
        let subscriptions = self.inner.subscriptions.lock().clone();

        let mut endpoints: Vec<&str> = Vec::new();
        for request in logins.iter().chain(&subscriptions) {
            if !endpoints.contains(&request.endpoint.as_str()) {
                endpoints.push(&request.endpoint);
            }
        }
        if endpoints.is_empty() {
            warn!("Nothing to connect; subscribe first");
            return Ok(());
        }

        for endpoint in endpoints {
            let url = resolve_token_url(endpoint, self.current_token().as_deref())?;
            let mut ws = ReconnectWs::new(factory(url), self.inner.ws_config.clone());
            if let Some(hook) = self.reconnect_hook(endpoint, hook.clone()) {
                ws = ws.with_hook(hook);
            }
            ws.connect().await?;

            let payloads = |requests: &[SubscribeRequest]| -> Vec<Value> {
                requests
                    .iter()
                    .filter(|request| request.endpoint == endpoint)
                    .filter_map(|request| request.payload.clone())
                    .collect()
            };
            let login_payloads = payloads(&logins);
            if !login_payloads.is_empty() {
                ws.subscribe(&login_payloads).await?;
            }
            let subscribe_payloads = payloads(&subscriptions);
            if !subscribe_payloads.is_empty() {
                ws.subscribe(&subscribe_payloads).await?;
            }

            info!(endpoint, requests = subscribe_payloads.len(), "Connected");
            let task = tokio::spawn(pump(
                Arc::downgrade(&self.inner),
                ws,
                self.inner.ws_config.health_check_interval_ms,
                endpoint.to_string(),
            ));
            self.inner.connections.lock().push(task);
        }
        Ok(())
    }

    /// Seed the stores over REST.
    ///
    /// A `"token"` request starts the token refresher. Every other request is
    /// validated before anything is sent, run concurrently, fed to the base
    /// store, and then every normalized store re-synchronizes.
    #[instrument(skip(self, requests, client), fields(exchange = %self.inner.exchange))]
    pub async fn initialize(
        &self,
        requests: Vec<InitRequest>,
        client: Arc<dyn RestClient>,
    ) -> Result<(), ExchangeError> {
        let (token_requests, requests): (Vec<InitRequest>, Vec<InitRequest>) = requests
            .into_iter()
            .partition(|request| request.endpoint_key() == Some(TOKEN_KEY));

        for request in &requests {
            match request {
                InitRequest::Key(key) => {
                    self.inner.initializer.prepare(key, &InitParams::new())?;
                }
                InitRequest::Keyed(key, params) => {
                    self.inner.initializer.prepare(key, params)?;
                }
                InitRequest::Pending(_) => {}
            }
        }

        if !token_requests.is_empty() {
            let refresher = self.inner.token.as_ref().ok_or_else(|| {
                ExchangeError::ConfigurationError(format!(
                    "{} does not use a WebSocket token",
                    self.inner.exchange
                ))
            })?;
            refresher.start(client.clone()).await?;
        }

        let responses = self.inner.initializer.initialize(requests, client).await?;
        for response in &responses {
            self.inner.base.initialize(&response.url, &response.json()?)?;
        }
        self.synchronize().await
    }

    /// Re-normalize every store from the base store's current contents
    pub async fn synchronize(&self) -> Result<(), ExchangeError> {
        let inner = &self.inner;
        let counts = [
            inner.ticker.synchronize().await?,
            inner.trades.synchronize().await?,
            inner.orderbook.synchronize().await?,
            inner.order.synchronize().await?,
            inner.execution.synchronize().await?,
            inner.position.synchronize().await?,
        ];
        debug!(exchange = %inner.exchange, rows = counts.iter().sum::<usize>(), "Stores synchronized");
        Ok(())
    }

    /// Reconnect hook for one endpoint: the caller's hook runs first, then a
    /// `{token}` endpoint is re-resolved with the current token.
    fn reconnect_hook(&self, template: &str, user: Option<ReconnectHook>) -> Option<ReconnectHook> {
        let needs_token = template.contains("{token}");
        if user.is_none() && !needs_token {
            return None;
        }
        let template = template.to_string();
        let token = self.inner.token.clone();
        Some(ReconnectHook::new(move || {
            let user = user.clone();
            let template = template.clone();
            let token = token.clone();
            async move {
                let mut url = match &user {
                    Some(hook) => hook.call().await?,
                    None => None,
                };
                if needs_token {
                    let current = token.as_ref().and_then(TokenRefresher::current_token);
                    url = Some(resolve_token_url(&template, current.as_deref())?);
                }
                Ok(url)
            }
        }))
    }
}

impl Inner {
    fn on_message(&self, message: &Value) {
        self.base.on_message(message);
        self.ticker.on_message(message);
        self.trades.on_message(message);
        self.orderbook.on_message(message);
        self.order.on_message(message);
        self.execution.on_message(message);
        self.position.on_message(message);
    }

    fn shutdown(&self) {
        for task in self.connections.lock().drain(..) {
            task.abort();
        }
        if let Some(token) = &self.token {
            token.stop();
        }
        self.ticker.close();
        self.trades.close();
        self.orderbook.close();
        self.order.close();
        self.execution.close();
        self.position.close();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn tick(health_check: &mut Option<tokio::time::Interval>) {
    match health_check {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn pump<T: WsSession<JsonCodec>>(
    inner: Weak<Inner>,
    mut ws: ReconnectWs<JsonCodec, T>,
    health_check_ms: u64,
    endpoint: String,
) {
    let mut health_check = (health_check_ms > 0).then(|| {
        let period = Duration::from_millis(health_check_ms);
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            frame = ws.next_message() => match frame {
                Some(Ok(message)) => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.on_message(&message);
                }
                Some(Err(e)) if ws.is_connected() => {
                    warn!(endpoint = %endpoint, error = %e, "Dropping undecodable frame");
                }
                Some(Err(e)) => {
                    error!(endpoint = %endpoint, error = %e, "Connection lost for good");
                    break;
                }
                None => break,
            },
            () = tick(&mut health_check) => {
                if let Err(e) = ws.ping().await {
                    error!(endpoint = %endpoint, error = %e, "Health check failed");
                    break;
                }
            }
        }
    }

    let _ = ws.close().await;
    debug!(endpoint = %endpoint, "Connection pump stopped");
}
