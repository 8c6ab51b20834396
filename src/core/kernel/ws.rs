use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::WsCodec;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{error, info, instrument, warn};

/// WebSocket connection policy
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Ping interval used by the connection health check
    pub health_check_interval_ms: u64,
    /// Max reconnection attempts per outage
    pub max_reconnect_attempts: u32,
    /// First reconnection delay; doubles per attempt
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    /// Pause between consecutive outgoing requests (0 = none)
    pub subscribe_interval_ms: u64,
    pub auto_reconnect: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            health_check_interval_ms: 15_000,
            max_reconnect_attempts: 10,
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 60_000,
            subscribe_interval_ms: 0,
            auto_reconnect: true,
        }
    }
}

impl WsConfig {
    pub fn with_health_check_interval(mut self, interval_ms: u64) -> Self {
        self.health_check_interval_ms = interval_ms;
        self
    }

    pub fn with_reconnect(mut self, max_attempts: u32, delay_ms: u64) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_subscribe_interval(mut self, interval_ms: u64) -> Self {
        self.subscribe_interval_ms = interval_ms;
        self
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }
}

/// WebSocket session trait - pure transport layer
#[async_trait]
pub trait WsSession<C: WsCodec>: Send + Sync {
    async fn connect(&mut self) -> Result<(), ExchangeError>;

    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError>;

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>>;

    async fn close(&mut self) -> Result<(), ExchangeError>;

    fn is_connected(&self) -> bool;

    fn url(&self) -> &str;

    /// Target URL for the next `connect`
    fn set_url(&mut self, url: String);

    /// Send requests in order through the codec
    async fn subscribe(&mut self, requests: &[Value]) -> Result<(), ExchangeError>;

    /// Get the next decoded message
    async fn next_message(&mut self) -> Option<Result<C::Message, ExchangeError>>;

    /// Transport-level keep-alive
    async fn ping(&mut self) -> Result<(), ExchangeError>;
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Tungstenite-based WebSocket implementation
pub struct TungsteniteWs<C: WsCodec> {
    url: String,
    write: Option<futures_util::stream::SplitSink<WsStream, Message>>,
    read: Option<futures_util::stream::SplitStream<WsStream>>,
    connected: bool,
    exchange_name: String,
    codec: C,
    config: WsConfig,
}

impl<C: WsCodec> TungsteniteWs<C> {
    pub fn new(url: String, exchange_name: String, codec: C) -> Self {
        Self {
            url,
            write: None,
            read: None,
            connected: false,
            exchange_name,
            codec,
            config: WsConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl<C: WsCodec> WsSession<C> for TungsteniteWs<C> {
    #[instrument(skip(self), fields(exchange = %self.exchange_name, url = %self.url))]
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                ExchangeError::ConnectionTimeout("WebSocket connection timeout".to_string())
            })?
            .map_err(|e| {
                ExchangeError::NetworkError(format!("WebSocket connection failed: {}", e))
            })?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.connected = true;
        Ok(())
    }

    #[instrument(skip(self, msg), fields(exchange = %self.exchange_name))]
    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        if !self.connected {
            return Err(ExchangeError::NetworkError(
                "WebSocket not connected".to_string(),
            ));
        }

        let write = self.write.as_mut().ok_or_else(|| {
            ExchangeError::NetworkError("WebSocket write stream not available".to_string())
        })?;

        write.send(msg).await.map_err(|e| {
            self.connected = false;
            ExchangeError::NetworkError(format!("Failed to send WebSocket message: {}", e))
        })
    }

    #[instrument(skip(self), fields(exchange = %self.exchange_name))]
    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        loop {
            if !self.connected {
                return Some(Err(ExchangeError::NetworkError(
                    "WebSocket not connected".to_string(),
                )));
            }

            let read = self.read.as_mut()?;
            match read.next().await {
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.send_raw(Message::Pong(data)).await {
                        warn!("Failed to send pong response: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(message)) => {
                    if matches!(message, Message::Close(_)) {
                        self.connected = false;
                    }
                    return Some(Ok(message));
                }
                Some(Err(e)) => {
                    self.connected = false;
                    return Some(Err(ExchangeError::NetworkError(format!(
                        "WebSocket error: {}",
                        e
                    ))));
                }
                None => {
                    self.connected = false;
                    return None;
                }
            }
        }
    }

    #[instrument(skip(self), fields(exchange = %self.exchange_name))]
    async fn close(&mut self) -> Result<(), ExchangeError> {
        if let Some(write) = self.write.as_mut() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.connected = false;
        self.write = None;
        self.read = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn set_url(&mut self, url: String) {
        self.url = url;
    }

    #[instrument(skip(self, requests), fields(exchange = %self.exchange_name, request_count = requests.len()))]
    async fn subscribe(&mut self, requests: &[Value]) -> Result<(), ExchangeError> {
        let pause = Duration::from_millis(self.config.subscribe_interval_ms);
        for (i, request) in requests.iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                sleep(pause).await;
            }
            let message = self.codec.encode_request(request)?;
            self.send_raw(message).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(exchange = %self.exchange_name))]
    async fn next_message(&mut self) -> Option<Result<C::Message, ExchangeError>> {
        loop {
            match self.next_raw().await {
                Some(Ok(Message::Close(_))) => return None,
                Some(Ok(raw_msg)) => match self.codec.decode_message(raw_msg) {
                    Ok(Some(decoded)) => return Some(Ok(decoded)),
                    Ok(None) => {}
                    Err(e) => return Some(Err(e)),
                },
                Some(Err(e)) => return Some(Err(e)),
                None => return None,
            }
        }
    }

    async fn ping(&mut self) -> Result<(), ExchangeError> {
        self.send_raw(Message::Ping(Vec::new())).await
    }
}

/// Called before every reconnection attempt; may return a replacement URL
/// (for example one carrying a fresh token).
#[derive(Clone)]
pub struct ReconnectHook(Arc<dyn Fn() -> BoxFuture<'static, Result<Option<String>, ExchangeError>> + Send + Sync>);

impl ReconnectHook {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<String>, ExchangeError>> + Send + 'static,
    {
        Self(Arc::new(move || Box::pin(f())))
    }

    /// Adapt a synchronous hook to the async contract
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Result<Option<String>, ExchangeError> + Send + Sync + 'static,
    {
        Self(Arc::new(move || {
            let result = f();
            Box::pin(async move { result })
        }))
    }

    pub async fn call(&self) -> Result<Option<String>, ExchangeError> {
        (self.0)().await
    }
}

impl std::fmt::Debug for ReconnectHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReconnectHook")
    }
}

/// Wrapper that reconnects with exponential backoff and replays every
/// request sent through `subscribe`.
pub struct ReconnectWs<C: WsCodec, T: WsSession<C>> {
    inner: T,
    config: WsConfig,
    hook: Option<ReconnectHook>,
    requests: Vec<Value>,
    _codec: std::marker::PhantomData<C>,
}

impl<C: WsCodec, T: WsSession<C>> ReconnectWs<C, T> {
    pub fn new(inner: T, config: WsConfig) -> Self {
        Self {
            inner,
            config,
            hook: None,
            requests: Vec::new(),
            _codec: std::marker::PhantomData,
        }
    }

    pub fn with_hook(mut self, hook: ReconnectHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Requests replayed after every reconnect, in order
    pub fn requests(&self) -> &[Value] {
        &self.requests
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    #[instrument(skip(self), fields(url = %self.inner.url()))]
    async fn attempt_reconnect(&mut self) -> Result<(), ExchangeError> {
        if !self.config.auto_reconnect {
            return Err(ExchangeError::NetworkError(
                "Connection lost and auto-reconnect is disabled".to_string(),
            ));
        }

        let attempts = self.config.max_reconnect_attempts as usize;
        let strategy = ExponentialBackoff::from_millis(2)
            .factor((self.config.reconnect_delay_ms / 2).max(1))
            .max_delay(Duration::from_millis(self.config.max_reconnect_delay_ms))
            .map(jitter)
            .take(attempts);

        for (attempt, delay) in strategy.enumerate() {
            if let Some(hook) = self.hook.clone() {
                match hook.call().await {
                    Ok(Some(url)) => self.inner.set_url(url),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Reconnect hook failed"),
                }
            }

            match self.inner.connect().await {
                Ok(()) => {
                    if !self.requests.is_empty() {
                        let requests = self.requests.clone();
                        if let Err(e) = self.inner.subscribe(&requests).await {
                            warn!("Failed to resubscribe after reconnection: {}", e);
                        }
                    }
                    info!(attempt = attempt + 1, "Reconnected");
                    return Ok(());
                }
                Err(e) => {
                    error!("Reconnection attempt {} failed: {}", attempt + 1, e);
                    if attempt + 1 < attempts {
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(ExchangeError::NetworkError(format!(
            "Failed to reconnect after {} attempts",
            attempts
        )))
    }
}

#[async_trait]
impl<C: WsCodec, T: WsSession<C>> WsSession<C> for ReconnectWs<C, T> {
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        self.inner.connect().await
    }

    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        if !self.inner.is_connected() {
            self.attempt_reconnect().await?;
        }
        self.inner.send_raw(msg).await
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        loop {
            if !self.inner.is_connected() {
                if let Err(e) = self.attempt_reconnect().await {
                    return Some(Err(e));
                }
            }

            match self.inner.next_raw().await {
                Some(Ok(msg)) => return Some(Ok(msg)),
                Some(Err(e)) => warn!(error = %e, "Connection error, reconnecting"),
                None => warn!("Connection closed by peer, reconnecting"),
            }
        }
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        self.inner.close().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn url(&self) -> &str {
        self.inner.url()
    }

    fn set_url(&mut self, url: String) {
        self.inner.set_url(url);
    }

    async fn subscribe(&mut self, requests: &[Value]) -> Result<(), ExchangeError> {
        self.requests.extend(requests.iter().cloned());
        self.inner.subscribe(requests).await
    }

    async fn next_message(&mut self) -> Option<Result<C::Message, ExchangeError>> {
        loop {
            if !self.inner.is_connected() {
                if let Err(e) = self.attempt_reconnect().await {
                    return Some(Err(e));
                }
            }

            match self.inner.next_message().await {
                Some(Ok(msg)) => return Some(Ok(msg)),
                // the socket is still up: a frame failed to decode
                Some(Err(e)) if self.inner.is_connected() => return Some(Err(e)),
                Some(Err(e)) => warn!(error = %e, "Connection error, reconnecting"),
                None => warn!("Connection closed by peer, reconnecting"),
            }
        }
    }

    async fn ping(&mut self) -> Result<(), ExchangeError> {
        if self.inner.is_connected() && self.inner.ping().await.is_ok() {
            return Ok(());
        }
        self.attempt_reconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::codec::JsonCodec;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted session: the first `accept` connects succeed and later ones
    /// fail. Frames are served once, then the connection drops.
    struct ScriptedWs {
        url: String,
        connected: bool,
        accept: usize,
        connects: usize,
        frames: VecDeque<Value>,
        sent: Vec<Value>,
    }

    impl ScriptedWs {
        fn new(accept: usize, frames: Vec<Value>) -> Self {
            Self {
                url: "wss://initial".to_string(),
                connected: false,
                accept,
                connects: 0,
                frames: frames.into(),
                sent: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl WsSession<JsonCodec> for ScriptedWs {
        async fn connect(&mut self) -> Result<(), ExchangeError> {
            self.connects += 1;
            if self.accept == 0 {
                return Err(ExchangeError::NetworkError("refused".to_string()));
            }
            self.accept -= 1;
            self.connected = true;
            Ok(())
        }

        async fn send_raw(&mut self, _msg: Message) -> Result<(), ExchangeError> {
            Ok(())
        }

        async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
            None
        }

        async fn close(&mut self) -> Result<(), ExchangeError> {
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn url(&self) -> &str {
            &self.url
        }

        fn set_url(&mut self, url: String) {
            self.url = url;
        }

        async fn subscribe(&mut self, requests: &[Value]) -> Result<(), ExchangeError> {
            self.sent.extend(requests.iter().cloned());
            Ok(())
        }

        async fn next_message(&mut self) -> Option<Result<Value, ExchangeError>> {
            match self.frames.pop_front() {
                Some(frame) => Some(Ok(frame)),
                None => {
                    self.connected = false;
                    None
                }
            }
        }

        async fn ping(&mut self) -> Result<(), ExchangeError> {
            Ok(())
        }
    }

    fn fast_config() -> WsConfig {
        WsConfig::default().with_reconnect(3, 2)
    }

    #[tokio::test]
    async fn test_reconnect_replays_requests_and_applies_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hook = ReconnectHook::from_fn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(format!("wss://fresh/{}", n)))
        });

        let mut ws = ReconnectWs::<JsonCodec, _>::new(ScriptedWs::new(2, vec![json!({"n": 1})]), fast_config())
            .with_hook(hook);
        ws.connect().await.unwrap();
        ws.subscribe(&[json!({"op": "subscribe"})]).await.unwrap();

        assert_eq!(ws.next_message().await.unwrap().unwrap(), json!({"n": 1}));

        // the drop triggers one successful reconnect, then the script refuses
        // every further connect and the wrapper gives up
        let outcome = ws.next_message().await;
        assert!(matches!(outcome, Some(Err(ExchangeError::NetworkError(_)))));
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(ws.inner().url().starts_with("wss://fresh/"));
        assert_eq!(ws.inner().sent, vec![json!({"op": "subscribe"}), json!({"op": "subscribe"})]);
        assert_eq!(ws.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut ws = ReconnectWs::<JsonCodec, _>::new(ScriptedWs::new(0, Vec::new()), fast_config());
        let err = ws.next_message().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(ws.inner().connects, 3);
    }

    #[tokio::test]
    async fn test_auto_reconnect_disabled() {
        let config = fast_config().with_auto_reconnect(false);
        let mut ws = ReconnectWs::<JsonCodec, _>::new(ScriptedWs::new(5, Vec::new()), config);
        assert!(ws.ping().await.is_err());
        assert_eq!(ws.inner().connects, 0);
    }

    #[tokio::test]
    async fn test_async_hook_contract() {
        let hook = ReconnectHook::new(|| async { Ok(None) });
        assert_eq!(hook.call().await.unwrap(), None);
    }
}
