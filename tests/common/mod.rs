#![allow(dead_code)]

use async_trait::async_trait;
use exsync::core::errors::ExchangeError;
use exsync::core::kernel::{JsonCodec, RestClient, RestResponse, WsSession};
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Canned REST server keyed by path. Unknown paths answer 404.
#[derive(Default)]
pub struct MockRest {
    routes: HashMap<String, Value>,
    pub calls: Mutex<Vec<(Method, String, BTreeMap<String, String>)>>,
}

impl MockRest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, path: &str, body: Value) -> Self {
        self.routes.insert(path.to_string(), body);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl RestClient for MockRest {
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<RestResponse, ExchangeError> {
        self.calls
            .lock()
            .push((method, endpoint.to_string(), params.clone()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let url = if query.is_empty() {
            format!("https://mock.test{}", endpoint)
        } else {
            format!("https://mock.test{}?{}", endpoint, query)
        };
        Ok(match self.routes.get(endpoint) {
            Some(body) => RestResponse::new(url, 200, body.to_string()),
            None => RestResponse::new(url, 404, r#"{"msg":"not found"}"#),
        })
    }
}

/// Records what a connection sent
#[derive(Default, Clone)]
pub struct WsLog {
    pub urls: Arc<Mutex<Vec<String>>>,
    pub sent: Arc<Mutex<Vec<(String, Value)>>>,
}

/// In-memory transport fed from an mpsc channel
pub struct MockWs {
    url: String,
    connected: bool,
    log: WsLog,
    frames: Option<mpsc::UnboundedReceiver<Value>>,
}

impl MockWs {
    /// Factory for `StoreWrapper::connect_with`. The first connection gets
    /// the frame receiver; later ones stay silent.
    pub fn factory(log: WsLog) -> (mpsc::UnboundedSender<Value>, impl Fn(String) -> Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let frames = Mutex::new(Some(rx));
        let factory = move |url: String| {
            log.urls.lock().push(url.clone());
            Self {
                url,
                connected: false,
                log: log.clone(),
                frames: frames.lock().take(),
            }
        };
        (tx, factory)
    }
}

#[async_trait]
impl WsSession<JsonCodec> for MockWs {
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        self.connected = true;
        Ok(())
    }

    async fn send_raw(&mut self, _msg: Message) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        std::future::pending().await
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
        self.log
            .sent
            .lock()
            .extend(requests.iter().map(|r| (self.url.clone(), r.clone())));
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<Value, ExchangeError>> {
        match self.frames.as_mut() {
            Some(frames) => frames.recv().await.map(Ok),
            None => std::future::pending().await,
        }
    }

    async fn ping(&mut self) -> Result<(), ExchangeError> {
        Ok(())
    }
}

/// Poll `check` until it holds or a second passes
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), future)
        .await
        .expect("completed in time")
}
