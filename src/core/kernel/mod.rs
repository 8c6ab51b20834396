/// Transport kernel shared by every exchange profile
///
/// The kernel holds only transport logic and exchange-agnostic interfaces:
///
/// ## Transport Layer
/// - `RestClient`: HTTP interface returning raw `RestResponse`s, with the
///   reqwest-backed `ReqwestRest`
/// - `WsSession`: WebSocket connection management, with the
///   tokio-tungstenite-backed `TungsteniteWs`
/// - `ReconnectWs`: exponential-backoff reconnection that replays sent
///   requests and runs an optional `ReconnectHook`
///
/// ## Message Handling
/// - `WsCodec`: frame encoding/decoding; `JsonCodec` for JSON exchanges
///
/// # Example
/// ```rust,no_run
/// use exsync::core::kernel::*;
/// use serde_json::json;
///
/// # async fn example() -> Result<(), exsync::core::errors::ExchangeError> {
/// let session = TungsteniteWs::new(
///     "wss://stream.bybit.com/v5/public/linear".to_string(),
///     "bybit".to_string(),
///     JsonCodec,
/// );
/// let mut ws = ReconnectWs::new(session, WsConfig::default());
/// ws.connect().await?;
/// ws.subscribe(&[json!({"op": "subscribe", "args": ["tickers.BTCUSDT"]})]).await?;
/// while let Some(frame) = ws.next_message().await {
///     println!("{}", frame?);
/// }
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod rest;
pub mod ws;

pub use codec::{JsonCodec, WsCodec};
pub use rest::{ReqwestRest, RestClient, RestClientBuilder, RestClientConfig, RestResponse};
pub use ws::{ReconnectHook, ReconnectWs, TungsteniteWs, WsConfig, WsSession};
