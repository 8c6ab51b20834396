use crate::core::errors::ExchangeError;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

/// Encoding/decoding between WebSocket frames and exchange messages
pub trait WsCodec: Send + Sync + 'static {
    /// The type representing parsed messages from this exchange
    type Message: Send + Sync;

    /// Encode one outgoing request (subscribe command, login payload, ...)
    fn encode_request(&self, request: &Value) -> Result<Message, ExchangeError>;

    /// Decode a data frame.
    ///
    /// Control frames are handled by the transport. Returns `Ok(None)` for
    /// frames the codec chooses to ignore.
    fn decode_message(&self, message: Message) -> Result<Option<Self::Message>, ExchangeError>;
}

/// Plain JSON frames in both directions
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    fn parse(text: &str) -> Result<Option<Value>, ExchangeError> {
        let trimmed = text.trim();
        // keep-alive replies some exchanges send as bare text
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("pong") || trimmed.eq_ignore_ascii_case("ping") {
            return Ok(None);
        }
        serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|e| ExchangeError::WebSocketError(format!("Invalid JSON frame: {}", e)))
    }
}

impl WsCodec for JsonCodec {
    type Message = Value;

    fn encode_request(&self, request: &Value) -> Result<Message, ExchangeError> {
        Ok(Message::Text(request.to_string()))
    }

    fn decode_message(&self, message: Message) -> Result<Option<Value>, ExchangeError> {
        match message {
            Message::Text(text) => Self::parse(&text),
            Message::Binary(bytes) => {
                let text = String::from_utf8(bytes).map_err(|e| {
                    ExchangeError::WebSocketError(format!("Binary frame is not UTF-8: {}", e))
                })?;
                Self::parse(&text)
            }
            _ => Ok(None),
        }
    }
}
