//! Subprotocol handlers negotiated during the WebSocket handshake.

use bytes::Bytes;

use crate::error::{Error, Result};

/// A WebSocket subprotocol codec.
///
/// The handler's [`name`](ProtocolHandler::name) is offered in
/// `Sec-WebSocket-Protocol`; when the server selects it, the codec wraps
/// payloads on both directions of the session.
pub trait ProtocolHandler: Send + Sync + 'static {
    /// The protocol token offered during negotiation.
    fn name(&self) -> &str;

    /// Encode an outgoing message payload.
    fn encode(&self, data: &serde_json::Value) -> Result<Bytes>;

    /// Decode an incoming message payload.
    fn decode(&self, data: &[u8]) -> Result<serde_json::Value>;
}

/// The built-in JSON subprotocol: messages are JSON values in UTF-8 text.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonProtocol;

impl ProtocolHandler for JsonProtocol {
    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, data: &serde_json::Value) -> Result<Bytes> {
        serde_json::to_vec(data)
            .map(Bytes::from)
            .map_err(Error::builder)
    }

    fn decode(&self, data: &[u8]) -> Result<serde_json::Value> {
        serde_json::from_slice(data).map_err(|e| Error::ws_protocol(e.to_string()))
    }
}
