//! Defines the protocol layer for MCP message serialization and deserialization.
//!
//! This layer sits on top of a `NetworkAdapter` and owns every `serde_json` operation on
//! the wire, so the session logic only ever sees typed messages.

use crate::error::Result;
use crate::network_adapter::NetworkAdapter;
use crate::types::{
    ErrorData, JSONRPCResponse, Notification, Request, JSONRPC_VERSION,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// One decoded inbound JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Request(Request<Value>),
    Notification(Notification<Value>),
    Response(JSONRPCResponse<Value>),
}

impl IncomingMessage {
    /// Classifies a JSON value by the members it carries.
    ///
    /// A `method` with an `id` is a request, a `method` alone is a notification, and an
    /// `id` with `result` or `error` is a response. Anything else is an invalid request.
    pub fn from_value(value: Value) -> std::result::Result<Self, ErrorData> {
        let Some(obj) = value.as_object() else {
            return Err(ErrorData::invalid_request("Expected a JSON-RPC object"));
        };
        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(ErrorData::invalid_request("Unsupported jsonrpc version"));
        }

        let has_method = obj.contains_key("method");
        let has_id = obj.get("id").is_some_and(|id| !id.is_null());
        let parsed = if has_method && has_id {
            serde_json::from_value(value).map(IncomingMessage::Request)
        } else if has_method {
            serde_json::from_value(value).map(IncomingMessage::Notification)
        } else if obj.contains_key("result") || obj.contains_key("error") {
            serde_json::from_value(value).map(IncomingMessage::Response)
        } else {
            return Err(ErrorData::invalid_request("Message is neither request nor response"));
        };
        parsed.map_err(|e| ErrorData::invalid_request(format!("Malformed message: {}", e)))
    }
}

/// A connection that handles MCP protocol logic over a generic `NetworkAdapter`.
pub struct ProtocolConnection<A: NetworkAdapter> {
    adapter: A,
}

impl<A: NetworkAdapter> ProtocolConnection<A> {
    /// Creates a new `ProtocolConnection` that will use the given adapter for communication.
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }

    /// Serializes a message struct into a JSON string and sends it via the adapter.
    pub async fn send_serializable<T: Serialize + Send + Sync>(&mut self, msg: T) -> Result<()> {
        let json_string = serde_json::to_string(&msg)?;
        self.adapter.send(&json_string).await
    }

    /// Sends a raw, already-serialized JSON string over the adapter.
    pub async fn send_raw(&mut self, json_string: &str) -> Result<()> {
        self.adapter.send(json_string).await
    }

    /// Receives a raw JSON string from the adapter and deserializes it into a message struct.
    ///
    /// Blank lines are skipped. `Ok(None)` means the peer closed the connection. Cancel
    /// safe whenever the adapter's `recv` is.
    pub async fn recv_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        loop {
            match self.adapter.recv().await? {
                Some(json_string) if json_string.trim().is_empty() => continue,
                Some(json_string) => return Ok(Some(serde_json::from_str::<T>(&json_string)?)),
                None => return Ok(None),
            }
        }
    }

    /// Closes the underlying transport.
    pub async fn close(&mut self) -> Result<()> {
        self.adapter.close().await
    }
}
