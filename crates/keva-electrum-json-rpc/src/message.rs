use serde_json::Value;

use crate::error::JsonRpcTransportError;
use crate::notification::JsonRpcNotification;
use crate::response::JsonRpcResponse;

/// One inbound JSON document, classified by shape.
///
/// Responses are decoded with [`JsonRpcResponse::from_inbound`], so a malformed member never
/// hides the id of a response.
///
/// - a JSON array is a batch response; elements that are not objects are skipped
/// - an object carrying an `id` member (even `null`) is a response
/// - any other object with a `method` is a server-pushed notification
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Response(JsonRpcResponse),
    Batch(Vec<JsonRpcResponse>),
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// Parse a single frame body
    pub fn parse(text: &str) -> Result<Self, JsonRpcTransportError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, JsonRpcTransportError> {
        match value {
            Value::Array(items) => {
                let responses = items
                    .into_iter()
                    .filter_map(|item| JsonRpcResponse::from_inbound(item).ok())
                    .collect();
                Ok(IncomingMessage::Batch(responses))
            }
            Value::Object(_) if value.get("id").is_some() => {
                Ok(IncomingMessage::Response(JsonRpcResponse::from_inbound(value)?))
            }
            Value::Object(_) if value.get("method").is_some() => {
                Ok(IncomingMessage::Notification(serde_json::from_value(value)?))
            }
            other => Err(JsonRpcTransportError::ProtocolError(format!(
                "message is neither a response nor a notification: {}",
                other
            ))),
        }
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, IncomingMessage::Notification(_))
    }
}
