use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{request::RequestParams, types::JsonRpcVersion};

/// A JSON-RPC notification (a message without an id).
///
/// Electrum servers push these for subscriptions, e.g.
/// `{"method":"blockchain.headers.subscribe","params":[{"height":100}]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(rename = "jsonrpc", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<JsonRpcVersion>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<RequestParams>) -> Self {
        Self {
            version: Some(JsonRpcVersion::V2_0),
            method: method.into(),
            params,
        }
    }

    /// Create a new notification with array parameters
    pub fn new_with_array_params(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::new(method, Some(RequestParams::Array(params)))
    }

    /// Parameters as a plain JSON value; missing params become `null`
    pub fn params_value(&self) -> Value {
        self.params
            .as_ref()
            .map(RequestParams::to_value)
            .unwrap_or(Value::Null)
    }
}
