use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JsonRpcErrorObject, JsonRpcTransportError};
use crate::types::{JsonRpcVersion, RequestId};

/// A JSON-RPC response as received from a server.
///
/// Electrum servers do not always echo the `jsonrpc` member, and a response carries either
/// `result` or `error`. A response with neither is treated as a `null` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(rename = "jsonrpc", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<JsonRpcVersion>,
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            version: Some(JsonRpcVersion::V2_0),
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<RequestId>, error: JsonRpcErrorObject) -> Self {
        Self {
            version: Some(JsonRpcVersion::V2_0),
            id: Some(id.into()),
            result: None,
            error: Some(error),
        }
    }

    /// Decode an inbound response object member by member.
    ///
    /// Nothing in the object makes it undecodable. An unknown `jsonrpc` value is dropped, an
    /// id that is neither a number nor a string becomes `None`, and any non-null `error`
    /// member marks the response failed, well-formed or not.
    pub fn from_inbound(value: Value) -> Result<Self, JsonRpcTransportError> {
        let mut members = match value {
            Value::Object(members) => members,
            other => {
                return Err(JsonRpcTransportError::ProtocolError(format!(
                    "response is not an object: {}",
                    other
                )));
            }
        };

        let version = members
            .remove("jsonrpc")
            .and_then(|v| serde_json::from_value(v).ok());
        let id = members
            .remove("id")
            .and_then(|v| serde_json::from_value(v).ok());
        let result = members.remove("result").filter(|v| !v.is_null());
        let error = match members.remove("error") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<JsonRpcErrorObject>(raw.clone())
                    .unwrap_or_else(|_| JsonRpcErrorObject::from_malformed(raw)),
            ),
        };

        Ok(Self {
            version,
            id,
            result,
            error,
        })
    }

    /// Numeric id of the response, if any
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(RequestId::as_number)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split into the success value or the server-supplied error
    pub fn into_result(self) -> Result<Value, JsonRpcErrorObject> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
