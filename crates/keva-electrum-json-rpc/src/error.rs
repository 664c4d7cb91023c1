use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerError(i64), // -32099 to -32000
}

impl JsonRpcErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => -32700,
            JsonRpcErrorCode::InvalidRequest => -32600,
            JsonRpcErrorCode::MethodNotFound => -32601,
            JsonRpcErrorCode::InvalidParams => -32602,
            JsonRpcErrorCode::InternalError => -32603,
            JsonRpcErrorCode::ServerError(code) => *code,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            JsonRpcErrorCode::ParseError => "Parse error",
            JsonRpcErrorCode::InvalidRequest => "Invalid Request",
            JsonRpcErrorCode::MethodNotFound => "Method not found",
            JsonRpcErrorCode::InvalidParams => "Invalid params",
            JsonRpcErrorCode::InternalError => "Internal error",
            JsonRpcErrorCode::ServerError(_) => "Server error",
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// JSON-RPC error object, the `error` member of a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorObject {
    pub fn new(code: JsonRpcErrorCode, message: Option<String>, data: Option<Value>) -> Self {
        Self {
            code: code.code(),
            message: message.unwrap_or_else(|| code.message().to_string()),
            data,
        }
    }

    pub fn invalid_request(message: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::InvalidRequest,
            Some(message.to_string()),
            None,
        )
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::MethodNotFound,
            Some(format!("unknown method \"{}\"", method)),
            None,
        )
    }

    pub fn invalid_params(message: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::InvalidParams,
            Some(message.to_string()),
            None,
        )
    }

    /// Best-effort error object for an `error` member that is not `{code, message}`.
    ///
    /// A bare string becomes the message. An object keeps whatever `code` and `message` it
    /// has. The raw member is kept as `data`.
    pub fn from_malformed(raw: Value) -> Self {
        let code = raw
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(JsonRpcErrorCode::InternalError.code());
        let message = match &raw {
            Value::String(text) => text.clone(),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        };
        Self {
            code,
            message,
            data: Some(raw),
        }
    }

    /// Whether the server refused because the reply would exceed its size limit
    pub fn is_response_too_large(&self) -> bool {
        self.code == JsonRpcErrorCode::InvalidRequest.code()
    }
}

impl fmt::Display for JsonRpcErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcErrorObject {}

/// Errors raised while turning wire text into JSON-RPC messages
#[derive(Debug, Error)]
pub enum JsonRpcTransportError {
    #[error("JSON parse error: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(JsonRpcErrorCode::ParseError.code(), -32700);
        assert_eq!(JsonRpcErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(JsonRpcErrorCode::ServerError(-32001).code(), -32001);
    }

    #[test]
    fn test_malformed_error_members() {
        let text = JsonRpcErrorObject::from_malformed(serde_json::json!("bad-txns"));
        assert_eq!(text.code, -32603);
        assert_eq!(text.message, "bad-txns");
        assert_eq!(text.data, Some(serde_json::json!("bad-txns")));

        let no_code = JsonRpcErrorObject::from_malformed(serde_json::json!({"message": "no code"}));
        assert_eq!(no_code.code, -32603);
        assert_eq!(no_code.message, "no code");

        let odd = JsonRpcErrorObject::from_malformed(serde_json::json!({"code": 2}));
        assert_eq!(odd.code, 2);
        assert_eq!(odd.message, r#"{"code":2}"#);
    }

    #[test]
    fn test_error_object_display() {
        let error = JsonRpcErrorObject::method_not_found("blockchain.foo");
        assert_eq!(
            error.to_string(),
            "JSON-RPC Error -32601: unknown method \"blockchain.foo\""
        );
    }

    #[test]
    fn test_response_too_large_detection() {
        let error = JsonRpcErrorObject::invalid_request("response too large");
        assert!(error.is_response_too_large());
        assert!(!JsonRpcErrorObject::invalid_params("bad").is_response_too_large());
    }
}
