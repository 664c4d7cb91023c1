//! Error types for Electrum client operations

use serde_json::Value;
use thiserror::Error;

use keva_electrum_json_rpc::{JsonRpcErrorObject, JsonRpcTransportError};

/// Result type for Electrum client operations
pub type ElectrumClientResult<T> = Result<T, ElectrumClientError>;

/// Comprehensive error type for Electrum client operations
#[derive(Error, Debug)]
pub enum ElectrumClientError {
    /// Transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-level errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A call was attempted while the connection was not open. Nothing was sent.
    #[error("Connection not available")]
    NotConnected,

    /// The connection closed while the call was still pending
    #[error("Connection closed")]
    ConnectionClosed,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Liveness check failed and the single reconnect attempt did not recover
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Server returned an error
    #[error("Server error (code {code}): {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// Generic error with context
    #[error("Error: {message}")]
    Generic { message: String },
}

/// Transport-specific errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("TCP transport error: {0}")]
    Tcp(String),

    #[error("TLS transport error: {0}")]
    Tls(String),

    #[error("WebSocket transport error: {0}")]
    WebSocket(String),

    #[error("Unsupported transport: {0}")]
    Unsupported(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport closed unexpectedly")]
    Closed,
}

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid JSON-RPC response: {0}")]
    InvalidResponse(String),

    #[error("No pending call for response id {0}")]
    UnmatchedResponse(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Unexpected result shape for {method}: {reason}")]
    UnexpectedResult { method: String, reason: String },
}

impl ElectrumClientError {
    /// Create a generic error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a timeout error naming the operation that expired
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout(operation.into())
    }

    /// Create a server error from JSON-RPC error response
    pub fn server_error(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(TransportError::ConnectionFailed(_)) => true,
            Self::Transport(TransportError::Closed) => true,
            Self::Transport(TransportError::Io(_)) => true,
            Self::NotConnected | Self::ConnectionClosed => true,
            Self::Timeout(_) | Self::NetworkUnavailable(_) => true,
            Self::ServerError { code, .. } => {
                // Implementation-defined server errors may be temporary
                matches!(code, -32099..=-32000)
            }
            _ => false,
        }
    }

    /// Whether the error means the connection itself is gone
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::ConnectionClosed
                | Self::NetworkUnavailable(_)
                | Self::Transport(_)
        )
    }

    /// Check if the error is a protocol-level issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Get the error code if this is a server error
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Self::ServerError { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<JsonRpcErrorObject> for ElectrumClientError {
    fn from(error: JsonRpcErrorObject) -> Self {
        Self::server_error(error.code, error.message, error.data)
    }
}

impl From<JsonRpcTransportError> for ElectrumClientError {
    fn from(error: JsonRpcTransportError) -> Self {
        match error {
            JsonRpcTransportError::JsonParseError(e) => {
                Self::Protocol(ProtocolError::InvalidFrame(e.to_string()))
            }
            JsonRpcTransportError::IoError(e) => Self::Transport(TransportError::Io(e)),
            JsonRpcTransportError::ProtocolError(message) => {
                Self::Protocol(ProtocolError::InvalidResponse(message))
            }
        }
    }
}

/// Convenience macro for creating generic errors
#[macro_export]
macro_rules! client_error {
    ($($arg:tt)*) => {
        $crate::error::ElectrumClientError::generic(format!($($arg)*))
    };
}
