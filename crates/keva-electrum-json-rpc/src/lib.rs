//! # JSON-RPC 2.0 Wire Types
//!
//! Transport-agnostic JSON-RPC 2.0 types as spoken by Electrum servers: one compact JSON
//! document per line, numeric request ids, positional parameters and batch requests sent as
//! a single JSON array.
//!
//! ## Features
//! - Request, response and notification types with serde support
//! - Classification of inbound documents into single responses, batch responses and
//!   server-pushed notifications
//! - Standard error codes and error objects

pub mod error;
pub mod message;
pub mod notification;
pub mod request;
pub mod response;
pub mod types;

// Re-export main types
pub use error::{JsonRpcErrorCode, JsonRpcErrorObject, JsonRpcTransportError};
pub use message::IncomingMessage;
pub use notification::JsonRpcNotification;
pub use request::{JsonRpcRequest, RequestParams};
pub use response::JsonRpcResponse;
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}
