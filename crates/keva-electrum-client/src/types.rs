//! Typed results of Electrum protocol methods

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ElectrumClientError, ElectrumClientResult, ProtocolError};

/// Result of `server.version`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersion {
    /// Server software banner, e.g. `ElectrumX 1.16.0`
    pub software: String,
    /// Negotiated protocol version
    pub protocol: String,
}

impl ServerVersion {
    /// Servers answer `[software, protocol]`; very old ones answer a bare string
    pub fn from_value(value: Value) -> ElectrumClientResult<Self> {
        match value {
            Value::Array(items) => {
                let mut items = items.into_iter();
                match (items.next(), items.next()) {
                    (Some(Value::String(software)), Some(Value::String(protocol))) => {
                        Ok(Self { software, protocol })
                    }
                    (Some(Value::String(software)), None) => Ok(Self {
                        software,
                        protocol: String::new(),
                    }),
                    _ => Err(unexpected("server.version", "expected [software, protocol]")),
                }
            }
            Value::String(software) => Ok(Self {
                software,
                protocol: String::new(),
            }),
            _ => Err(unexpected("server.version", "expected an array")),
        }
    }
}

/// Result of `server.features`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerFeatures {
    #[serde(default)]
    pub genesis_hash: Option<String>,
    #[serde(default)]
    pub hosts: Map<String, Value>,
    #[serde(default)]
    pub protocol_max: Option<String>,
    #[serde(default)]
    pub protocol_min: Option<String>,
    #[serde(default)]
    pub pruning: Option<u64>,
    #[serde(default)]
    pub server_version: Option<String>,
    #[serde(default)]
    pub hash_function: Option<String>,
    /// Members not modelled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Block header as returned by `blockchain.headers.subscribe`, both as the call result and
/// as the params of later notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderNotification {
    pub height: u64,
    pub hex: String,
}

impl HeaderNotification {
    /// Notifications carry `[header]`
    pub fn from_params(params: Value) -> ElectrumClientResult<Self> {
        let header = match params {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            other => other,
        };
        Ok(serde_json::from_value(header)?)
    }
}

/// Result of `blockchain.scripthash.get_balance`, in satoshis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

impl Balance {
    pub fn total(&self) -> i64 {
        self.confirmed + self.unconfirmed
    }
}

/// One element of `blockchain.scripthash.get_history` or `get_mempool`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Confirmation height; 0 or -1 for mempool transactions
    pub height: i64,
    pub tx_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
}

impl HistoryEntry {
    pub fn is_confirmed(&self) -> bool {
        self.height > 0
    }
}

/// One element of `blockchain.scripthash.listunspent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub height: i64,
    pub tx_hash: String,
    pub tx_pos: u32,
    pub value: u64,
}

/// Result of `blockchain.transaction.get_merkle`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub block_height: u64,
    pub merkle: Vec<String>,
    pub pos: u32,
}

/// Fee estimates in satoshis per byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimates {
    pub fast: u64,
    pub medium: u64,
    pub slow: u64,
}

pub(crate) fn unexpected(method: &str, reason: &str) -> ElectrumClientError {
    ProtocolError::UnexpectedResult {
        method: method.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
