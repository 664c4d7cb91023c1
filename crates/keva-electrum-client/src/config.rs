//! Configuration types for the Electrum client

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ElectrumClientError, ElectrumClientResult};
use crate::framing::DEFAULT_MAX_FRAMES_PER_FEED;
use crate::peer::Peer;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Identification sent in the `server.version` handshake
    pub client_info: ClientInfo,

    /// Timeout configurations
    pub timeouts: TimeoutConfig,

    /// Frame parser limits
    pub framing: FramingConfig,

    /// Candidate servers, written as `host:port:kind`
    pub peers: Vec<Peer>,

    /// Chunk sizes for multi-get queries
    pub batch: BatchConfig,
}

/// Client identification information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    /// Client name
    pub name: String,

    /// Electrum protocol version requested in the handshake
    pub protocol_version: String,
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Transport open timeout
    #[serde(with = "duration_serde")]
    pub connect: Duration,

    /// `server.version` handshake timeout
    #[serde(with = "duration_serde")]
    pub handshake: Duration,

    /// Liveness ping timeout; also bounds the single reconnect attempt
    #[serde(with = "duration_serde")]
    pub ping: Duration,

    /// Poll interval of `wait_till_connected`
    #[serde(with = "duration_serde")]
    pub wait_connected_poll: Duration,

    /// Polls before `wait_till_connected` gives up
    pub wait_connected_attempts: u32,
}

/// Frame parser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    /// Maximum frames extracted from the buffer per inbound chunk
    pub max_frames_per_feed: usize,
}

/// Multi-get chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Scripthashes per batch for balance, history and unspent queries
    pub scripthash_chunk_size: usize,

    /// Transactions per batch; full transactions are large
    pub transaction_chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_info: ClientInfo::default(),
            timeouts: TimeoutConfig::default(),
            framing: FramingConfig::default(),
            peers: default_peers(),
            batch: BatchConfig::default(),
        }
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "keva-electrum-client".to_string(),
            protocol_version: "1.4".to_string(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            handshake: Duration::from_secs(5),
            ping: Duration::from_secs(5),
            wait_connected_poll: Duration::from_millis(500),
            wait_connected_attempts: 30,
        }
    }
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_frames_per_feed: DEFAULT_MAX_FRAMES_PER_FEED,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            scripthash_chunk_size: 100,
            transaction_chunk_size: 45,
        }
    }
}

/// Public Kevacoin Electrum servers
pub fn default_peers() -> Vec<Peer> {
    vec![
        Peer::tls("ec0.kevacoin.org", 50002),
        Peer::tls("ec1.kevacoin.org", 50002),
    ]
}

impl ClientConfig {
    /// Configuration with the given peers and defaults elsewhere
    pub fn with_peers(peers: Vec<Peer>) -> Self {
        Self {
            peers,
            ..Self::default()
        }
    }

    /// Reject configurations the client cannot run with
    pub fn validate(&self) -> ElectrumClientResult<()> {
        if self.peers.is_empty() {
            return Err(ElectrumClientError::config("at least one peer is required"));
        }
        if self.client_info.protocol_version.is_empty() {
            return Err(ElectrumClientError::config("protocol version must not be empty"));
        }
        if self.framing.max_frames_per_feed == 0 {
            return Err(ElectrumClientError::config(
                "framing.max_frames_per_feed must be positive",
            ));
        }
        if self.batch.scripthash_chunk_size == 0 || self.batch.transaction_chunk_size == 0 {
            return Err(ElectrumClientError::config("batch chunk sizes must be positive"));
        }
        let t = &self.timeouts;
        if t.connect.is_zero() || t.handshake.is_zero() || t.ping.is_zero() {
            return Err(ElectrumClientError::config("timeouts must be positive"));
        }
        if t.wait_connected_poll.is_zero() || t.wait_connected_attempts == 0 {
            return Err(ElectrumClientError::config(
                "wait_connected poll interval and attempts must be positive",
            ));
        }
        Ok(())
    }
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
