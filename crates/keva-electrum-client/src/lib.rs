//! # Keva Electrum Client
//!
//! An asynchronous client for Electrum-protocol servers: JSON-RPC 2.0 over a persistent
//! duplex connection, one compact JSON document per line.
//!
//! ## Features
//!
//! - **Newline framing** over arbitrarily chunked streams, with a per-feed frame limit
//! - **Id correlation** of concurrent calls, out-of-order replies and batch calls, where each
//!   batch result carries the parameter that produced it
//! - **Notifications** routed to named handlers that survive reconnects
//! - **Session management**: random peer choice, `server.version` handshake, liveness ping
//!   with a single reconnect attempt
//! - **Transports**: TCP, TLS (rustls), WebSocket
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keva_electrum_client::{ClientConfig, ElectrumApi, ElectrumSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = ElectrumSession::new(ClientConfig::default())?;
//!     let version = session.connect_main().await?;
//!     println!("connected to {}", version.software);
//!
//!     let tip = session.headers_subscribe().await?;
//!     println!("tip height {}", tip.height);
//!
//!     session.ping().await?;
//!     session.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Raw calls and batches
//!
//! ```rust,no_run
//! # use keva_electrum_client::{ClientConfig, ElectrumApi, ElectrumSession};
//! # use serde_json::json;
//! # async fn run(session: ElectrumSession) -> Result<(), keva_electrum_client::ElectrumClientError> {
//! let entries = session
//!     .request_batch(
//!         "blockchain.scripthash.get_balance",
//!         vec![json!("8b01df4e368ea28f8dc0423bcf7a4923e3a12d307c875e47a0cfbf90b5c39161")],
//!         None,
//!     )
//!     .await?;
//! for entry in entries {
//!     println!("{} -> {:?}", entry.param, entry.result());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod framing;
pub mod methods;
pub mod notification;
pub mod peer;
pub mod prelude;
pub mod queries;
pub mod session;
pub mod transport;
pub mod types;

// Re-export main types
pub use config::{BatchConfig, ClientConfig, ClientInfo, FramingConfig, TimeoutConfig};
pub use connection::{Connection, ConnectionState};
pub use dispatcher::{BatchEntry, Dispatcher};
pub use error::{ElectrumClientError, ElectrumClientResult, ProtocolError, TransportError};
pub use framing::FrameParser;
pub use methods::ElectrumApi;
pub use notification::{HandlerId, NotificationBus};
pub use peer::{Peer, PeerSelector};
pub use session::{ElectrumSession, ServerInfo};
pub use types::{
    Balance, FeeEstimates, HeaderNotification, HistoryEntry, MerkleProof, ServerFeatures,
    ServerVersion, Utxo,
};

// Re-export transport types
pub use transport::{Transport, TransportFactory, TransportKind};

// Re-export wire types for convenience
pub use keva_electrum_json_rpc as json_rpc;
