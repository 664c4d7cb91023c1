//! # Electrum Client Prelude
//!
//! Convenient re-exports of the most commonly used types and traits.
//!
//! ```rust
//! use keva_electrum_client::prelude::*;
//! ```

// Core client types
pub use crate::config::{ClientConfig, TimeoutConfig};
pub use crate::connection::{Connection, ConnectionState};
pub use crate::dispatcher::BatchEntry;
pub use crate::error::{ElectrumClientError, ElectrumClientResult};
pub use crate::methods::ElectrumApi;
pub use crate::notification::NotificationBus;
pub use crate::peer::Peer;
pub use crate::session::ElectrumSession;
pub use crate::types::*;

// Transport types
pub use crate::transport::{Transport, TransportKind};

// Standard library types commonly used with the client
pub use std::time::Duration;
