//! Shared E2E testing utilities for the Electrum client
//!
//! Provides an in-process Electrum server over plain TCP and the tracing setup used by the
//! integration tests.

pub mod server;

// Re-export the main types for convenience
pub use server::{FAKE_SERVER_NAME, FakeElectrumServer, Reply};

/// Install a test subscriber honouring `RUST_LOG`; repeated calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
