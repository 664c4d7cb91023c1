//! Connect to an Electrum server, print what it reports, and keep pinging it
//!
//! Usage: `cargo run --example ping_server -- [host:port:t|s|ws|wss] [rounds]`
//! Without arguments a random default Kevacoin server is used.

use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use keva_electrum_client::notification::HEADERS_SUBSCRIBE;
use keva_electrum_client::queries::estimate_fees;
use keva_electrum_client::{ClientConfig, ElectrumApi, ElectrumSession, HeaderNotification, Peer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let mut config = ClientConfig::default();
    if let Some(peer) = args.next() {
        config.peers = vec![peer.parse::<Peer>()?];
    }
    let rounds: u32 = args.next().map(|r| r.parse()).transpose()?.unwrap_or(3);

    let session = ElectrumSession::new(config)?;
    session.notifications().on(HEADERS_SUBSCRIBE, |params| {
        match HeaderNotification::from_params(params) {
            Ok(header) => println!("new tip: {}", header.height),
            Err(e) => eprintln!("bad header notification: {}", e),
        }
    });

    let version = session.connect_main().await?;
    let info = session.server_info()?;
    println!("Connected to {} ({}), protocol {}", info.peer, version.software, version.protocol);

    let features = session.server_features().await?;
    println!("Genesis: {:?}", features.genesis_hash);

    let tip = session.headers_subscribe().await?;
    println!("Tip height: {}", tip.height);

    let fees = estimate_fees(&session).await?;
    println!("Fees (sat/byte): fast {} medium {} slow {}", fees.fast, fees.medium, fees.slow);

    for round in 1..=rounds {
        sleep(Duration::from_secs(5)).await;
        match session.ping().await {
            Ok(_) => println!("ping {}: ok", round),
            Err(e) => println!("ping {}: {}", round, e),
        }
    }

    session.close().await;
    Ok(())
}
