//! Signal relay binary entry point
//!
//! Stand-alone broadcast relay for consultation signaling. Carries only
//! offer/answer/ICE/leave payloads; media flows peer-to-peer.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port
//! cargo run --bin signal-relay
//!
//! # Pick an address explicitly
//! cargo run --bin signal-relay -- --listen 0.0.0.0:9000
//! ```

use clap::Parser;
use std::net::SocketAddr;
use telecare_call::signaling::SignalRelay;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telecare signal relay
///
/// Topic-keyed broadcast fan-out for consultation signaling. Every
/// published signal reaches all current subscribers of the topic,
/// including the publisher.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8787", env = "SIGNAL_RELAY_LISTEN")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let handle = SignalRelay::bind(args.listen).await?;
    info!("signal relay ready on {}", handle.url());

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    handle.shutdown().await;
    Ok(())
}
