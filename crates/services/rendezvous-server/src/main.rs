//! Rendezvous relay binary
//!
//! # Usage
//!
//! ```bash
//! cargo run -p peerlink-rendezvous -- --bind 0.0.0.0:8765
//! ```

use clap::Parser;
use peerlink_rendezvous::RendezvousServer;
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// PeerLink rendezvous relay
///
/// Introduces peers in the same room and forwards their signaling frames.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8765", env = "PEERLINK_RENDEZVOUS_BIND")]
    bind: String,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %args.bind,
        "PeerLink rendezvous relay starting"
    );

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut stop_tx = Some(stop_tx);
    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, shutting down...");
        match stop_tx.take() {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => std::process::exit(0),
        }
    })?;

    let server = RendezvousServer::start(&args.bind).await?;
    let _ = stop_rx.await;

    server.shutdown().await;
    info!("Rendezvous relay stopped");
    Ok(())
}
