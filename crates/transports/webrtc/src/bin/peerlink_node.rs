//! PeerLink node binary
//!
//! Registers with a rendezvous relay, optionally dials a peer, and turns
//! stdin lines into payloads.
//!
//! # Usage
//!
//! ```bash
//! # Join the lobby as alice
//! cargo run --bin peerlink_node -- \
//!   --signaling-url ws://localhost:8765 \
//!   --room lobby \
//!   --peer-id alice
//!
//! # Join as bob and dial alice
//! cargo run --bin peerlink_node -- --room lobby --peer-id bob --connect alice
//!
//! # Then type lines of the form `alice: hello`
//! ```

use anyhow::{anyhow, Context};
use clap::Parser;
use peerlink_webrtc::{
    ChannelHooks, DataChannelMode, HookEvent, PeerLinkConfig, PeerLinkTransport, TurnServerConfig,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// PeerLink node
///
/// Connects to peers through a rendezvous relay and upgrades to direct
/// WebRTC data channels when possible.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rendezvous relay URL
    #[arg(
        long,
        default_value = "ws://localhost:8765",
        env = "PEERLINK_SIGNALING_URL"
    )]
    signaling_url: String,

    /// Room to register in
    #[arg(long, default_value = "lobby", env = "PEERLINK_ROOM")]
    room: String,

    /// Local peer ID
    #[arg(long, env = "PEERLINK_PEER_ID")]
    peer_id: String,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "PEERLINK_STUN_SERVERS"
    )]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "PEERLINK_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Maximum concurrent peer connections
    #[arg(long, default_value_t = 16, env = "PEERLINK_MAX_PEERS")]
    max_peers: u32,

    /// Data channel label
    #[arg(long, default_value = "peerlink", env = "PEERLINK_CHANNEL_LABEL")]
    channel_label: String,

    /// Data channel mode: reliable, unreliable
    #[arg(long, default_value = "reliable", env = "PEERLINK_DATA_CHANNEL_MODE")]
    data_channel_mode: DataChannelModeArg,

    /// Directory mounted before persisted state is used
    #[arg(long, env = "PEERLINK_PERSIST_DIR")]
    persist_dir: Option<PathBuf>,

    /// Peer to dial once registered
    #[arg(long)]
    connect: Option<String>,
}

/// Data channel mode CLI argument wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum DataChannelModeArg {
    Reliable,
    Unreliable,
}

impl From<DataChannelModeArg> for DataChannelMode {
    fn from(arg: DataChannelModeArg) -> Self {
        match arg {
            DataChannelModeArg::Reliable => DataChannelMode::Reliable,
            DataChannelModeArg::Unreliable => DataChannelMode::Unreliable,
        }
    }
}

/// Parse TURN server string (format: turn:host:port:username:password or turns:...)
fn parse_turn_server(s: &str) -> Result<TurnServerConfig, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        return Err(format!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        ));
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        return Err(format!(
            "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
            protocol
        ));
    }

    // Password may contain colons
    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        credential: parts[4..].join(":"),
    })
}

fn build_config_from_args(args: &Args) -> anyhow::Result<PeerLinkConfig> {
    let turn_servers = args
        .turn_servers
        .iter()
        .map(|s| parse_turn_server(s).map_err(|e| anyhow!(e)))
        .collect::<anyhow::Result<Vec<_>>>()
        .context("Failed to parse TURN server")?;

    let mut config = PeerLinkConfig::new(&args.signaling_url, &args.room, &args.peer_id)
        .with_stun_servers(args.stun_servers.clone())
        .with_turn_servers(turn_servers)
        .with_max_peers(args.max_peers)
        .with_data_channel(&args.channel_label, args.data_channel_mode.into());

    if let Some(dir) = &args.persist_dir {
        config = config.with_persist_dir(dir);
    }

    config.validate()?;
    Ok(config)
}

/// Split `peer: message` into its parts
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let (peer, message) = line.split_once(':')?;
    let peer = peer.trim();
    if peer.is_empty() {
        return None;
    }
    Some((peer, message.trim_start()))
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

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, shutting down...");
        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }

        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(3));
            eprintln!("Graceful shutdown timeout (3s), forcing exit");
            std::process::exit(0);
        });
    })
    .context("Failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("peerlink-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing();

    let config = build_config_from_args(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        signaling_url = %config.signaling_url,
        room = %config.room,
        peer_id = %config.peer_id,
        stun_servers = config.stun_servers.len(),
        turn_servers = config.turn_servers.len(),
        max_peers = config.max_peers,
        data_channel_mode = ?config.data_channel_mode,
        "PeerLink node starting"
    );

    let (hooks, mut events) = ChannelHooks::new();
    let transport = Arc::new(PeerLinkTransport::new(config, Arc::new(hooks))?);

    transport.start().await?;
    transport.wait_registered().await?;
    info!("Registered as {}", transport.local_peer_id());

    if let Some(peer) = &args.connect {
        if let Err(e) = transport.initiate(peer).await {
            error!("Failed to dial {}: {}", peer, e);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(100));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(HookEvent::Payload { peer_id, payload }) => {
                    println!("{}: {}", peer_id, String::from_utf8_lossy(&payload));
                }
                Some(HookEvent::PeerReachable(peer_id)) => {
                    info!("Direct connection to {} is up", peer_id);
                }
                Some(HookEvent::PeerAnnounced(peer_id)) => {
                    info!("Peer {} joined the room", peer_id);
                }
                Some(HookEvent::SignalingClosed(reason)) => {
                    warn!("Relay connection closed: {}", reason);
                    break;
                }
                Some(HookEvent::StorageReady) => info!("Storage ready"),
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => match parse_line(&line) {
                    Some((peer, message)) => match transport.send(peer, message.as_bytes()).await {
                        Ok(route) => info!("Sent to {} via {:?}", peer, route),
                        Err(e) => error!("Send to {} failed: {}", peer, e),
                    },
                    None => warn!("Expected `peer: message`, got {:?}", line),
                },
                None => break,
            },
            _ = ticker.tick() => {
                if shutdown_flag.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
    }

    transport.shutdown().await?;
    info!("PeerLink node stopped");
    Ok(())
}
