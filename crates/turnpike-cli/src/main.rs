//! Turnpike CLI
//!
//! Allocates TURN relays and runs a line-based chat over a relayed peer
//! connection.

mod config;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use config::Config;
use turnpike_core::{
    ConnectionState, LivenessEvent, LivenessMonitor, PeerConnection, SendError, TurnPeerSink,
};
use turnpike_relay::{NetworkSignal, TurnSocket};
use turnpike_transport::UdpTransportFactory;

/// Turnpike - peer-to-peer channels through TURN relays
#[derive(Parser)]
#[command(name = "turnpike")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TURN server (host:port), overrides the configuration file
    #[arg(long)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate a relay and print its candidates
    Allocate {
        /// Keep the allocation refreshed until Ctrl+C
        #[arg(long)]
        hold: bool,
    },

    /// Chat with a peer over the relay
    Chat {
        /// Peer's relayed address
        #[arg(long, required = true)]
        peer: SocketAddr,

        /// Send lines on the unreliable stream
        #[arg(long)]
        unreliable: bool,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Output path
        #[arg(required = true)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(server) = cli.server {
        config.turn.server = server;
    }

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    config.validate()?;

    match cli.command {
        Commands::Allocate { hold } => allocate(&config, hold).await,
        Commands::Chat { peer, unreliable } => chat(&config, peer, unreliable).await,
        Commands::InitConfig { path } => {
            config.save(&path)?;
            println!("Configuration written to {}", path.display());
            Ok(())
        }
    }
}

/// Open a `TurnSocket` for the configured server
async fn open_socket(
    config: &Config,
) -> anyhow::Result<(TurnSocket, tokio::sync::mpsc::Receiver<turnpike_relay::turn::Received>)> {
    let server = config.resolve_server().await?;
    let turn = config.turn_config(server)?;
    let factory = Arc::new(
        UdpTransportFactory::new(turn.bind_addr).with_max_datagram_size(turn.max_datagram_size),
    );

    tracing::info!("Using TURN server {}", server);
    Ok(TurnSocket::open(turn, factory, Arc::new(NetworkSignal::default())).await?)
}

/// Allocate a relay and print its candidates
async fn allocate(config: &Config, hold: bool) -> anyhow::Result<()> {
    let (socket, _received) = open_socket(config).await?;

    for candidate in socket.allocate().await? {
        println!("{}", candidate.to_sdp_string());
    }

    if hold {
        println!("\nHolding allocation, press Ctrl+C to release");
        tokio::signal::ctrl_c().await?;
    }

    socket.clear().await?;
    socket.close().await;
    Ok(())
}

/// Line-based chat with `peer`
async fn chat(config: &Config, peer: SocketAddr, unreliable: bool) -> anyhow::Result<()> {
    let (socket, mut received) = open_socket(config).await?;
    let socket = Arc::new(socket);

    for candidate in socket.allocate().await? {
        println!("local candidate: {}", candidate.to_sdp_string());
    }
    let channel = socket.create_permission(peer).await?;
    tracing::info!("Bound {} to channel 0x{:04X}", peer, channel);

    let transport = config.transport_config();
    let (monitor, mut events) = LivenessMonitor::start(transport.liveness.clone());
    let liveness = monitor.handle();
    liveness.add(peer, ConnectionState::Inactive);

    let sink = Arc::new(TurnPeerSink::new(Arc::clone(&socket), peer));
    let (connection, mut deliveries) = PeerConnection::open(peer, sink, &transport);
    let connection = Arc::new(connection.with_liveness(liveness));

    let inbound = Arc::clone(&connection);
    let reader = tokio::spawn(async move {
        while let Some((from, bytes)) = received.recv().await {
            if from != peer {
                tracing::debug!("Ignoring {} bytes from {}", bytes.len(), from);
                continue;
            }
            if let Err(e) = inbound.handle_frame(&bytes).await {
                tracing::warn!("Dropped frame from {}: {}", from, e);
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Chatting with {}, Ctrl+C to quit", peer);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                send_line(&connection, line.as_bytes(), unreliable).await?;
            }
            Some(delivery) = deliveries.recv() => {
                println!("{}> {}", delivery.peer, String::from_utf8_lossy(&delivery.payload));
            }
            Some(event) = events.recv() => match event {
                LivenessEvent::PingDue(_) => {
                    if let Err(e) = connection.ping().await {
                        tracing::warn!("Ping failed: {}", e);
                    }
                }
                LivenessEvent::Active(p) => println!("* {} is active", p),
                LivenessEvent::Inactive(p) => println!("* {} stopped responding", p),
                LivenessEvent::Removed(p) => {
                    println!("* {} is gone", p);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let stats = connection.stats();
    tracing::info!(
        "Reliable: {:.0} seg/s, rtt {:?}, {} retransmitted",
        stats.reliable.rate,
        stats.reliable.average_rtt,
        stats.reliable.retransmissions
    );

    connection.close();
    monitor.stop();
    reader.abort();
    socket.clear().await?;
    socket.close().await;
    Ok(())
}

/// Queue one line, waiting out backpressure
async fn send_line(connection: &PeerConnection, line: &[u8], unreliable: bool) -> anyhow::Result<()> {
    loop {
        let result = if unreliable {
            connection.send_unreliable(line)
        } else {
            connection.send_reliable(line)
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.is_backpressure() => {
                tracing::debug!("{}", e);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(SendError::Closed) => anyhow::bail!("connection closed"),
            Err(e) => return Err(e.into()),
        }
    }
}
