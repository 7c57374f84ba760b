use clap::Parser;
use client::network::{Client, ClientConfig};
use client::presentation::{DriftingPlayer, LogSink};
use log::{error, info, warn};
use shared::transport::udp::UdpClientTransport;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Milliseconds between self-state pushes
    #[arg(long, default_value = "30")]
    push_ms: u64,

    /// Milliseconds between the connection opening and the first push
    #[arg(long, default_value = "100")]
    push_delay_ms: u64,

    /// Milliseconds per client tick
    #[arg(short, long, default_value = "16")]
    tick_ms: u64,

    /// Largest distance the headless player drifts per tick
    #[arg(long, default_value = "0.1")]
    step: f32,

    /// Seed for the drift generator
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn to_config(&self) -> Result<ClientConfig, Box<dyn std::error::Error>> {
        let server_addr: SocketAddr = self.server.parse()?;
        Ok(ClientConfig {
            server_addr,
            push_delay: Duration::from_millis(self.push_delay_ms),
            push_interval: Duration::from_millis(self.push_ms),
            tick_interval: Duration::from_millis(self.tick_ms.max(1)),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.to_config()?;

    let transport = match UdpClientTransport::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await {
        Ok(transport) => transport,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    info!("Starting client...");
    let player = DriftingPlayer::new(args.step, args.seed);
    let mut client = Client::new(transport, player, LogSink::new(), config);
    client.connect();

    let mut ticker = interval(client.config().tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                client.local_mut().drift();
                client.tick(Instant::now());
                if client.connection().is_none() {
                    warn!("Connection to server closed");
                    break;
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    client.disconnect();
    Ok(())
}
