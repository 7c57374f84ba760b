use clap::Parser;
use log::{error, info};
use server::game::DisconnectPolicy;
use server::network::{Server, ServerConfig};
use shared::transport::udp::UdpServerTransport;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Milliseconds between full state broadcasts
    #[arg(long, default_value = "30")]
    broadcast_ms: u64,

    /// Milliseconds between player color changes
    #[arg(long, default_value = "1000")]
    color_ms: u64,

    /// Milliseconds per server tick
    #[arg(short, long, default_value = "16")]
    tick_ms: u64,

    /// What to do with a player's entry when its client disconnects
    #[arg(long, value_enum, default_value_t = DisconnectPolicy::Retain)]
    disconnect_policy: DisconnectPolicy,

    /// Seed for the color generator
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let bind_addr: SocketAddr = format!("{}:{}", self.host, self.port).parse()?;
        Ok(ServerConfig {
            bind_addr,
            broadcast_interval: Duration::from_millis(self.broadcast_ms),
            color_interval: Duration::from_millis(self.color_ms),
            tick_interval: Duration::from_millis(self.tick_ms.max(1)),
            disconnect_policy: self.disconnect_policy,
            rng_seed: self.seed,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Args::parse().into_config()?;

    let transport = match UdpServerTransport::bind(config.bind_addr).await {
        Ok(transport) => transport,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    let mut server = Server::new(transport, &config, Instant::now());
    info!(
        "Server started: broadcast every {:?}, recolor every {:?}, {:?} disconnect policy",
        config.broadcast_interval, config.color_interval, config.disconnect_policy
    );

    let mut ticker = interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                server.tick(Instant::now());
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

    server.shutdown();
    Ok(())
}
