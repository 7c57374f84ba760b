//! # Player Sync Client Library
//!
//! This library provides the client side of the shared player space. A client
//! holds exactly one connection to the server, pushes its own position at a
//! fixed rate, and mirrors everyone else from the server's snapshots.
//!
//! ## Authority Split
//!
//! ### Position Is Local
//! The local player's position is authored by this process and only ever
//! travels outward. Snapshots from the server never move the local player.
//!
//! ### Color Is Remote
//! The server chooses every player's color. The local player adopts its color
//! from each snapshot; remote players take both position and color.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The local mirror of the server registry and the rules for applying spawn
//! and snapshot messages to it.
//!
//! ### Network Module (`network`)
//! Configuration, the self-push timer and the per-tick state machine.
//!
//! ### Presentation Module (`presentation`)
//! The [`presentation::LocalPlayer`] and [`presentation::RemotePlayerSink`]
//! seams, plus the headless implementations used by the binary.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientConfig};
//! use client::presentation::{DriftingPlayer, LogSink};
//! use shared::transport::udp::UdpClientTransport;
//! use std::time::Instant;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::default();
//!     let transport = UdpClientTransport::bind("0.0.0.0:0".parse()?).await?;
//!     let mut client = Client::new(transport, DriftingPlayer::new(0.1, None), LogSink::new(), config);
//!     client.connect();
//!
//!     let mut ticker = tokio::time::interval(client.config().tick_interval);
//!     loop {
//!         ticker.tick().await;
//!         client.local_mut().drift();
//!         client.tick(Instant::now());
//!     }
//! }
//! ```

pub mod game;
pub mod network;
pub mod presentation;
