//! # Player Sync Server Library
//!
//! This library provides the authoritative server for the shared player space.
//! It accepts connections from many clients, takes in each client's
//! self-reported position, and periodically redistributes the merged state to
//! everyone.
//!
//! ## Core Responsibilities
//!
//! ### Identity Assignment
//! Every accepted connection becomes a player whose id is derived from the
//! connection's slot number. The new client is told its id, receives a
//! snapshot of everyone already present, and then every client (the new one
//! included) is told about the newcomer.
//!
//! ### Authoritative Registry
//! The server owns the player registry. Clients may only move their own
//! entry; colors are chosen by the server on a timer and never taken from
//! client input.
//!
//! ### State Broadcasting
//! On every broadcast interval the full registry is sent to all live
//! connections. There are no deltas and no acknowledgements: a lost snapshot
//! is simply superseded by the next one.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Tick Loop
//! [`network::Server::tick`] does a bounded amount of non-blocking work and
//! returns. Each tick it polls the transport, reclaims dead connection slots,
//! accepts new connections, drains inbound events, then checks its timers.
//! The registry and connection table have a single writer, so nothing is
//! locked.
//!
//! ### Transport Agnostic
//! The loop is generic over [`shared::transport::ServerTransport`]. The binary
//! runs it over UDP; tests run it over the in-memory loopback network.
//!
//! ## Module Organization
//!
//! ### Connections Module (`connections`)
//! Slots for accepted connections, reset on disconnect and reclaimed on the
//! next cleanup.
//!
//! ### Game Module (`game`)
//! The registry mutation rules: spawn, position updates, recoloring, and the
//! disconnect policy hook.
//!
//! ### Network Module (`network`)
//! Configuration, timers and the per-tick state machine.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//! use shared::transport::udp::UdpServerTransport;
//! use std::time::Instant;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let transport = UdpServerTransport::bind(config.bind_addr).await?;
//!     let mut server = Server::new(transport, &config, Instant::now());
//!
//!     let mut ticker = tokio::time::interval(config.tick_interval);
//!     loop {
//!         ticker.tick().await;
//!         server.tick(Instant::now());
//!     }
//! }
//! ```

pub mod connections;
pub mod game;
pub mod network;
