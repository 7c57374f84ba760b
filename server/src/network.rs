//! Server loop: drains transport events, applies them to the registry and
//! fires the periodic broadcasts

use crate::connections::ConnectionTable;
use crate::game::{DisconnectPolicy, GameState, UpdateOutcome};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::protocol::{self, Message};
use shared::registry::PlayerRegistry;
use shared::timer::Scheduler;
use shared::transport::{ConnectionHandle, ServerTransport, TransportEvent};
use shared::{PlayerState, BROADCAST_INTERVAL, COLOR_CHANGE_INTERVAL, DEFAULT_PORT, TICK_INTERVAL};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub broadcast_interval: Duration,
    pub color_interval: Duration,
    pub tick_interval: Duration,
    pub disconnect_policy: DisconnectPolicy,
    /// Fixed seed for the color generator; random when `None`.
    pub rng_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            broadcast_interval: BROADCAST_INTERVAL,
            color_interval: COLOR_CHANGE_INTERVAL,
            tick_interval: TICK_INTERVAL,
            disconnect_policy: DisconnectPolicy::default(),
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerTimer {
    Broadcast,
    ColorChange,
}

/// Authoritative server coordinating connections and the player registry
pub struct Server<T> {
    transport: T,
    connections: ConnectionTable,
    game_state: GameState,
    timers: Scheduler<ServerTimer>,
    rng: StdRng,
}

impl<T: ServerTransport> Server<T> {
    /// Wraps an already bound transport. Timers first fire one interval after `now`.
    pub fn new(transport: T, config: &ServerConfig, now: Instant) -> Self {
        let mut timers = Scheduler::new();
        timers.arm(
            ServerTimer::Broadcast,
            now,
            config.broadcast_interval,
            config.broadcast_interval,
        );
        timers.arm(
            ServerTimer::ColorChange,
            now,
            config.color_interval,
            config.color_interval,
        );

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Server {
            transport,
            connections: ConnectionTable::new(),
            game_state: GameState::new(config.disconnect_policy),
            timers,
            rng,
        }
    }

    /// Runs one iteration of the server loop.
    pub fn tick(&mut self, now: Instant) {
        self.transport.poll();

        for conn in self.connections.cleanup(&self.transport) {
            info!("Connection {} went away without a disconnect", conn);
            self.game_state.on_disconnect(&conn.player_id());
        }

        while let Some(conn) = self.connections.accept(&mut self.transport) {
            self.handle_accept(conn);
        }

        for conn in self.connections.live_handles() {
            self.drain_events(conn);
        }

        if self.timers.take(ServerTimer::Broadcast, now) {
            self.broadcast_snapshot();
        }

        if self.timers.take(ServerTimer::ColorChange, now) {
            self.game_state.recolor_players(&mut self.rng);
        }
    }

    /// Disconnects every peer. The transport is released when the server is dropped.
    pub fn shutdown(&mut self) {
        info!(
            "Server shutting down, closing {} connections",
            self.connections.live_count()
        );
        self.connections.close_all(&mut self.transport);
    }

    fn handle_accept(&mut self, conn: ConnectionHandle) {
        let id = conn.player_id();

        self.send_to(
            conn,
            &Message::PlayerInternalId {
                player: PlayerState::new(id.as_str()),
            },
        );

        // Everyone already present. A ghost left behind under the same id is not "existing".
        let existing: Vec<PlayerState> = self
            .game_state
            .snapshot()
            .into_iter()
            .filter(|player| player.id != id)
            .collect();
        self.send_to(conn, &Message::SpawnExistedPlayers { players: existing });

        let player = self.game_state.add_player(&id);
        self.broadcast(&Message::SpawnNewPlayer { player });
    }

    fn drain_events(&mut self, conn: ConnectionHandle) {
        while let Some(event) = self.transport.receive_event(conn) {
            match event {
                TransportEvent::Data(bytes) => self.handle_data(conn, &bytes),
                TransportEvent::Disconnect => {
                    self.handle_disconnect(conn);
                    break;
                }
                TransportEvent::Connect => debug!("Ignoring connect event on {}", conn),
            }
        }
    }

    fn handle_data(&mut self, conn: ConnectionHandle, bytes: &[u8]) {
        match protocol::decode(bytes) {
            Ok(message) => self.handle_message(conn, message),
            Err(e) => warn!("Dropping message from {}: {}", conn, e),
        }
    }

    fn handle_message(&mut self, conn: ConnectionHandle, message: Message) {
        match message {
            Message::PlayerUpdate { player } => {
                let sender = conn.player_id();
                match self.game_state.apply_player_update(&sender, &player) {
                    UpdateOutcome::Applied => {
                        debug!("Player {} moved to {}", sender, player.pos);
                    }
                    UpdateOutcome::RegistryMiss => {
                        warn!("Dropping update from {}: player {} is not registered", conn, sender);
                    }
                    UpdateOutcome::IdMismatch => {
                        warn!(
                            "Dropping update from {}: claims id '{}' but is player {}",
                            conn, player.id, sender
                        );
                    }
                }
            }
            Message::Handshake { player } => {
                info!("Handshake from {} (player '{}')", conn, player.id);
            }
            Message::PlayerInternalId { .. }
            | Message::ServerUpdate { .. }
            | Message::SpawnExistedPlayers { .. }
            | Message::SpawnNewPlayer { .. } => {
                if let Some(command) = message.command() {
                    warn!("Unexpected {} message from client {}", command, conn);
                }
            }
            Message::Unrecognized { cmd } => {
                warn!("Unrecognized command {} from {}", cmd, conn);
            }
        }
    }

    fn handle_disconnect(&mut self, conn: ConnectionHandle) {
        info!("Client {} disconnected", conn);
        self.connections.reset(conn);
        self.game_state.on_disconnect(&conn.player_id());
    }

    fn broadcast_snapshot(&mut self) {
        let message = Message::ServerUpdate {
            players: self.game_state.snapshot(),
        };
        self.broadcast(&message);
    }

    fn send_to(&mut self, conn: ConnectionHandle, message: &Message) {
        match protocol::encode(message) {
            Ok(bytes) => self.transport.send(conn, &bytes),
            Err(e) => error!("Failed to encode message for {}: {}", conn, e),
        }
    }

    /// Sends `message` to every live connection.
    fn broadcast(&mut self, message: &Message) {
        let bytes = match protocol::encode(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode broadcast: {}", e);
                return;
            }
        };
        for (_, conn) in self.connections.for_each_live() {
            self.transport.send(conn, &bytes);
        }
    }

    pub fn players(&self) -> &PlayerRegistry {
        &self.game_state.players
    }

    pub fn game_state(&self) -> &GameState {
        &self.game_state
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
