use crate::game::ClientGameState;
use crate::presentation::{LocalPlayer, RemotePlayerSink};
use log::{debug, error, info, warn};
use shared::protocol::{self, Message};
use shared::timer::Scheduler;
use shared::transport::{ClientTransport, ConnectionHandle, TransportEvent};
use shared::{PlayerState, DEFAULT_PORT, SELF_PUSH_DELAY, SELF_PUSH_INTERVAL, TICK_INTERVAL};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    /// Delay between the connect event and the first self-state push.
    pub push_delay: Duration,
    pub push_interval: Duration,
    pub tick_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            push_delay: SELF_PUSH_DELAY,
            push_interval: SELF_PUSH_INTERVAL,
            tick_interval: TICK_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientTimer {
    SelfPush,
}

/// Client loop holding the single server connection and the local mirror
pub struct Client<T, L, S> {
    transport: T,
    connection: Option<ConnectionHandle>,
    game_state: ClientGameState,
    local: L,
    sink: S,
    timers: Scheduler<ClientTimer>,
    config: ClientConfig,
}

impl<T, L, S> Client<T, L, S>
where
    T: ClientTransport,
    L: LocalPlayer,
    S: RemotePlayerSink,
{
    pub fn new(transport: T, local: L, sink: S, config: ClientConfig) -> Self {
        Client {
            transport,
            connection: None,
            game_state: ClientGameState::new(),
            local,
            sink,
            timers: Scheduler::new(),
            config,
        }
    }

    /// Starts connecting to the configured server. Liveness is confirmed by a later connect event.
    pub fn connect(&mut self) -> ConnectionHandle {
        info!("Connecting to server at {}...", self.config.server_addr);
        let conn = self.transport.connect(self.config.server_addr);
        self.connection = Some(conn);
        conn
    }

    pub fn is_live(&self) -> bool {
        self.connection
            .map_or(false, |conn| self.transport.is_live(conn))
    }

    /// Runs one iteration of the client loop.
    pub fn tick(&mut self, now: Instant) {
        self.transport.poll();

        let Some(conn) = self.connection else {
            return;
        };
        if !self.transport.is_live(conn) {
            self.drop_connection();
            return;
        }

        while let Some(event) = self.transport.receive_event(conn) {
            match event {
                TransportEvent::Connect => self.handle_connect(now),
                TransportEvent::Data(bytes) => self.handle_data(&bytes),
                TransportEvent::Disconnect => {
                    info!("Disconnected from server");
                    self.drop_connection();
                    return;
                }
            }
        }

        if self.timers.take(ClientTimer::SelfPush, now) {
            self.push_self(conn);
        }
    }

    /// Closes the connection, if any.
    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection {
            info!("Disconnecting from server");
            self.transport.disconnect(conn);
        }
        self.drop_connection();
    }

    fn drop_connection(&mut self) {
        self.connection = None;
        self.timers.disarm(ClientTimer::SelfPush);
    }

    fn handle_connect(&mut self, now: Instant) {
        info!("Connected to {}", self.config.server_addr);
        self.timers.arm(
            ClientTimer::SelfPush,
            now,
            self.config.push_delay,
            self.config.push_interval,
        );
    }

    fn handle_data(&mut self, bytes: &[u8]) {
        let message = match protocol::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping message from server: {}", e);
                return;
            }
        };

        match message {
            Message::PlayerInternalId { player } => {
                self.local.set_id(&player.id);
                self.game_state.assign_id(player.id);
            }
            Message::SpawnExistedPlayers { players } => {
                debug!("Spawning {} existing players", players.len());
                self.game_state.spawn_existing(players, &mut self.sink);
            }
            Message::SpawnNewPlayer { player } => {
                debug!("Spawning new player {}", player.id);
                self.game_state.spawn(player, &mut self.sink);
            }
            Message::ServerUpdate { players } => {
                self.game_state
                    .apply_server_update(players, &mut self.local, &mut self.sink);
            }
            Message::Handshake { player } => {
                info!("Handshake from server (player '{}')", player.id);
            }
            Message::PlayerUpdate { player } => {
                debug!("Unexpected PLAYER_UPDATE for {} from server", player.id);
            }
            Message::Unrecognized { cmd } => {
                warn!("Unrecognized command {} from server", cmd);
            }
        }
    }

    /// Sends the locally authored state, stamped with the assigned id.
    fn push_self(&mut self, conn: ConnectionHandle) {
        let player = PlayerState {
            id: self.game_state.local_id().unwrap_or_default().to_string(),
            pos: self.local.position(),
            color: self.local.color(),
        };
        match protocol::encode(&Message::PlayerUpdate { player }) {
            Ok(bytes) => self.transport.send(conn, &bytes),
            Err(e) => error!("Failed to encode player update: {}", e),
        }
    }

    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.connection
    }

    pub fn game_state(&self) -> &ClientGameState {
        &self.game_state
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut L {
        &mut self.local
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::{DriftingPlayer, LogSink};
    use shared::transport::memory::{MemoryClientTransport, MemoryNetwork, MemoryServerTransport};
    use shared::transport::{ServerTransport, Transport};
    use shared::{Color, Vec3};

    type TestClient = Client<MemoryClientTransport, DriftingPlayer, LogSink>;

    fn setup() -> (MemoryNetwork, MemoryServerTransport, TestClient) {
        let config = ClientConfig::default();
        let network = MemoryNetwork::new();
        let server = network.bind(config.server_addr).unwrap();
        let client = Client::new(
            network.client(),
            DriftingPlayer::new(0.5, Some(3)),
            LogSink::new(),
            config,
        );
        (network, server, client)
    }

    fn serve(server: &mut MemoryServerTransport, conn: ConnectionHandle, message: &Message) {
        server.send(conn, &protocol::encode(message).unwrap());
    }

    fn received(server: &mut MemoryServerTransport, conn: ConnectionHandle) -> Vec<Message> {
        server.poll();
        let mut messages = Vec::new();
        while let Some(TransportEvent::Data(bytes)) = server.receive_event(conn) {
            messages.push(protocol::decode(&bytes).unwrap());
        }
        messages
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_addr.port(), DEFAULT_PORT);
        assert_eq!(config.push_delay, Duration::from_millis(100));
        assert_eq!(config.push_interval, Duration::from_millis(30));
    }

    #[test]
    fn test_tick_before_connect_is_noop() {
        let (_network, _server, mut client) = setup();
        client.tick(Instant::now());
        assert!(!client.is_live());
        assert!(client.connection().is_none());
    }

    #[test]
    fn test_push_starts_after_connect_event_and_delay() {
        let start = Instant::now();
        let (_network, mut server, mut client) = setup();
        let conn = client.connect();
        assert!(client.is_live());

        // Not accepted yet: nothing may be pushed.
        client.tick(start + Duration::from_secs(1));
        server.poll();
        assert_eq!(server.accept(), Some(conn));
        assert!(received(&mut server, conn).is_empty());

        client.tick(start);
        client.tick(start + Duration::from_millis(99));
        assert!(received(&mut server, conn).is_empty());

        client.tick(start + Duration::from_millis(100));
        let messages = received(&mut server, conn);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::PlayerUpdate { player } => {
                assert_eq!(player.id, "");
                assert_eq!(player.pos, client.local().position());
            }
            other => panic!("Unexpected message: {:?}", other),
        }

        client.tick(start + Duration::from_millis(130));
        assert_eq!(received(&mut server, conn).len(), 1);
    }

    #[test]
    fn test_assigned_id_is_stamped_on_pushes() {
        let start = Instant::now();
        let (_network, mut server, mut client) = setup();
        let conn = client.connect();
        server.poll();
        server.accept().unwrap();

        serve(
            &mut server,
            conn,
            &Message::PlayerInternalId {
                player: PlayerState::new("0"),
            },
        );
        client.tick(start);
        assert_eq!(client.game_state().local_id(), Some("0"));
        assert_eq!(client.local().id(), Some("0"));

        client.tick(start + Duration::from_millis(100));
        match received(&mut server, conn).as_slice() {
            [Message::PlayerUpdate { player }] => assert_eq!(player.id, "0"),
            other => panic!("Unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn test_spawn_and_server_update_reach_mirror() {
        let start = Instant::now();
        let (_network, mut server, mut client) = setup();
        let conn = client.connect();
        server.poll();
        server.accept().unwrap();

        let red = Color::new(1.0, 0.0, 0.0);
        serve(&mut server, conn, &Message::PlayerInternalId { player: PlayerState::new("1") });
        serve(&mut server, conn, &Message::SpawnExistedPlayers { players: vec![PlayerState::new("0")] });
        serve(&mut server, conn, &Message::SpawnNewPlayer { player: PlayerState::new("1") });
        serve(
            &mut server,
            conn,
            &Message::ServerUpdate {
                players: vec![
                    PlayerState::new("0").with_pos(Vec3::new(1.0, 0.0, 2.0)).with_color(red),
                    PlayerState::new("1").with_pos(Vec3::new(9.0, 9.0, 9.0)).with_color(red),
                ],
            },
        );
        client.tick(start);

        let mirror = &client.game_state().players;
        assert_eq!(mirror.len(), 2);
        assert_eq!(mirror.get("0").unwrap().pos, Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(mirror.get("1").unwrap().pos, Vec3::ZERO);
        assert_eq!(client.local().color(), red);
        assert_eq!(client.sink().spawned_count(), 1);
    }

    #[test]
    fn test_malformed_data_is_ignored() {
        let start = Instant::now();
        let (_network, mut server, mut client) = setup();
        let conn = client.connect();
        server.poll();
        server.accept().unwrap();

        server.send(conn, b"\xff\xfe");
        server.send(conn, br#"{"cmd":3,"players":7}"#);
        server.send(conn, br#"{"cmd":100}"#);
        client.tick(start);

        assert!(client.is_live());
        assert!(client.game_state().players.is_empty());
        assert_eq!(client.game_state().local_id(), None);
    }

    #[test]
    fn test_disconnect_event_stops_pushing() {
        let start = Instant::now();
        let (_network, mut server, mut client) = setup();
        let conn = client.connect();
        server.poll();
        server.accept().unwrap();
        client.tick(start);

        server.disconnect(conn);
        client.tick(start + Duration::from_millis(10));

        assert!(!client.is_live());
        assert!(client.connection().is_none());
        client.tick(start + Duration::from_secs(1));
        assert!(received(&mut server, conn).is_empty());
    }

    #[test]
    fn test_client_disconnect_notifies_server() {
        let start = Instant::now();
        let (_network, mut server, mut client) = setup();
        let conn = client.connect();
        server.poll();
        server.accept().unwrap();
        client.tick(start);

        client.disconnect();
        assert!(!client.is_live());

        server.poll();
        assert_eq!(server.receive_event(conn), Some(TransportEvent::Disconnect));
    }
}
