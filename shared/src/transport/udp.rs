//! UDP transport on a non-blocking tokio socket
//!
//! Every datagram starts with a one-byte frame tag followed by the payload.
//! UDP itself has no connections, so they are layered on top:
//! - the client sends CONNECT until the server answers ACCEPT
//! - DATA carries exactly one protocol message
//! - DISCONNECT closes the connection from either side
//! - a peer silent for longer than the timeout is reported as disconnected
//!
//! Sockets are only touched through `try_recv_from`/`try_send_to`, so `poll`
//! and `send` never block the tick. Both must run inside a tokio runtime.

use super::{
    ClientTransport, ConnectionHandle, ServerTransport, SlotAllocator, Transport,
    TransportError, TransportEvent,
};
use crate::CONNECTION_TIMEOUT;
use log::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

const FRAME_CONNECT: u8 = 0;
const FRAME_ACCEPT: u8 = 1;
const FRAME_DATA: u8 = 2;
const FRAME_DISCONNECT: u8 = 3;

const MAX_DATAGRAM: usize = 65_507;
const CONNECT_RETRY: Duration = Duration::from_millis(500);

fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 1);
    data.push(tag);
    data.extend_from_slice(payload);
    data
}

fn send_frame(socket: &UdpSocket, tag: u8, payload: &[u8], addr: SocketAddr) {
    match socket.try_send_to(&frame(tag, payload), addr) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            debug!("Socket busy, dropped frame {} to {}", tag, addr);
        }
        Err(e) => error!("Failed to send frame {} to {}: {}", tag, addr, e),
    }
}

/// Reads every datagram currently queued on the socket.
fn drain_socket(socket: &UdpSocket, buffer: &mut [u8]) -> Vec<(SocketAddr, Vec<u8>)> {
    let mut datagrams = Vec::new();
    loop {
        match socket.try_recv_from(buffer) {
            Ok((len, addr)) => datagrams.push((addr, buffer[..len].to_vec())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
            Err(e) => {
                error!("Error receiving datagram: {}", e);
                break;
            }
        }
    }
    datagrams
}

#[derive(Debug)]
struct Peer {
    handle: ConnectionHandle,
    addr: SocketAddr,
    last_seen: Instant,
    /// A disconnect is queued; nothing more is sent or received.
    closing: bool,
    events: VecDeque<TransportEvent>,
}

impl Peer {
    fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

pub struct UdpServerTransport {
    socket: UdpSocket,
    peers: HashMap<u32, Peer>,
    by_addr: HashMap<SocketAddr, ConnectionHandle>,
    slots: SlotAllocator,
    accepts: VecDeque<ConnectionHandle>,
    timeout: Duration,
    buffer: Vec<u8>,
}

impl UdpServerTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        info!("Server listening on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            peers: HashMap::new(),
            by_addr: HashMap::new(),
            slots: SlotAllocator::default(),
            accepts: VecDeque::new(),
            timeout: CONNECTION_TIMEOUT,
            buffer: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    fn peer(&self, conn: ConnectionHandle) -> Option<&Peer> {
        self.peers.get(&conn.index()).filter(|peer| peer.handle == conn)
    }

    fn peer_mut(&mut self, conn: ConnectionHandle) -> Option<&mut Peer> {
        self.peers
            .get_mut(&conn.index())
            .filter(|peer| peer.handle == conn)
    }

    fn close(&mut self, conn: ConnectionHandle) {
        if let Some(peer) = self.peers.remove(&conn.index()) {
            if self.by_addr.get(&peer.addr) == Some(&conn) {
                self.by_addr.remove(&peer.addr);
            }
            self.slots.release(conn);
        }
    }

    /// Queues a disconnect event and forgets the address so it can reconnect.
    fn mark_closing(&mut self, conn: ConnectionHandle) {
        if let Some(peer) = self.peer_mut(conn) {
            if !peer.closing {
                peer.closing = true;
                peer.events.push_back(TransportEvent::Disconnect);
                let addr = peer.addr;
                self.by_addr.remove(&addr);
            }
        }
    }

    fn handle_datagram(&mut self, addr: SocketAddr, datagram: &[u8]) {
        let Some((&tag, payload)) = datagram.split_first() else {
            return;
        };
        let known = self.by_addr.get(&addr).copied();

        match (tag, known) {
            (FRAME_CONNECT, Some(conn)) => {
                // Our ACCEPT was lost; answer the retry once the connection is accepted.
                if !self.accepts.contains(&conn) {
                    send_frame(&self.socket, FRAME_ACCEPT, &[], addr);
                }
            }
            (FRAME_CONNECT, None) => {
                let handle = self.slots.allocate();
                debug!("Connection request from {} as {}", addr, handle);
                self.peers.insert(
                    handle.index(),
                    Peer {
                        handle,
                        addr,
                        last_seen: Instant::now(),
                        closing: false,
                        events: VecDeque::new(),
                    },
                );
                self.by_addr.insert(addr, handle);
                self.accepts.push_back(handle);
            }
            (FRAME_DATA, Some(conn)) => {
                if let Some(peer) = self.peer_mut(conn) {
                    peer.last_seen = Instant::now();
                    peer.events
                        .push_back(TransportEvent::Data(payload.to_vec()));
                }
            }
            (FRAME_DISCONNECT, Some(conn)) => self.mark_closing(conn),
            (FRAME_DATA | FRAME_DISCONNECT, None) => {
                debug!("Ignoring frame {} from unknown peer {}", tag, addr);
            }
            _ => warn!("Unknown frame tag {} from {}", tag, addr),
        }
    }
}

impl Transport for UdpServerTransport {
    fn poll(&mut self) {
        let mut buffer = std::mem::take(&mut self.buffer);
        let datagrams = drain_socket(&self.socket, &mut buffer);
        self.buffer = buffer;

        for (addr, datagram) in datagrams {
            self.handle_datagram(addr, &datagram);
        }

        let timeout = self.timeout;
        let timed_out: Vec<ConnectionHandle> = self
            .peers
            .values()
            .filter(|peer| !peer.closing && peer.is_timed_out(timeout))
            .map(|peer| peer.handle)
            .collect();
        for conn in timed_out {
            info!("Connection {} timed out", conn);
            self.mark_closing(conn);
        }
    }

    fn send(&mut self, conn: ConnectionHandle, payload: &[u8]) {
        match self.peer(conn) {
            Some(peer) if !peer.closing => {
                send_frame(&self.socket, FRAME_DATA, payload, peer.addr);
            }
            _ => debug!("Send to closed connection {}", conn),
        }
    }

    fn receive_event(&mut self, conn: ConnectionHandle) -> Option<TransportEvent> {
        let event = self.peer_mut(conn)?.events.pop_front();
        if event == Some(TransportEvent::Disconnect) {
            self.close(conn);
        }
        event
    }

    fn disconnect(&mut self, conn: ConnectionHandle) {
        if let Some(peer) = self.peer(conn) {
            if !peer.closing {
                send_frame(&self.socket, FRAME_DISCONNECT, &[], peer.addr);
            }
        }
        self.close(conn);
    }

    fn is_live(&self, conn: ConnectionHandle) -> bool {
        self.peer(conn).is_some()
    }
}

impl ServerTransport for UdpServerTransport {
    fn accept(&mut self) -> Option<ConnectionHandle> {
        while let Some(conn) = self.accepts.pop_front() {
            let Some(peer) = self.peer(conn) else {
                continue;
            };
            if peer.closing {
                // Gave up before being accepted; nobody will read its disconnect.
                debug!("Dropping abandoned connection {}", conn);
                self.close(conn);
                continue;
            }
            send_frame(&self.socket, FRAME_ACCEPT, &[], peer.addr);
            return Some(conn);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connecting { started: Instant, last_attempt: Instant },
    Connected,
}

#[derive(Debug)]
struct ServerLink {
    handle: ConnectionHandle,
    addr: SocketAddr,
    state: LinkState,
    last_seen: Instant,
    closing: bool,
}

pub struct UdpClientTransport {
    socket: UdpSocket,
    link: Option<ServerLink>,
    events: VecDeque<TransportEvent>,
    next_generation: u32,
    timeout: Duration,
    buffer: Vec<u8>,
}

impl UdpClientTransport {
    /// Binds the local socket, usually `0.0.0.0:0`.
    pub async fn bind(local: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| TransportError::Bind {
                addr: local,
                source,
            })?;
        debug!("Client socket bound to {}", socket.local_addr()?);

        Ok(Self {
            socket,
            link: None,
            events: VecDeque::new(),
            next_generation: 0,
            timeout: CONNECTION_TIMEOUT,
            buffer: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn link_for(&self, conn: ConnectionHandle) -> Option<&ServerLink> {
        self.link.as_ref().filter(|link| link.handle == conn)
    }

    fn mark_closing(&mut self) {
        if let Some(link) = self.link.as_mut() {
            if !link.closing {
                link.closing = true;
                self.events.push_back(TransportEvent::Disconnect);
            }
        }
    }

    fn handle_datagram(&mut self, datagram: &[u8]) {
        let Some((&tag, payload)) = datagram.split_first() else {
            return;
        };
        let Some(link) = self.link.as_mut().filter(|link| !link.closing) else {
            return;
        };
        link.last_seen = Instant::now();

        match tag {
            FRAME_ACCEPT => {
                if matches!(link.state, LinkState::Connecting { .. }) {
                    link.state = LinkState::Connected;
                    self.events.push_back(TransportEvent::Connect);
                }
            }
            FRAME_DATA => {
                if link.state == LinkState::Connected {
                    self.events
                        .push_back(TransportEvent::Data(payload.to_vec()));
                }
            }
            FRAME_DISCONNECT => self.mark_closing(),
            _ => warn!("Unknown frame tag {} from server", tag),
        }
    }
}

impl Transport for UdpClientTransport {
    fn poll(&mut self) {
        let mut buffer = std::mem::take(&mut self.buffer);
        let datagrams = drain_socket(&self.socket, &mut buffer);
        self.buffer = buffer;

        let server_addr = self.link.as_ref().map(|link| link.addr);
        for (addr, datagram) in datagrams {
            if Some(addr) == server_addr {
                self.handle_datagram(&datagram);
            }
        }

        let timeout = self.timeout;
        let mut expired = false;
        if let Some(link) = self.link.as_mut().filter(|link| !link.closing) {
            match link.state {
                LinkState::Connecting {
                    started,
                    last_attempt,
                } => {
                    if started.elapsed() > timeout {
                        warn!("Connection to {} timed out", link.addr);
                        expired = true;
                    } else if last_attempt.elapsed() >= CONNECT_RETRY {
                        send_frame(&self.socket, FRAME_CONNECT, &[], link.addr);
                        link.state = LinkState::Connecting {
                            started,
                            last_attempt: Instant::now(),
                        };
                    }
                }
                LinkState::Connected => {
                    if link.last_seen.elapsed() > timeout {
                        warn!("Server {} went silent", link.addr);
                        expired = true;
                    }
                }
            }
        }
        if expired {
            self.mark_closing();
        }
    }

    fn send(&mut self, conn: ConnectionHandle, payload: &[u8]) {
        match self.link_for(conn) {
            Some(link) if link.state == LinkState::Connected && !link.closing => {
                send_frame(&self.socket, FRAME_DATA, payload, link.addr);
            }
            _ => debug!("Send on connection {} that is not established", conn),
        }
    }

    fn receive_event(&mut self, conn: ConnectionHandle) -> Option<TransportEvent> {
        self.link_for(conn)?;
        let event = self.events.pop_front();
        if event == Some(TransportEvent::Disconnect) {
            self.link = None;
            self.events.clear();
        }
        event
    }

    fn disconnect(&mut self, conn: ConnectionHandle) {
        if let Some(link) = self.link_for(conn) {
            if !link.closing {
                send_frame(&self.socket, FRAME_DISCONNECT, &[], link.addr);
            }
            self.link = None;
            self.events.clear();
        }
    }

    fn is_live(&self, conn: ConnectionHandle) -> bool {
        self.link_for(conn).is_some()
    }
}

impl ClientTransport for UdpClientTransport {
    fn connect(&mut self, addr: SocketAddr) -> ConnectionHandle {
        let handle = ConnectionHandle::new(0, self.next_generation);
        self.next_generation = self.next_generation.wrapping_add(1);

        let now = Instant::now();
        send_frame(&self.socket, FRAME_CONNECT, &[], addr);
        info!("Connecting to {}", addr);

        self.events.clear();
        self.link = Some(ServerLink {
            handle,
            addr,
            state: LinkState::Connecting {
                started: now,
                last_attempt: now,
            },
            last_seen: now,
            closing: false,
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[test]
    fn test_frame_layout() {
        assert_eq!(frame(FRAME_DATA, b"hi"), vec![FRAME_DATA, b'h', b'i']);
        assert_eq!(frame(FRAME_CONNECT, &[]), vec![FRAME_CONNECT]);
    }

    #[test]
    fn test_bind_failure_is_reported() {
        tokio_test::block_on(async {
            let taken = std::net::UdpSocket::bind(loopback()).unwrap();
            let addr = taken.local_addr().unwrap();

            match UdpServerTransport::bind(addr).await {
                Err(TransportError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
                Err(other) => panic!("Unexpected error: {}", other),
                Ok(_) => panic!("Bind to an occupied port should fail"),
            }
        });
    }

    #[tokio::test]
    async fn test_udp_connect_and_exchange() {
        let mut server = UdpServerTransport::bind(loopback()).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let mut client = UdpClientTransport::bind(loopback()).await.unwrap();

        let conn = client.connect(server_addr);
        assert!(client.is_live(conn));

        let mut accepted = None;
        assert!(
            wait_for(|| {
                server.poll();
                accepted = accepted.or_else(|| server.accept());
                accepted.is_some()
            })
            .await
        );
        let server_conn = accepted.unwrap();
        assert_eq!(server_conn.player_id(), "0");

        let mut connected = false;
        assert!(
            wait_for(|| {
                client.poll();
                connected = connected || client.receive_event(conn) == Some(TransportEvent::Connect);
                connected
            })
            .await
        );

        client.send(conn, b"{\"cmd\":0}");
        let mut received = None;
        assert!(
            wait_for(|| {
                server.poll();
                received = received.take().or_else(|| server.receive_event(server_conn));
                received.is_some()
            })
            .await
        );
        assert_eq!(received, Some(TransportEvent::Data(b"{\"cmd\":0}".to_vec())));

        client.disconnect(conn);
        assert!(!client.is_live(conn));
        let mut closed = false;
        assert!(
            wait_for(|| {
                server.poll();
                closed = closed || server.receive_event(server_conn) == Some(TransportEvent::Disconnect);
                closed
            })
            .await
        );
        assert!(!server.is_live(server_conn));
    }

    #[tokio::test]
    async fn test_connection_abandoned_before_accept_is_released() {
        let mut server = UdpServerTransport::bind(loopback()).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let raw = UdpSocket::bind(loopback()).await.unwrap();

        raw.send_to(&[FRAME_CONNECT], server_addr).await.unwrap();
        assert!(
            wait_for(|| {
                server.poll();
                server.peers.len() == 1
            })
            .await
        );
        raw.send_to(&[FRAME_DISCONNECT], server_addr).await.unwrap();
        assert!(
            wait_for(|| {
                server.poll();
                server.peers.values().all(|peer| peer.closing)
            })
            .await
        );

        assert_eq!(server.accept(), None);
        assert!(server.peers.is_empty());
        assert!(server.by_addr.is_empty());

        let mut client = UdpClientTransport::bind(loopback()).await.unwrap();
        client.connect(server_addr);
        let mut accepted = None;
        assert!(
            wait_for(|| {
                server.poll();
                accepted = accepted.or_else(|| server.accept());
                accepted.is_some()
            })
            .await
        );
        let conn = accepted.unwrap();
        assert_eq!(conn.index(), 0);
        assert_eq!(conn.generation(), 1);
        assert_eq!(server.peers.len(), 1);
    }

    #[tokio::test]
    async fn test_client_generation_wraps() {
        let mut client = UdpClientTransport::bind(loopback()).await.unwrap();
        let target: SocketAddr = "127.0.0.1:9".parse().unwrap();
        client.next_generation = u32::MAX;

        let last = client.connect(target);
        let wrapped = client.connect(target);

        assert_eq!(last.generation(), u32::MAX);
        assert_eq!(wrapped.generation(), 0);
        assert!(!client.is_live(last));
        assert!(client.is_live(wrapped));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let mut server = UdpServerTransport::bind(loopback())
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        let server_addr = server.local_addr().unwrap();
        let mut client = UdpClientTransport::bind(loopback()).await.unwrap();
        client.connect(server_addr);

        let mut accepted = None;
        assert!(
            wait_for(|| {
                server.poll();
                accepted = accepted.or_else(|| server.accept());
                accepted.is_some()
            })
            .await
        );
        let server_conn = accepted.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        server.poll();
        assert_eq!(
            server.receive_event(server_conn),
            Some(TransportEvent::Disconnect)
        );
        assert!(!server.is_live(server_conn));
    }
}
