//! In-process loopback transport
//!
//! A [`MemoryNetwork`] hub connects one bound server transport with any
//! number of client transports on the same thread. Sends stay in flight until
//! the receiving side polls, like a real driver. The hub can drop data frames
//! to act as the unreliable channel, and can kill a connection without any
//! event so the server sees a stale slot.

use super::{
    ClientTransport, ConnectionHandle, ServerTransport, SlotAllocator, Transport,
    TransportError, TransportEvent,
};
use log::debug;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

#[derive(Debug)]
struct Link {
    handle: ConnectionHandle,
    server_live: bool,
    client_live: bool,
    to_server: VecDeque<TransportEvent>,
    to_client: VecDeque<TransportEvent>,
}

#[derive(Debug, Default)]
struct Hub {
    listen_addr: Option<SocketAddr>,
    links: HashMap<u32, Link>,
    slots: SlotAllocator,
    pending_accepts: VecDeque<ConnectionHandle>,
    drop_data: bool,
    dropped: usize,
}

impl Hub {
    fn link_mut(&mut self, conn: ConnectionHandle) -> Option<&mut Link> {
        self.links
            .get_mut(&conn.index())
            .filter(|link| link.handle == conn)
    }

    fn link(&self, conn: ConnectionHandle) -> Option<&Link> {
        self.links.get(&conn.index()).filter(|link| link.handle == conn)
    }

    fn release_if_closed(&mut self, conn: ConnectionHandle) {
        let closed = self
            .link(conn)
            .map_or(false, |link| !link.server_live && !link.client_live);
        if closed {
            self.links.remove(&conn.index());
            self.slots.release(conn);
        }
    }

    /// Returns false when the hub is dropping data frames.
    fn admit_data(&mut self) -> bool {
        if self.drop_data {
            self.dropped += 1;
            false
        } else {
            true
        }
    }
}

/// Shared loopback network; cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the single server endpoint of this network.
    pub fn bind(&self, addr: SocketAddr) -> Result<MemoryServerTransport, TransportError> {
        let mut hub = self.hub.borrow_mut();
        if hub.listen_addr.is_some() {
            return Err(TransportError::Bind {
                addr,
                source: io::Error::from(io::ErrorKind::AddrInUse),
            });
        }
        hub.listen_addr = Some(addr);

        Ok(MemoryServerTransport {
            hub: Rc::clone(&self.hub),
            ready_accepts: VecDeque::new(),
            inbox: HashMap::new(),
        })
    }

    pub fn client(&self) -> MemoryClientTransport {
        MemoryClientTransport {
            hub: Rc::clone(&self.hub),
            inbox: VecDeque::new(),
            conn: None,
        }
    }

    /// While set, every data frame sent in either direction is lost.
    pub fn set_drop_data(&self, drop_data: bool) {
        self.hub.borrow_mut().drop_data = drop_data;
    }

    pub fn dropped_count(&self) -> usize {
        self.hub.borrow().dropped
    }

    /// Tears the connection down on both ends without delivering any event.
    pub fn kill(&self, conn: ConnectionHandle) {
        let mut hub = self.hub.borrow_mut();
        if let Some(link) = hub.link_mut(conn) {
            link.server_live = false;
            link.client_live = false;
        }
        hub.release_if_closed(conn);
    }
}

pub struct MemoryServerTransport {
    hub: Rc<RefCell<Hub>>,
    ready_accepts: VecDeque<ConnectionHandle>,
    inbox: HashMap<ConnectionHandle, VecDeque<TransportEvent>>,
}

impl Transport for MemoryServerTransport {
    fn poll(&mut self) {
        let mut hub = self.hub.borrow_mut();
        self.ready_accepts.extend(hub.pending_accepts.drain(..));

        for link in hub.links.values_mut() {
            if link.to_server.is_empty() {
                continue;
            }
            self.inbox
                .entry(link.handle)
                .or_default()
                .extend(link.to_server.drain(..));
        }

        // Killed links never deliver their queued events.
        self.inbox.retain(|conn, _| hub.link(*conn).is_some());
    }

    fn send(&mut self, conn: ConnectionHandle, payload: &[u8]) {
        let mut hub = self.hub.borrow_mut();
        if !hub.admit_data() {
            debug!("Dropped {} bytes to {}", payload.len(), conn);
            return;
        }
        if let Some(link) = hub.link_mut(conn) {
            if link.server_live && link.client_live {
                link.to_client
                    .push_back(TransportEvent::Data(payload.to_vec()));
            }
        }
    }

    fn receive_event(&mut self, conn: ConnectionHandle) -> Option<TransportEvent> {
        let event = self.inbox.get_mut(&conn)?.pop_front();

        if event.is_none() {
            self.inbox.remove(&conn);
        }
        if event == Some(TransportEvent::Disconnect) {
            let mut hub = self.hub.borrow_mut();
            if let Some(link) = hub.link_mut(conn) {
                link.server_live = false;
            }
            hub.release_if_closed(conn);
        }
        event
    }

    fn disconnect(&mut self, conn: ConnectionHandle) {
        let mut hub = self.hub.borrow_mut();
        if let Some(link) = hub.link_mut(conn) {
            if link.client_live {
                link.to_client.push_back(TransportEvent::Disconnect);
            }
            link.server_live = false;
        }
        hub.release_if_closed(conn);
        self.inbox.remove(&conn);
    }

    fn is_live(&self, conn: ConnectionHandle) -> bool {
        self.hub
            .borrow()
            .link(conn)
            .map_or(false, |link| link.server_live)
    }
}

impl ServerTransport for MemoryServerTransport {
    fn accept(&mut self) -> Option<ConnectionHandle> {
        while let Some(conn) = self.ready_accepts.pop_front() {
            let mut hub = self.hub.borrow_mut();
            let Some(link) = hub.link_mut(conn) else {
                continue;
            };
            if !link.client_live {
                continue;
            }
            link.server_live = true;
            link.to_client.push_back(TransportEvent::Connect);
            return Some(conn);
        }
        None
    }
}

pub struct MemoryClientTransport {
    hub: Rc<RefCell<Hub>>,
    inbox: VecDeque<TransportEvent>,
    conn: Option<ConnectionHandle>,
}

impl Transport for MemoryClientTransport {
    fn poll(&mut self) {
        let Some(conn) = self.conn else {
            return;
        };
        let mut hub = self.hub.borrow_mut();
        if let Some(link) = hub.link_mut(conn) {
            self.inbox.extend(link.to_client.drain(..));
        }
    }

    fn send(&mut self, conn: ConnectionHandle, payload: &[u8]) {
        let mut hub = self.hub.borrow_mut();
        if !hub.admit_data() {
            debug!("Dropped {} bytes from {}", payload.len(), conn);
            return;
        }
        if let Some(link) = hub.link_mut(conn) {
            if link.server_live && link.client_live {
                link.to_server
                    .push_back(TransportEvent::Data(payload.to_vec()));
            }
        }
    }

    fn receive_event(&mut self, conn: ConnectionHandle) -> Option<TransportEvent> {
        if self.conn != Some(conn) {
            return None;
        }
        let event = self.inbox.pop_front();

        if event == Some(TransportEvent::Disconnect) {
            let mut hub = self.hub.borrow_mut();
            if let Some(link) = hub.link_mut(conn) {
                link.client_live = false;
            }
            hub.release_if_closed(conn);
            self.conn = None;
            self.inbox.clear();
        }
        event
    }

    fn disconnect(&mut self, conn: ConnectionHandle) {
        if self.conn != Some(conn) {
            return;
        }
        let mut hub = self.hub.borrow_mut();
        if let Some(link) = hub.link_mut(conn) {
            // A connection the server never accepted still needs its accept cancelled.
            link.to_server.push_back(TransportEvent::Disconnect);
            link.client_live = false;
        }
        hub.release_if_closed(conn);
        self.conn = None;
        self.inbox.clear();
    }

    fn is_live(&self, conn: ConnectionHandle) -> bool {
        self.conn == Some(conn)
            && self
                .hub
                .borrow()
                .link(conn)
                .map_or(false, |link| link.client_live)
    }
}

impl ClientTransport for MemoryClientTransport {
    fn connect(&mut self, addr: SocketAddr) -> ConnectionHandle {
        let mut hub = self.hub.borrow_mut();
        let handle = hub.slots.allocate();
        let listening = hub.listen_addr == Some(addr);

        let mut link = Link {
            handle,
            server_live: false,
            client_live: true,
            to_server: VecDeque::new(),
            to_client: VecDeque::new(),
        };
        if listening {
            hub.pending_accepts.push_back(handle);
        } else {
            link.to_client.push_back(TransportEvent::Disconnect);
        }
        hub.links.insert(handle.index(), link);

        self.conn = Some(handle);
        self.inbox.clear();
        handle
    }
}
