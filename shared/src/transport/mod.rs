//! Transport boundary consumed by the server and client loops
//!
//! A transport delivers discrete `Connect`, `Data` and `Disconnect` events per
//! connection and queues opaque payloads for sending. Nothing is delivered
//! until the receiving side calls [`Transport::poll`], which every loop does
//! first thing each tick.
//!
//! Connections are named by [`ConnectionHandle`], a generation-counted slot
//! id. A handle whose slot has been reused no longer matches, so events and
//! sends can never be correlated with the wrong peer.

use crate::PlayerId;
use std::fmt;
use std::io;
use std::net::SocketAddr;

pub mod memory;
pub mod udp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    index: u32,
    generation: u32,
}

impl ConnectionHandle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Internal slot number of the connection.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Player identity derived from the slot number.
    pub fn player_id(&self) -> PlayerId {
        self.index.to_string()
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The peer accepted our connection (client side only).
    Connect,
    /// One complete message payload.
    Data(Vec<u8>),
    /// The connection is gone; its handle stops being live once this is read.
    Disconnect,
}

pub trait Transport {
    /// Moves everything that arrived since the last call into the event queues.
    fn poll(&mut self);

    /// Queues `payload` for the peer. Delivery is not guaranteed.
    fn send(&mut self, conn: ConnectionHandle, payload: &[u8]);

    /// Pops the next event for `conn`, in delivery order.
    fn receive_event(&mut self, conn: ConnectionHandle) -> Option<TransportEvent>;

    fn disconnect(&mut self, conn: ConnectionHandle);

    fn is_live(&self, conn: ConnectionHandle) -> bool;
}

pub trait ServerTransport: Transport {
    /// Next connection that became ready, if any. Never blocks.
    fn accept(&mut self) -> Option<ConnectionHandle>;
}

pub trait ClientTransport: Transport {
    /// Starts connecting; the connection is confirmed by a later `Connect` event.
    fn connect(&mut self, addr: SocketAddr) -> ConnectionHandle;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Transport I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Hands out slot indices, reusing released ones under a new generation.
#[derive(Debug, Default)]
pub(crate) struct SlotAllocator {
    generations: Vec<u32>,
    free: Vec<u32>,
}

impl SlotAllocator {
    pub(crate) fn allocate(&mut self) -> ConnectionHandle {
        match self.free.pop() {
            Some(index) => {
                let generation = &mut self.generations[index as usize];
                *generation = generation.wrapping_add(1);
                ConnectionHandle::new(index, *generation)
            }
            None => {
                let index = self.generations.len() as u32;
                self.generations.push(0);
                ConnectionHandle::new(index, 0)
            }
        }
    }

    pub(crate) fn release(&mut self, handle: ConnectionHandle) {
        let current = self.generations.get(handle.index as usize).copied();
        if current == Some(handle.generation) && !self.free.contains(&handle.index) {
            self.free.push(handle.index);
        }
    }
}
