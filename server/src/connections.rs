//! Server-side table of transport connections
//!
//! Each accepted peer gets a slot holding its [`ConnectionHandle`]. A slot is
//! live while the transport still reports the handle as live, empty once a
//! disconnect event reset it, and stale when the transport dropped the
//! connection without telling us. `cleanup` reclaims empty and stale slots by
//! swap-removal, so slot positions are not stable across ticks; callers work
//! with handles, never positions.

use log::{debug, info};
use shared::transport::{ConnectionHandle, ServerTransport, Transport};

#[derive(Debug, Default)]
pub struct ConnectionTable {
    slots: Vec<Option<ConnectionHandle>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one ready connection from the transport, if there is one.
    ///
    /// Never blocks; call repeatedly until it returns `None` to drain every
    /// connection that became ready since the last tick.
    pub fn accept<T: ServerTransport>(&mut self, transport: &mut T) -> Option<ConnectionHandle> {
        let conn = transport.accept()?;
        info!("Accepted connection {}", conn);
        self.slots.push(Some(conn));
        Some(conn)
    }

    /// Reclaims every empty or stale slot.
    ///
    /// Returns the handles of stale slots, whose peers went away without a
    /// disconnect event. Empty slots were already reported when they were reset.
    pub fn cleanup<T: Transport>(&mut self, transport: &T) -> Vec<ConnectionHandle> {
        let mut stale = Vec::new();
        let mut i = 0;
        while i < self.slots.len() {
            match self.slots[i] {
                Some(conn) if transport.is_live(conn) => i += 1,
                slot => {
                    if let Some(conn) = slot {
                        debug!("Reclaiming stale connection {}", conn);
                        stale.push(conn);
                    }
                    self.slots.swap_remove(i);
                }
            }
        }
        stale
    }

    /// Empties the slot holding `conn`. Returns false if no slot held it.
    pub fn reset(&mut self, conn: ConnectionHandle) -> bool {
        match self.slots.iter_mut().find(|slot| **slot == Some(conn)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    /// Occupied slots with their current positions.
    pub fn for_each_live(&self) -> impl Iterator<Item = (usize, ConnectionHandle)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.map(|conn| (index, conn)))
    }

    /// Handles of all occupied slots, detached from the table so it can be mutated while iterating.
    pub fn live_handles(&self) -> Vec<ConnectionHandle> {
        self.for_each_live().map(|(_, conn)| conn).collect()
    }

    pub fn contains(&self, conn: ConnectionHandle) -> bool {
        self.slots.contains(&Some(conn))
    }

    /// Disconnects every occupied slot and empties the table.
    pub fn close_all<T: Transport>(&mut self, transport: &mut T) {
        for conn in self.slots.drain(..).flatten() {
            transport.disconnect(conn);
        }
    }

    /// Total number of slots, including empty ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
