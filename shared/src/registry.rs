//! Mapping from player id to observable player state
//!
//! The server owns the authoritative copy; each client keeps a lazily filled
//! mirror of the same shape. The mutation rules for each side live with the
//! loop that owns the registry; this type only stores entries.

use crate::{PlayerId, PlayerState};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerRegistry {
    players: HashMap<PlayerId, PlayerState>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or overwrites the entry keyed by `player.id`.
    ///
    /// Returns true when the id was not present before.
    pub fn upsert(&mut self, player: PlayerState) -> bool {
        self.players.insert(player.id.clone(), player).is_none()
    }

    pub fn get(&self, id: &str) -> Option<&PlayerState> {
        self.players.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PlayerState> {
        self.players.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<PlayerState> {
        self.players.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.players.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerState> {
        self.players.values_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = &PlayerId> {
        self.players.keys()
    }

    /// Full copy of every entry, as sent in batch messages.
    pub fn snapshot(&self) -> Vec<PlayerState> {
        self.players.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
