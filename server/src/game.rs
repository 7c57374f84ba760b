use log::{debug, info};
use rand::Rng;
use shared::registry::PlayerRegistry;
use shared::{Color, PlayerState};

/// What happens to a player's entry when its connection goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DisconnectPolicy {
    /// Keep the entry; the player lingers in snapshots as a ghost.
    #[default]
    Retain,
    /// Delete the entry.
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// No entry exists for the sending connection.
    RegistryMiss,
    /// The payload names a different player than the sending connection.
    IdMismatch,
}

/// Authoritative player registry and the rules that mutate it.
#[derive(Debug, Clone)]
pub struct GameState {
    pub players: PlayerRegistry,
    disconnect_policy: DisconnectPolicy,
}

impl GameState {
    pub fn new(disconnect_policy: DisconnectPolicy) -> Self {
        Self {
            players: PlayerRegistry::new(),
            disconnect_policy,
        }
    }

    /// Registers a freshly accepted player at the origin with the default color.
    pub fn add_player(&mut self, id: &str) -> PlayerState {
        let player = PlayerState::new(id);
        info!("Added player {} at {}", id, player.pos);
        self.players.upsert(player.clone());
        player
    }

    /// Applies a client's self-reported state. Only the position is taken;
    /// color belongs to the server.
    ///
    /// `sender_id` is the id of the connection the update arrived on. An empty
    /// id in the payload comes from a client that has not learned its id yet
    /// and is attributed to the sender.
    pub fn apply_player_update(&mut self, sender_id: &str, update: &PlayerState) -> UpdateOutcome {
        if !update.id.is_empty() && update.id != sender_id {
            return UpdateOutcome::IdMismatch;
        }
        match self.players.get_mut(sender_id) {
            Some(player) => {
                player.pos = update.pos;
                UpdateOutcome::Applied
            }
            None => UpdateOutcome::RegistryMiss,
        }
    }

    /// Gives every registered player a new random color.
    pub fn recolor_players<R: Rng>(&mut self, rng: &mut R) {
        debug!("Changing color of {} players", self.players.len());
        for player in self.players.iter_mut() {
            player.color = Color::new(rng.gen(), rng.gen(), rng.gen());
        }
    }

    pub fn snapshot(&self) -> Vec<PlayerState> {
        self.players.snapshot()
    }

    /// Disconnect hook; the only place the disconnect policy is consulted.
    ///
    /// Returns the removed entry under [`DisconnectPolicy::Remove`].
    pub fn on_disconnect(&mut self, id: &str) -> Option<PlayerState> {
        match self.disconnect_policy {
            DisconnectPolicy::Retain => {
                debug!("Keeping entry of disconnected player {}", id);
                None
            }
            DisconnectPolicy::Remove => {
                let removed = self.players.remove(id);
                if removed.is_some() {
                    info!("Removed player {}", id);
                }
                removed
            }
        }
    }

    pub fn disconnect_policy(&self) -> DisconnectPolicy {
        self.disconnect_policy
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(DisconnectPolicy::default())
    }
}
