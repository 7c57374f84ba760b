//! Client-side mirror of the server's player registry
//!
//! The mirror is filled lazily from spawn and snapshot messages and entries
//! are never removed. The local player's own position is authored locally:
//! snapshots only ever contribute its color.

use crate::presentation::{LocalPlayer, RemotePlayerSink};
use log::debug;
use shared::registry::PlayerRegistry;
use shared::{PlayerId, PlayerState};

#[derive(Debug, Default)]
pub struct ClientGameState {
    pub players: PlayerRegistry,
    local_id: Option<PlayerId>,
}

impl ClientGameState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn is_local(&self, id: &str) -> bool {
        self.local_id.as_deref() == Some(id)
    }

    /// Stores the id the server assigned to this client.
    pub fn assign_id(&mut self, id: PlayerId) {
        debug!("Assigned player id {}", id);
        self.local_id = Some(id);
    }

    /// Creates or overwrites the mirror entry for `player`.
    pub fn spawn<S: RemotePlayerSink>(&mut self, player: PlayerState, sink: &mut S) {
        if !self.is_local(&player.id) {
            sink.upsert(&player.id, &player);
        }
        self.players.upsert(player);
    }

    pub fn spawn_existing<S: RemotePlayerSink>(&mut self, players: Vec<PlayerState>, sink: &mut S) {
        for player in players {
            self.spawn(player, sink);
        }
    }

    /// Applies a full server snapshot.
    ///
    /// Known remote players take position and color. The local player takes
    /// color only. Ids not yet spawned locally are skipped.
    pub fn apply_server_update<L, S>(&mut self, players: Vec<PlayerState>, local: &mut L, sink: &mut S)
    where
        L: LocalPlayer,
        S: RemotePlayerSink,
    {
        for update in players {
            if self.is_local(&update.id) {
                local.set_color(update.color);
                if let Some(me) = self.players.get_mut(&update.id) {
                    me.color = update.color;
                }
            } else if let Some(existing) = self.players.get_mut(&update.id) {
                existing.pos = update.pos;
                existing.color = update.color;
                sink.upsert(&update.id, existing);
            } else {
                debug!("Ignoring update for unspawned player {}", update.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Color, Vec3};

    #[derive(Default)]
    struct RecordingSink {
        upserts: Vec<PlayerState>,
    }

    impl RemotePlayerSink for RecordingSink {
        fn upsert(&mut self, _id: &str, state: &PlayerState) {
            self.upserts.push(state.clone());
        }
    }

    #[derive(Default)]
    struct TestPlayer {
        pos: Vec3,
        color: Color,
    }

    impl LocalPlayer for TestPlayer {
        fn position(&self) -> Vec3 {
            self.pos
        }

        fn color(&self) -> Color {
            self.color
        }

        fn set_color(&mut self, color: Color) {
            self.color = color;
        }
    }

    fn red() -> Color {
        Color::new(1.0, 0.0, 0.0)
    }

    #[test]
    fn test_spawn_is_idempotent() {
        let mut once = ClientGameState::new();
        let mut twice = ClientGameState::new();
        let mut sink = RecordingSink::default();
        let players = vec![PlayerState::new("0"), PlayerState::new("1")];

        once.spawn_existing(players.clone(), &mut sink);
        twice.spawn_existing(players.clone(), &mut sink);
        twice.spawn_existing(players, &mut sink);
        twice.spawn(PlayerState::new("1"), &mut sink);

        assert_eq!(once.players, twice.players);
        assert_eq!(twice.players.len(), 2);
    }

    #[test]
    fn test_spawn_of_local_player_skips_sink() {
        let mut state = ClientGameState::new();
        let mut sink = RecordingSink::default();
        state.assign_id("2".to_string());

        state.spawn(PlayerState::new("2"), &mut sink);
        state.spawn(PlayerState::new("3"), &mut sink);

        assert!(state.players.contains("2"));
        assert_eq!(sink.upserts.len(), 1);
        assert_eq!(sink.upserts[0].id, "3");
    }

    #[test]
    fn test_server_update_overwrites_remote_players() {
        let mut state = ClientGameState::new();
        let mut sink = RecordingSink::default();
        let mut local = TestPlayer::default();
        state.assign_id("0".to_string());
        state.spawn(PlayerState::new("1"), &mut sink);

        let update = PlayerState::new("1")
            .with_pos(Vec3::new(1.0, 0.0, 2.0))
            .with_color(red());
        state.apply_server_update(vec![update.clone()], &mut local, &mut sink);

        assert_eq!(state.players.get("1"), Some(&update));
        assert_eq!(sink.upserts.last(), Some(&update));
    }

    #[test]
    fn test_server_update_only_recolors_local_player() {
        let mut state = ClientGameState::new();
        let mut sink = RecordingSink::default();
        let mut local = TestPlayer {
            pos: Vec3::new(4.0, 0.0, 4.0),
            color: Color::default(),
        };
        state.assign_id("0".to_string());
        state.spawn(PlayerState::new("0"), &mut sink);

        let from_server = PlayerState::new("0")
            .with_pos(Vec3::new(-7.0, 0.0, -7.0))
            .with_color(red());
        state.apply_server_update(vec![from_server], &mut local, &mut sink);

        assert_eq!(local.color, red());
        assert_eq!(local.pos, Vec3::new(4.0, 0.0, 4.0));
        let mirrored = state.players.get("0").unwrap();
        assert_eq!(mirrored.pos, Vec3::ZERO);
        assert_eq!(mirrored.color, red());
        assert!(sink.upserts.is_empty());
    }

    #[test]
    fn test_server_update_ignores_unknown_players() {
        let mut state = ClientGameState::new();
        let mut sink = RecordingSink::default();
        let mut local = TestPlayer::default();

        state.apply_server_update(vec![PlayerState::new("8")], &mut local, &mut sink);

        assert!(state.players.is_empty());
        assert!(sink.upserts.is_empty());
    }
}
