//! Collaborators between the client loop and whatever displays the world
//!
//! The loop samples a [`LocalPlayer`] for its outbound state and tells a
//! [`RemotePlayerSink`] about every other participant. Nothing is ever
//! removed through the sink.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Color, PlayerState, Vec3};
use std::collections::HashSet;

/// The locally controlled entity.
pub trait LocalPlayer {
    fn position(&self) -> Vec3;

    fn color(&self) -> Color;

    /// Color assigned by the server.
    fn set_color(&mut self, color: Color);

    /// Identity assigned by the server, e.g. for a name tag.
    fn set_id(&mut self, _id: &str) {}
}

/// Creates or updates the representation of a remote player.
pub trait RemotePlayerSink {
    fn upsert(&mut self, id: &str, state: &PlayerState);
}

/// Half the side length of the square the drifting player stays inside.
pub const ARENA_HALF_EXTENT: f32 = 10.0;

/// Headless stand-in for an input-driven avatar: random walk on the ground plane.
#[derive(Debug)]
pub struct DriftingPlayer {
    pos: Vec3,
    color: Color,
    id: Option<String>,
    step: f32,
    rng: StdRng,
}

impl DriftingPlayer {
    pub fn new(step: f32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            pos: Vec3::ZERO,
            color: Color::default(),
            id: None,
            step,
            rng,
        }
    }

    /// Moves one random step on the XZ plane, clamped to the arena.
    pub fn drift(&mut self) {
        let dx = self.rng.gen_range(-self.step..=self.step);
        let dz = self.rng.gen_range(-self.step..=self.step);
        self.pos.x = (self.pos.x + dx).clamp(-ARENA_HALF_EXTENT, ARENA_HALF_EXTENT);
        self.pos.z = (self.pos.z + dz).clamp(-ARENA_HALF_EXTENT, ARENA_HALF_EXTENT);
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl LocalPlayer for DriftingPlayer {
    fn position(&self) -> Vec3 {
        self.pos
    }

    fn color(&self) -> Color {
        self.color
    }

    fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    fn set_id(&mut self, id: &str) {
        info!("Playing as {}", id);
        self.id = Some(id.to_string());
    }
}

/// Sink that only logs what it would draw.
#[derive(Debug, Default)]
pub struct LogSink {
    spawned: HashSet<String>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawned_count(&self) -> usize {
        self.spawned.len()
    }
}

impl RemotePlayerSink for LogSink {
    fn upsert(&mut self, id: &str, state: &PlayerState) {
        if self.spawned.insert(id.to_string()) {
            info!("Spawned remote player {} at {}", id, state.pos);
        } else {
            debug!("Player {} at {}", id, state.pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drifting_player_stays_in_arena() {
        let mut player = DriftingPlayer::new(3.0, Some(11));
        for _ in 0..1_000 {
            player.drift();
            let pos = player.position();
            assert!(pos.x.abs() <= ARENA_HALF_EXTENT);
            assert!(pos.z.abs() <= ARENA_HALF_EXTENT);
            assert_eq!(pos.y, 0.0);
        }
    }

    #[test]
    fn test_drifting_player_takes_server_color_and_id() {
        let mut player = DriftingPlayer::new(1.0, Some(1));
        assert_eq!(player.color(), Color::default());
        assert_eq!(player.id(), None);

        player.set_color(Color::new(0.1, 0.2, 0.3));
        player.set_id("4");

        assert_eq!(player.color(), Color::new(0.1, 0.2, 0.3));
        assert_eq!(player.id(), Some("4"));
    }

    #[test]
    fn test_log_sink_counts_distinct_players() {
        let mut sink = LogSink::new();
        sink.upsert("0", &PlayerState::new("0"));
        sink.upsert("0", &PlayerState::new("0").with_pos(Vec3::new(1.0, 0.0, 1.0)));
        sink.upsert("1", &PlayerState::new("1"));
        assert_eq!(sink.spawned_count(), 2);
    }
}
