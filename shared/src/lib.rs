use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod protocol;
pub mod registry;
pub mod timer;
pub mod transport;

pub const DEFAULT_PORT: u16 = 8080;
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(30);
pub const COLOR_CHANGE_INTERVAL: Duration = Duration::from_secs(1);
pub const SELF_PUSH_DELAY: Duration = Duration::from_millis(100);
pub const SELF_PUSH_INTERVAL: Duration = Duration::from_millis(30);
pub const TICK_INTERVAL: Duration = Duration::from_millis(16);
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Stable player identity, assigned by the server from the connection's slot index.
pub type PlayerId = String;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// RGB color with channels in `[0, 1]`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

/// Observable state of one participant.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct PlayerState {
    pub id: PlayerId,
    pub pos: Vec3,
    pub color: Color,
}

impl PlayerState {
    /// A freshly accepted player: zero position, default color.
    pub fn new(id: impl Into<PlayerId>) -> Self {
        Self {
            id: id.into(),
            pos: Vec3::ZERO,
            color: Color::default(),
        }
    }

    pub fn with_pos(mut self, pos: Vec3) -> Self {
        self.pos = pos;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }
}
