//! Message codec for the player synchronization protocol
//!
//! Every message is a JSON object carrying an integer `cmd` tag plus either a
//! single `player` or a batch of `players`:
//!
//! ```text
//! { "cmd": 2, "player": { "id": "0", "pos": {"x":1,"y":0,"z":2}, "color": {"r":1,"g":1,"b":1} } }
//! { "cmd": 3, "players": [ {...}, {...} ] }
//! ```
//!
//! Decoding reads the header first, so a payload that does not fit its
//! command still reports which command it claimed to be. An unknown tag is
//! not an error: it decodes to [`Message::Unrecognized`] and callers ignore it.
//!
//! Each transport data event carries exactly one message; there is no
//! additional framing.

use crate::PlayerState;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Handshake,
    PlayerInternalId,
    PlayerUpdate,
    ServerUpdate,
    SpawnExistedPlayers,
    SpawnNewPlayer,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Handshake,
        Command::PlayerInternalId,
        Command::PlayerUpdate,
        Command::ServerUpdate,
        Command::SpawnExistedPlayers,
        Command::SpawnNewPlayer,
    ];

    /// Wire tag of the command.
    pub fn tag(self) -> i64 {
        match self {
            Command::Handshake => 0,
            Command::PlayerInternalId => 1,
            Command::PlayerUpdate => 2,
            Command::ServerUpdate => 3,
            Command::SpawnExistedPlayers => 4,
            Command::SpawnNewPlayer => 5,
        }
    }

    pub fn from_tag(tag: i64) -> Option<Self> {
        Command::ALL.into_iter().find(|command| command.tag() == tag)
    }

    /// Batch commands carry `players`, the rest carry a single `player`.
    pub fn is_batch(self) -> bool {
        matches!(self, Command::ServerUpdate | Command::SpawnExistedPlayers)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Handshake => "HANDSHAKE",
            Command::PlayerInternalId => "PLAYER_INTERNALID",
            Command::PlayerUpdate => "PLAYER_UPDATE",
            Command::ServerUpdate => "SERVER_UPDATE",
            Command::SpawnExistedPlayers => "SPAWN_EXISTED_PLAYERS",
            Command::SpawnNewPlayer => "SPAWN_NEW_PLAYER",
        };
        f.write_str(name)
    }
}

/// One protocol message; a variant per command.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Handshake { player: PlayerState },
    PlayerInternalId { player: PlayerState },
    PlayerUpdate { player: PlayerState },
    ServerUpdate { players: Vec<PlayerState> },
    SpawnExistedPlayers { players: Vec<PlayerState> },
    SpawnNewPlayer { player: PlayerState },
    /// A well-formed header whose tag names no known command.
    Unrecognized { cmd: i64 },
}

impl Message {
    pub fn command(&self) -> Option<Command> {
        match self {
            Message::Handshake { .. } => Some(Command::Handshake),
            Message::PlayerInternalId { .. } => Some(Command::PlayerInternalId),
            Message::PlayerUpdate { .. } => Some(Command::PlayerUpdate),
            Message::ServerUpdate { .. } => Some(Command::ServerUpdate),
            Message::SpawnExistedPlayers { .. } => Some(Command::SpawnExistedPlayers),
            Message::SpawnNewPlayer { .. } => Some(Command::SpawnNewPlayer),
            Message::Unrecognized { .. } => None,
        }
    }

    fn tag(&self) -> i64 {
        match self {
            Message::Unrecognized { cmd } => *cmd,
            other => other.command().map_or(-1, Command::tag),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// No command tag could be read at all.
    #[error("Missing or unreadable command header: {0}")]
    Header(#[source] serde_json::Error),
    /// The tag was read but the payload does not match the command's shape.
    #[error("Malformed {command} payload: {source}")]
    Malformed {
        command: Command,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct Header {
    cmd: i64,
}

#[derive(Serialize)]
struct HeaderOut {
    cmd: i64,
}

#[derive(Serialize)]
struct SingleOut<'a> {
    cmd: i64,
    player: &'a PlayerState,
}

#[derive(Serialize)]
struct BatchOut<'a> {
    cmd: i64,
    players: &'a [PlayerState],
}

#[derive(Deserialize)]
struct SingleIn {
    player: PlayerState,
}

#[derive(Deserialize)]
struct BatchIn {
    players: Vec<PlayerState>,
}

pub fn encode(message: &Message) -> Result<Vec<u8>, EncodeError> {
    let cmd = message.tag();
    let bytes = match message {
        Message::Handshake { player }
        | Message::PlayerInternalId { player }
        | Message::PlayerUpdate { player }
        | Message::SpawnNewPlayer { player } => serde_json::to_vec(&SingleOut { cmd, player })?,
        Message::ServerUpdate { players } | Message::SpawnExistedPlayers { players } => {
            serde_json::to_vec(&BatchOut { cmd, players })?
        }
        Message::Unrecognized { .. } => serde_json::to_vec(&HeaderOut { cmd })?,
    };
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let header: Header = serde_json::from_slice(bytes).map_err(DecodeError::Header)?;

    let Some(command) = Command::from_tag(header.cmd) else {
        return Ok(Message::Unrecognized { cmd: header.cmd });
    };

    let malformed = |source| DecodeError::Malformed { command, source };

    if command.is_batch() {
        let BatchIn { players } = serde_json::from_slice(bytes).map_err(malformed)?;
        Ok(match command {
            Command::ServerUpdate => Message::ServerUpdate { players },
            _ => Message::SpawnExistedPlayers { players },
        })
    } else {
        let SingleIn { player } = serde_json::from_slice(bytes).map_err(malformed)?;
        Ok(match command {
            Command::Handshake => Message::Handshake { player },
            Command::PlayerInternalId => Message::PlayerInternalId { player },
            Command::PlayerUpdate => Message::PlayerUpdate { player },
            _ => Message::SpawnNewPlayer { player },
        })
    }
}
