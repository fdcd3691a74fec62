//! Engine settings, room options and the room state machine.

use std::time::Duration;

use netroom_protocol::messages::AttributesMap;
use netroom_tick::{TickConfig, TickPolicy};
use serde::{Deserialize, Serialize};

use crate::LobbyError;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Settings shared by every room a lobby runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ticks per second of each room loop.
    pub tick_rate_hz: u32,

    /// What a room does when it falls behind its tick schedule.
    pub tick_policy: TickPolicy,

    /// Upper bound of transport events handled in one tick. The rest wait
    /// for the next tick.
    pub max_inbound_per_tick: usize,

    /// How long a room may stay empty before it stops itself.
    pub idle_grace: Duration,

    /// Capacity of each room actor's control channel.
    pub command_channel_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: TickConfig::DEFAULT_TICK_RATE_HZ,
            tick_policy: TickPolicy::Skip,
            max_inbound_per_tick: 256,
            idle_grace: Duration::from_secs(20),
            command_channel_size: 16,
        }
    }
}

impl EngineConfig {
    /// Tick clock settings for one room.
    pub fn tick_config(&self) -> TickConfig {
        TickConfig {
            tick_rate_hz: self.tick_rate_hz,
            policy: self.tick_policy,
            ..TickConfig::default()
        }
    }
}

// ---------------------------------------------------------------------------
// RoomOptions
// ---------------------------------------------------------------------------

/// What happens when the master client leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPolicy {
    /// The earliest-joined remaining client becomes master.
    #[default]
    Continue,
    /// Everyone is dropped and the room stops.
    Stop,
}

/// Per-room settings chosen by whoever creates the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomOptions {
    pub name: String,
    /// Maximum number of registered clients.
    pub capacity: u16,
    /// Listed by lobby queries.
    pub visible: bool,
    /// Required on registration when set.
    pub password: Option<String>,
    pub migration: MigrationPolicy,
    pub attributes: AttributesMap,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            name: String::from("room"),
            capacity: 8,
            visible: true,
            password: None,
            migration: MigrationPolicy::default(),
            attributes: AttributesMap::new(),
        }
    }
}

impl RoomOptions {
    pub fn validate(&self) -> Result<(), LobbyError> {
        if self.name.trim().is_empty() {
            return Err(LobbyError::InvalidOptions("room name is empty".into()));
        }
        if self.capacity == 0 {
            return Err(LobbyError::InvalidOptions("capacity must be at least 1".into()));
        }
        if matches!(&self.password, Some(p) if p.is_empty()) {
            return Err(LobbyError::InvalidOptions(
                "password must be non-empty when set".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// An application allowed to open rooms in a lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub id: String,
    /// Client versions rooms can be created for.
    pub versions: Vec<String>,
    /// Live rooms this application may hold across all versions.
    pub max_rooms: usize,
}

impl AppConfig {
    pub fn new(id: impl Into<String>, versions: &[&str], max_rooms: usize) -> Self {
        Self {
            id: id.into(),
            versions: versions.iter().map(|v| v.to_string()).collect(),
            max_rooms,
        }
    }

    pub fn supports(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// Lifecycle of a room.
///
/// ```text
/// Created → Running → Stopping → Stopped
/// ```
///
/// A room that never started may go straight from `Created` to
/// `Stopping`. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl RoomState {
    /// Returns `true` if the room accepts registrations and requests.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Created, Self::Running)
                | (Self::Created, Self::Stopping)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}
