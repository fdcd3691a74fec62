//! Process-level configuration.

use netroom_room::{AppConfig, EngineConfig, Lobby};
use serde::{Deserialize, Serialize};

use crate::NetroomError;

/// Everything a server process needs to stand up its lobby.
///
/// Every field has a default, so a document only names what it changes:
///
/// ```json
/// { "engine": { "tick_rate_hz": 30 }, "apps": [{ "id": "arena", "versions": ["1.0"], "max_rooms": 8 }] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
    pub engine: EngineConfig,
    pub apps: Vec<AppConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            engine: EngineConfig::default(),
            apps: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Parses a JSON document.
    pub fn from_json(text: &str) -> Result<Self, NetroomError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Builds a lobby with every configured application registered.
    pub fn lobby(&self) -> Lobby {
        let lobby = Lobby::new(self.engine.clone());
        for app in &self.apps {
            lobby.register_app(app.clone());
        }
        lobby
    }
}
