//! Room registry: id allocation, creation per application and version,
//! listing and reaping.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use netroom_protocol::messages::{AttributesMap, RoomId};
use netroom_transport::TransportContext;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::actor::{RoomHandle, spawn_room};
use crate::{AppConfig, EngineConfig, LobbyError, Room, RoomError, RoomOptions, RoomState};

/// A room as the lobby lists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomBasicInfo {
    pub id: RoomId,
    pub app_id: String,
    pub version: String,
    pub name: String,
    /// Registered clients.
    pub occupancy: usize,
    pub capacity: u16,
    pub visible: bool,
    pub password_protected: bool,
    pub attributes: AttributesMap,
    pub state: RoomState,
}

struct RoomEntry {
    app_id: String,
    version: String,
    handle: RoomHandle,
    task: JoinHandle<()>,
}

impl RoomEntry {
    fn is_finished(&self) -> bool {
        self.task.is_finished() || self.handle.info().state.is_stopped()
    }
}

#[derive(Default)]
struct LobbyInner {
    apps: HashMap<String, AppConfig>,
    rooms: BTreeMap<RoomId, RoomEntry>,
    /// Handed out by `reserve` but not created yet.
    reserved: BTreeSet<RoomId>,
    /// Ids of reaped rooms, reused lowest first.
    free: BTreeSet<u32>,
    next_id: u32,
}

impl LobbyInner {
    fn reap(&mut self) -> Vec<RoomId> {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, entry)| entry.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            self.rooms.remove(id);
            self.free.insert(id.0);
        }
        if !finished.is_empty() {
            info!(reaped = finished.len(), rooms = self.rooms.len(), "rooms reaped");
        }
        finished
    }
}

/// Every room a process runs, grouped by application.
///
/// All bookkeeping sits behind one mutex. The lock is never held across an
/// await, and listing reads the info each room publishes instead of asking
/// the room.
pub struct Lobby {
    engine: EngineConfig,
    inner: Mutex<LobbyInner>,
}

impl Lobby {
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            engine,
            inner: Mutex::new(LobbyInner {
                next_id: 1,
                ..LobbyInner::default()
            }),
        }
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    fn lock(&self) -> MutexGuard<'_, LobbyInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allows `app` to open rooms. Replaces an earlier registration.
    pub fn register_app(&self, app: AppConfig) {
        info!(app = %app.id, versions = ?app.versions, max_rooms = app.max_rooms, "app registered");
        self.lock().apps.insert(app.id.clone(), app);
    }

    /// Hands out an unused room id, lowest free first. Stopped rooms are
    /// reaped first so their ids can be reused.
    pub fn reserve(&self) -> RoomId {
        let mut inner = self.lock();
        inner.reap();
        let id = match inner.free.pop_first() {
            Some(id) => id,
            None => {
                let id = inner.next_id;
                inner.next_id += 1;
                id
            }
        };
        let id = RoomId(id);
        inner.reserved.insert(id);
        debug!(room_id = %id, "room id reserved");
        id
    }

    /// Returns a reserved id that was never used to create a room.
    pub fn release(&self, id: RoomId) -> bool {
        let mut inner = self.lock();
        if inner.reserved.remove(&id) {
            inner.free.insert(id.0);
            true
        } else {
            false
        }
    }

    /// Creates and starts a room under a reserved id.
    pub fn create(
        &self,
        room_id: RoomId,
        app_id: &str,
        version: &str,
        options: RoomOptions,
        transport: Box<dyn TransportContext>,
    ) -> Result<RoomHandle, LobbyError> {
        options.validate()?;
        let mut inner = self.lock();
        if !inner.reserved.contains(&room_id) {
            return Err(LobbyError::NotFound(room_id));
        }

        let app = inner
            .apps
            .get(app_id)
            .filter(|app| app.supports(version))
            .ok_or_else(|| LobbyError::UnknownVersion {
                app: app_id.to_string(),
                version: version.to_string(),
            })?;
        let max = app.max_rooms;
        let live = inner
            .rooms
            .values()
            .filter(|entry| entry.app_id == app_id && !entry.is_finished())
            .count();
        if live >= max {
            return Err(LobbyError::RoomLimit {
                app: app_id.to_string(),
                max,
            });
        }

        let room = Room::new(room_id, options, transport)?
            .with_app(app_id, version)
            .with_engine(&self.engine);
        let (handle, task) = spawn_room(room, &self.engine);

        inner.reserved.remove(&room_id);
        inner.rooms.insert(
            room_id,
            RoomEntry {
                app_id: app_id.to_string(),
                version: version.to_string(),
                handle: handle.clone(),
                task,
            },
        );
        info!(%room_id, app = app_id, version, rooms = inner.rooms.len(), "room created");
        Ok(handle)
    }

    /// Reserves an id and creates a room with it.
    pub fn open(
        &self,
        app_id: &str,
        version: &str,
        options: RoomOptions,
        transport: Box<dyn TransportContext>,
    ) -> Result<RoomHandle, LobbyError> {
        let room_id = self.reserve();
        self.create(room_id, app_id, version, options, transport)
            .inspect_err(|_| {
                self.release(room_id);
            })
    }

    /// Visible, running rooms of one application version, by id.
    pub fn query(&self, app_id: &str, version: &str) -> Vec<RoomBasicInfo> {
        self.lock()
            .rooms
            .values()
            .filter(|entry| entry.app_id == app_id && entry.version == version)
            .map(|entry| entry.handle.info())
            .filter(|info| info.visible && info.state.is_running())
            .collect()
    }

    pub fn get(&self, room_id: RoomId) -> Option<RoomHandle> {
        self.lock()
            .rooms
            .get(&room_id)
            .map(|entry| entry.handle.clone())
    }

    /// Stops a room. Stopping a room that already stopped is not an error.
    pub async fn stop(&self, room_id: RoomId) -> Result<(), LobbyError> {
        let handle = self.get(room_id).ok_or(LobbyError::NotFound(room_id))?;
        match handle.stop().await {
            Ok(()) | Err(RoomError::Unavailable(_)) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Forgets stopped rooms and frees their ids.
    ///
    /// [`reserve`](Self::reserve) and [`open`](Self::open) do this on their
    /// own; calling it directly only makes the ids free sooner.
    pub fn reap(&self) -> Vec<RoomId> {
        self.lock().reap()
    }

    /// Rooms created and not reaped yet.
    pub fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }
}

impl std::fmt::Debug for Lobby {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Lobby")
            .field("apps", &inner.apps.len())
            .field("rooms", &inner.rooms.len())
            .field("reserved", &inner.reserved.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_info_json_shape() {
        let info = RoomBasicInfo {
            id: RoomId(3),
            app_id: "arena".into(),
            version: "1.0".into(),
            name: "duel".into(),
            occupancy: 1,
            capacity: 2,
            visible: true,
            password_protected: false,
            attributes: AttributesMap::new(),
            state: RoomState::Running,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["state"], "Running");
        assert_eq!(json["occupancy"], 1);

        let back: RoomBasicInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_debug_reports_counts() {
        let lobby = Lobby::new(EngineConfig::default());
        lobby.register_app(AppConfig::new("arena", &["1.0"], 1));
        lobby.reserve();
        let debug = format!("{lobby:?}");
        assert!(debug.contains("apps: 1"));
        assert!(debug.contains("reserved: 1"));
    }
}
