//! Loaded scenes and the master's load/unload requests.

use std::collections::BTreeSet;

use netroom_protocol::WireEnvelope;
use netroom_protocol::messages::{
    EntityId, LoadSceneCommand, LoadScenesRequest, SceneLoadMode, UnloadScenesCommand,
    UnloadScenesRequest,
};
use netroom_transport::ClientId;
use tracing::{info, warn};

use crate::buffer::BufferToken;
use crate::{Room, RoomError};

/// A loaded scene.
#[derive(Debug)]
pub struct Scene {
    index: u8,
    mode: SceneLoadMode,
    load_token: BufferToken,
    pub(crate) entities: BTreeSet<EntityId>,
}

impl Scene {
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Mode of the buffered load command for this scene.
    pub fn mode(&self) -> SceneLoadMode {
        self.mode
    }

    /// Entities scoped to this scene.
    pub fn entities(&self) -> &BTreeSet<EntityId> {
        &self.entities
    }
}

/// Loaded scenes in load order, plus which one is active.
///
/// The active scene is the first scene of the last `Single` load. When it is
/// unloaded the earliest-loaded remaining scene takes over.
#[derive(Debug, Default)]
pub struct SceneTable {
    scenes: Vec<Scene>,
    active: Option<u8>,
}

impl SceneTable {
    pub fn is_loaded(&self, index: u8) -> bool {
        self.scenes.iter().any(|s| s.index == index)
    }

    pub fn get(&self, index: u8) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.index == index)
    }

    pub(crate) fn get_mut(&mut self, index: u8) -> Option<&mut Scene> {
        self.scenes.iter_mut().find(|s| s.index == index)
    }

    pub fn active(&self) -> Option<u8> {
        self.active
    }

    /// Loaded indices in load order.
    pub fn indices(&self) -> Vec<u8> {
        self.scenes.iter().map(|s| s.index).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.iter()
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    fn insert(&mut self, scene: Scene) {
        self.active.get_or_insert(scene.index);
        self.scenes.push(scene);
    }

    fn remove(&mut self, index: u8) -> Option<Scene> {
        let position = self.scenes.iter().position(|s| s.index == index)?;
        let scene = self.scenes.remove(position);
        if self.active == Some(index) {
            self.active = self.scenes.first().map(|s| s.index);
        }
        Some(scene)
    }

    fn take_all(&mut self) -> Vec<Scene> {
        self.active = None;
        std::mem::take(&mut self.scenes)
    }
}

fn has_duplicates(indices: &[u8]) -> bool {
    let mut seen = BTreeSet::new();
    !indices.iter().all(|index| seen.insert(*index))
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

impl Room {
    /// Master-only scene load.
    ///
    /// `Single` replaces everything loaded (and the entities scoped to it)
    /// and makes the first listed scene active. `Additive` must not name a
    /// loaded scene.
    pub(crate) fn load_scenes(
        &mut self,
        client: ClientId,
        request: LoadScenesRequest,
    ) -> Result<(), RoomError> {
        self.require_master(client, "load scenes")?;
        let Some(&first) = request.scenes.first() else {
            return Err(RoomError::InvalidState("no scenes to load".into()));
        };
        if has_duplicates(&request.scenes) {
            return Err(RoomError::InvalidState("duplicate scene index".into()));
        }
        if request.mode == SceneLoadMode::Additive {
            if let Some(index) = request.scenes.iter().find(|i| self.scenes.is_loaded(**i)) {
                return Err(RoomError::InvalidState(format!("scene {index} is already loaded")));
            }
        }

        // Later scenes of a single load are added on top of the first one.
        let commands = request
            .scenes
            .iter()
            .enumerate()
            .map(|(position, &scene)| -> Result<(u8, SceneLoadMode, WireEnvelope), RoomError> {
                let mode = match position {
                    0 => request.mode,
                    _ => SceneLoadMode::Additive,
                };
                let envelope = self.encode(&LoadSceneCommand { scene, mode })?;
                Ok((scene, mode, envelope))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if request.mode == SceneLoadMode::Single {
            for scene in self.scenes.take_all() {
                self.drop_scene(scene);
            }
        }
        for (index, mode, envelope) in commands {
            let load_token = self.buffer.push(envelope.clone());
            self.scenes.insert(Scene {
                index,
                mode,
                load_token,
                entities: BTreeSet::new(),
            });
            self.broadcast_envelope(&envelope, None);
        }
        if request.mode == SceneLoadMode::Single {
            self.scenes.active = Some(first);
        }

        info!(
            room_id = %self.id,
            scenes = ?request.scenes,
            mode = ?request.mode,
            active = ?self.scenes.active,
            "scenes loaded"
        );
        Ok(())
    }

    /// Master-only scene unload. At least one scene must stay loaded.
    pub(crate) fn unload_scenes(
        &mut self,
        client: ClientId,
        request: UnloadScenesRequest,
    ) -> Result<(), RoomError> {
        self.require_master(client, "unload scenes")?;
        if request.scenes.is_empty() {
            return Err(RoomError::InvalidState("no scenes to unload".into()));
        }
        if has_duplicates(&request.scenes) {
            return Err(RoomError::InvalidState("duplicate scene index".into()));
        }
        if let Some(index) = request.scenes.iter().find(|i| !self.scenes.is_loaded(**i)) {
            return Err(RoomError::NotFound(format!("scene {index}")));
        }
        if request.scenes.len() >= self.scenes.len() {
            return Err(RoomError::InvalidState("cannot unload the last scene".into()));
        }

        let envelope = self.encode(&UnloadScenesCommand {
            scenes: request.scenes.clone(),
        })?;
        for &index in &request.scenes {
            if let Some(scene) = self.scenes.remove(index) {
                self.drop_scene(scene);
            }
        }
        self.broadcast_envelope(&envelope, None);

        info!(
            room_id = %self.id,
            scenes = ?request.scenes,
            active = ?self.scenes.active,
            "scenes unloaded"
        );
        Ok(())
    }

    /// Releases a scene's load message and the entities scoped to it.
    fn drop_scene(&mut self, scene: Scene) {
        self.buffer.remove(scene.load_token);
        for id in scene.entities {
            if let Err(error) = self.remove_entity(id, false) {
                warn!(
                    room_id = %self.id,
                    scene = scene.index,
                    entity = %id,
                    %error,
                    "scene listed an entity the room no longer has"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MessageBuffer;

    fn scene(buffer: &mut MessageBuffer, index: u8) -> Scene {
        Scene {
            index,
            mode: SceneLoadMode::Additive,
            load_token: buffer.push(WireEnvelope::new(0, vec![index])),
            entities: BTreeSet::new(),
        }
    }

    #[test]
    fn test_first_insert_becomes_active() {
        let mut buffer = MessageBuffer::new();
        let mut table = SceneTable::default();
        assert_eq!(table.active(), None);
        table.insert(scene(&mut buffer, 4));
        table.insert(scene(&mut buffer, 2));
        assert_eq!(table.active(), Some(4));
        assert_eq!(table.indices(), vec![4, 2]);
    }

    #[test]
    fn test_removing_active_falls_back_to_earliest_loaded() {
        let mut buffer = MessageBuffer::new();
        let mut table = SceneTable::default();
        for index in [1, 5, 3] {
            table.insert(scene(&mut buffer, index));
        }
        assert!(table.remove(1).is_some());
        assert_eq!(table.active(), Some(5));
        assert!(table.remove(9).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_take_all_clears_active() {
        let mut buffer = MessageBuffer::new();
        let mut table = SceneTable::default();
        table.insert(scene(&mut buffer, 1));
        assert_eq!(table.take_all().len(), 1);
        assert!(table.is_empty());
        assert_eq!(table.active(), None);
    }

    #[test]
    fn test_dropping_scene_tolerates_stale_entity_ids() {
        use netroom_protocol::messages::RoomId;
        use netroom_transport::LocalTransport;

        let (transport, _hub) = LocalTransport::pair();
        let mut room =
            Room::new(RoomId(1), crate::RoomOptions::default(), Box::new(transport)).unwrap();
        let mut stale = scene(&mut room.buffer, 3);
        stale.entities.insert(EntityId(41));

        room.drop_scene(stale);

        assert!(room.buffer().is_empty());
        assert_eq!(room.entities().count(), 0);
    }

    #[test]
    fn test_duplicate_detection() {
        assert!(has_duplicates(&[1, 2, 1]));
        assert!(!has_duplicates(&[1, 2, 3]));
        assert!(!has_duplicates(&[]));
    }
}
