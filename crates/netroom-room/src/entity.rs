//! Entities, ownership and the replay history each entity owns.

use std::collections::{BTreeSet, HashMap};

use netroom_protocol::WireEnvelope;
use netroom_protocol::messages::{
    AttributesMap, ChangeEntityOwnerCommand, DestroyEntityCommand, DestroyEntityRequest, EntityId,
    EntityType, PersistenceFlags, RemoteBufferMode, SpawnEntityCommand, SpawnEntityRequest,
    SpawnEntityResponse, TakeoverEntityRequest, TransferEntityRequest,
};
use netroom_transport::ClientId;
use tracing::debug;

use crate::buffer::{BufferToken, MessageBuffer};
use crate::{Room, RoomError};

/// A replicated object.
///
/// Besides its own state an entity tracks every message it put in the
/// replay buffer: the spawn, the latest ownership change, buffered RPCs per
/// method and the latest value of each sync var. Destroying the entity
/// releases all of them.
#[derive(Debug)]
pub struct Entity {
    id: EntityId,
    owner: Option<ClientId>,
    kind: EntityType,
    persistence: PersistenceFlags,
    scene: Option<u8>,
    resource: String,
    attributes: AttributesMap,

    spawn_token: BufferToken,
    owner_token: Option<BufferToken>,
    rpc_tokens: HashMap<String, Vec<BufferToken>>,
    sync_var_tokens: HashMap<u16, BufferToken>,
}

impl Entity {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn owner(&self) -> Option<ClientId> {
        self.owner
    }

    pub fn kind(&self) -> EntityType {
        self.kind
    }

    pub fn persistence(&self) -> PersistenceFlags {
        self.persistence
    }

    /// Scene the entity lives in. `None` for unscoped entities.
    pub fn scene(&self) -> Option<u8> {
        self.scene
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn attributes(&self) -> &AttributesMap {
        &self.attributes
    }

    pub fn is_master_object(&self) -> bool {
        self.kind.is_master_object()
    }

    /// Buffered RPC calls for `method`.
    pub fn buffered_rpc_count(&self, method: &str) -> usize {
        self.rpc_tokens.get(method).map_or(0, Vec::len)
    }

    /// Every replay-buffer entry this entity holds.
    pub fn buffer_tokens(&self) -> Vec<BufferToken> {
        let mut tokens = vec![self.spawn_token];
        tokens.extend(self.owner_token);
        tokens.extend(self.rpc_tokens.values().flatten().copied());
        tokens.extend(self.sync_var_tokens.values().copied());
        tokens.sort();
        tokens
    }

    pub(crate) fn buffer_rpc(
        &mut self,
        buffer: &mut MessageBuffer,
        method: &str,
        mode: RemoteBufferMode,
        envelope: WireEnvelope,
    ) {
        match mode {
            RemoteBufferMode::None => {}
            RemoteBufferMode::Last => {
                let tokens = self.rpc_tokens.entry(method.to_owned()).or_default();
                for token in tokens.drain(..) {
                    buffer.remove(token);
                }
                tokens.push(buffer.push(envelope));
            }
            RemoteBufferMode::All => {
                let token = buffer.push(envelope);
                self.rpc_tokens.entry(method.to_owned()).or_default().push(token);
            }
        }
    }

    pub(crate) fn buffer_sync_var(
        &mut self,
        buffer: &mut MessageBuffer,
        field: u16,
        envelope: WireEnvelope,
    ) {
        let previous = self.sync_var_tokens.get(&field).copied();
        let token = buffer.replace(previous, envelope);
        self.sync_var_tokens.insert(field, token);
    }

    fn buffer_ownership(&mut self, buffer: &mut MessageBuffer, envelope: WireEnvelope) {
        self.owner_token = Some(buffer.replace(self.owner_token, envelope));
    }

    fn release(&mut self, buffer: &mut MessageBuffer) {
        buffer.remove(self.spawn_token);
        if let Some(token) = self.owner_token.take() {
            buffer.remove(token);
        }
        for token in self.rpc_tokens.drain().flat_map(|(_, tokens)| tokens) {
            buffer.remove(token);
        }
        for (_, token) in self.sync_var_tokens.drain() {
            buffer.remove(token);
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

impl Room {
    pub(crate) fn spawn_entity(
        &mut self,
        client: ClientId,
        request: SpawnEntityRequest,
    ) -> Result<(), RoomError> {
        if request.kind.is_master_object() {
            self.require_master(client, "spawn master objects")?;
        }
        let scene = self.spawn_scope(&request)?;

        let id = EntityId(self.next_entity);
        let command = SpawnEntityCommand {
            entity: id,
            owner: Some(client),
            resource: request.resource,
            kind: request.kind,
            persistence: request.persistence,
            scene,
            attributes: request.attributes,
        };
        let announce = self.encode(&command)?;
        let response = self.encode(&SpawnEntityResponse {
            token: request.token,
            entity: id,
            scene,
        })?;

        self.next_entity += 1;
        let spawn_token = self.buffer.push(announce.clone());
        if let Some(target) = scene.and_then(|index| self.scenes.get_mut(index)) {
            target.entities.insert(id);
        }
        if let Some(owner) = self.clients.get_mut(&client) {
            owner.owned.insert(id);
        }
        self.entities.insert(
            id,
            Entity {
                id,
                owner: Some(client),
                kind: command.kind,
                persistence: command.persistence,
                scene,
                resource: command.resource,
                attributes: command.attributes,
                spawn_token,
                owner_token: None,
                rpc_tokens: HashMap::new(),
                sync_var_tokens: HashMap::new(),
            },
        );

        self.enqueue(client, response);
        self.broadcast_envelope(&announce, Some(client));
        debug!(room_id = %self.id, %client, entity = %id, kind = ?command.kind, "entity spawned");
        Ok(())
    }

    /// Scene a new entity belongs to.
    ///
    /// Entities are unscoped with `SCENE_LOAD` (scene objects excepted).
    /// Otherwise they go to the named scene, which must be loaded, or to the
    /// active one, which must exist.
    fn spawn_scope(&self, request: &SpawnEntityRequest) -> Result<Option<u8>, RoomError> {
        let require_loaded = |index: u8| {
            if self.scenes.is_loaded(index) {
                Ok(Some(index))
            } else {
                Err(RoomError::NotFound(format!("scene {index}")))
            }
        };

        if request.kind == EntityType::SceneObject {
            let index = request.scene.or(self.scenes.active()).ok_or_else(|| {
                RoomError::InvalidState("scene objects need a loaded scene".into())
            })?;
            return require_loaded(index);
        }
        if request.persistence.contains(PersistenceFlags::SCENE_LOAD) {
            return Ok(None);
        }
        match request.scene {
            Some(index) => require_loaded(index),
            None => self
                .scenes
                .active()
                .map(Some)
                .ok_or_else(|| RoomError::InvalidState("no active scene".into())),
        }
    }

    pub(crate) fn transfer_entity(
        &mut self,
        client: ClientId,
        request: TransferEntityRequest,
    ) -> Result<(), RoomError> {
        if !self.clients.contains_key(&request.client) {
            return Err(RoomError::NotFound(request.client.to_string()));
        }
        self.hand_over(client, request.entity, request.client, "transfer")
    }

    pub(crate) fn takeover_entity(
        &mut self,
        client: ClientId,
        request: TakeoverEntityRequest,
    ) -> Result<(), RoomError> {
        self.hand_over(client, request.entity, client, "take over")
    }

    fn hand_over(
        &mut self,
        client: ClientId,
        id: EntityId,
        to: ClientId,
        action: &'static str,
    ) -> Result<(), RoomError> {
        let entity = self.check_authority(client, id, action)?;
        if entity.kind == EntityType::SceneObject {
            return Err(RoomError::InvalidState(format!(
                "{id} is a scene object and follows the master"
            )));
        }

        let command = ChangeEntityOwnerCommand {
            entity: id,
            owner: Some(to),
            kind: EntityType::Dynamic,
        };
        let envelope = self.encode(&command)?;
        self.set_owner(id, command.owner, command.kind, envelope.clone());
        self.broadcast_envelope(&envelope, None);
        debug!(room_id = %self.id, %client, entity = %id, owner = %to, "entity owner changed");
        Ok(())
    }

    pub(crate) fn destroy_entity(
        &mut self,
        client: ClientId,
        request: DestroyEntityRequest,
    ) -> Result<(), RoomError> {
        self.check_authority(client, request.entity, "destroy")?;
        self.remove_entity(request.entity, true)?;
        debug!(room_id = %self.id, %client, entity = %request.entity, "entity destroyed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Master or current owner.
    fn check_authority(
        &self,
        client: ClientId,
        id: EntityId,
        action: &'static str,
    ) -> Result<&Entity, RoomError> {
        let entity = self
            .entities
            .get(&id)
            .ok_or_else(|| RoomError::NotFound(id.to_string()))?;
        if entity.owner == Some(client) || self.master == Some(client) {
            Ok(entity)
        } else {
            Err(RoomError::Unauthorized { client, action })
        }
    }

    /// Applies an ownership change and replaces the buffered ownership
    /// message. Does not broadcast.
    fn set_owner(
        &mut self,
        id: EntityId,
        owner: Option<ClientId>,
        kind: EntityType,
        envelope: WireEnvelope,
    ) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let previous = entity.owner;
        entity.owner = owner;
        entity.kind = kind;
        entity.buffer_ownership(&mut self.buffer, envelope);

        if let Some(previous) = previous.and_then(|p| self.clients.get_mut(&p)) {
            previous.owned.remove(&id);
        }
        if let Some(next) = owner.and_then(|o| self.clients.get_mut(&o)) {
            next.owned.insert(id);
        }
    }

    /// Gives every master object to the current master.
    ///
    /// Clients learn about this from `ChangeMasterCommand`, so only the
    /// buffered ownership messages change.
    pub(crate) fn reassign_master_objects(&mut self) -> Result<(), RoomError> {
        let master = self.master;
        let moved: Vec<(EntityId, EntityType)> = self
            .entities
            .values()
            .filter(|e| e.is_master_object() && e.owner != master)
            .map(|e| (e.id, e.kind))
            .collect();
        for (id, kind) in moved {
            let envelope = self.encode(&ChangeEntityOwnerCommand {
                entity: id,
                owner: master,
                kind,
            })?;
            self.set_owner(id, master, kind, envelope);
        }
        Ok(())
    }

    /// Orphans or destroys what a departed client owned.
    pub(crate) fn release_entities_of(
        &mut self,
        client: ClientId,
        owned: &BTreeSet<EntityId>,
    ) -> Result<(), RoomError> {
        for &id in owned {
            let Some(entity) = self.entities.get(&id) else {
                continue;
            };
            // Master objects already moved to the new master.
            if entity.owner != Some(client) {
                continue;
            }
            if entity.persistence.contains(PersistenceFlags::PLAYER_DISCONNECTION) {
                let command = ChangeEntityOwnerCommand {
                    entity: id,
                    owner: self.master,
                    kind: EntityType::Orphan,
                };
                let envelope = self.encode(&command)?;
                self.set_owner(id, command.owner, command.kind, envelope.clone());
                self.broadcast_envelope(&envelope, None);
                debug!(room_id = %self.id, %client, entity = %id, "entity orphaned");
            } else {
                self.remove_entity(id, true)?;
            }
        }
        Ok(())
    }

    /// Removes an entity and all of its buffered messages.
    ///
    /// With `announce` the clients get a `DestroyEntityCommand`; scene
    /// unloads skip it because clients drop the scene's contents themselves.
    pub(crate) fn remove_entity(&mut self, id: EntityId, announce: bool) -> Result<(), RoomError> {
        let envelope = if announce {
            Some(self.encode(&DestroyEntityCommand { entity: id })?)
        } else {
            None
        };
        let mut entity = self
            .entities
            .remove(&id)
            .ok_or_else(|| RoomError::NotFound(id.to_string()))?;
        entity.release(&mut self.buffer);

        if let Some(owner) = entity.owner.and_then(|o| self.clients.get_mut(&o)) {
            owner.owned.remove(&id);
        }
        if let Some(scene) = entity.scene.and_then(|s| self.scenes.get_mut(s)) {
            scene.entities.remove(&id);
        }
        if let Some(envelope) = envelope {
            self.broadcast_envelope(&envelope, None);
        }
        Ok(())
    }
}
