//! Room protocol messages.
//!
//! Requests travel client to server; commands and responses travel server
//! to client. Every top-level message has a stable code in [`codes`] and is
//! registered by [`TypeCodeTable::standard`].
//!
//! Opaque application data (`raw` fields, attributes) is carried as byte
//! arrays. The room never looks inside them.

use std::collections::HashMap;
use std::fmt;

use netroom_transport::ClientId;
use serde::{Deserialize, Serialize};

use crate::resolver::{Binding, Nullability, Resolvable};
use crate::{
    NetReader, NetSerialize, NetWriter, Registry, SerdeError, TypeCodeTable, WireEnvelope,
    manual_binding, net_enum, net_struct,
};

/// Application-defined key/value attributes.
pub type AttributesMap = HashMap<u16, Vec<u8>>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty), $prefix:literal, $put:ident, $take:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }

        impl NetSerialize for $name {
            const NULLABILITY: Nullability = Nullability::Value;

            fn net_write(&self, _: &Registry, writer: &mut NetWriter) -> Result<(), SerdeError> {
                writer.$put(self.0);
                Ok(())
            }

            fn net_read(_: &Registry, reader: &mut NetReader<'_>) -> Result<Self, SerdeError> {
                Ok(Self(reader.$take()?))
            }
        }

        impl Resolvable for $name {
            fn dynamic(_: &Registry) -> Binding {
                manual_binding::<Self>()
            }
        }
    };
}

id_type!(
    /// Room-unique entity identifier. Never reused within a room.
    EntityId(u64), "entity", put_u64, take_u64
);

id_type!(
    /// Lobby-unique room identifier. Recycled after the room is reaped.
    RoomId(u32), "room", put_u32, take_u32
);

id_type!(
    /// Broadcast group. Every client is in [`NetworkGroupId::DEFAULT`].
    NetworkGroupId(u16), "group", put_u16, take_u16
);

impl NetworkGroupId {
    pub const DEFAULT: NetworkGroupId = NetworkGroupId(0);
}

impl Default for NetworkGroupId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// ---------------------------------------------------------------------------
// Enums and flags
// ---------------------------------------------------------------------------

net_enum! {
    /// Ownership class of an entity.
    pub enum EntityType: u8 {
        /// Owned by the client that spawned it (or was handed it).
        Dynamic = 0,
        /// Belongs to a scene; always owned by the master.
        SceneObject = 1,
        /// Lost its owner; held by the master until someone takes it over.
        Orphan = 2,
    }
}

impl EntityType {
    /// Scene objects and orphans follow the master client.
    pub fn is_master_object(self) -> bool {
        matches!(self, Self::SceneObject | Self::Orphan)
    }
}

net_enum! {
    pub enum SceneLoadMode: u8 {
        Single = 0,
        Additive = 1,
    }
}

net_enum! {
    /// Replay policy of a broadcast RPC.
    pub enum RemoteBufferMode: u8 {
        /// Not replayed.
        None = 0,
        /// Replaces the previous buffered call of the same method.
        Last = 1,
        /// Appended; every call is replayed.
        All = 2,
    }
}

net_enum! {
    /// Outcome carried by a query response.
    pub enum RemoteResponseType: u8 {
        Success = 0,
        /// The target left before answering.
        Disconnect = 1,
        /// The target is not in the room.
        InvalidClient = 2,
        /// The entity does not exist.
        InvalidEntity = 3,
    }
}

bitflags::bitflags! {
    /// What an entity survives.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PersistenceFlags: u8 {
        /// Becomes an orphan instead of being destroyed when its owner leaves.
        const PLAYER_DISCONNECTION = 1 << 0;
        /// Not scoped to any scene; survives scene loads and unloads.
        const SCENE_LOAD = 1 << 1;
    }
}

impl NetSerialize for PersistenceFlags {
    const NULLABILITY: Nullability = Nullability::Value;

    fn net_write(&self, _: &Registry, writer: &mut NetWriter) -> Result<(), SerdeError> {
        writer.put_u8(self.bits());
        Ok(())
    }

    fn net_read(_: &Registry, reader: &mut NetReader<'_>) -> Result<Self, SerdeError> {
        let bits = reader.take_u8()?;
        Self::from_bits(bits)
            .ok_or_else(|| SerdeError::mismatch::<Self>(format!("flag bits {bits:#04x}")))
    }
}

impl Resolvable for PersistenceFlags {
    fn dynamic(_: &Registry) -> Binding {
        manual_binding::<Self>()
    }
}

// ---------------------------------------------------------------------------
// Shared records
// ---------------------------------------------------------------------------

net_struct! {
    /// Room description sent to a registering client.
    pub struct RoomInfo {
        pub id: RoomId,
        pub name: String,
        pub capacity: u16,
        pub visible: bool,
        pub attributes: AttributesMap,
    }
}

net_struct! {
    /// One roster entry.
    pub struct ClientInfo {
        pub id: ClientId,
        pub profile: AttributesMap,
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

net_struct! {
    pub struct RegisterClientRequest {
        pub profile: AttributesMap,
        pub password: Option<String>,
    }
}

net_struct! {
    pub struct TimeRequest {
        /// Client clock when the request was sent, in seconds.
        pub client_time: f64,
    }
}

net_struct! {
    pub struct LoadScenesRequest {
        pub scenes: Vec<u8>,
        pub mode: SceneLoadMode,
    }
}

net_struct! {
    pub struct UnloadScenesRequest {
        pub scenes: Vec<u8>,
    }
}

net_struct! {
    pub struct SpawnEntityRequest {
        /// Requester-chosen token echoed in the response.
        pub token: u16,
        pub resource: String,
        pub kind: EntityType,
        pub persistence: PersistenceFlags,
        /// Target scene. `None` means the active scene.
        pub scene: Option<u8>,
        pub attributes: AttributesMap,
    }
}

net_struct! {
    pub struct TransferEntityRequest {
        pub entity: EntityId,
        pub client: ClientId,
    }
}

net_struct! {
    pub struct TakeoverEntityRequest {
        pub entity: EntityId,
    }
}

net_struct! {
    pub struct DestroyEntityRequest {
        pub entity: EntityId,
    }
}

net_struct! {
    pub struct RpcBroadcastRequest {
        pub entity: EntityId,
        pub method: String,
        pub raw: Vec<u8>,
        pub buffer: RemoteBufferMode,
        pub group: NetworkGroupId,
        /// Clients in the group that must not receive the call.
        pub exceptions: Vec<ClientId>,
    }
}

net_struct! {
    pub struct RpcTargetRequest {
        pub entity: EntityId,
        pub method: String,
        pub target: ClientId,
        pub raw: Vec<u8>,
    }
}

net_struct! {
    pub struct RpcQueryRequest {
        pub entity: EntityId,
        pub method: String,
        pub target: ClientId,
        /// Requester-chosen correlation id for the response.
        pub channel: u16,
        pub raw: Vec<u8>,
    }
}

net_struct! {
    /// Answer to a query, sent by the query's target.
    pub struct RprRequest {
        pub requester: ClientId,
        pub channel: u16,
        pub response: RemoteResponseType,
        pub raw: Vec<u8>,
    }
}

net_struct! {
    /// Stores a call for late joiners without sending it to anyone now.
    pub struct RpcBufferRequest {
        pub entity: EntityId,
        pub method: String,
        pub raw: Vec<u8>,
        pub buffer: RemoteBufferMode,
    }
}

net_struct! {
    pub struct SyncVarRequest {
        pub entity: EntityId,
        pub field: u16,
        pub raw: Vec<u8>,
        pub group: NetworkGroupId,
    }
}

net_struct! {
    pub struct ChangeRoomInfoRequest {
        pub visible: Option<bool>,
        pub capacity: Option<u16>,
        pub modify: AttributesMap,
        pub remove: Vec<u16>,
    }
}

net_struct! {
    pub struct ChangeClientProfileRequest {
        pub modify: AttributesMap,
        pub remove: Vec<u16>,
    }
}

net_struct! {
    pub struct ChangeMasterRequest {
        pub client: ClientId,
    }
}

net_struct! {
    pub struct JoinNetworkGroupsRequest {
        pub groups: Vec<NetworkGroupId>,
    }
}

net_struct! {
    pub struct LeaveNetworkGroupsRequest {
        pub groups: Vec<NetworkGroupId>,
    }
}

// ---------------------------------------------------------------------------
// Responses and commands
// ---------------------------------------------------------------------------

net_struct! {
    /// Everything a new client needs to catch up.
    pub struct RegisterClientResponse {
        pub id: ClientId,
        pub room: RoomInfo,
        pub clients: Vec<ClientInfo>,
        pub master: ClientId,
        /// Replay buffer, oldest first.
        pub buffer: Vec<WireEnvelope>,
        /// Server time in seconds.
        pub time: f64,
    }
}

net_struct! {
    pub struct TimeResponse {
        pub client_time: f64,
        pub server_time: f64,
    }
}

net_struct! {
    pub struct ClientConnectedCommand {
        pub client: ClientInfo,
    }
}

net_struct! {
    pub struct ClientDisconnectedCommand {
        pub client: ClientId,
    }
}

net_struct! {
    pub struct ChangeMasterCommand {
        pub master: ClientId,
    }
}

net_struct! {
    /// One loaded scene. A multi-scene load produces one command per scene.
    pub struct LoadSceneCommand {
        pub scene: u8,
        pub mode: SceneLoadMode,
    }
}

net_struct! {
    pub struct UnloadScenesCommand {
        pub scenes: Vec<u8>,
    }
}

net_struct! {
    pub struct SpawnEntityResponse {
        pub token: u16,
        pub entity: EntityId,
        pub scene: Option<u8>,
    }
}

net_struct! {
    pub struct SpawnEntityCommand {
        pub entity: EntityId,
        pub owner: Option<ClientId>,
        pub resource: String,
        pub kind: EntityType,
        pub persistence: PersistenceFlags,
        pub scene: Option<u8>,
        pub attributes: AttributesMap,
    }
}

net_struct! {
    pub struct ChangeEntityOwnerCommand {
        pub entity: EntityId,
        pub owner: Option<ClientId>,
        pub kind: EntityType,
    }
}

net_struct! {
    pub struct DestroyEntityCommand {
        pub entity: EntityId,
    }
}

net_struct! {
    pub struct RpcCommand {
        pub entity: EntityId,
        pub method: String,
        pub sender: ClientId,
        pub raw: Vec<u8>,
        /// Correlation id when the call is a query.
        pub channel: Option<u16>,
    }
}

net_struct! {
    pub struct RprCommand {
        pub channel: u16,
        pub response: RemoteResponseType,
        pub raw: Vec<u8>,
    }
}

net_struct! {
    pub struct SyncVarCommand {
        pub entity: EntityId,
        pub field: u16,
        pub raw: Vec<u8>,
    }
}

net_struct! {
    pub struct ChangeRoomInfoCommand {
        pub visible: Option<bool>,
        pub capacity: Option<u16>,
        pub modify: AttributesMap,
        pub remove: Vec<u16>,
    }
}

net_struct! {
    pub struct ChangeClientProfileCommand {
        pub client: ClientId,
        pub modify: AttributesMap,
        pub remove: Vec<u16>,
    }
}

// ---------------------------------------------------------------------------
// Type codes
// ---------------------------------------------------------------------------

/// Wire codes of the room protocol. Requests below 100, server messages
/// from 100.
pub mod codes {
    pub const REGISTER_CLIENT_REQUEST: u16 = 1;
    pub const TIME_REQUEST: u16 = 2;
    pub const LOAD_SCENES_REQUEST: u16 = 3;
    pub const UNLOAD_SCENES_REQUEST: u16 = 4;
    pub const SPAWN_ENTITY_REQUEST: u16 = 5;
    pub const TRANSFER_ENTITY_REQUEST: u16 = 6;
    pub const TAKEOVER_ENTITY_REQUEST: u16 = 7;
    pub const DESTROY_ENTITY_REQUEST: u16 = 8;
    pub const RPC_BROADCAST_REQUEST: u16 = 9;
    pub const RPC_TARGET_REQUEST: u16 = 10;
    pub const RPC_QUERY_REQUEST: u16 = 11;
    pub const RPR_REQUEST: u16 = 12;
    pub const RPC_BUFFER_REQUEST: u16 = 13;
    pub const SYNC_VAR_REQUEST: u16 = 14;
    pub const CHANGE_ROOM_INFO_REQUEST: u16 = 15;
    pub const CHANGE_CLIENT_PROFILE_REQUEST: u16 = 16;
    pub const CHANGE_MASTER_REQUEST: u16 = 17;
    pub const JOIN_NETWORK_GROUPS_REQUEST: u16 = 18;
    pub const LEAVE_NETWORK_GROUPS_REQUEST: u16 = 19;

    pub const REGISTER_CLIENT_RESPONSE: u16 = 100;
    pub const TIME_RESPONSE: u16 = 101;
    pub const CLIENT_CONNECTED_COMMAND: u16 = 102;
    pub const CLIENT_DISCONNECTED_COMMAND: u16 = 103;
    pub const CHANGE_MASTER_COMMAND: u16 = 104;
    pub const LOAD_SCENE_COMMAND: u16 = 105;
    pub const UNLOAD_SCENES_COMMAND: u16 = 106;
    pub const SPAWN_ENTITY_RESPONSE: u16 = 107;
    pub const SPAWN_ENTITY_COMMAND: u16 = 108;
    pub const CHANGE_ENTITY_OWNER_COMMAND: u16 = 109;
    pub const DESTROY_ENTITY_COMMAND: u16 = 110;
    pub const RPC_COMMAND: u16 = 111;
    pub const RPR_COMMAND: u16 = 112;
    pub const SYNC_VAR_COMMAND: u16 = 113;
    pub const CHANGE_ROOM_INFO_COMMAND: u16 = 114;
    pub const CHANGE_CLIENT_PROFILE_COMMAND: u16 = 115;
}

macro_rules! register_all {
    ($table:ident; $($ty:ty = $code:expr,)*) => {
        $(
            if let Err(error) = $table.register::<$ty>($code) {
                tracing::error!(%error, code = $code, "standard type code clash");
            }
        )*
    };
}

impl TypeCodeTable {
    /// The room protocol's code table.
    pub fn standard() -> Self {
        let mut table = Self::new();
        register_all! { table;
            RegisterClientRequest = codes::REGISTER_CLIENT_REQUEST,
            TimeRequest = codes::TIME_REQUEST,
            LoadScenesRequest = codes::LOAD_SCENES_REQUEST,
            UnloadScenesRequest = codes::UNLOAD_SCENES_REQUEST,
            SpawnEntityRequest = codes::SPAWN_ENTITY_REQUEST,
            TransferEntityRequest = codes::TRANSFER_ENTITY_REQUEST,
            TakeoverEntityRequest = codes::TAKEOVER_ENTITY_REQUEST,
            DestroyEntityRequest = codes::DESTROY_ENTITY_REQUEST,
            RpcBroadcastRequest = codes::RPC_BROADCAST_REQUEST,
            RpcTargetRequest = codes::RPC_TARGET_REQUEST,
            RpcQueryRequest = codes::RPC_QUERY_REQUEST,
            RprRequest = codes::RPR_REQUEST,
            RpcBufferRequest = codes::RPC_BUFFER_REQUEST,
            SyncVarRequest = codes::SYNC_VAR_REQUEST,
            ChangeRoomInfoRequest = codes::CHANGE_ROOM_INFO_REQUEST,
            ChangeClientProfileRequest = codes::CHANGE_CLIENT_PROFILE_REQUEST,
            ChangeMasterRequest = codes::CHANGE_MASTER_REQUEST,
            JoinNetworkGroupsRequest = codes::JOIN_NETWORK_GROUPS_REQUEST,
            LeaveNetworkGroupsRequest = codes::LEAVE_NETWORK_GROUPS_REQUEST,
            RegisterClientResponse = codes::REGISTER_CLIENT_RESPONSE,
            TimeResponse = codes::TIME_RESPONSE,
            ClientConnectedCommand = codes::CLIENT_CONNECTED_COMMAND,
            ClientDisconnectedCommand = codes::CLIENT_DISCONNECTED_COMMAND,
            ChangeMasterCommand = codes::CHANGE_MASTER_COMMAND,
            LoadSceneCommand = codes::LOAD_SCENE_COMMAND,
            UnloadScenesCommand = codes::UNLOAD_SCENES_COMMAND,
            SpawnEntityResponse = codes::SPAWN_ENTITY_RESPONSE,
            SpawnEntityCommand = codes::SPAWN_ENTITY_COMMAND,
            ChangeEntityOwnerCommand = codes::CHANGE_ENTITY_OWNER_COMMAND,
            DestroyEntityCommand = codes::DESTROY_ENTITY_COMMAND,
            RpcCommand = codes::RPC_COMMAND,
            RprCommand = codes::RPR_COMMAND,
            SyncVarCommand = codes::SYNC_VAR_COMMAND,
            ChangeRoomInfoCommand = codes::CHANGE_ROOM_INFO_COMMAND,
            ChangeClientProfileCommand = codes::CHANGE_CLIENT_PROFILE_COMMAND,
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_is_complete() {
        let table = TypeCodeTable::standard();
        assert_eq!(table.len(), 35);
        assert_eq!(
            table.code_of::<SpawnEntityCommand>().unwrap(),
            codes::SPAWN_ENTITY_COMMAND
        );
    }

    #[test]
    fn test_ids_display_with_prefix() {
        assert_eq!(EntityId(4).to_string(), "entity-4");
        assert_eq!(RoomId(2).to_string(), "room-2");
        assert_eq!(NetworkGroupId::default(), NetworkGroupId(0));
    }

    #[test]
    fn test_enum_is_single_byte() {
        let registry = Registry::with_defaults();
        assert_eq!(registry.to_bytes(&EntityType::Orphan).unwrap(), vec![2]);
        assert!(registry.from_bytes::<EntityType>(&[7]).is_err());
        assert!(EntityType::SceneObject.is_master_object());
        assert!(!EntityType::Dynamic.is_master_object());
    }

    #[test]
    fn test_persistence_flags_reject_unknown_bits() {
        let registry = Registry::with_defaults();
        let flags = PersistenceFlags::PLAYER_DISCONNECTION | PersistenceFlags::SCENE_LOAD;
        assert_eq!(registry.to_bytes(&flags).unwrap(), vec![3]);
        assert!(registry.from_bytes::<PersistenceFlags>(&[0x80]).is_err());
    }

    #[test]
    fn test_spawn_request_layout() {
        let registry = Registry::with_defaults();
        let request = SpawnEntityRequest {
            token: 7,
            resource: "cube".into(),
            kind: EntityType::Dynamic,
            persistence: PersistenceFlags::empty(),
            scene: None,
            attributes: AttributesMap::new(),
        };
        let bytes = registry.to_bytes(&request).unwrap();
        assert_eq!(
            bytes,
            vec![
                0, // present
                7, 0, // token
                5, 0, b'c', b'u', b'b', b'e', // resource
                0,    // kind
                0,    // persistence
                1,    // scene: None
                1, 0, // empty attributes
            ]
        );
        assert_eq!(registry.from_bytes::<SpawnEntityRequest>(&bytes).unwrap(), request);
    }

    #[test]
    fn test_room_id_serializes_as_number() {
        assert_eq!(serde_json::to_string(&RoomId(12)).unwrap(), "12");
    }
}
