//! Type-code dispatch from decoded envelopes to room request handlers.

use std::collections::HashMap;

use netroom_protocol::messages::{
    ChangeClientProfileRequest, ChangeMasterRequest, ChangeRoomInfoRequest, DestroyEntityRequest,
    JoinNetworkGroupsRequest, LeaveNetworkGroupsRequest, LoadScenesRequest, RegisterClientRequest,
    RpcBroadcastRequest, RpcBufferRequest, RpcQueryRequest, RpcTargetRequest, RprRequest,
    SpawnEntityRequest, SyncVarRequest, TakeoverEntityRequest, TimeRequest, TransferEntityRequest,
    UnloadScenesRequest,
};
use netroom_protocol::{EnvelopeRef, Resolvable, TypeCodeTable};
use netroom_transport::ClientId;

use crate::{Room, RoomError};

/// A type-erased handler: decodes the frame and applies it to the room.
pub type HandlerFn =
    dyn Fn(&mut Room, ClientId, EnvelopeRef<'_>) -> Result<(), RoomError> + Send + Sync;

/// A typed request handler.
pub type RequestFn<T> = fn(&mut Room, ClientId, T) -> Result<(), RoomError>;

pub struct Handler {
    name: &'static str,
    call: Box<HandlerFn>,
}

impl Handler {
    /// Short name of the request type, used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn call(
        &self,
        room: &mut Room,
        client: ClientId,
        frame: EnvelopeRef<'_>,
    ) -> Result<(), RoomError> {
        (self.call)(room, client, frame)
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").field("name", &self.name).finish()
    }
}

fn erase<F>(f: F) -> Box<HandlerFn>
where
    F: Fn(&mut Room, ClientId, EnvelopeRef<'_>) -> Result<(), RoomError> + Send + Sync + 'static,
{
    Box::new(f)
}

fn short_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Handlers keyed by the type code of the request they accept.
///
/// Shared between rooms behind an `Arc`; built once, never mutated after.
#[derive(Debug, Default)]
pub struct HandlerTable {
    handlers: HashMap<u16, Handler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes envelopes carrying a `T` to `f`.
    ///
    /// Fails if `T` has no code in `codes` or the code already has a handler.
    pub fn on<T: Resolvable>(
        &mut self,
        codes: &TypeCodeTable,
        f: RequestFn<T>,
    ) -> Result<&mut Self, RoomError> {
        let code = codes.code_of::<T>()?;
        if self.handlers.contains_key(&code) {
            return Err(RoomError::InvalidState(format!(
                "type code {code} already has a handler"
            )));
        }
        let call = erase(move |room, client, frame| {
            let request = room.codec().decode::<T>(frame)?;
            f(room, client, request)
        });
        self.handlers.insert(
            code,
            Handler {
                name: short_name::<T>(),
                call,
            },
        );
        Ok(self)
    }

    pub fn get(&self, code: u16) -> Option<&Handler> {
        self.handlers.get(&code)
    }

    pub fn contains(&self, code: u16) -> bool {
        self.handlers.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Every request of the room protocol.
    pub fn standard(codes: &TypeCodeTable) -> Result<Self, RoomError> {
        let mut table = Self::new();
        table
            .on::<RegisterClientRequest>(codes, Room::register_client)?
            .on::<TimeRequest>(codes, Room::time_request)?
            .on::<LoadScenesRequest>(codes, Room::load_scenes)?
            .on::<UnloadScenesRequest>(codes, Room::unload_scenes)?
            .on::<SpawnEntityRequest>(codes, Room::spawn_entity)?
            .on::<TransferEntityRequest>(codes, Room::transfer_entity)?
            .on::<TakeoverEntityRequest>(codes, Room::takeover_entity)?
            .on::<DestroyEntityRequest>(codes, Room::destroy_entity)?
            .on::<RpcBroadcastRequest>(codes, Room::rpc_broadcast)?
            .on::<RpcTargetRequest>(codes, Room::rpc_target)?
            .on::<RpcQueryRequest>(codes, Room::rpc_query)?
            .on::<RprRequest>(codes, Room::rpr)?
            .on::<RpcBufferRequest>(codes, Room::rpc_buffer)?
            .on::<SyncVarRequest>(codes, Room::sync_var)?
            .on::<ChangeRoomInfoRequest>(codes, Room::change_room_info)?
            .on::<ChangeClientProfileRequest>(codes, Room::change_client_profile)?
            .on::<ChangeMasterRequest>(codes, Room::change_master)?
            .on::<JoinNetworkGroupsRequest>(codes, Room::join_network_groups)?
            .on::<LeaveNetworkGroupsRequest>(codes, Room::leave_network_groups)?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use netroom_protocol::messages::codes;

    use super::*;

    #[test]
    fn test_standard_table_covers_every_request() {
        let table = HandlerTable::standard(&TypeCodeTable::standard()).unwrap();
        assert_eq!(table.len(), 19);
        for code in codes::REGISTER_CLIENT_REQUEST..=codes::LEAVE_NETWORK_GROUPS_REQUEST {
            assert!(table.contains(code), "missing handler for code {code}");
        }
        assert!(!table.contains(codes::RPC_COMMAND));
        assert_eq!(
            table.get(codes::SPAWN_ENTITY_REQUEST).map(Handler::name),
            Some("SpawnEntityRequest")
        );
    }

    #[test]
    fn test_duplicate_handler_is_rejected() {
        let codes = TypeCodeTable::standard();
        let mut table = HandlerTable::new();
        table.on::<TimeRequest>(&codes, Room::time_request).unwrap();
        let err = table.on::<TimeRequest>(&codes, Room::time_request).unwrap_err();
        assert!(matches!(err, RoomError::InvalidState(_)));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let mut table = HandlerTable::new();
        let err = table
            .on::<TimeRequest>(&TypeCodeTable::new(), Room::time_request)
            .unwrap_err();
        assert!(matches!(err, RoomError::Serde(_)));
    }
}
