//! Replicated fields. Only the latest value per entity and field is kept
//! for late joiners.

use netroom_protocol::messages::{SyncVarCommand, SyncVarRequest};
use netroom_transport::ClientId;

use crate::{Room, RoomError};

impl Room {
    /// Owner or master writes a field; the rest of the group hears it.
    pub(crate) fn sync_var(
        &mut self,
        client: ClientId,
        request: SyncVarRequest,
    ) -> Result<(), RoomError> {
        let entity = self
            .entities
            .get(&request.entity)
            .ok_or_else(|| RoomError::NotFound(request.entity.to_string()))?;
        if entity.owner() != Some(client) && self.master != Some(client) {
            return Err(RoomError::Unauthorized {
                client,
                action: "write this entity's sync vars",
            });
        }

        let envelope = self.encode(&SyncVarCommand {
            entity: request.entity,
            field: request.field,
            raw: request.raw,
        })?;
        let recipients: Vec<ClientId> = self
            .group_members(request.group)
            .into_iter()
            .filter(|c| *c != client)
            .collect();

        if let Some(entity) = self.entities.get_mut(&request.entity) {
            entity.buffer_sync_var(&mut self.buffer, request.field, envelope.clone());
        }
        self.multicast(recipients, &envelope);
        Ok(())
    }
}
