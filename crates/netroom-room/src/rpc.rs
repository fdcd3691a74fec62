//! Remote procedure calls: broadcast, targeted, query/response and
//! buffer-only calls.

use std::collections::BTreeMap;

use netroom_protocol::messages::{
    EntityId, RemoteBufferMode, RemoteResponseType, RpcBroadcastRequest, RpcBufferRequest,
    RpcCommand, RpcQueryRequest, RpcTargetRequest, RprCommand, RprRequest,
};
use netroom_protocol::WireEnvelope;
use netroom_transport::ClientId;
use tracing::debug;

use crate::{Room, RoomError};

// ---------------------------------------------------------------------------
// Pending queries
// ---------------------------------------------------------------------------

/// A query waiting for its target to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingQuery {
    pub requester: ClientId,
    pub target: ClientId,
    /// Requester-chosen correlation id.
    pub channel: u16,
}

/// Unanswered queries keyed by `(requester, channel)`.
#[derive(Debug, Default)]
pub struct QueryTable {
    pending: BTreeMap<(ClientId, u16), ClientId>,
}

impl QueryTable {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn get(&self, requester: ClientId, channel: u16) -> Option<PendingQuery> {
        self.pending
            .get(&(requester, channel))
            .map(|&target| PendingQuery {
                requester,
                target,
                channel,
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = PendingQuery> + '_ {
        self.pending
            .iter()
            .map(|(&(requester, channel), &target)| PendingQuery {
                requester,
                target,
                channel,
            })
    }

    /// Returns `false` if the requester already waits on that channel.
    pub(crate) fn insert(&mut self, query: PendingQuery) -> bool {
        let key = (query.requester, query.channel);
        if self.pending.contains_key(&key) {
            return false;
        }
        self.pending.insert(key, query.target);
        true
    }

    /// Removes the query if `responder` is the client it was sent to.
    pub(crate) fn answer(
        &mut self,
        requester: ClientId,
        channel: u16,
        responder: ClientId,
    ) -> Option<PendingQuery> {
        let query = self.get(requester, channel)?;
        if query.target != responder {
            return None;
        }
        self.pending.remove(&(requester, channel));
        Some(query)
    }

    /// Removes and returns every query waiting on `target`.
    pub(crate) fn take_targeting(&mut self, target: ClientId) -> Vec<PendingQuery> {
        let taken: Vec<PendingQuery> = self.iter().filter(|q| q.target == target).collect();
        for query in &taken {
            self.pending.remove(&(query.requester, query.channel));
        }
        taken
    }

    /// Drops the queries `requester` is waiting on. Returns how many.
    pub(crate) fn drop_requester(&mut self, requester: ClientId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|&(r, _), _| r != requester);
        before - self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

impl Room {
    fn require_entity(&self, id: EntityId) -> Result<(), RoomError> {
        if self.entities.contains_key(&id) {
            Ok(())
        } else {
            Err(RoomError::NotFound(id.to_string()))
        }
    }

    fn buffer_call(
        &mut self,
        id: EntityId,
        method: &str,
        mode: RemoteBufferMode,
        envelope: &WireEnvelope,
    ) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.buffer_rpc(&mut self.buffer, method, mode, envelope.clone());
        }
    }

    /// Fans a call out to a group, minus the listed exceptions. The caller
    /// receives it too when it is in the group.
    pub(crate) fn rpc_broadcast(
        &mut self,
        client: ClientId,
        request: RpcBroadcastRequest,
    ) -> Result<(), RoomError> {
        self.require_entity(request.entity)?;
        let envelope = self.encode(&RpcCommand {
            entity: request.entity,
            method: request.method.clone(),
            sender: client,
            raw: request.raw,
            channel: None,
        })?;
        let recipients: Vec<ClientId> = self
            .group_members(request.group)
            .into_iter()
            .filter(|c| !request.exceptions.contains(c))
            .collect();

        self.buffer_call(request.entity, &request.method, request.buffer, &envelope);
        self.multicast(recipients, &envelope);
        Ok(())
    }

    pub(crate) fn rpc_target(
        &mut self,
        client: ClientId,
        request: RpcTargetRequest,
    ) -> Result<(), RoomError> {
        self.require_entity(request.entity)?;
        if !self.clients.contains_key(&request.target) {
            return Err(RoomError::NotFound(request.target.to_string()));
        }
        self.send_to(
            request.target,
            &RpcCommand {
                entity: request.entity,
                method: request.method,
                sender: client,
                raw: request.raw,
                channel: None,
            },
        )
    }

    /// Forwards a query and remembers who waits for the answer.
    ///
    /// An unknown entity or target is answered right away.
    pub(crate) fn rpc_query(
        &mut self,
        client: ClientId,
        request: RpcQueryRequest,
    ) -> Result<(), RoomError> {
        let failure = if !self.entities.contains_key(&request.entity) {
            Some(RemoteResponseType::InvalidEntity)
        } else if !self.clients.contains_key(&request.target) {
            Some(RemoteResponseType::InvalidClient)
        } else {
            None
        };
        if let Some(response) = failure {
            debug!(room_id = %self.id, %client, ?response, "query answered by room");
            return self.send_to(
                client,
                &RprCommand {
                    channel: request.channel,
                    response,
                    raw: Vec::new(),
                },
            );
        }

        let envelope = self.encode(&RpcCommand {
            entity: request.entity,
            method: request.method,
            sender: client,
            raw: request.raw,
            channel: Some(request.channel),
        })?;
        let query = PendingQuery {
            requester: client,
            target: request.target,
            channel: request.channel,
        };
        if !self.queries.insert(query) {
            return Err(RoomError::InvalidState(format!(
                "channel {} already awaits an answer",
                request.channel
            )));
        }
        self.enqueue(request.target, envelope);
        Ok(())
    }

    /// Routes a query answer back to whoever asked.
    pub(crate) fn rpr(&mut self, client: ClientId, request: RprRequest) -> Result<(), RoomError> {
        let query = self
            .queries
            .answer(request.requester, request.channel, client)
            .ok_or_else(|| {
                RoomError::NotFound(format!(
                    "query {} of {} addressed to {client}",
                    request.channel, request.requester
                ))
            })?;
        self.send_to(
            query.requester,
            &RprCommand {
                channel: query.channel,
                response: request.response,
                raw: request.raw,
            },
        )
    }

    /// Stores a call for late joiners without sending it now.
    pub(crate) fn rpc_buffer(
        &mut self,
        client: ClientId,
        request: RpcBufferRequest,
    ) -> Result<(), RoomError> {
        self.require_entity(request.entity)?;
        if request.buffer == RemoteBufferMode::None {
            return Err(RoomError::InvalidState("buffer-only call without a buffer mode".into()));
        }
        let envelope = self.encode(&RpcCommand {
            entity: request.entity,
            method: request.method.clone(),
            sender: client,
            raw: request.raw,
            channel: None,
        })?;
        self.buffer_call(request.entity, &request.method, request.buffer, &envelope);
        Ok(())
    }

    /// Answers every query waiting on a departed client with `Disconnect`.
    pub(crate) fn fail_queries_targeting(&mut self, target: ClientId) -> Result<(), RoomError> {
        for query in self.queries.take_targeting(target) {
            self.send_to(
                query.requester,
                &RprCommand {
                    channel: query.channel,
                    response: RemoteResponseType::Disconnect,
                    raw: Vec::new(),
                },
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(requester: u64, target: u64, channel: u16) -> PendingQuery {
        PendingQuery {
            requester: ClientId::new(requester),
            target: ClientId::new(target),
            channel,
        }
    }

    #[test]
    fn test_insert_rejects_busy_channel() {
        let mut table = QueryTable::default();
        assert!(table.insert(query(1, 2, 7)));
        assert!(!table.insert(query(1, 3, 7)));
        assert!(table.insert(query(2, 3, 7)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_answer_requires_the_target() {
        let mut table = QueryTable::default();
        table.insert(query(1, 2, 0));
        assert_eq!(table.answer(ClientId::new(1), 0, ClientId::new(3)), None);
        assert_eq!(table.answer(ClientId::new(1), 0, ClientId::new(2)), Some(query(1, 2, 0)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_take_targeting_and_drop_requester() {
        let mut table = QueryTable::default();
        table.insert(query(1, 2, 0));
        table.insert(query(3, 2, 1));
        table.insert(query(2, 1, 0));

        let taken = table.take_targeting(ClientId::new(2));
        assert_eq!(taken, vec![query(1, 2, 0), query(3, 2, 1)]);
        assert_eq!(table.drop_requester(ClientId::new(2)), 1);
        assert!(table.is_empty());
    }
}
