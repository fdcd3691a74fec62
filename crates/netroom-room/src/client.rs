//! Registered clients, registration, departure and master migration.

use std::collections::BTreeSet;

use netroom_protocol::messages::{
    AttributesMap, ChangeClientProfileCommand, ChangeClientProfileRequest, ChangeMasterCommand,
    ChangeMasterRequest, ClientConnectedCommand, ClientDisconnectedCommand, ClientInfo, EntityId,
    JoinNetworkGroupsRequest, LeaveNetworkGroupsRequest, NetworkGroupId, RegisterClientRequest,
    RegisterClientResponse, TimeRequest, TimeResponse,
};
use netroom_transport::ClientId;
use tracing::{debug, info, warn};

use crate::{MigrationPolicy, Room, RoomError};

/// A client that completed registration.
#[derive(Debug, Clone)]
pub struct Client {
    id: ClientId,
    profile: AttributesMap,
    groups: BTreeSet<NetworkGroupId>,
    pub(crate) owned: BTreeSet<EntityId>,
    join_order: u64,
}

impl Client {
    pub(crate) fn new(id: ClientId, profile: AttributesMap, join_order: u64) -> Self {
        Self {
            id,
            profile,
            groups: BTreeSet::from([NetworkGroupId::DEFAULT]),
            owned: BTreeSet::new(),
            join_order,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn profile(&self) -> &AttributesMap {
        &self.profile
    }

    pub fn groups(&self) -> &BTreeSet<NetworkGroupId> {
        &self.groups
    }

    pub fn in_group(&self, group: NetworkGroupId) -> bool {
        self.groups.contains(&group)
    }

    /// Entities this client currently owns, master objects included.
    pub fn owned_entities(&self) -> &BTreeSet<EntityId> {
        &self.owned
    }

    /// Position in registration order. Lower joined earlier.
    pub fn join_order(&self) -> u64 {
        self.join_order
    }

    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id,
            profile: self.profile.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

impl Room {
    /// Admits a connection as a client.
    ///
    /// The response is encoded here, after every earlier event of this tick
    /// has been applied, and queued before anything later can reach the new
    /// client. Its buffer therefore matches its roster and master exactly.
    pub(crate) fn register_client(
        &mut self,
        client: ClientId,
        request: RegisterClientRequest,
    ) -> Result<(), RoomError> {
        if !self.state.is_running() {
            return Err(RoomError::InvalidState(format!("room is {}", self.state)));
        }
        if self.clients.contains_key(&client) {
            return Err(RoomError::InvalidState(format!("{client} is already registered")));
        }
        if let Some(expected) = &self.options.password {
            if request.password.as_deref() != Some(expected.as_str()) {
                return Err(RoomError::WrongPassword(self.id));
            }
        }
        if self.clients.len() >= usize::from(self.options.capacity) {
            return Err(RoomError::CapacityExceeded(self.id));
        }

        self.pending.remove(&client);
        let join_order = self.next_join;
        self.next_join += 1;
        self.clients
            .insert(client, Client::new(client, request.profile, join_order));

        if self.master.is_none() {
            self.master = Some(client);
            self.reassign_master_objects()?;
            info!(room_id = %self.id, master = %client, "master assigned");
        }

        let response = RegisterClientResponse {
            id: client,
            room: self.room_info(),
            clients: self.roster(),
            master: self.master.unwrap_or(client),
            buffer: self.buffer.snapshot(),
            time: self.server_time.as_secs_f64(),
        };
        self.send_to(client, &response)?;

        let joined = self
            .clients
            .get(&client)
            .map(Client::info)
            .ok_or_else(|| RoomError::NotFound(client.to_string()))?;
        self.broadcast(&ClientConnectedCommand { client: joined }, Some(client))?;

        info!(
            room_id = %self.id,
            %client,
            clients = self.clients.len(),
            buffered = response.buffer.len(),
            "client registered"
        );
        Ok(())
    }

    /// Clients in registration order.
    pub fn roster(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<&Client> = self.clients.values().collect();
        clients.sort_by_key(|c| c.join_order);
        clients.into_iter().map(Client::info).collect()
    }

    // -----------------------------------------------------------------------
    // Departure
    // -----------------------------------------------------------------------

    /// Forgets a connection after it went away.
    ///
    /// For a registered client, in order: the master moves on (or the room
    /// stops), its entities are orphaned or destroyed, queries waiting on it
    /// are answered with `Disconnect`, its own queries are dropped and the
    /// others hear that it left.
    pub(crate) fn remove_client(&mut self, client: ClientId) {
        if self.pending.remove(&client) {
            debug!(room_id = %self.id, %client, "connection closed before registering");
            return;
        }
        let Some(removed) = self.clients.remove(&client) else {
            return;
        };
        self.queue.drop_client(client);
        info!(room_id = %self.id, %client, clients = self.clients.len(), "client left");

        if self.master == Some(client) && self.options.migration == MigrationPolicy::Stop {
            info!(room_id = %self.id, %client, "master left, stopping room");
            self.stop();
            return;
        }

        if let Err(error) = self.settle_departure(client, &removed) {
            warn!(room_id = %self.id, %client, %error, "incomplete cleanup after departure");
        }
    }

    fn settle_departure(&mut self, client: ClientId, removed: &Client) -> Result<(), RoomError> {
        if self.master == Some(client) {
            self.migrate_master()?;
        }
        self.release_entities_of(client, &removed.owned)?;
        self.fail_queries_targeting(client)?;
        let dropped = self.queries.drop_requester(client);
        if dropped > 0 {
            debug!(room_id = %self.id, %client, dropped, "dropped queries of departed client");
        }
        self.broadcast(&ClientDisconnectedCommand { client }, None)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Master
    // -----------------------------------------------------------------------

    /// Hands master to the earliest-joined client left, if any.
    fn migrate_master(&mut self) -> Result<(), RoomError> {
        let next = self
            .clients
            .values()
            .min_by_key(|c| c.join_order)
            .map(Client::id);
        self.master = next;
        self.reassign_master_objects()?;

        match next {
            Some(master) => {
                info!(room_id = %self.id, %master, "master migrated");
                self.broadcast(&ChangeMasterCommand { master }, None)?;
            }
            None => debug!(room_id = %self.id, "room empty, no master"),
        }
        Ok(())
    }

    pub(crate) fn change_master(
        &mut self,
        client: ClientId,
        request: ChangeMasterRequest,
    ) -> Result<(), RoomError> {
        self.require_master(client, "hand over master")?;
        let target = request.client;
        if !self.clients.contains_key(&target) {
            return Err(RoomError::NotFound(target.to_string()));
        }
        if target == client {
            return Ok(());
        }

        let envelope = self.encode(&ChangeMasterCommand { master: target })?;
        self.master = Some(target);
        self.reassign_master_objects()?;
        self.broadcast_envelope(&envelope, None);
        info!(room_id = %self.id, from = %client, to = %target, "master handed over");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Profile, groups, time
    // -----------------------------------------------------------------------

    pub(crate) fn change_client_profile(
        &mut self,
        client: ClientId,
        request: ChangeClientProfileRequest,
    ) -> Result<(), RoomError> {
        let command = ChangeClientProfileCommand {
            client,
            modify: request.modify,
            remove: request.remove,
        };
        let envelope = self.encode(&command)?;
        let entry = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| RoomError::NotFound(client.to_string()))?;
        for key in &command.remove {
            entry.profile.remove(key);
        }
        entry
            .profile
            .extend(command.modify.iter().map(|(k, v)| (*k, v.clone())));

        self.broadcast_envelope(&envelope, None);
        Ok(())
    }

    pub(crate) fn join_network_groups(
        &mut self,
        client: ClientId,
        request: JoinNetworkGroupsRequest,
    ) -> Result<(), RoomError> {
        let entry = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| RoomError::NotFound(client.to_string()))?;
        entry.groups.extend(request.groups);
        Ok(())
    }

    pub(crate) fn leave_network_groups(
        &mut self,
        client: ClientId,
        request: LeaveNetworkGroupsRequest,
    ) -> Result<(), RoomError> {
        if request.groups.contains(&NetworkGroupId::DEFAULT) {
            return Err(RoomError::InvalidState("the default group cannot be left".into()));
        }
        let entry = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| RoomError::NotFound(client.to_string()))?;
        for group in &request.groups {
            entry.groups.remove(group);
        }
        Ok(())
    }

    pub(crate) fn time_request(
        &mut self,
        client: ClientId,
        request: TimeRequest,
    ) -> Result<(), RoomError> {
        let response = TimeResponse {
            client_time: request.client_time,
            server_time: self.server_time.as_secs_f64(),
        };
        self.send_to(client, &response)
    }
}
