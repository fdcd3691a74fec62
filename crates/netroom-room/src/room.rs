//! The authoritative room: tables, tick loop body and message fan-out.
//!
//! A [`Room`] is plain state plus synchronous methods. It never spawns or
//! awaits anything; the actor in [`crate::actor`] owns it and calls
//! [`Room::tick`] once per tick. Request handling lives next to the state it
//! touches (`client.rs`, `entity.rs`, `scene.rs`, `rpc.rs`, `syncvar.rs`).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use netroom_protocol::messages::{
    ChangeRoomInfoCommand, ChangeRoomInfoRequest, EntityId, NetworkGroupId, RoomId, RoomInfo,
    RegisterClientRequest,
};
use netroom_protocol::{EnvelopeRef, Resolvable, WireCodec, WireEnvelope, split_batch};
use netroom_transport::{ClientId, DisconnectCode, TransportContext, TransportEvent};
use tracing::{debug, info, trace, warn};

use crate::buffer::{MessageBuffer, SendQueue};
use crate::client::Client;
use crate::entity::Entity;
use crate::handlers::HandlerTable;
use crate::lobby::RoomBasicInfo;
use crate::observer::{IdleWatchdog, TickObserver, TickVerdict};
use crate::rpc::QueryTable;
use crate::scene::SceneTable;
use crate::{EngineConfig, RoomError, RoomOptions, RoomState};

/// One running session: clients, entities, scenes and their history.
pub struct Room {
    pub(crate) id: RoomId,
    app_id: String,
    version: String,
    pub(crate) options: RoomOptions,
    pub(crate) state: RoomState,

    pub(crate) transport: Box<dyn TransportContext>,
    pub(crate) codec: WireCodec,
    handlers: Arc<HandlerTable>,
    register_code: Option<u16>,
    max_inbound: usize,

    pub(crate) clients: BTreeMap<ClientId, Client>,
    /// Connected but not registered yet.
    pub(crate) pending: BTreeSet<ClientId>,
    pub(crate) master: Option<ClientId>,
    pub(crate) next_join: u64,

    pub(crate) entities: BTreeMap<EntityId, Entity>,
    pub(crate) next_entity: u64,
    pub(crate) scenes: SceneTable,

    pub(crate) buffer: MessageBuffer,
    pub(crate) queue: SendQueue,
    pub(crate) queries: QueryTable,

    observers: Vec<Box<dyn TickObserver>>,
    pub(crate) server_time: Duration,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("clients", &self.clients.len())
            .field("master", &self.master)
            .field("entities", &self.entities.len())
            .field("scenes", &self.scenes.len())
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl Room {
    /// A room speaking the standard room protocol.
    pub fn new(
        id: RoomId,
        options: RoomOptions,
        transport: Box<dyn TransportContext>,
    ) -> Result<Self, RoomError> {
        let codec = WireCodec::standard();
        let handlers = HandlerTable::standard(codec.codes())?;
        Ok(Self::with_protocol(id, options, transport, codec, Arc::new(handlers)))
    }

    /// A room with a caller-supplied codec and handler table.
    pub fn with_protocol(
        id: RoomId,
        options: RoomOptions,
        transport: Box<dyn TransportContext>,
        codec: WireCodec,
        handlers: Arc<HandlerTable>,
    ) -> Self {
        let register_code = codec.codes().code_of::<RegisterClientRequest>().ok();
        Self {
            id,
            app_id: String::new(),
            version: String::new(),
            options,
            state: RoomState::Created,
            transport,
            codec,
            handlers,
            register_code,
            max_inbound: EngineConfig::default().max_inbound_per_tick,
            clients: BTreeMap::new(),
            pending: BTreeSet::new(),
            master: None,
            next_join: 0,
            entities: BTreeMap::new(),
            next_entity: 1,
            scenes: SceneTable::default(),
            buffer: MessageBuffer::new(),
            queue: SendQueue::new(),
            queries: QueryTable::default(),
            observers: Vec::new(),
            server_time: Duration::ZERO,
        }
    }

    /// Tags the room with the application and version it was created for.
    pub fn with_app(mut self, app_id: impl Into<String>, version: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self.version = version.into();
        self
    }

    /// Applies engine limits and installs the idle watchdog.
    pub fn with_engine(mut self, engine: &EngineConfig) -> Self {
        self.max_inbound = engine.max_inbound_per_tick.max(1);
        self.observers.push(Box::new(IdleWatchdog::new(engine.idle_grace)));
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn TickObserver>) {
        self.observers.push(observer);
    }
}

// ---------------------------------------------------------------------------
// Accessors
// ---------------------------------------------------------------------------

impl Room {
    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn options(&self) -> &RoomOptions {
        &self.options
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    pub fn master(&self) -> Option<ClientId> {
        self.master
    }

    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// Registered clients, ordered by id.
    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Registered clients plus connections that have not registered yet.
    pub fn occupancy(&self) -> usize {
        self.clients.len() + self.pending.len()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn scenes(&self) -> &SceneTable {
        &self.scenes
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    pub fn queries(&self) -> &QueryTable {
        &self.queries
    }

    /// Envelopes waiting for the end-of-tick flush.
    pub fn queued_for(&self, client: ClientId) -> &[WireEnvelope] {
        self.queue.pending_for(client)
    }

    /// Server time as of the current tick.
    pub fn server_time(&self) -> Duration {
        self.server_time
    }

    /// The description registering clients receive.
    pub fn room_info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            name: self.options.name.clone(),
            capacity: self.options.capacity,
            visible: self.options.visible,
            attributes: self.options.attributes.clone(),
        }
    }

    /// The lobby listing entry.
    pub fn basic_info(&self) -> RoomBasicInfo {
        RoomBasicInfo {
            id: self.id,
            app_id: self.app_id.clone(),
            version: self.version.clone(),
            name: self.options.name.clone(),
            occupancy: self.clients.len(),
            capacity: self.options.capacity,
            visible: self.options.visible,
            password_protected: self.options.password.is_some(),
            attributes: self.options.attributes.clone(),
            state: self.state,
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle and tick
// ---------------------------------------------------------------------------

impl Room {
    pub fn start(&mut self) {
        if !self.state.can_transition_to(RoomState::Running) {
            warn!(room_id = %self.id, state = %self.state, "room cannot start");
            return;
        }
        self.state = RoomState::Running;
        info!(
            room_id = %self.id,
            name = %self.options.name,
            capacity = self.options.capacity,
            "room started"
        );
    }

    /// Stops the room. Safe to call more than once.
    ///
    /// Queued messages are flushed, every connection is dropped with
    /// [`DisconnectCode::RoomStopped`] and the transport context is closed
    /// before the tables are released.
    pub fn stop(&mut self) {
        if matches!(self.state, RoomState::Stopping | RoomState::Stopped) {
            return;
        }
        self.state = RoomState::Stopping;
        info!(room_id = %self.id, clients = self.clients.len(), "room stopping");

        self.flush();
        let connections: Vec<ClientId> =
            self.clients.keys().chain(self.pending.iter()).copied().collect();
        for client in connections {
            self.transport.disconnect(client, DisconnectCode::RoomStopped);
        }
        self.transport.close();

        self.clients.clear();
        self.pending.clear();
        self.master = None;
        self.entities.clear();
        self.scenes = SceneTable::default();
        self.buffer.clear();
        self.queue.clear();
        self.queries = QueryTable::default();

        self.state = RoomState::Stopped;
        info!(room_id = %self.id, "room stopped");
    }

    /// Runs one tick at server time `now`.
    ///
    /// Polls the transport, dispatches what arrived, flushes the send queue
    /// and asks the observers whether to keep going.
    pub fn tick(&mut self, now: Duration) -> TickVerdict {
        if !self.state.is_running() {
            return TickVerdict::Stop;
        }
        self.server_time = now;

        let events = self.transport.poll(self.max_inbound);
        trace!(room_id = %self.id, events = events.len(), "tick");
        for event in events {
            self.handle_event(event);
            if !self.state.is_running() {
                return TickVerdict::Stop;
            }
        }

        self.flush();

        let mut observers = std::mem::take(&mut self.observers);
        let verdict = observers
            .iter_mut()
            .fold(TickVerdict::Continue, |verdict, observer| {
                match observer.on_tick(self, now) {
                    TickVerdict::Stop => TickVerdict::Stop,
                    TickVerdict::Continue => verdict,
                }
            });
        self.observers = observers;

        if verdict == TickVerdict::Stop {
            self.stop();
        }
        verdict
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(client) => {
                debug!(room_id = %self.id, %client, "connection opened");
                self.pending.insert(client);
            }
            TransportEvent::Disconnected(client) => self.remove_client(client),
            TransportEvent::Message {
                client, payload, ..
            } => self.dispatch(client, payload),
        }
    }

    /// Splits a batch and hands each envelope to its handler.
    pub(crate) fn dispatch(&mut self, client: ClientId, payload: Vec<u8>) {
        let pool = Arc::clone(self.codec.registry().pool());
        let lease = pool.reader(payload);
        for frame in split_batch(lease.bytes()) {
            let frame = match frame {
                Ok(frame) => frame,
                Err(error) => {
                    debug!(room_id = %self.id, %client, %error, "malformed batch, dropping rest");
                    break;
                }
            };
            self.dispatch_frame(client, frame);

            let connected = self.clients.contains_key(&client) || self.pending.contains(&client);
            if !self.state.is_running() || !connected {
                break;
            }
        }
    }

    pub(crate) fn dispatch_frame(&mut self, client: ClientId, frame: EnvelopeRef<'_>) {
        if !self.clients.contains_key(&client) && self.register_code != Some(frame.type_code) {
            debug!(
                room_id = %self.id,
                %client,
                code = frame.type_code,
                "message from unregistered connection, dropping"
            );
            return;
        }

        let handlers = Arc::clone(&self.handlers);
        let Some(handler) = handlers.get(frame.type_code) else {
            debug!(room_id = %self.id, %client, code = frame.type_code, "no handler for type code");
            return;
        };

        if let Err(error) = handler.call(self, client, frame) {
            self.reject(client, handler.name(), error);
        }
    }

    fn reject(&mut self, client: ClientId, request: &'static str, error: RoomError) {
        match &error {
            RoomError::WrongPassword(_) | RoomError::CapacityExceeded(_) => {
                info!(room_id = %self.id, %client, %error, "registration refused");
            }
            RoomError::Serde(_)
            | RoomError::Unauthorized { .. }
            | RoomError::NotFound(_)
            | RoomError::InvalidState(_) => {
                debug!(room_id = %self.id, %client, request, %error, "request dropped");
            }
            RoomError::Transport(_) | RoomError::Unavailable(_) => {
                warn!(room_id = %self.id, %client, request, %error, "request failed");
            }
        }
        if let Some(code) = error.disconnect_code() {
            self.kick(client, code);
        }
    }

    /// Drops a connection from the server side.
    pub fn kick(&mut self, client: ClientId, code: DisconnectCode) {
        self.transport.disconnect(client, code);
        self.remove_client(client);
    }

    /// Sends every queued batch.
    pub fn flush(&mut self) -> usize {
        let pool = Arc::clone(self.codec.registry().pool());
        self.queue.flush(self.transport.as_mut(), &pool)
    }
}

// ---------------------------------------------------------------------------
// Fan-out helpers
// ---------------------------------------------------------------------------

impl Room {
    pub(crate) fn encode<T: Resolvable>(&self, message: &T) -> Result<WireEnvelope, RoomError> {
        Ok(self.codec.encode(message)?)
    }

    /// Queues an envelope for a registered client. Anyone else is ignored.
    pub(crate) fn enqueue(&mut self, client: ClientId, envelope: WireEnvelope) {
        if self.clients.contains_key(&client) {
            self.queue.push(client, envelope);
        }
    }

    pub(crate) fn send_to<T: Resolvable>(
        &mut self,
        client: ClientId,
        message: &T,
    ) -> Result<(), RoomError> {
        let envelope = self.encode(message)?;
        self.enqueue(client, envelope);
        Ok(())
    }

    pub(crate) fn multicast(
        &mut self,
        recipients: impl IntoIterator<Item = ClientId>,
        envelope: &WireEnvelope,
    ) {
        for client in recipients {
            self.enqueue(client, envelope.clone());
        }
    }

    /// Queues an envelope for every registered client except `except`.
    pub(crate) fn broadcast_envelope(&mut self, envelope: &WireEnvelope, except: Option<ClientId>) {
        let recipients: Vec<ClientId> = self
            .clients
            .keys()
            .copied()
            .filter(|client| Some(*client) != except)
            .collect();
        self.multicast(recipients, envelope);
    }

    /// Encodes once and queues for every registered client except
    /// `except`. Returns the envelope so callers can buffer it.
    pub(crate) fn broadcast<T: Resolvable>(
        &mut self,
        message: &T,
        except: Option<ClientId>,
    ) -> Result<WireEnvelope, RoomError> {
        let envelope = self.encode(message)?;
        self.broadcast_envelope(&envelope, except);
        Ok(envelope)
    }

    /// Registered clients in `group`, ordered by id.
    pub(crate) fn group_members(&self, group: NetworkGroupId) -> Vec<ClientId> {
        self.clients
            .values()
            .filter(|client| client.in_group(group))
            .map(Client::id)
            .collect()
    }

    pub(crate) fn require_master(
        &self,
        client: ClientId,
        action: &'static str,
    ) -> Result<(), RoomError> {
        if self.master == Some(client) {
            Ok(())
        } else {
            Err(RoomError::Unauthorized { client, action })
        }
    }
}

// ---------------------------------------------------------------------------
// Room settings
// ---------------------------------------------------------------------------

impl Room {
    /// Master-only change of visibility, capacity and attributes.
    pub(crate) fn change_room_info(
        &mut self,
        client: ClientId,
        request: ChangeRoomInfoRequest,
    ) -> Result<(), RoomError> {
        self.require_master(client, "change room info")?;
        if request.capacity == Some(0) {
            return Err(RoomError::InvalidState("capacity must be at least 1".into()));
        }

        let command = ChangeRoomInfoCommand {
            visible: request.visible,
            capacity: request.capacity,
            modify: request.modify,
            remove: request.remove,
        };
        let envelope = self.encode(&command)?;

        if let Some(visible) = command.visible {
            self.options.visible = visible;
        }
        if let Some(capacity) = command.capacity {
            self.options.capacity = capacity;
        }
        for key in &command.remove {
            self.options.attributes.remove(key);
        }
        self.options
            .attributes
            .extend(command.modify.iter().map(|(k, v)| (*k, v.clone())));

        self.broadcast_envelope(&envelope, None);
        debug!(room_id = %self.id, %client, "room info changed");
        Ok(())
    }
}
