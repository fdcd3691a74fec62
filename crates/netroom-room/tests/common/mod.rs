//! Drives a [`Room`] tick by tick through a [`LocalTransport`].

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use netroom_protocol::messages::{
    AttributesMap, EntityId, EntityType, LoadScenesRequest, PersistenceFlags,
    RegisterClientRequest, RoomId, SceneLoadMode, SpawnEntityRequest,
};
use netroom_protocol::{NetWriter, Resolvable, WireCodec, WireEnvelope, encode_batch, split_batch};
use netroom_room::{Room, RoomOptions, TickVerdict};
use netroom_transport::{ClientId, DisconnectCode, LocalHub, LocalOutbound, LocalTransport};

pub const STEP: Duration = Duration::from_millis(50);

pub struct Harness {
    pub room: Room,
    pub hub: LocalHub,
    pub codec: WireCodec,
    now: Duration,
}

impl Harness {
    pub fn new(options: RoomOptions) -> Self {
        let (transport, hub) = LocalTransport::pair();
        let room = Room::new(RoomId(1), options, Box::new(transport))
            .unwrap()
            .with_app("arena", "1.0");
        Self::started(room, hub)
    }

    pub fn started(mut room: Room, hub: LocalHub) -> Self {
        room.start();
        let codec = room.codec().clone();
        Self {
            room,
            hub,
            codec,
            now: Duration::ZERO,
        }
    }

    pub fn tick(&mut self) -> TickVerdict {
        self.now += STEP;
        self.room.tick(self.now)
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn send<T: Resolvable>(&self, client: ClientId, message: &T) {
        let envelope = self.codec.encode(message).unwrap();
        self.send_envelopes(client, &[envelope]);
    }

    pub fn send_envelopes(&self, client: ClientId, envelopes: &[WireEnvelope]) {
        let mut writer = NetWriter::new();
        encode_batch(&mut writer, envelopes);
        self.hub.send(client, writer.into_inner());
    }

    /// Connects and registers a client, then ticks once.
    pub fn join(&mut self, name: &str) -> ClientId {
        self.join_with(name, None)
    }

    pub fn join_with(&mut self, name: &str, password: Option<&str>) -> ClientId {
        let client = self.hub.connect();
        self.send(
            client,
            &RegisterClientRequest {
                profile: profile(name),
                password: password.map(str::to_string),
            },
        );
        self.tick();
        client
    }

    /// Sends one request and runs the tick that handles it.
    pub fn request<T: Resolvable>(&mut self, client: ClientId, message: &T) {
        self.send(client, message);
        self.tick();
    }

    pub fn load_scenes(&mut self, master: ClientId, scenes: &[u8], mode: SceneLoadMode) {
        self.request(
            master,
            &LoadScenesRequest {
                scenes: scenes.to_vec(),
                mode,
            },
        );
    }

    /// Spawns a dynamic entity in the active scene and returns its id.
    pub fn spawn(&mut self, client: ClientId, persistence: PersistenceFlags) -> EntityId {
        self.spawn_kind(client, EntityType::Dynamic, persistence)
    }

    pub fn spawn_kind(
        &mut self,
        client: ClientId,
        kind: EntityType,
        persistence: PersistenceFlags,
    ) -> EntityId {
        let before = self.room.entities().map(|e| e.id()).max();
        self.request(
            client,
            &SpawnEntityRequest {
                token: 1,
                resource: "Prefabs/Player".into(),
                kind,
                persistence,
                scene: None,
                attributes: AttributesMap::new(),
            },
        );
        let spawned = self.room.entities().map(|e| e.id()).max();
        assert_ne!(spawned, before, "spawn was rejected");
        spawned.unwrap()
    }

    pub fn drain(&mut self) -> Inbox {
        let mut inbox = Inbox::default();
        for item in self.hub.drain() {
            match item {
                LocalOutbound::Data { client, bytes, .. } => {
                    *inbox.batches.entry(client).or_default() += 1;
                    let frames = inbox.messages.entry(client).or_default();
                    for frame in split_batch(&bytes) {
                        frames.push(frame.unwrap().into_owned());
                    }
                }
                LocalOutbound::Disconnected { client, code } => {
                    inbox.disconnects.push((client, code));
                }
                LocalOutbound::Closed => inbox.closed = true,
            }
        }
        inbox
    }
}

pub fn profile(name: &str) -> AttributesMap {
    [(0u16, name.as_bytes().to_vec())].into_iter().collect()
}

/// Everything the room sent since the last drain.
#[derive(Debug, Default)]
pub struct Inbox {
    pub messages: BTreeMap<ClientId, Vec<WireEnvelope>>,
    pub batches: BTreeMap<ClientId, usize>,
    pub disconnects: Vec<(ClientId, DisconnectCode)>,
    pub closed: bool,
}

impl Inbox {
    pub fn of(&self, client: ClientId) -> &[WireEnvelope] {
        self.messages.get(&client).map_or(&[], Vec::as_slice)
    }

    pub fn codes(&self, client: ClientId) -> Vec<u16> {
        self.of(client).iter().map(|e| e.type_code).collect()
    }

    /// Every message of type `T` the client received, in order.
    pub fn all<T: Resolvable>(&self, codec: &WireCodec, client: ClientId) -> Vec<T> {
        let Ok(code) = codec.codes().code_of::<T>() else {
            return Vec::new();
        };
        self.of(client)
            .iter()
            .filter(|e| e.type_code == code)
            .map(|e| codec.decode::<T>(e.as_frame()).unwrap())
            .collect()
    }

    pub fn last<T: Resolvable>(&self, codec: &WireCodec, client: ClientId) -> Option<T> {
        self.all(codec, client).pop()
    }

    pub fn is_silent(&self) -> bool {
        self.messages.values().all(Vec::is_empty) && self.disconnects.is_empty()
    }
}
