//! End-to-end flow through the facade: config, lobby, room actor and a
//! local transport standing in for real sockets.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use netroom::prelude::*;
use netroom::protocol::messages::{
    AttributesMap, ClientConnectedCommand, EntityType, LoadSceneCommand, LoadScenesRequest,
    PersistenceFlags, RegisterClientRequest, RegisterClientResponse, SceneLoadMode,
    SpawnEntityCommand, SpawnEntityRequest, TimeRequest, TimeResponse,
};
use netroom::protocol::{NetWriter, Resolvable, encode_batch, split_batch};

// =========================================================================
// Test client
// =========================================================================

/// Reads everything the room sends and hands out messages per client.
struct Wire {
    hub: LocalHub,
    codec: WireCodec,
    inbox: HashMap<ClientId, VecDeque<WireEnvelope>>,
}

impl Wire {
    fn new(hub: LocalHub) -> Self {
        Self {
            hub,
            codec: WireCodec::standard(),
            inbox: HashMap::new(),
        }
    }

    fn send<T: Resolvable>(&self, client: ClientId, message: &T) {
        let envelope = self.codec.encode(message).unwrap();
        let mut writer = NetWriter::new();
        encode_batch(&mut writer, [&envelope]);
        self.hub.send(client, writer.into_inner());
    }

    fn register(&mut self, name: &str) -> ClientId {
        let client = self.hub.connect();
        let profile: AttributesMap = [(0u16, name.as_bytes().to_vec())].into_iter().collect();
        self.send(
            client,
            &RegisterClientRequest {
                profile,
                password: None,
            },
        );
        client
    }

    /// Waits for the next `T` addressed to `client`, skipping anything
    /// older on that client's stream.
    async fn expect<T: Resolvable>(&mut self, client: ClientId) -> T {
        let code = self.codec.codes().code_of::<T>().unwrap();
        loop {
            if let Some(queue) = self.inbox.get_mut(&client) {
                while let Some(envelope) = queue.pop_front() {
                    if envelope.type_code == code {
                        return self.codec.decode(envelope.as_frame()).unwrap();
                    }
                }
            }
            match self.hub.recv().await {
                Some(LocalOutbound::Data { client: to, bytes, .. }) => {
                    let queue = self.inbox.entry(to).or_default();
                    for frame in split_batch(&bytes) {
                        queue.push_back(frame.unwrap().into_owned());
                    }
                }
                other => panic!("room went away while waiting: {other:?}"),
            }
        }
    }
}

fn config() -> ServerConfig {
    ServerConfig::from_json(
        r#"{
            "log_filter": "netroom=debug",
            "engine": { "tick_rate_hz": 20, "idle_grace": { "secs": 60, "nanos": 0 } },
            "apps": [{ "id": "arena", "versions": ["1.0"], "max_rooms": 2 }]
        }"#,
    )
    .unwrap()
}

// =========================================================================
// Tests
// =========================================================================

#[test]
fn test_logging_init_is_idempotent() {
    netroom::logging::init_for_tests();
    assert!(!netroom::logging::init("info"));
}

#[tokio::test(start_paused = true)]
async fn test_two_clients_meet_and_see_each_others_entities() {
    netroom::logging::init_for_tests();
    let config = config();
    assert_eq!(config.engine.idle_grace, Duration::from_secs(60));

    let lobby = config.lobby();
    let (transport, hub) = LocalTransport::pair();
    let options = RoomOptions {
        name: "duel".into(),
        capacity: 2,
        ..RoomOptions::default()
    };
    let handle = lobby.open("arena", "1.0", options, Box::new(transport)).unwrap();
    let mut wire = Wire::new(hub);

    let alice = wire.register("alice");
    let welcome: RegisterClientResponse = wire.expect(alice).await;
    assert_eq!(welcome.id, alice);
    assert_eq!(welcome.master, alice);
    assert_eq!(welcome.room.name, "duel");

    let bob = wire.register("bob");
    let welcome: RegisterClientResponse = wire.expect(bob).await;
    assert_eq!(welcome.master, alice);
    assert_eq!(welcome.clients.len(), 2);
    let joined: ClientConnectedCommand = wire.expect(alice).await;
    assert_eq!(joined.client.id, bob);

    wire.send(
        alice,
        &LoadScenesRequest {
            scenes: vec![1],
            mode: SceneLoadMode::Single,
        },
    );
    let loaded: LoadSceneCommand = wire.expect(bob).await;
    assert_eq!(loaded.scene, 1);

    wire.send(
        bob,
        &SpawnEntityRequest {
            token: 7,
            resource: "Prefabs/Ship".into(),
            kind: EntityType::Dynamic,
            persistence: PersistenceFlags::empty(),
            scene: None,
            attributes: AttributesMap::new(),
        },
    );
    let spawned: SpawnEntityCommand = wire.expect(alice).await;
    assert_eq!(spawned.owner, Some(bob));
    assert_eq!(spawned.resource, "Prefabs/Ship");
    assert_eq!(spawned.scene, Some(1));

    wire.send(alice, &TimeRequest { client_time: 1.5 });
    let time: TimeResponse = wire.expect(alice).await;
    assert_eq!(time.client_time, 1.5);
    assert!(time.server_time > 0.0);

    let listed = lobby.query("arena", "1.0");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].occupancy, 2);
    assert_eq!(listed[0].id, handle.room_id());

    lobby.stop(handle.room_id()).await.unwrap();
    handle.stopped().await;
    assert_eq!(handle.info().state, RoomState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_lobby_errors_convert_into_netroom_error() {
    async fn open_unknown(lobby: &Lobby) -> Result<RoomHandle, NetroomError> {
        let (transport, _hub) = LocalTransport::pair();
        Ok(lobby.open("arena", "0.9", RoomOptions::default(), Box::new(transport))?)
    }

    let lobby = config().lobby();
    let err = open_unknown(&lobby).await.unwrap_err();
    assert!(matches!(
        err,
        NetroomError::Lobby(LobbyError::UnknownVersion { .. })
    ));
}
