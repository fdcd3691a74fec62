//! A room driven by its actor task and tick clock.

use std::time::Duration;

use netroom_protocol::messages::{RegisterClientRequest, RegisterClientResponse, RoomId, codes};
use netroom_protocol::{NetWriter, WireCodec, encode_batch, split_batch};
use netroom_room::{EngineConfig, Room, RoomOptions, RoomState, spawn_room};
use netroom_transport::{DisconnectCode, LocalOutbound, LocalTransport};

fn engine() -> EngineConfig {
    EngineConfig {
        tick_rate_hz: 20,
        ..EngineConfig::default()
    }
}

fn register_batch(codec: &WireCodec) -> Vec<u8> {
    let envelope = codec
        .encode(&RegisterClientRequest {
            profile: Default::default(),
            password: None,
        })
        .unwrap();
    let mut writer = NetWriter::new();
    encode_batch(&mut writer, [&envelope]);
    writer.into_inner()
}

#[tokio::test(start_paused = true)]
async fn test_actor_registers_client_on_next_tick() {
    let (transport, mut hub) = LocalTransport::pair();
    let room = Room::new(RoomId(4), RoomOptions::default(), Box::new(transport))
        .unwrap()
        .with_app("arena", "1.0");
    let codec = room.codec().clone();
    let (handle, _task) = spawn_room(room, &engine());

    let client = hub.connect();
    hub.send(client, register_batch(&codec));

    let Some(LocalOutbound::Data { client: to, bytes, .. }) = hub.recv().await else {
        panic!("expected a registration response");
    };
    assert_eq!(to, client);
    let frames: Vec<_> = split_batch(&bytes).map(Result::unwrap).collect();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].type_code, codes::REGISTER_CLIENT_RESPONSE);
    let response: RegisterClientResponse = codec.decode(frames[0]).unwrap();
    assert_eq!(response.master, client);

    let info = handle.fetch_info().await.unwrap();
    assert_eq!(info.occupancy, 1);
    assert_eq!(info.state, RoomState::Running);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.info().occupancy, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_disconnects_and_closes() {
    let (transport, mut hub) = LocalTransport::pair();
    let room = Room::new(RoomId(5), RoomOptions::default(), Box::new(transport)).unwrap();
    let codec = room.codec().clone();
    let (handle, task) = spawn_room(room, &engine());

    let client = hub.connect();
    hub.send(client, register_batch(&codec));
    assert!(matches!(hub.recv().await, Some(LocalOutbound::Data { .. })));

    handle.stop().await.unwrap();
    assert_eq!(
        hub.recv().await,
        Some(LocalOutbound::Disconnected {
            client,
            code: DisconnectCode::RoomStopped,
        })
    );
    assert_eq!(hub.recv().await, Some(LocalOutbound::Closed));

    task.await.unwrap();
    assert!(handle.is_closed());
    assert_eq!(handle.info().state, RoomState::Stopped);
    assert!(handle.fetch_info().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_every_handle_stops_the_room() {
    let (transport, mut hub) = LocalTransport::pair();
    let room = Room::new(RoomId(6), RoomOptions::default(), Box::new(transport)).unwrap();
    let (handle, task) = spawn_room(room, &engine());

    tokio::time::sleep(Duration::from_millis(60)).await;
    drop(handle);
    task.await.unwrap();

    assert_eq!(hub.recv().await, Some(LocalOutbound::Closed));
}
