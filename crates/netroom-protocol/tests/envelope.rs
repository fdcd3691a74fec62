//! Room messages through the standard codec and batch framing.

use netroom_protocol::messages::{
    AttributesMap, ClientInfo, EntityId, RegisterClientResponse, RoomId, RoomInfo,
    RpcBroadcastRequest, RemoteBufferMode, NetworkGroupId, SyncVarCommand, codes,
};
use netroom_protocol::{
    ClientId, NetWriter, SerdeError, WireCodec, WireEnvelope, encode_batch, split_batch,
};

fn profile(name: &str) -> AttributesMap {
    [(0u16, name.as_bytes().to_vec())].into_iter().collect()
}

#[test]
fn test_request_round_trips_through_envelope() {
    let codec = WireCodec::standard();
    let request = RpcBroadcastRequest {
        entity: EntityId(3),
        method: "Jump".into(),
        raw: vec![1, 2],
        buffer: RemoteBufferMode::Last,
        group: NetworkGroupId::DEFAULT,
        exceptions: vec![ClientId::new(2)],
    };
    let env = codec.encode(&request).unwrap();
    assert_eq!(env.type_code, codes::RPC_BROADCAST_REQUEST);

    let bytes = env.to_bytes();
    let parsed = WireEnvelope::parse(&bytes).unwrap();
    assert_eq!(codec.decode::<RpcBroadcastRequest>(parsed.as_frame()).unwrap(), request);
}

#[test]
fn test_register_response_embeds_replay_buffer() {
    let codec = WireCodec::standard();
    let buffered = codec
        .encode(&SyncVarCommand {
            entity: EntityId(1),
            field: 4,
            raw: vec![0xAA],
        })
        .unwrap();
    let response = RegisterClientResponse {
        id: ClientId::new(2),
        room: RoomInfo {
            id: RoomId(1),
            name: "arena".into(),
            capacity: 8,
            visible: true,
            attributes: AttributesMap::new(),
        },
        clients: vec![
            ClientInfo { id: ClientId::new(1), profile: profile("a") },
            ClientInfo { id: ClientId::new(2), profile: profile("b") },
        ],
        master: ClientId::new(1),
        buffer: vec![buffered.clone()],
        time: 12.5,
    };

    let env = codec.encode(&response).unwrap();
    let back: RegisterClientResponse = codec.decode(env.as_frame()).unwrap();
    assert_eq!(back, response);

    let replayed: SyncVarCommand = codec.decode(back.buffer[0].as_frame()).unwrap();
    assert_eq!(replayed.raw, vec![0xAA]);
}

#[test]
fn test_batch_carries_mixed_messages_in_order() {
    let codec = WireCodec::standard();
    let a = codec
        .encode(&SyncVarCommand { entity: EntityId(1), field: 0, raw: vec![] })
        .unwrap();
    let b = codec
        .encode(&ClientInfo { id: ClientId::new(5), profile: AttributesMap::new() });
    // Nested records have no code of their own.
    assert!(matches!(b, Err(SerdeError::UnsupportedType(_))));

    let mut writer = NetWriter::new();
    encode_batch(&mut writer, [&a, &a]);
    let seen: Vec<u16> = split_batch(writer.as_slice())
        .map(|frame| frame.unwrap().type_code)
        .collect();
    assert_eq!(seen, vec![codes::SYNC_VAR_COMMAND, codes::SYNC_VAR_COMMAND]);
}

#[test]
fn test_unknown_code_is_reported() {
    let codec = WireCodec::standard();
    let env = WireEnvelope::new(999, vec![]);
    assert!(matches!(
        codec.decode_any(env.as_frame()),
        Err(SerdeError::UnknownTypeCode(999))
    ));
}
