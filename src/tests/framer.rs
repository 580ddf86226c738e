use crate::address::JausAddress;
use crate::error::JausBridgeError;
use crate::framer::{MIN_PACKET_SIZE_V1, MIN_PACKET_SIZE_V2, parse, serialize};
use crate::message::{AS5669, AS5684, CODE_CONNECT, Message};

fn data_message(seqnr: u32) -> Message {
    let mut msg = Message::new(0x4b00);
    msg.src_id = JausAddress::new(127, 100, 1);
    msg.dst_id = JausAddress::new(127, 255, 255);
    msg.seqnr = seqnr;
    // data payloads lead with their own message id
    msg.append_payload(&[0x00, 0x4b, 0x01, 0x02, 0x03]);
    msg
}

#[test]
fn test_v2_round_trip() {
    let msg = data_message(7);
    let wire = serialize(&msg).expect("serializes");
    assert_eq!(wire.len(), 1 + MIN_PACKET_SIZE_V2 + 5);
    assert_eq!(wire[0], AS5684);

    let parsed = parse(&wire).expect("parses");
    assert_eq!(parsed.len(), 1);
    let parsed = &parsed[0];
    assert_eq!(parsed.version, AS5684);
    assert_eq!(parsed.cmd_code, 0);
    assert_eq!(parsed.msg_id, 0x4b00);
    assert_eq!(parsed.src_id, msg.src_id);
    assert_eq!(parsed.dst_id, msg.dst_id);
    assert_eq!(parsed.seqnr, 7);
    assert_eq!(parsed.payload(), msg.payload());
}

#[test]
fn test_v1_connect_round_trip() {
    let mut msg = Message::default();
    msg.version = AS5669;
    msg.cmd_code = CODE_CONNECT;
    msg.src_id = JausAddress::new(127, 100, 1);
    let wire = serialize(&msg).expect("serializes");
    assert_eq!(wire.len(), MIN_PACKET_SIZE_V1);

    let parsed = parse(&wire).expect("parses");
    assert_eq!(parsed.len(), 1);
    let parsed = &parsed[0];
    assert_eq!(parsed.version, AS5669);
    assert_eq!(parsed.cmd_code, CODE_CONNECT);
    assert_eq!(parsed.msg_id, 0);
    assert_eq!(parsed.src_id, msg.src_id);
    assert!(parsed.dst_id.is_zero());
    assert!(parsed.payload().is_empty());
}

#[test]
fn test_v2_datagram_with_two_messages() {
    let first = serialize(&data_message(1)).expect("serializes");
    let second = serialize(&data_message(2)).expect("serializes");
    // one shared transport version byte, message regions back to back
    let mut datagram = first.clone();
    datagram.extend_from_slice(&second[1..]);

    let parsed = parse(&datagram).expect("parses");
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].seqnr, 1);
    assert_eq!(parsed[1].seqnr, 2);
}

#[test]
fn test_mixed_version_datagram() {
    let mut connect = Message::default();
    connect.version = AS5669;
    connect.cmd_code = CODE_CONNECT;
    let mut datagram = serialize(&connect).expect("serializes");
    datagram.extend_from_slice(&serialize(&data_message(3)).expect("serializes"));

    let parsed = parse(&datagram).expect("parses");
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].cmd_code, CODE_CONNECT);
    assert_eq!(parsed[1].msg_id, 0x4b00);
}

#[test]
fn test_short_frames_are_rejected() {
    match parse(&[AS5669, 0, 0]) {
        Err(JausBridgeError::ShortFrame { len, min }) => {
            assert_eq!(len, 3);
            assert_eq!(min, MIN_PACKET_SIZE_V1);
        }
        other => panic!("expected ShortFrame, got {other:?}"),
    }
    match parse(&[AS5684, 0]) {
        Err(JausBridgeError::ShortFrame { len, min }) => {
            assert_eq!(len, 1);
            assert_eq!(min, MIN_PACKET_SIZE_V2);
        }
        other => panic!("expected ShortFrame, got {other:?}"),
    }
}

#[test]
fn test_unknown_version_is_rejected() {
    assert!(parse(&[9, 0, 0, 0]).is_err());
}

#[test]
fn test_empty_datagram_yields_nothing() {
    let parsed = parse(&[]).expect("parses");
    assert!(parsed.is_empty());
}

#[test]
fn test_v2_truncated_payload_is_rejected() {
    let wire = serialize(&data_message(0)).expect("serializes");
    assert!(parse(&wire[..wire.len() - 3]).is_err());
}
