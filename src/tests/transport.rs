use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::address::JausAddress;
use crate::framer::{parse, serialize};
use crate::message::{AS5669, CODE_ACCEPT, CODE_CONNECT, Message};
use crate::transport::UdpTransport;

async fn capture_socket() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("can bind a capture socket");
    let port = socket.local_addr().expect("has a local addr").port();
    (socket, port)
}

fn data_message(msg_id: u16) -> Message {
    let mut msg = Message::new(msg_id);
    msg.src_id = JausAddress::new(127, 100, 1);
    msg.dst_id = JausAddress::new(127, 255, 255);
    msg.append_payload(&msg_id.to_le_bytes());
    msg
}

#[tokio::test]
async fn test_sequence_numbers_are_monotonic() {
    let (capture, capture_port) = capture_socket().await;
    let transport = UdpTransport::bind("", 0, Some(("127.0.0.1".to_string(), capture_port)), 0)
        .await
        .expect("binds");
    let (router_tx, _router_rx) = mpsc::channel(8);
    transport.spawn(router_tx);

    for _ in 0..5 {
        transport.send_queued(data_message(0x4b00));
    }

    let mut seqnrs = Vec::new();
    let mut buf = [0u8; 1024];
    while seqnrs.len() < 5 {
        let (len, _peer) = timeout(Duration::from_secs(2), capture.recv_from(&mut buf))
            .await
            .expect("a datagram arrives in time")
            .expect("capture socket reads");
        for msg in parse(&buf[..len]).expect("parses") {
            seqnrs.push(msg.seqnr);
        }
    }
    assert_eq!(seqnrs, vec![0, 1, 2, 3, 4]);
    transport.close();
}

#[tokio::test]
async fn test_accept_flips_nm_connected_without_dispatch() {
    let transport = UdpTransport::bind("", 0, None, 0).await.expect("binds");
    let (router_tx, mut router_rx) = mpsc::channel(8);
    transport.spawn(router_tx);
    assert!(!transport.nm_connected());

    let mut accept = Message::default();
    accept.version = AS5669;
    accept.cmd_code = CODE_ACCEPT;
    let wire = serialize(&accept).expect("serializes");

    let sender = UdpSocket::bind("127.0.0.1:0").await.expect("binds");
    sender
        .send_to(&wire, ("127.0.0.1", transport.port))
        .await
        .expect("sends");

    let mut waited = Duration::ZERO;
    while !transport.nm_connected() && waited < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert!(transport.nm_connected());
    // connection management never reaches the router
    assert!(matches!(
        router_rx.try_recv(),
        Err(mpsc::error::TryRecvError::Empty)
    ));
    transport.close();
}

#[tokio::test]
async fn test_cancel_clears_flag_and_address_book() {
    let transport = UdpTransport::bind("", 0, None, 0).await.expect("binds");
    let (router_tx, mut router_rx) = mpsc::channel(8);
    transport.spawn(router_tx);

    let sender = UdpSocket::bind("127.0.0.1:0").await.expect("binds");

    // a data message first, so the source lands in the address book
    let wire = serialize(&data_message(0x4b00)).expect("serializes");
    sender
        .send_to(&wire, ("127.0.0.1", transport.port))
        .await
        .expect("sends");
    let routed = timeout(Duration::from_secs(2), router_rx.recv())
        .await
        .expect("routed in time")
        .expect("router channel open");
    assert_eq!(routed.msg_id, 0x4b00);
    let endpoint = routed.tinfo_src.expect("source endpoint attached");
    assert_eq!(
        endpoint.kind,
        crate::message::EndpointKind::UdpLocal,
        "loopback traffic classifies as local"
    );
    assert_eq!(
        transport.address_book().lock().expect("lock").len(),
        1
    );

    let mut cancel = Message::default();
    cancel.version = AS5669;
    cancel.cmd_code = crate::message::CODE_CANCEL;
    cancel.src_id = JausAddress::new(127, 100, 1);
    let wire = serialize(&cancel).expect("serializes");
    sender
        .send_to(&wire, ("127.0.0.1", transport.port))
        .await
        .expect("sends");

    let mut waited = Duration::ZERO;
    while transport.address_book().lock().expect("lock").len() > 0
        && waited < Duration::from_secs(2)
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert!(transport.address_book().lock().expect("lock").is_empty());
    assert!(!transport.nm_connected());
    transport.close();
}

#[tokio::test]
async fn test_connect_handshake_message_shape() {
    let (capture, capture_port) = capture_socket().await;
    let transport = UdpTransport::bind("", 0, Some(("127.0.0.1".to_string(), capture_port)), 0)
        .await
        .expect("binds");
    let (router_tx, _router_rx) = mpsc::channel(8);
    transport.spawn(router_tx);

    transport.connect_jaus_address(JausAddress::new(127, 100, 1));

    let mut buf = [0u8; 1024];
    let (len, _peer) = timeout(Duration::from_secs(2), capture.recv_from(&mut buf))
        .await
        .expect("a datagram arrives in time")
        .expect("capture socket reads");
    let parsed = parse(&buf[..len]).expect("parses");
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].version, AS5669);
    assert_eq!(parsed[0].cmd_code, CODE_CONNECT);
    assert_eq!(parsed[0].src_id, JausAddress::new(127, 100, 1));
    assert_eq!(parsed[0].msg_id, 0);
    transport.close();
}
