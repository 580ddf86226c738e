use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::bridge::{TrafficLog, handle_ingress};
use crate::codec::Codec;
use crate::message::CODE_CONNECT;
use crate::tests::{registry_with, report_identification_frame, report_identification_schema};
use crate::transport::UdpTransport;

#[tokio::test]
async fn test_ingress_connects_each_source_exactly_once() {
    let capture = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("can bind a capture socket");
    let capture_port = capture.local_addr().expect("has a local addr").port();

    let transport = UdpTransport::bind("", 0, Some(("127.0.0.1".to_string(), capture_port)), 0)
        .await
        .expect("binds");
    let (router_tx, _router_rx) = mpsc::channel(8);
    transport.spawn(router_tx);

    let codec = Codec::new(registry_with(vec![report_identification_schema()]));
    let traffic_log = TrafficLog::default();
    let mut jaus_addresses = HashSet::new();

    let frame = report_identification_frame().to_string();
    handle_ingress(&frame, &codec, &transport, &mut jaus_addresses, &traffic_log);
    handle_ingress(&frame, &codec, &transport, &mut jaus_addresses, &traffic_log);
    assert_eq!(jaus_addresses.len(), 1);

    // one CONNECT for the new source, then one data message per frame
    let mut received = Vec::new();
    let mut buf = [0u8; 2048];
    while received.len() < 3 {
        let (len, _peer) = timeout(Duration::from_secs(2), capture.recv_from(&mut buf))
            .await
            .expect("a datagram arrives in time")
            .expect("capture socket reads");
        received.extend(crate::framer::parse(&buf[..len]).expect("parses"));
    }
    let connects = received
        .iter()
        .filter(|msg| msg.cmd_code == CODE_CONNECT)
        .count();
    assert_eq!(connects, 1);
    let data: Vec<_> = received.iter().filter(|msg| msg.cmd_code == 0).collect();
    assert_eq!(data.len(), 2);
    for msg in data {
        assert_eq!(msg.msg_id, 0x4b00);
        assert_eq!(msg.payload().len(), 17);
        assert_eq!(msg.src_id.to_string(), "127.100.1");
    }
    transport.close();
}

#[tokio::test]
async fn test_ingress_drops_garbage_without_connecting() {
    let transport = UdpTransport::bind("", 0, None, 0).await.expect("binds");
    let (router_tx, _router_rx) = mpsc::channel(8);
    transport.spawn(router_tx);

    let codec = Codec::new(Arc::new(crate::schema::SchemaRegistry::default()));
    let traffic_log = TrafficLog::default();
    let mut jaus_addresses = HashSet::new();

    handle_ingress(
        "this is not json",
        &codec,
        &transport,
        &mut jaus_addresses,
        &traffic_log,
    );
    handle_ingress(
        &json!({"messageId": "4b00", "jausIdSrc": "not.an.address"}).to_string(),
        &codec,
        &transport,
        &mut jaus_addresses,
        &traffic_log,
    );
    assert!(jaus_addresses.is_empty());
    transport.close();
}

#[test]
fn test_traffic_log_filters_by_message_id() {
    let filtered = TrafficLog::new(vec!["4b00".to_string()]);
    assert!(filtered.log(&report_identification_frame(), "recv WS"));
    assert!(!filtered.log(&json!({"messageId": "0405"}), "recv WS"));

    // without a filter nothing is promoted unless debug logging is on
    let unfiltered = TrafficLog::default();
    assert!(!unfiltered.log(&report_identification_frame(), "recv WS"));
}
