use std::str::FromStr;

use crate::config::{ConfigFile, split_uri};

#[test]
fn test_split_uri_forms() {
    assert_eq!(
        split_uri("udp://192.168.0.10:3794"),
        ("udp".to_string(), "192.168.0.10".to_string(), 3794)
    );
    // a bare host:port still parses as scheme-and-path, so the "scheme" is
    // the host text; the hostname comes out of the manual split
    assert_eq!(
        split_uri("localhost:3794"),
        ("localhost".to_string(), "localhost".to_string(), 3794)
    );
    // schemes come back lowercased
    assert_eq!(
        split_uri("SHM:0:3794"),
        ("shm".to_string(), "localhost".to_string(), 3794)
    );
    assert_eq!(
        split_uri("tcp:nm-host:8080"),
        ("tcp".to_string(), "nm-host".to_string(), 8080)
    );
    assert_eq!(split_uri("somehost"), (String::new(), "somehost".to_string(), -1));
    assert_eq!(split_uri(""), (String::new(), String::new(), -1));
}

#[test]
fn test_udp_port_tracks_ws_port() {
    let mut config = ConfigFile::default();
    config.ws_port = 9000;
    assert_eq!(config.udp_port(), 9001);
}

#[test]
fn test_iop_endpoint() {
    let mut config = ConfigFile::default();
    config.iop_uri = "udp://10.0.0.5:3794".to_string();
    let (host, port) = config.iop_endpoint().expect("splits");
    assert_eq!(host, "10.0.0.5");
    assert_eq!(port, 3794);

    config.iop_uri = "nonsense".to_string();
    assert!(config.iop_endpoint().is_err());
}

#[test]
fn test_config_from_json_string() {
    let config = ConfigFile::from_str(
        r#"{"ws_port": 9696, "iop_uri": "udp://nm.local:3794", "log_messages": ["4b00"]}"#,
    )
    .expect("parses");
    assert_eq!(config.ws_port, 9696);
    assert_eq!(config.iop_uri, "udp://nm.local:3794");
    assert_eq!(config.log_messages, vec!["4b00".to_string()]);
    // untouched keys keep their defaults
    assert_eq!(config.log_level, "INFO");
    assert_eq!(config.queue_length, 0);
}

#[test]
fn test_config_round_trips_through_json() {
    let config = ConfigFile::default();
    let rendered = config.as_json_pretty().expect("renders");
    let reparsed = ConfigFile::from_str(&rendered).expect("parses");
    assert_eq!(config, reparsed);
}
