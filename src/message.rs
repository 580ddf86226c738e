use std::fmt::Display;

use bytes::BytesMut;

use crate::address::JausAddress;

/// AS-5669 transport framing, 16 byte minimum packet
pub const AS5669: u8 = 1;
/// AS-5684 transport framing, 14 byte minimum packet
pub const AS5684: u8 = 2;

/// Ordinary data message
pub const CODE_NONE: u8 = 0;
/// Connection request towards the node manager
pub const CODE_CONNECT: u8 = 1;
/// Node manager accepted our connection
pub const CODE_ACCEPT: u8 = 2;
/// Connection cancelled, either side
pub const CODE_CANCEL: u8 = 3;

/// JUDP "standard" priority; the data flags byte carries two bits of it.
pub const DEFAULT_PRIORITY: u8 = 1;

/// How a peer endpoint is reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Udp,
    /// The peer lives on one of our own interfaces
    UdpLocal,
}

/// A transport endpoint hint attached to a [Message]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub kind: EndpointKind,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(kind: EndpointKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            EndpointKind::Udp => "UDP",
            EndpointKind::UdpLocal => "UDP_LOCAL",
        };
        write!(f, "{}://{}:{}", kind, self.host, self.port)
    }
}

/// One JAUS message, either received from the wire or under construction.
///
/// Data messages have `cmd_code == CODE_NONE` and carry their message id in
/// the first two payload bytes; connection management messages have a nonzero
/// `cmd_code`, a zero `msg_id` and an empty payload.
#[derive(Debug, Clone)]
pub struct Message {
    pub version: u8,
    pub cmd_code: u8,
    pub msg_id: u16,
    pub src_id: JausAddress,
    pub dst_id: JausAddress,
    /// Assigned by the transport's sender task; the wire carries the low 16 bits
    pub seqnr: u32,
    pub priority: u8,
    payload: BytesMut,
    pub tinfo_src: Option<Endpoint>,
    pub tinfo_dst: Option<Endpoint>,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            version: AS5684,
            cmd_code: CODE_NONE,
            msg_id: 0,
            src_id: JausAddress::default(),
            dst_id: JausAddress::default(),
            seqnr: 0,
            priority: DEFAULT_PRIORITY,
            payload: BytesMut::new(),
            tinfo_src: None,
            tinfo_dst: None,
        }
    }
}

impl Message {
    pub fn new(msg_id: u16) -> Self {
        Self {
            msg_id,
            ..Default::default()
        }
    }

    pub fn append_payload(&mut self, data: &[u8]) {
        self.payload.extend_from_slice(data);
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, data: BytesMut) {
        self.payload = data;
    }

    /// True for CONNECT / ACCEPT / CANCEL handshake messages
    pub fn is_command(&self) -> bool {
        self.cmd_code > CODE_NONE
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Message(id={:04x} cmd={} src={} dst={} seqnr={} payload={}B)",
            self.msg_id,
            self.cmd_code,
            self.src_id,
            self.dst_id,
            self.seqnr,
            self.payload.len()
        )
    }
}
