use std::str::Utf8Error;

use packed_struct::PackingError;

/// When things go awry
#[derive(Debug)]
pub enum JausBridgeError {
    /// A JAUS address string didn't look like `subsystem.node.component`
    MalformedAddress(String),
    /// Message id has no schema in the registry
    UnknownMessageId(String),
    /// Every candidate schema for an id failed against the payload
    SchemaMismatch(String),
    /// Encode input was missing properties the schema declares as required
    MissingRequiredField(String),
    /// A nested JAUS payload failed to encode with every candidate schema
    PayloadEncodeFailed(Vec<String>),
    /// Datagram shorter than the wire format minimum
    ShortFrame { len: usize, min: usize },
    /// Payload ended before the schema walk did
    ShortPayload { need: usize, have: usize },
    /// The bounded send queue is at capacity
    QueueFull,
    /// The send queue was cleared for shutdown
    QueueClosed,
    /// A JSON value didn't fit what the schema expects
    InvalidValue(String),
    BytePackingError(String),
    IoError(std::io::Error),
    SerdeJson(serde_json::Error),
    Utf8Error(Utf8Error),
    /// Something failed in the start up of the bridge
    StartupError(String),
    /// Failed to send something across a tokio channel
    SendError(String),
}

impl std::fmt::Display for JausBridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JausBridgeError::MalformedAddress(addr) => {
                write!(f, "malformed JAUS address: {addr}")
            }
            JausBridgeError::UnknownMessageId(id) => {
                write!(f, "no schema registered for message id {id}")
            }
            JausBridgeError::SchemaMismatch(msg) => write!(f, "schema mismatch: {msg}"),
            JausBridgeError::MissingRequiredField(fields) => {
                write!(f, "missed fields {fields}")
            }
            JausBridgeError::PayloadEncodeFailed(reasons) => {
                write!(f, "payload encode failed: {}", reasons.join("; "))
            }
            JausBridgeError::ShortFrame { len, min } => {
                write!(f, "datagram too short: {len} bytes, minimum is {min}")
            }
            JausBridgeError::ShortPayload { need, have } => {
                write!(f, "payload too short: needed {need} bytes, had {have}")
            }
            JausBridgeError::QueueFull => write!(f, "send queue full"),
            JausBridgeError::QueueClosed => write!(f, "send queue closed"),
            JausBridgeError::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
            JausBridgeError::BytePackingError(msg) => write!(f, "byte packing error: {msg}"),
            JausBridgeError::IoError(err) => write!(f, "io error: {err}"),
            JausBridgeError::SerdeJson(err) => write!(f, "json error: {err}"),
            JausBridgeError::Utf8Error(err) => write!(f, "utf8 error: {err}"),
            JausBridgeError::StartupError(msg) => write!(f, "startup error: {msg}"),
            JausBridgeError::SendError(msg) => write!(f, "channel send error: {msg}"),
        }
    }
}

impl std::error::Error for JausBridgeError {}

impl From<std::io::Error> for JausBridgeError {
    fn from(error: std::io::Error) -> Self {
        JausBridgeError::IoError(error)
    }
}

impl From<serde_json::Error> for JausBridgeError {
    fn from(error: serde_json::Error) -> Self {
        JausBridgeError::SerdeJson(error)
    }
}

impl From<PackingError> for JausBridgeError {
    fn from(error: PackingError) -> Self {
        JausBridgeError::BytePackingError(error.to_string())
    }
}

impl From<Utf8Error> for JausBridgeError {
    fn from(error: Utf8Error) -> Self {
        JausBridgeError::Utf8Error(error)
    }
}

impl From<JausBridgeError> for std::io::Error {
    fn from(error: JausBridgeError) -> Self {
        match error {
            JausBridgeError::IoError(err) => err,
            JausBridgeError::StartupError(err) => std::io::Error::other(err),
            JausBridgeError::SendError(err) => std::io::Error::other(err),
            _ => std::io::Error::other(format!("{:?}", error)),
        }
    }
}
