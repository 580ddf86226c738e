//! Bidirectional bridge between JAUS messages (SAE AS-5684 / AS-5669 over
//! UDP) and JSON frames on a WebSocket, speaking to an IOP node manager on
//! one side and browser-grade clients on the other.

#[macro_use]
extern crate lazy_static;

/// JAUS component addressing
pub mod address;
/// WebSocket server and the router between both worlds
pub mod bridge;
pub mod cli;
/// The schema-driven payload codec
pub mod codec;
/// Configuration handling for the bridge
pub mod config;
pub mod error;
/// Wire framing for the AS-5669/AS-5684 transports
pub mod framer;
pub mod message;
/// Bounded priority queue for outgoing messages
pub mod queue;
/// Message schema model, registry and loader
pub mod schema;
#[cfg(test)]
mod tests;
/// The UDP transport towards the node manager
pub mod transport;

/// Internal limit of in-flight routed messages
pub const MAX_IN_FLIGHT: usize = 512;
/// Receive buffer size, the largest datagram UDP can carry
pub const UDP_BUFFER_SIZE: usize = 65535;
