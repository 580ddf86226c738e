//! WebSocket side of the bridge and the router glue between both worlds.
//!
//! Each accepted client gets its own task: JSON frames coming in are packed
//! and queued towards the node manager, frames produced by the router fan
//! out to every connected client through a broadcast channel. The first
//! time a client uses a new `jausIdSrc` the transport announces it with a
//! CONNECT; when the client goes away every address it used is cancelled.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use concread::cowcell::asynch::CowCellReadTxn;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::address::JausAddress;
use crate::codec::Codec;
use crate::config::ConfigFile;
use crate::message::Message;
use crate::transport::UdpTransport;

/// Per-message traffic logging, optionally restricted to a set of ids.
///
/// Mirrors the verbose logging switch of the bridge: everything is logged at
/// debug level, and selected message ids are promoted to info.
#[derive(Clone, Default)]
pub struct TrafficLog {
    message_ids: Arc<Vec<String>>,
}

impl TrafficLog {
    pub fn new(message_ids: Vec<String>) -> Self {
        Self {
            message_ids: Arc::new(message_ids),
        }
    }

    /// Log a bridge frame; returns whether it was written
    pub fn log(&self, json: &Value, direction: &str) -> bool {
        if !log::log_enabled!(log::Level::Debug) && self.message_ids.is_empty() {
            return false;
        }
        let message_id = json.get("messageId").and_then(Value::as_str).unwrap_or("");
        if self.message_ids.is_empty() || self.message_ids.iter().any(|id| id == message_id) {
            info!("{direction}: {json}");
            return true;
        }
        false
    }
}

/// Accept WebSocket clients until cancelled. A bind failure is fatal so the
/// process can exit nonzero.
pub async fn ws_server(
    config: CowCellReadTxn<ConfigFile>,
    codec: Arc<Codec>,
    udp: Arc<UdpTransport>,
    broadcast_tx: broadcast::Sender<String>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = match TcpListener::bind(("0.0.0.0", config.ws_port)).await {
        Ok(value) => {
            info!("+ Bind to websocket @(0.0.0.0:{})", config.ws_port);
            value
        }
        Err(error) => {
            error!("Failed to start WebSocket listener: {error:?}");
            return Err(error);
        }
    };

    let traffic_log = TrafficLog::new(config.log_messages.clone());
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(value) => value,
                Err(error) => {
                    error!("Error accepting WebSocket connection: {error:?}");
                    continue;
                }
            },
        };
        let client_codec = Arc::clone(&codec);
        let client_udp = Arc::clone(&udp);
        let client_rx = broadcast_tx.subscribe();
        let client_log = traffic_log.clone();
        let client_cancel = cancel.child_token();
        tokio::spawn(async move {
            ws_client(
                stream,
                peer,
                client_codec,
                client_udp,
                client_rx,
                client_log,
                client_cancel,
            )
            .await;
        });
    }
    Ok(())
}

/// One connected WebSocket client
async fn ws_client(
    stream: TcpStream,
    peer: SocketAddr,
    codec: Arc<Codec>,
    udp: Arc<UdpTransport>,
    mut broadcast_rx: broadcast::Receiver<String>,
    traffic_log: TrafficLog,
    cancel: CancellationToken,
) {
    let websocket = match tokio_tungstenite::accept_async(stream).await {
        Ok(value) => value,
        Err(error) => {
            warn!("WebSocket handshake with {peer} failed: {error:?}");
            return;
        }
    };
    info!("{peer} connected");
    let (mut sink, mut source) = websocket.split();

    // every JAUS source address this client has used
    let mut jaus_addresses: HashSet<JausAddress> = HashSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = source.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_ingress(text.as_str(), &codec, &udp, &mut jaus_addresses, &traffic_log);
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!("WebSocket error from {peer}: {error:?}");
                    break;
                }
            },
            outgoing = broadcast_rx.recv() => match outgoing {
                Ok(text) => {
                    if let Err(error) = sink.send(WsMessage::text(text)).await {
                        debug!("Failed to forward to {peer}: {error:?}");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!("{peer} lagging, dropped {count} frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    // withdraw everything this client announced
    for address in &jaus_addresses {
        udp.disconnect_jaus_address(*address);
    }
    info!("{peer} closed");
}

/// Handle one JSON frame from a WebSocket client
pub(crate) fn handle_ingress(
    text: &str,
    codec: &Codec,
    udp: &UdpTransport,
    jaus_addresses: &mut HashSet<JausAddress>,
    traffic_log: &TrafficLog,
) {
    let json: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(error) => {
            warn!("Dropping frame that isn't JSON: {error}");
            return;
        }
    };
    traffic_log.log(&json, "recv WS");

    let src = match json
        .get("jausIdSrc")
        .and_then(Value::as_str)
        .map(JausAddress::from_string)
    {
        Some(Ok(value)) => value,
        Some(Err(error)) => {
            warn!("Dropping frame: {error}");
            return;
        }
        None => {
            warn!("Dropping frame without jausIdSrc");
            return;
        }
    };
    if jaus_addresses.insert(src) {
        udp.connect_jaus_address(src);
    }

    let msg_id = json
        .get("messageId")
        .and_then(Value::as_str)
        .and_then(|id| u16::from_str_radix(id, 16).ok())
        .unwrap_or_default();
    let mut message = Message::new(msg_id);
    if codec.pack(&json, &mut message) {
        udp.send_queued(message);
    }
}

/// Router task: everything the transport receives is unpacked to JSON and
/// broadcast to the connected clients.
pub async fn route_udp_messages(
    codec: Arc<Codec>,
    mut router_rx: mpsc::Receiver<Message>,
    broadcast_tx: broadcast::Sender<String>,
    traffic_log: TrafficLog,
) {
    while let Some(message) = router_rx.recv().await {
        let json = codec.unpack(&message);
        traffic_log.log(&json, "recv UDP");
        let text = match serde_json::to_string(&json) {
            Ok(value) => value,
            Err(error) => {
                error!("Failed to serialize frame for {message}: {error}");
                continue;
            }
        };
        // no receivers just means no clients connected right now
        let _ = broadcast_tx.send(text);
    }
}
