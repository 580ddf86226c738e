//! The unicast UDP transport towards the IOP node manager.
//!
//! One bound socket, two tasks: the sender pulls from the bounded priority
//! queue, stamps sequence numbers and serializes; the receiver frames
//! incoming datagrams, handles the CONNECT/ACCEPT/CANCEL handshake and hands
//! data messages to the router channel. `close()` cancels both through the
//! cancellation token plus the queue's shutdown sentinel.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::UDP_BUFFER_SIZE;
use crate::address::JausAddress;
use crate::error::JausBridgeError;
use crate::framer;
use crate::message::{
    AS5669, CODE_ACCEPT, CODE_CANCEL, CODE_CONNECT, Endpoint, EndpointKind, Message,
};
use crate::queue::SendQueue;

/// Known peers by JAUS address. Filled from received data traffic, emptied
/// again when the node manager cancels a connection.
#[derive(Debug, Default)]
pub struct AddressBook {
    entries: HashMap<JausAddress, Endpoint>,
}

impl AddressBook {
    pub fn add(&mut self, address: JausAddress, endpoint: Endpoint) {
        self.entries.insert(address, endpoint);
    }

    pub fn remove(&mut self, address: &JausAddress) {
        self.entries.remove(address);
    }

    pub fn get(&self, address: &JausAddress) -> Option<&Endpoint> {
        self.entries.get(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Unicast UDP socket with a queued sender and a framing receiver
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    pub port: u16,
    hostname: String,
    /// Names this host answers to, used for endpoint classification
    locals: Vec<String>,
    queue: Arc<SendQueue>,
    seqnr: AtomicU32,
    nm_connected: AtomicBool,
    address_book: Arc<Mutex<AddressBook>>,
    sender_endpoints: Mutex<HashMap<SocketAddr, Endpoint>>,
    default_dst: Option<(String, u16)>,
    /// Destinations we already complained about once
    unreachable_logged: Mutex<HashSet<String>>,
    cancel: CancellationToken,
}

impl UdpTransport {
    /// Bind the socket. `interface` may be empty to bind all interfaces,
    /// `default_dst` is where messages without an explicit destination go.
    pub async fn bind(
        interface: &str,
        port: u16,
        default_dst: Option<(String, u16)>,
        queue_length: usize,
    ) -> Result<Arc<Self>, JausBridgeError> {
        let bind_ip = match interface.is_empty() {
            true => "0.0.0.0",
            false => interface,
        };
        info!("+ Bind to unicast socket @({bind_ip}:{port})");
        let socket = UdpSocket::bind(format!("{bind_ip}:{port}"))
            .await
            .map_err(|error| {
                error!("Unable to bind unicast to interface {bind_ip}: {error:?}");
                JausBridgeError::StartupError(format!(
                    "failed to bind UDP socket on {bind_ip}:{port}: {error}"
                ))
            })?;
        let port = socket.local_addr()?.port();

        let hostname = gethostname::gethostname()
            .into_string()
            .unwrap_or_else(|_| "localhost".to_string());
        let mut locals = vec![
            "127.0.0.1".to_string(),
            "::1".to_string(),
            "localhost".to_string(),
        ];
        locals.push(hostname.clone());
        if !interface.is_empty() {
            locals.push(interface.to_string());
        }

        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            port,
            hostname,
            locals,
            queue: Arc::new(SendQueue::new(queue_length)),
            seqnr: AtomicU32::new(0),
            nm_connected: AtomicBool::new(false),
            address_book: Arc::new(Mutex::new(AddressBook::default())),
            sender_endpoints: Mutex::new(HashMap::new()),
            default_dst,
            unreachable_logged: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
        }))
    }

    /// Start the sender and receiver tasks. Received data messages go to
    /// `router_tx`.
    pub fn spawn(
        self: &Arc<Self>,
        router_tx: mpsc::Sender<Message>,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        let recv_self = Arc::clone(self);
        let recv_task = tokio::spawn(async move {
            recv_self.run_recv(router_tx).await;
        });
        let send_self = Arc::clone(self);
        let send_task = tokio::spawn(async move {
            if let Err(error) = send_self.run_send().await {
                error!("UDP sender task failed: {error}");
            }
        });
        (recv_task, send_task)
    }

    /// Queue an outgoing message, stamping our own endpoint on it
    pub fn send_queued(&self, mut message: Message) {
        message.tinfo_src = Some(Endpoint::new(
            EndpointKind::Udp,
            self.hostname.clone(),
            self.port,
        ));
        if let Err(error) = self.queue.put(message) {
            warn!("Can't send message: {error}");
        }
    }

    /// Announce a JAUS address to the node manager
    pub fn connect_jaus_address(&self, address: JausAddress) {
        info!("send IOP connect message for {address}");
        self.enqueue_command(CODE_CONNECT, address);
    }

    /// Withdraw a JAUS address from the node manager
    pub fn disconnect_jaus_address(&self, address: JausAddress) {
        self.enqueue_command(CODE_CANCEL, address);
    }

    fn enqueue_command(&self, cmd_code: u8, address: JausAddress) {
        let mut message = Message::default();
        message.version = AS5669;
        message.cmd_code = cmd_code;
        message.src_id = address;
        message.tinfo_src = Some(Endpoint::new(
            EndpointKind::Udp,
            self.hostname.clone(),
            self.port,
        ));
        if let Err(error) = self.queue.put(message) {
            warn!("Can't send handshake message: {error}");
        }
    }

    /// True once the node manager has accepted a connection
    pub fn nm_connected(&self) -> bool {
        self.nm_connected.load(Ordering::SeqCst)
    }

    pub fn address_book(&self) -> Arc<Mutex<AddressBook>> {
        Arc::clone(&self.address_book)
    }

    /// Stop both tasks and drop anything still queued
    pub fn close(&self) {
        info!("Close unicast socket");
        self.cancel.cancel();
        self.queue.clear();
    }

    async fn run_send(&self) -> Result<(), JausBridgeError> {
        while let Some(mut message) = self.queue.get().await {
            if self.cancel.is_cancelled() {
                break;
            }
            let dst = message.tinfo_dst.clone().or_else(|| {
                self.default_dst
                    .as_ref()
                    .map(|(host, port)| Endpoint::new(EndpointKind::Udp, host.clone(), *port))
            });
            let Some(dst) = dst else {
                debug!("Dropping message without destination: {message}");
                continue;
            };
            message.seqnr = self.seqnr.fetch_add(1, Ordering::SeqCst);
            let bytes = match framer::serialize(&message) {
                Ok(value) => value,
                Err(error) => {
                    error!("Failed to serialize {message}: {error}");
                    continue;
                }
            };
            self.sendto(&bytes, &dst.host, dst.port).await?;
        }
        Ok(())
    }

    /// Send one datagram, classifying the socket errors: transient network
    /// errors are swallowed, unreachable hosts are logged once, EINVAL means
    /// a programming bug and propagates.
    async fn sendto(&self, bytes: &[u8], host: &str, port: u16) -> Result<(), JausBridgeError> {
        debug!("Send to {host}:{port}");
        match self.socket.send_to(bytes, (host, port)).await {
            Ok(_) => Ok(()),
            Err(error) => match error.raw_os_error() {
                Some(libc::EHOSTUNREACH) => {
                    let mut logged = self
                        .unreachable_logged
                        .lock()
                        .map_err(|_| JausBridgeError::SendError("lock poisoned".to_string()))?;
                    if logged.insert(host.to_string()) {
                        warn!("socket error [{error}], addr: {host}");
                    }
                    Ok(())
                }
                Some(libc::EINVAL) => Err(error.into()),
                Some(code)
                    if [libc::ENETDOWN, libc::ENETUNREACH, libc::ENETRESET].contains(&code) =>
                {
                    warn!("transient socket error sending to {host}:{port}: {error}");
                    Ok(())
                }
                _ => Err(error.into()),
            },
        }
    }

    async fn run_recv(&self, router_tx: mpsc::Sender<Message>) {
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        loop {
            let (len, peer) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(value) => value,
                    Err(error) => {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        warn!("unicast socket error: {error:?}");
                        continue;
                    }
                },
            };
            debug!("{len} bytes received from {peer}");
            let msgs = match framer::parse(&buf[..len]) {
                Ok(value) => value,
                Err(error) => {
                    warn!("Failed to parse datagram from {peer}: {error}");
                    continue;
                }
            };
            for mut msg in msgs {
                if msg.dst_id.is_zero() || msg.is_command() {
                    self.handle_command(&msg);
                    continue;
                }
                let endpoint = self.classify_endpoint(peer);
                if let Ok(mut book) = self.address_book.lock() {
                    book.add(msg.src_id, endpoint.clone());
                }
                msg.tinfo_src = Some(endpoint);
                debug!("Received {msg}");
                if router_tx.send(msg).await.is_err() {
                    // router gone, nothing left to dispatch to
                    return;
                }
            }
        }
    }

    fn handle_command(&self, msg: &Message) {
        match msg.cmd_code {
            CODE_ACCEPT => {
                self.nm_connected.store(true, Ordering::SeqCst);
            }
            CODE_CANCEL => {
                self.nm_connected.store(false, Ordering::SeqCst);
                debug!("Disconnect request from {}", msg.src_id);
                if let Ok(mut book) = self.address_book.lock() {
                    book.remove(&msg.src_id);
                }
            }
            _ => {}
        }
    }

    /// Classify and cache the endpoint for a sender address
    fn classify_endpoint(&self, peer: SocketAddr) -> Endpoint {
        if let Ok(cache) = self.sender_endpoints.lock() {
            if let Some(endpoint) = cache.get(&peer) {
                return endpoint.clone();
            }
        }
        let host = peer.ip().to_string();
        let kind = match peer.ip().is_loopback() || self.locals.iter().any(|l| *l == host) {
            true => EndpointKind::UdpLocal,
            false => EndpointKind::Udp,
        };
        let endpoint = Endpoint::new(kind, host, peer.port());
        if let Ok(mut cache) = self.sender_endpoints.lock() {
            cache.insert(peer, endpoint.clone());
        }
        endpoint
    }
}
