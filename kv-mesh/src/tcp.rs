//! TCP mesh: one host per process, one node server per host.
//!
//! A host binds a listener and is named after the address it bound. It owns
//! a single server slot, the well-known local name that incoming requests
//! are delivered to. Hosts learn about each other through `Join` frames and
//! keep connecting until every host knows every other host.
//!
//! # Wire format
//!
//! Every frame is length-prefixed:
//! - 4 bytes: frame length (big-endian u32)
//! - N bytes: bincode-encoded [`Frame`] or [`FrameReply`]
//!
//! Casts to a peer share one long-lived connection per peer. They are written
//! and read back in the order they were sent, so two casts from one host
//! reach the peer's server in send order. Every other frame opens its own
//! connection and gets exactly one reply frame on it.
//!
//! Hosts tell each other whether they run a server. A [`TcpHost`] offers only
//! serving hosts as peers, so a bare host that merely joined the mesh never
//! receives requests or bootstrap calls.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::{MeshError, Result};
use crate::membership::{Membership, NodeId, PeerSet, PeerStatus};
use crate::message::{Frame, FrameReply, Reply, Request};
use crate::runtime::{start_server, NodeConfig, NodeHandle};
use crate::transport::{await_reply, deliver_call, deliver_cast, Inbound, Transport};

/// Frames larger than this are treated as corrupt.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings for a TCP host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Address to bind. Port 0 picks an ephemeral port.
    pub listen: SocketAddr,
    /// How long a synchronous call waits for its reply. `None` waits forever.
    pub call_timeout: Option<Duration>,
    pub connect_timeout: Duration,
}

impl HostConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            call_timeout: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

struct HostState {
    id: NodeId,
    peers: PeerSet,
    server: Mutex<Option<Sender<Inbound>>>,
    links: Mutex<HashMap<NodeId, Link>>,
    next_link: AtomicU64,
    call_timeout: Option<Duration>,
    connect_timeout: Duration,
}

/// Queue feeding the writer thread that owns the outbound stream to one peer.
struct Link {
    generation: u64,
    frames: Sender<Frame>,
}

/// A process-level member of a TCP mesh.
///
/// Clones share the same listener, peer set and server slot.
#[derive(Clone)]
pub struct TcpHost {
    state: Arc<HostState>,
}

impl TcpHost {
    /// Binds the listener and starts accepting connections in the background.
    pub fn bind(config: HostConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)?;
        let id = NodeId::new(listener.local_addr()?.to_string());
        let host = Self {
            state: Arc::new(HostState {
                peers: PeerSet::new(id.clone()),
                id: id.clone(),
                server: Mutex::new(None),
                links: Mutex::new(HashMap::new()),
                next_link: AtomicU64::new(0),
                call_timeout: config.call_timeout,
                connect_timeout: config.connect_timeout,
            }),
        };

        let accepting = host.clone();
        thread::Builder::new()
            .name(format!("kv-host-{id}"))
            .spawn(move || accepting.accept_loop(listener))?;
        info!(host = %id, "host listening");
        Ok(host)
    }

    pub fn id(&self) -> &NodeId {
        &self.state.id
    }

    pub fn peers(&self) -> &PeerSet {
        &self.state.peers
    }

    pub fn is_serving(&self) -> bool {
        self.slot().is_some()
    }

    /// This host and every host it knows, sorted by name.
    pub fn statuses(&self) -> Vec<PeerStatus> {
        let mut all = self.peers().statuses();
        all.push(self.status());
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    fn status(&self) -> PeerStatus {
        PeerStatus {
            id: self.id().clone(),
            serving: self.is_serving(),
        }
    }

    /// Starts the node server for this host.
    pub fn start_local_server(&self) -> Result<NodeHandle> {
        start_server(
            NodeConfig::new(self.id().clone()),
            Arc::new(self.clone()),
            Arc::new(self.peers().clone()),
        )
    }

    /// A client spreading requests over every serving host in the mesh.
    pub fn client(&self) -> Client {
        Client::new(Arc::new(ServingView { host: self.clone() }), Arc::new(self.clone()))
    }

    /// Connects to `seed` and, through it, to every host it knows.
    pub fn join(&self, seed: &NodeId) -> Result<()> {
        if seed == self.id() {
            return Ok(());
        }
        let frame = Frame::Join {
            from: self.status(),
            known: self.peers().statuses(),
        };
        match self.exchange(seed, &frame)? {
            FrameReply::Peers(members) => {
                if !self.peers().contains(seed) {
                    info!(host = %self.id(), peer = %seed, "joined peer");
                }
                // The seed's own entry is first-hand, so it decides the flag.
                let serving = members
                    .iter()
                    .any(|member| &member.id == seed && member.serving);
                self.peers().set_serving(seed.clone(), serving);
                self.learn(members);
                Ok(())
            }
            FrameReply::Refused(reason) => Err(MeshError::Refused {
                peer: seed.clone(),
                reason,
            }),
            other => Err(MeshError::UnexpectedReply {
                peer: seed.clone(),
                expected: "peers",
                got: other.kind(),
            }),
        }
    }

    /// Records hosts we were told about and introduces ourselves to the new ones.
    ///
    /// Serving flags heard second-hand are ignored. A new host counts as not
    /// serving until joining it returns its own status.
    fn learn(&self, members: Vec<PeerStatus>) {
        for member in members {
            if !self.peers().insert(member.id.clone()) {
                continue;
            }
            info!(host = %self.id(), peer = %member.id, "learned peer");
            if let Err(err) = self.join(&member.id) {
                warn!(host = %self.id(), peer = %member.id, error = %err, "failed to join learned peer");
            }
        }
    }

    /// Tells every known host whether this one serves.
    ///
    /// Returns once each reachable host has recorded the change. A server
    /// announces itself before it bootstraps, so writes accepted after its
    /// snapshot was taken are replicated to it.
    fn announce(&self, serving: bool) {
        let frame = Frame::Status(PeerStatus {
            id: self.id().clone(),
            serving,
        });
        for peer in self.peers().statuses() {
            match self.exchange(&peer.id, &frame) {
                Ok(FrameReply::Ack) => {}
                Ok(other) => {
                    warn!(host = %self.id(), peer = %peer.id, got = other.kind(), "unexpected reply to status")
                }
                Err(err) => {
                    debug!(host = %self.id(), peer = %peer.id, error = %err, "failed to announce status")
                }
            }
        }
    }

    fn slot(&self) -> Option<Sender<Inbound>> {
        self.state
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn local_mailbox(&self) -> Result<Sender<Inbound>> {
        self.slot()
            .ok_or_else(|| MeshError::PeerUnreachable(self.id().clone()))
    }

    fn accept_loop(self, listener: TcpListener) {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let host = self.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("kv-conn-{}", self.id()))
                        .spawn(move || {
                            if let Err(err) = host.handle_connection(stream) {
                                warn!(host = %host.id(), error = %err, "connection error");
                            }
                        });
                    if let Err(err) = spawned {
                        warn!(host = %self.id(), error = %err, "failed to spawn connection handler");
                    }
                }
                Err(err) => warn!(host = %self.id(), error = %err, "accept error"),
            }
        }
    }

    /// Serves one inbound connection.
    ///
    /// A link from a peer carries a stream of casts, delivered one after
    /// another until the peer closes it. Any other frame is answered with a
    /// single reply, which ends the connection.
    fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        loop {
            let bytes = match read_frame(&mut stream) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            if let Some(reply) = self.answer(Frame::decode(&bytes)?) {
                write_frame(&mut stream, &reply.encode()?)?;
                return Ok(());
            }
        }
    }

    fn deliver_inbound_cast(&self, request: Request) {
        let kind = request.kind();
        match self.local_mailbox() {
            Ok(mailbox) => {
                if let Err(err) = deliver_cast(&mailbox, self.id(), request) {
                    debug!(host = %self.id(), request = kind, error = %err, "server gone, dropping cast");
                }
            }
            Err(_) => debug!(host = %self.id(), request = kind, "no server, dropping cast"),
        }
    }

    /// Acts on one inbound frame. Casts get no reply.
    fn answer(&self, frame: Frame) -> Option<FrameReply> {
        let reply = match frame {
            Frame::Cast(request) => {
                self.deliver_inbound_cast(request);
                return None;
            }
            Frame::Call(request) => match self.local_call(request, None) {
                Ok(reply) => FrameReply::Reply(reply),
                Err(err) => FrameReply::Refused(err.to_string()),
            },
            Frame::StartServer => match self.start_local_server() {
                Ok(handle) => FrameReply::Started(handle.id().clone()),
                Err(err) => FrameReply::Refused(err.to_string()),
            },
            Frame::Join { from, known } => {
                if !self.peers().contains(&from.id) {
                    info!(host = %self.id(), peer = %from.id, serving = from.serving, "peer joined");
                }
                self.peers().set_serving(from.id, from.serving);
                self.learn(known);
                FrameReply::Peers(self.statuses())
            }
            Frame::Status(status) => {
                info!(host = %self.id(), peer = %status.id, serving = status.serving, "peer status changed");
                self.peers().set_serving(status.id, status.serving);
                FrameReply::Ack
            }
        };
        Some(reply)
    }

    fn local_call(&self, request: Request, timeout: Option<Duration>) -> Result<Reply> {
        let reply_rx = deliver_call(&self.local_mailbox()?, self.id(), request)?;
        await_reply(reply_rx, self.id(), timeout)
    }

    fn connect(&self, to: &NodeId) -> Result<TcpStream> {
        let unreachable = || MeshError::PeerUnreachable(to.clone());
        let addr = to
            .as_str()
            .to_socket_addrs()
            .map_err(|_| unreachable())?
            .next()
            .ok_or_else(unreachable)?;
        TcpStream::connect_timeout(&addr, self.state.connect_timeout).map_err(|_| unreachable())
    }

    /// Queues a frame on the link to `to`, opening the link first if needed.
    fn cast(&self, to: &NodeId, frame: Frame) -> Result<()> {
        self.link(to)?
            .send(frame)
            .map_err(|_| MeshError::PeerUnreachable(to.clone()))
    }

    fn link(&self, to: &NodeId) -> Result<Sender<Frame>> {
        let mut links = self.state.links.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(link) = links.get(to) {
            return Ok(link.frames.clone());
        }

        let stream = self.connect(to)?;
        let generation = self.state.next_link.fetch_add(1, Ordering::Relaxed);
        let (frames, queued) = unbounded();
        let host = self.clone();
        let peer = to.clone();
        thread::Builder::new()
            .name(format!("kv-link-{to}"))
            .spawn(move || host.write_link(peer, generation, stream, queued))?;
        debug!(host = %self.id(), peer = %to, "opened link");

        links.insert(
            to.clone(),
            Link {
                generation,
                frames: frames.clone(),
            },
        );
        Ok(frames)
    }

    /// Writes queued casts to one peer, in order, until the stream breaks.
    ///
    /// Casts still queued when the stream breaks are dropped. The next cast
    /// to that peer opens a fresh link.
    fn write_link(&self, peer: NodeId, generation: u64, mut stream: TcpStream, queued: Receiver<Frame>) {
        for frame in queued.iter() {
            let written = frame
                .encode()
                .and_then(|bytes| write_frame(&mut stream, &bytes).map_err(MeshError::from));
            if let Err(err) = written {
                debug!(host = %self.id(), peer = %peer, error = %err, "link broken, dropping queued casts");
                break;
            }
        }

        let mut links = self.state.links.lock().unwrap_or_else(PoisonError::into_inner);
        if links.get(&peer).is_some_and(|link| link.generation == generation) {
            links.remove(&peer);
        }
    }

    /// Sends a frame and waits for the reply on the same connection.
    fn exchange(&self, to: &NodeId, frame: &Frame) -> Result<FrameReply> {
        let mut stream = self.connect(to)?;
        write_frame(&mut stream, &frame.encode()?)
            .map_err(|_| MeshError::PeerUnreachable(to.clone()))?;
        stream.set_read_timeout(self.state.call_timeout)?;
        let bytes = read_frame(&mut stream).map_err(|err| match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => MeshError::Timeout(to.clone()),
            _ => MeshError::PeerUnreachable(to.clone()),
        })?;
        FrameReply::decode(&bytes)
    }
}

impl Transport for TcpHost {
    fn send(&self, to: &NodeId, request: Request) -> Result<()> {
        if to == self.id() {
            return deliver_cast(&self.local_mailbox()?, to, request);
        }
        self.cast(to, Frame::Cast(request))
    }

    fn call(&self, to: &NodeId, request: Request) -> Result<Reply> {
        if to == self.id() {
            return self.local_call(request, self.state.call_timeout);
        }
        match self.exchange(to, &Frame::Call(request))? {
            FrameReply::Reply(reply) => Ok(reply),
            FrameReply::Refused(reason) => Err(MeshError::Refused {
                peer: to.clone(),
                reason,
            }),
            other => Err(MeshError::UnexpectedReply {
                peer: to.clone(),
                expected: "reply",
                got: other.kind(),
            }),
        }
    }

    fn spawn_remote(&self, target: &NodeId) -> Result<NodeId> {
        if target == self.id() {
            return Ok(self.start_local_server()?.id().clone());
        }
        self.join(target)?;
        match self.exchange(target, &Frame::StartServer)? {
            FrameReply::Started(id) => Ok(id),
            FrameReply::Refused(reason) => Err(MeshError::Refused {
                peer: target.clone(),
                reason,
            }),
            other => Err(MeshError::UnexpectedReply {
                peer: target.clone(),
                expected: "started",
                got: other.kind(),
            }),
        }
    }

    fn register(&self, id: &NodeId, mailbox: Sender<Inbound>) -> Result<()> {
        if id != self.id() {
            return Err(MeshError::Refused {
                peer: self.id().clone(),
                reason: format!("host can only serve its own address, not {id}"),
            });
        }
        {
            let mut slot = self
                .state
                .server
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Err(MeshError::AlreadyRegistered(id.clone()));
            }
            *slot = Some(mailbox);
        }
        self.announce(true);
        Ok(())
    }

    fn unregister(&self, id: &NodeId) {
        if id != self.id() {
            return;
        }
        let was_serving = self
            .state
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if was_serving {
            self.announce(false);
        }
    }
}

/// Client-side membership: every serving peer plus this host while it serves.
struct ServingView {
    host: TcpHost,
}

impl Membership for ServingView {
    fn current_peers(&self) -> Vec<NodeId> {
        let mut peers = self.host.peers().current_peers();
        if self.host.is_serving() {
            peers.push(self.host.id().clone());
        }
        peers
    }
}

fn read_frame(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(bytes)?;
    stream.flush()
}
