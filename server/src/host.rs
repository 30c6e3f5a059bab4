//! Reliable connection host
//!
//! [`Transport`] is the seam between the server loop and whatever carries the
//! reliable, channelled connections. [`TcpHost`] implements it on tokio TCP:
//! - An acceptor task and per-peer reader tasks feed one event channel
//! - Capacity and per-address limits are applied when a connection is taken
//!   off that channel, on the loop thread
//! - Outgoing frames are queued per peer and handed to the peer's writer task
//!   on `flush`
//!
//! TCP makes every packet reliable; the flag is still carried in the frame.

use bytes::Bytes;
use log::{debug, error, warn};
use shared::{DisconnectReason, Frame, Packet, DEFAULT_MTU, MAX_CLIENTS};
use shared::frame::FRAME_HEADER_LEN;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Opaque handle to a connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

/// What the transport reports to the server loop.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Connect(PeerId),
    Receive {
        peer: PeerId,
        channel: u8,
        packet: Packet,
    },
    Disconnect(PeerId),
}

/// Limits the listener is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    pub peer_limit: usize,
    pub channel_limit: u8,
    /// Bytes per second per peer, 0 for unlimited
    pub outgoing_bandwidth: u32,
    /// Peers allowed from one IP address
    pub duplicate_peers: usize,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            peer_limit: shared::DEFAULT_CLIENTS,
            channel_limit: shared::NUM_CHANNELS,
            outgoing_bandwidth: 0,
            duplicate_peers: MAX_CLIENTS,
        }
    }
}

/// Reliable, connection-oriented transport driven by the server loop.
#[allow(async_fn_in_trait)]
pub trait Transport: Sized {
    async fn bind(addr: SocketAddr, settings: HostSettings) -> io::Result<Self>;

    /// Returns an event that is already queued, without waiting.
    fn check_events(&mut self) -> Option<HostEvent>;

    /// Pushes queued sends, then waits up to `timeout` for the next event.
    async fn service(&mut self, timeout: Duration) -> io::Result<Option<HostEvent>>;

    /// Queues a packet for a peer; it goes out on the next flush or service.
    fn send(&mut self, peer: PeerId, channel: u8, packet: &Packet);

    /// Sends the close handshake with `reason` and forgets the peer.
    fn disconnect(&mut self, peer: PeerId, reason: DisconnectReason);

    fn flush(&mut self);

    fn peer_address(&self, peer: PeerId) -> Option<SocketAddr>;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn mtu(&self) -> usize;

    fn set_duplicate_peers(&mut self, limit: usize);
}

/// Raw notifications from the socket tasks
#[derive(Debug)]
enum NetworkEvent {
    Incoming { stream: TcpStream, addr: SocketAddr },
    Frame { peer: PeerId, frame: Frame },
    Closed { peer: PeerId },
}

struct Peer {
    addr: SocketAddr,
    pending: Vec<Bytes>,
    outgoing: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
}

/// TCP implementation of [`Transport`].
pub struct TcpHost {
    local_addr: SocketAddr,
    settings: HostSettings,
    peers: HashMap<PeerId, Peer>,
    next_peer: u32,
    events_tx: mpsc::UnboundedSender<NetworkEvent>,
    events_rx: mpsc::UnboundedReceiver<NetworkEvent>,
    acceptor: JoinHandle<()>,
}

impl TcpHost {
    /// Number of connected peers, admitted and not yet closed
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn spawn_acceptor(listener: TcpListener, events_tx: mpsc::UnboundedSender<NetworkEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if events_tx.send(NetworkEvent::Incoming { stream, addr }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    fn spawn_reader(
        peer: PeerId,
        mut reader: OwnedReadHalf,
        events_tx: mpsc::UnboundedSender<NetworkEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(frame) => {
                        let closing = matches!(frame, Frame::Disconnect { .. });
                        if events_tx.send(NetworkEvent::Frame { peer, frame }).is_err() || closing {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("peer {:?} stream ended: {}", peer, e);
                        break;
                    }
                }
            }
            if events_tx.send(NetworkEvent::Closed { peer }).is_err() {
                debug!("peer {:?} closed after the host went away", peer);
            }
        })
    }

    fn spawn_writer(
        mut writer: OwnedWriteHalf,
        mut outgoing: mpsc::UnboundedReceiver<Bytes>,
        bandwidth: u32,
    ) {
        tokio::spawn(async move {
            while let Some(frame) = outgoing.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    debug!("write failed: {}", e);
                    return;
                }
                if bandwidth > 0 {
                    sleep(Duration::from_secs_f64(frame.len() as f64 / bandwidth as f64)).await;
                }
            }
            if let Err(e) = writer.shutdown().await {
                debug!("shutdown failed: {}", e);
            }
        });
    }

    /// Turns a raw notification into a host event, applying admission limits
    fn accept_event(&mut self, event: NetworkEvent) -> Option<HostEvent> {
        match event {
            NetworkEvent::Incoming { stream, addr } => {
                if self.peers.len() >= self.settings.peer_limit {
                    warn!("Refusing connection from {}: host is full", addr);
                    return None;
                }
                let same_host = self
                    .peers
                    .values()
                    .filter(|p| p.addr.ip() == addr.ip())
                    .count();
                if same_host >= self.settings.duplicate_peers {
                    warn!("Refusing connection from {}: too many peers from that address", addr);
                    return None;
                }

                if let Err(e) = stream.set_nodelay(true) {
                    debug!("could not disable Nagle for {}: {}", addr, e);
                }
                let id = PeerId(self.next_peer);
                self.next_peer = self.next_peer.wrapping_add(1);

                let (read_half, write_half) = stream.into_split();
                let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
                Self::spawn_writer(write_half, outgoing_rx, self.settings.outgoing_bandwidth);
                let reader = Self::spawn_reader(id, read_half, self.events_tx.clone());

                self.peers.insert(
                    id,
                    Peer {
                        addr,
                        pending: Vec::new(),
                        outgoing,
                        reader,
                    },
                );
                Some(HostEvent::Connect(id))
            }
            NetworkEvent::Frame {
                peer,
                frame: Frame::Data { channel, reliable, payload },
            } => {
                if !self.peers.contains_key(&peer) {
                    return None;
                }
                if channel >= self.settings.channel_limit {
                    warn!("Dropping packet from {:?} on invalid channel {}", peer, channel);
                    return None;
                }
                Some(HostEvent::Receive {
                    peer,
                    channel,
                    packet: Packet::new(payload, reliable),
                })
            }
            NetworkEvent::Frame {
                peer,
                frame: Frame::Disconnect { .. },
            }
            | NetworkEvent::Closed { peer } => self
                .peers
                .remove(&peer)
                .map(|_| HostEvent::Disconnect(peer)),
        }
    }
}

impl Transport for TcpHost {
    async fn bind(addr: SocketAddr, settings: HostSettings) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let acceptor = Self::spawn_acceptor(listener, events_tx.clone());

        Ok(TcpHost {
            local_addr,
            settings,
            peers: HashMap::new(),
            next_peer: 0,
            events_tx,
            events_rx,
            acceptor,
        })
    }

    fn check_events(&mut self) -> Option<HostEvent> {
        while let Ok(event) = self.events_rx.try_recv() {
            if let Some(event) = self.accept_event(event) {
                return Some(event);
            }
        }
        None
    }

    async fn service(&mut self, wait: Duration) -> io::Result<Option<HostEvent>> {
        self.flush();
        if let Some(event) = self.check_events() {
            return Ok(Some(event));
        }

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match timeout(deadline.saturating_duration_since(tokio::time::Instant::now()), self.events_rx.recv()).await {
                Ok(Some(event)) => {
                    if let Some(event) = self.accept_event(event) {
                        return Ok(Some(event));
                    }
                }
                Ok(None) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "host event channel closed"))
                }
                Err(_) => return Ok(None),
            }
        }
    }

    fn send(&mut self, peer: PeerId, channel: u8, packet: &Packet) {
        let Some(target) = self.peers.get_mut(&peer) else {
            return;
        };
        let frame = Frame::Data {
            channel,
            reliable: packet.is_reliable(),
            payload: packet.data().to_vec(),
        };
        match frame.encode() {
            Ok(bytes) => target.pending.push(bytes),
            Err(e) => error!("Failed to encode packet for {:?}: {}", peer, e),
        }
    }

    fn disconnect(&mut self, peer: PeerId, reason: DisconnectReason) {
        let Some(mut target) = self.peers.remove(&peer) else {
            return;
        };
        // stop reading now; the writer still drains the close frame
        target.reader.abort();
        match (Frame::Disconnect { reason: reason.code() }).encode() {
            Ok(bytes) => target.pending.push(bytes),
            Err(e) => error!("Failed to encode disconnect for {:?}: {}", peer, e),
        }
        for frame in target.pending.drain(..) {
            if target.outgoing.send(frame).is_err() {
                debug!("writer for {:?} already gone", peer);
                break;
            }
        }
        // dropping `outgoing` lets the writer finish and shut the stream down
    }

    fn flush(&mut self) {
        for (id, peer) in self.peers.iter_mut() {
            for frame in peer.pending.drain(..) {
                if peer.outgoing.send(frame).is_err() {
                    debug!("writer for {:?} already gone", id);
                    break;
                }
            }
        }
    }

    fn peer_address(&self, peer: PeerId) -> Option<SocketAddr> {
        self.peers.get(&peer).map(|p| p.addr)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    fn mtu(&self) -> usize {
        DEFAULT_MTU
    }

    fn set_duplicate_peers(&mut self, limit: usize) {
        self.settings.duplicate_peers = limit;
    }
}

impl Drop for TcpHost {
    fn drop(&mut self) {
        self.acceptor.abort();
        for peer in self.peers.values() {
            peer.reader.abort();
        }
    }
}

/// Reads one length-prefixed frame
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Frame>
where
    R: AsyncReadExt + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let len = Frame::body_len(header).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Frame::decode(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Writes one frame
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let bytes = frame
        .encode()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    writer.write_all(&bytes).await
}
