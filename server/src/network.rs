//! Server loop and listener lifecycle
//!
//! [`Server`] owns everything the session core mutates: the client table, the
//! optional listener ([`ServerHost`]), the game session, the in-process client
//! endpoint and the outbox the game queues its traffic on. One call to
//! [`Server::slice`] is one tick:
//!
//! 1. Advance the logical clock (dedicated only) and let the game update
//! 2. Answer pending discovery datagrams
//! 3. Report bandwidth once a minute
//! 4. Drain transport events, waiting at most once for `timeout`
//! 5. Let the game flush its queues and push them to the wire
//!
//! Without a listener the tick only drives the game.

use crate::client_manager::{ClientKind, ClientManager};
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::game::{GameMessage, GameSession, Outbox};
use crate::host::{HostEvent, HostSettings, PeerId, TcpHost, Transport};
use crate::info::InfoResponder;
use crate::router::LocalClient;
use log::{debug, error, info, warn};
use shared::{server_info_port, DisconnectReason, Packet, LAN_INFO_PORT, NUM_CHANNELS};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How often bandwidth stats are reported
pub const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Wait budget of one dedicated server tick
pub const DEDICATED_SLICE: Duration = Duration::from_millis(5);

/// Bytes moved since the last status report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bandwidth {
    pub sent: u64,
    pub received: u64,
}

/// The running listener: transport, discovery sockets and traffic counters.
pub struct ServerHost<T: Transport> {
    pub transport: T,
    pub info: InfoResponder,
    pub bandwidth: Bandwidth,
    last_status: Instant,
}

impl<T: Transport> ServerHost<T> {
    /// Bundles a bound transport with its discovery sockets
    ///
    /// Traffic counters start at zero and the first status report is due one
    /// [`STATUS_INTERVAL`] from now.
    pub fn new(transport: T, info: InfoResponder) -> Self {
        Self {
            transport,
            info,
            bandwidth: Bandwidth::default(),
            last_status: Instant::now(),
        }
    }
}

/// Listen or dedicated server core.
pub struct Server<S: GameSession, T: Transport = TcpHost> {
    pub(crate) clients: ClientManager<S::ClientInfo>,
    pub(crate) host: Option<ServerHost<T>>,
    pub(crate) session: S,
    pub(crate) local_client: Option<Box<dyn LocalClient>>,
    pub(crate) outbox: Outbox,
    clock: Clock,
    config: ServerConfig,
}

impl<S: GameSession, T: Transport> Server<S, T> {
    /// Creates a server with no listener; call `setup_listen_server` or
    /// `init_server` to go online.
    pub fn new(session: S, config: ServerConfig) -> Self {
        Self {
            clients: ClientManager::new(),
            host: None,
            session,
            local_client: None,
            outbox: Outbox::new(),
            clock: Clock::new(),
            config,
        }
    }

    /// Creates a server around an already bound listener.
    pub fn with_host(session: S, config: ServerConfig, host: ServerHost<T>) -> Self {
        let mut server = Self::new(session, config);
        server.host = Some(host);
        server
    }

    /// Initializes the game and, when `listen` is set, goes online. A
    /// dedicated server then runs until `shutdown` is raised.
    pub async fn init_server(&mut self, listen: bool, dedicated: bool, shutdown: &AtomicBool) -> Result<()> {
        self.config.load_init_script()?;
        if listen {
            self.setup_listen_server(dedicated).await?;
        }
        self.session.server_init();

        if listen && dedicated {
            self.run_dedicated(shutdown).await;
        } else if listen && self.host.is_some() {
            info!("listen server started");
        }
        Ok(())
    }

    /// Runs dedicated ticks until `shutdown` is raised. The flag is checked
    /// between ticks, so the tick in progress always completes.
    pub async fn run_dedicated(&mut self, shutdown: &AtomicBool) {
        info!("dedicated server started, waiting for clients...");
        while !shutdown.load(Ordering::Relaxed) {
            self.slice(true, DEDICATED_SLICE).await;
        }
        info!("dedicated server shutting down");
    }

    /// Binds the listener and discovery sockets.
    ///
    /// A dedicated server cannot run without them, so failures are returned.
    /// A listen server logs the failure, tears down and reports `Ok(false)`.
    pub async fn setup_listen_server(&mut self, dedicated: bool) -> Result<bool> {
        match self.open_host().await {
            Ok(host) => {
                self.host = Some(host);
                Ok(true)
            }
            Err(e) if dedicated => Err(e),
            Err(e) => {
                error!("{}", e);
                self.cleanup();
                Ok(false)
            }
        }
    }

    async fn open_host(&mut self) -> Result<ServerHost<T>> {
        let ip = resolve_server_ip(self.config.server_ip()).await;
        let port = self.config.server_port();
        let settings = HostSettings {
            peer_limit: self.config.peer_limit(self.session.reserve_clients()),
            channel_limit: NUM_CHANNELS,
            outgoing_bandwidth: self.config.uprate(),
            duplicate_peers: self.config.duplicate_peers(),
        };

        let transport = T::bind(SocketAddr::new(ip, port), settings)
            .await
            .map_err(ServerError::HostCreate)?;
        let info = InfoResponder::bind(
            SocketAddr::new(ip, server_info_port(port)),
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), LAN_INFO_PORT)),
        )?;

        match transport.local_addr() {
            Some(addr) => info!("Server listening on {}", addr),
            None => info!("Server listening on port {}", port),
        }
        Ok(ServerHost::new(transport, info))
    }

    /// Opens the listener of an embedded (listen) server
    ///
    /// Fails with [`ServerError::AlreadyRunning`] when a listener is up.
    /// Socket failures are handled the listen-server way: logged, and
    /// reported as `Ok(false)` with the server left offline.
    pub async fn start_listen_server(&mut self) -> Result<bool> {
        if self.host.is_some() {
            return Err(ServerError::AlreadyRunning);
        }
        if !self.setup_listen_server(false).await? {
            return Ok(false);
        }
        info!("listen server started for {} clients", self.config.max_clients());
        Ok(true)
    }

    /// Kicks every remote client and takes the listener down
    ///
    /// Remote clients are told the server went local, their close frames
    /// are flushed, then the sockets are dropped. Local clients keep their
    /// slots. Fails with [`ServerError::NotRunning`] when offline.
    pub fn stop_listen_server(&mut self) -> Result<()> {
        if self.host.is_none() {
            return Err(ServerError::NotRunning);
        }
        self.kick_nonlocal_clients(DisconnectReason::Local);
        if let Some(host) = self.host.as_mut() {
            host.transport.flush();
        }
        self.cleanup();
        info!("listen server stopped");
        Ok(())
    }

    /// Drops the listener and its sockets.
    pub fn cleanup(&mut self) {
        if self.host.take().is_some() {
            debug!("server host closed");
        }
    }

    /// One server tick.
    pub async fn slice(&mut self, dedicated: bool, timeout: Duration) {
        if self.host.is_none() {
            self.session.server_update(&mut self.outbox);
            self.session.send_packets(false, &mut self.outbox);
            self.dispatch_outbox();
            return;
        }

        if dedicated {
            self.clock
                .update(self.session.is_paused(), self.session.game_speed());
        }
        self.session.server_update(&mut self.outbox);
        self.dispatch_outbox();

        if let Some(host) = self.host.as_mut() {
            host.info.check_sockets(&mut self.session);
        }

        self.report_bandwidth(Instant::now());

        let mut serviced = false;
        while !serviced {
            let Some(host) = self.host.as_mut() else {
                break;
            };
            let event = match host.transport.check_events() {
                Some(event) => event,
                None => {
                    serviced = true;
                    match host.transport.service(timeout).await {
                        Ok(Some(event)) => event,
                        Ok(None) => break,
                        Err(e) => {
                            error!("Error servicing host: {}", e);
                            break;
                        }
                    }
                }
            };
            self.handle_event(event);
        }

        let sent = self.session.send_packets(false, &mut self.outbox);
        self.dispatch_outbox();
        if sent {
            if let Some(host) = self.host.as_mut() {
                host.transport.flush();
            }
        }
    }

    fn handle_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Connect(peer) => self.handle_connect(peer),
            HostEvent::Receive { peer, channel, packet } => {
                if let Some(host) = self.host.as_mut() {
                    host.bandwidth.received += packet.len() as u64;
                }
                if let Some(slot) = self.clients.slot_of_peer(peer) {
                    self.process(slot, channel, &packet);
                }
            }
            HostEvent::Disconnect(peer) => {
                let Some(slot) = self.clients.slot_of_peer(peer) else {
                    return;
                };
                let hostname = self.clients.hostname_of(slot).unwrap_or_default().to_string();
                info!("disconnected client ({})", hostname);
                self.session.client_disconnect(slot, &mut self.outbox);
                self.clients.remove_client(slot, &mut self.session);
                self.dispatch_outbox();
            }
        }
    }

    fn handle_connect(&mut self, peer: PeerId) {
        let addr = self
            .host
            .as_ref()
            .and_then(|host| host.transport.peer_address(peer));
        let hostname = addr.map_or_else(|| "unknown".to_string(), |a| a.ip().to_string());

        let Some(slot) = self
            .clients
            .add_client(ClientKind::Remote(peer), &hostname, &mut self.session)
        else {
            return;
        };
        info!("client connected ({})", hostname);

        let ip = addr.map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |a| a.ip());
        let refused = self.session.client_connect(slot, ip, &mut self.outbox);
        self.dispatch_outbox();
        if let Some(reason) = refused {
            self.disconnect_client(slot, reason);
        }
    }

    /// Hands one payload to the game; overreading it costs the sender its
    /// connection.
    pub(crate) fn process(&mut self, slot: usize, channel: u8, packet: &Packet) {
        let mut reader = packet.reader();
        self.session
            .parse_packet(slot, channel, &mut reader, &mut self.outbox);
        let overread = reader.overread();
        self.dispatch_outbox();
        if overread {
            self.disconnect_client(slot, DisconnectReason::EndOfPacket);
        }
    }

    /// Routes everything the game queued.
    pub(crate) fn dispatch_outbox(&mut self) {
        while let Some(message) = self.outbox.pop() {
            match message {
                GameMessage::SendPacket {
                    target,
                    channel,
                    packet,
                    exclude,
                } => self.send_packet(target, channel, &packet, exclude),
                GameMessage::Disconnect { slot, reason } => self.disconnect_client(slot, reason),
            }
        }
    }

    /// Logs and resets the traffic counters once per [`STATUS_INTERVAL`].
    pub fn report_bandwidth(&mut self, now: Instant) {
        let remote = self.clients.remote_count();
        let Some(host) = self.host.as_mut() else {
            return;
        };
        if now.saturating_duration_since(host.last_status) <= STATUS_INTERVAL {
            return;
        }

        host.last_status = now;
        let Bandwidth { sent, received } = host.bandwidth;
        if remote > 0 || sent > 0 || received > 0 {
            let seconds = STATUS_INTERVAL.as_secs_f64();
            debug!(
                "status: {} remote clients, {:.1} send, {:.1} rec (K/sec)",
                remote,
                sent as f64 / seconds / 1024.0,
                received as f64 / seconds / 1024.0
            );
        }
        host.bandwidth = Bandwidth::default();
    }

    /// Closes a remote client's connection and announces why.
    ///
    /// Local and empty slots are left alone.
    pub fn disconnect_client(&mut self, slot: usize, reason: DisconnectReason) {
        let ClientKind::Remote(peer) = self.clients.kind_of(slot) else {
            return;
        };
        let hostname = self.clients.hostname_of(slot).unwrap_or_default().to_string();

        if let Some(host) = self.host.as_mut() {
            host.transport.disconnect(peer, reason);
        }
        self.session.client_disconnect(slot, &mut self.outbox);
        self.clients.remove_client(slot, &mut self.session);

        let message = match reason.message() {
            Some(text) => format!("client ({}) disconnected because: {}", hostname, text),
            None => format!("client ({}) disconnected", hostname),
        };
        info!("{}", message);
        self.session.send_server_message(&message, &mut self.outbox);
        self.dispatch_outbox();
    }

    /// Disconnects every remote client with `reason`
    ///
    /// Each one goes through [`Server::disconnect_client`], so the game hears
    /// about every departure and the usual notice is broadcast.
    pub fn kick_nonlocal_clients(&mut self, reason: DisconnectReason) {
        for slot in self.clients.remote_slots() {
            self.disconnect_client(slot, reason);
        }
    }

    /// Lets the game flush its queues, pushing them to the wire if anything
    /// was sent.
    pub fn flush_server(&mut self, force: bool) {
        let sent = self.session.send_packets(force, &mut self.outbox);
        self.dispatch_outbox();
        if sent {
            if let Some(host) = self.host.as_mut() {
                host.transport.flush();
            }
        }
    }

    /// Occupies a slot for the in-process client; packets for that slot are
    /// handed to `endpoint`.
    pub fn local_connect(&mut self, endpoint: Box<dyn LocalClient>) -> Option<usize> {
        let slot = self
            .clients
            .add_client(ClientKind::Local, "local", &mut self.session)?;
        self.local_client = Some(endpoint);
        self.session.local_connect(slot, &mut self.outbox);
        self.dispatch_outbox();
        Some(slot)
    }

    /// Releases every local slot; returns whether there was one.
    pub fn local_disconnect(&mut self) -> bool {
        let slots = self.clients.local_slots();
        if slots.is_empty() {
            return false;
        }
        for slot in slots {
            self.session.local_disconnect(slot, &mut self.outbox);
            self.clients.remove_client(slot, &mut self.session);
        }
        self.local_client = None;
        self.dispatch_outbox();
        true
    }

    /// Feeds a packet from the in-process client into the game.
    pub fn local_client_to_server(&mut self, channel: u8, packet: &Packet) {
        if let Some(slot) = self.clients.local_slot() {
            self.process(slot, channel, packet);
        }
    }

    /// Changes the per-address limit, live if the listener is up.
    pub fn set_max_dup_clients(&mut self, n: usize) {
        self.config.set_max_dup_clients(n);
        let limit = self.config.duplicate_peers();
        if let Some(host) = self.host.as_mut() {
            host.transport.set_duplicate_peers(limit);
        }
    }

    /// MTU of the running transport, `None` while offline
    pub fn server_mtu(&self) -> Option<usize> {
        self.host.as_ref().map(|host| host.transport.mtu())
    }

    /// Game data of an occupied slot
    pub fn client_info(&self, slot: usize) -> Option<&S::ClientInfo> {
        self.clients.info_of(slot)
    }

    /// Mutable game data of an occupied slot
    pub fn client_info_mut(&mut self, slot: usize) -> Option<&mut S::ClientInfo> {
        self.clients.info_mut(slot)
    }

    /// Transport peer behind a remote slot
    pub fn client_peer(&self, slot: usize) -> Option<PeerId> {
        self.clients.peer_of(slot)
    }

    /// Address of a remote slot's peer
    ///
    /// `None` for local and empty slots, and while offline.
    pub fn client_ip(&self, slot: usize) -> Option<IpAddr> {
        let peer = self.clients.peer_of(slot)?;
        let host = self.host.as_ref()?;
        host.transport.peer_address(peer).map(|addr| addr.ip())
    }

    /// Slot records, empty ones included.
    pub fn num_clients(&self) -> usize {
        self.clients.len()
    }

    /// Whether an in-process client holds a slot
    pub fn has_local_clients(&self) -> bool {
        self.clients.local_count() > 0
    }

    /// Whether any remote client holds a slot
    pub fn has_nonlocal_clients(&self) -> bool {
        self.clients.remote_count() > 0
    }

    /// The slot table
    pub fn clients(&self) -> &ClientManager<S::ClientInfo> {
        &self.clients
    }

    /// The listener aggregate, `None` while offline
    pub fn host(&self) -> Option<&ServerHost<T>> {
        self.host.as_ref()
    }

    /// Whether the listener is up
    pub fn is_listening(&self) -> bool {
        self.host.is_some()
    }

    /// The game running on this server
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Mutable access to the game
    ///
    /// Anything the game wants to send must still go through an [`Outbox`]
    /// handed to one of its hooks.
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Logical game clock, advanced by dedicated ticks
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Server variables in effect
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Resolves the configured server address; empty or unresolvable names bind
/// every interface.
pub async fn resolve_server_ip(name: &str) -> IpAddr {
    let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    if name.is_empty() {
        return any;
    }
    if let Ok(ip) = name.parse() {
        return ip;
    }

    match tokio::net::lookup_host((name, 0)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr.ip(),
            None => {
                warn!("server ip not resolved");
                any
            }
        },
        Err(e) => {
            warn!("server ip not resolved: {}", e);
            any
        }
    }
}
