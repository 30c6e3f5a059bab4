//! # Game Server Session Core
//!
//! This library is the session and transport core of a real-time multiplayer
//! game server. It accepts peer connections, assigns and recycles client
//! slots, routes and broadcasts game packets, answers out-of-band discovery
//! queries and runs the per-tick event loop under a bounded wait. The game
//! itself plugs in through the [`GameSession`] trait and never sees a socket.
//!
//! ## Core Responsibilities
//!
//! ### Client Slots
//! Every connected client, remote or in-process, occupies a numbered slot.
//! Slots are reused lowest index first once fully torn down, and each one
//! carries the game's own per-client data.
//!
//! ### Packet Routing
//! Packets go to one slot or are broadcast to all of them, optionally leaving
//! one out. Remote slots are served by the reliable transport, the local slot
//! of a listen server receives the very same buffer in process.
//!
//! ### Discovery
//! Short UDP datagrams on the discovery port (game port + 1) and the LAN
//! discovery port are answered with the request echoed back followed by the
//! game's description of itself.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! All state lives in one [`Server`] value and is only touched from its tick,
//! [`Server::slice`]. Socket I/O runs in tokio tasks on the same
//! current-thread runtime and talks to the loop through a channel, so the loop
//! never needs a lock. The only await that can block is the bounded wait for
//! the next transport event.
//!
//! ### Outbox Instead Of Callbacks
//! Game hooks cannot call back into the server while it is calling them.
//! They queue their sends and disconnects on an [`Outbox`] instead, and the
//! server routes the queue as soon as the hook returns.
//!
//! ### Pluggable Transport
//! The loop only knows the [`Transport`] trait. [`TcpHost`] implements it on
//! tokio TCP with length-prefixed bincode frames; the tests drive the loop
//! with an in-memory transport.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Slot table with local/remote counters.
//!
//! ### Game Module (`game`)
//! The [`GameSession`] trait, the [`Outbox`] and routing targets.
//!
//! ### Host Module (`host`)
//! The [`Transport`] seam and the TCP implementation.
//!
//! ### Router Module (`router`)
//! `sendf`, `send_packet` and `send_file`, plus the [`LocalClient`] endpoint.
//!
//! ### Info Module (`info`)
//! Discovery sockets.
//!
//! ### Network Module (`network`)
//! The [`Server`] aggregate, its tick and the listener lifecycle.
//!
//! ### Config, Clock and Relay
//! Command-line and init script settings, the logical game clock, and the
//! chat relay session the binary runs.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::relay::RelaySession;
//! use server::Server;
//! use std::sync::atomic::AtomicBool;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new();
//!     let session = RelaySession::new("my server", config.max_clients());
//!     let mut server: Server<RelaySession> = Server::new(session, config);
//!
//!     // Binds the game and discovery ports, then runs 5ms ticks until the
//!     // flag is raised
//!     let shutdown = AtomicBool::new(false);
//!     server.init_server(true, true, &shutdown).await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod clock;
pub mod config;
pub mod error;
pub mod game;
pub mod host;
pub mod info;
pub mod network;
pub mod relay;
pub mod router;

pub use error::{ConfigError, Result, ServerError};
pub use game::{GameMessage, GameSession, Outbox, Target};
pub use host::{HostEvent, PeerId, TcpHost, Transport};
pub use network::{Server, ServerHost};
pub use router::LocalClient;
