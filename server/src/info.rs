//! Out-of-band server discovery
//!
//! Server browsers and LAN clients send short datagrams to the discovery port
//! (game port + 1) or broadcast them to the LAN discovery port. Each request is
//! answered with a single datagram that begins with the request bytes,
//! followed by whatever the game session reports about itself.
//!
//! Both sockets are non-blocking and polled once per server tick.

use crate::error::{Result, ServerError};
use crate::game::GameSession;
use log::{debug, info, warn};
use shared::{PacketWriter, MAX_PING_DATA, MAX_TRANS};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};

pub struct InfoResponder {
    pong: UdpSocket,
    lan: Option<UdpSocket>,
}

impl InfoResponder {
    /// Binds the discovery socket and, when `lan_addr` is given, the LAN
    /// socket. Only a discovery socket failure is an error.
    pub fn bind(info_addr: SocketAddr, lan_addr: Option<SocketAddr>) -> Result<Self> {
        let pong = UdpSocket::bind(info_addr).map_err(ServerError::InfoSocket)?;
        pong.set_nonblocking(true).map_err(ServerError::InfoSocket)?;
        info!("Server info socket listening on {}", pong.local_addr().map_err(ServerError::InfoSocket)?);

        let lan = lan_addr.and_then(|addr| match bind_lan_socket(addr) {
            Ok(socket) => Some(socket),
            Err(e) => {
                warn!("could not create LAN server info socket on {}: {}", addr, e);
                None
            }
        });

        Ok(Self { pong, lan })
    }

    pub fn info_addr(&self) -> Option<SocketAddr> {
        self.pong.local_addr().ok()
    }

    pub fn lan_addr(&self) -> Option<SocketAddr> {
        self.lan.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Answers at most one pending request per socket and returns how many
    /// replies went out.
    pub fn check_sockets<S: GameSession>(&mut self, session: &mut S) -> usize {
        let mut scratch = [0u8; MAX_TRANS];
        let mut replies = 0;

        for socket in std::iter::once(&self.pong).chain(self.lan.as_ref()) {
            let (len, origin) = match socket.recv_from(&mut scratch) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    debug!("server info receive failed: {}", e);
                    continue;
                }
            };
            if len > MAX_PING_DATA {
                continue;
            }

            let request = &scratch[..len];
            let mut reply = PacketWriter::with_capacity(MAX_TRANS);
            reply.put_bytes(request);
            session.server_info_reply(request, &mut reply);

            let data = reply.as_slice();
            let data = &data[..data.len().min(MAX_TRANS)];
            match self.pong.send_to(data, origin) {
                Ok(_) => replies += 1,
                Err(e) => debug!("server info reply to {} failed: {}", origin, e),
            }
        }
        replies
    }
}

/// Binds a non-blocking UDP socket that other processes may share.
fn bind_lan_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
