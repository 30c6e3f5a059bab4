//! Wire-level protocol shared by the server and anything that talks to it.
//!
//! Holds the protocol constants, the reference-counted [`Packet`] buffer, the
//! compressed integer codec used inside game payloads, the tagged field list
//! used to build outgoing packets, and the framing of the reliable TCP
//! transport.

pub mod buffer;
pub mod fields;
pub mod frame;
mod reason;

pub use buffer::{PacketReader, PacketWriter};
pub use fields::{Field, FileField, FormatError, PacketFields};
pub use frame::{Frame, FrameError};
pub use reason::DisconnectReason;

use bytes::Bytes;

/// Client slots offered when `maxclients` is left at zero.
pub const DEFAULT_CLIENTS: usize = 8;
/// Hard ceiling for concurrent peers, duplicate peers and `maxclients`.
pub const MAX_CLIENTS: usize = 128;
/// Largest single transmission; also the size of the discovery reply scratch.
pub const MAX_TRANS: usize = 5000;
/// Discovery requests longer than this are dropped.
pub const MAX_PING_DATA: usize = 32;
/// Upper bound for a file payload sent with `send_file`.
pub const MAX_FILE_SIZE: usize = 16 << 20;
/// Channels a peer may use.
pub const NUM_CHANNELS: u8 = 3;
/// Default game port.
pub const SERVER_PORT: u16 = 28785;
/// Port listened on for LAN discovery broadcasts.
pub const LAN_INFO_PORT: u16 = 28784;
/// Advertised MTU of the reliable transport.
pub const DEFAULT_MTU: usize = 1400;

/// Discovery port paired with a game port.
pub fn server_info_port(port: u16) -> u16 {
    port.saturating_add(1)
}

/// An encoded outgoing or incoming payload.
///
/// The bytes are shared, so handing the same packet to many peers or to the
/// in-process client never copies the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Bytes,
    reliable: bool,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>, reliable: bool) -> Self {
        Self {
            data: data.into(),
            reliable,
        }
    }

    pub fn reliable(data: impl Into<Bytes>) -> Self {
        Self::new(data, true)
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Starts reading the payload from the beginning.
    pub fn reader(&self) -> PacketReader<'_> {
        PacketReader::new(&self.data)
    }
}
