//! Packet routing
//!
//! Sends go to one slot or to every slot. Remote slots are queued on the
//! transport and counted against the outgoing bandwidth; the local slot gets
//! the very same buffer through its [`LocalClient`] endpoint.

use crate::client_manager::ClientKind;
use crate::game::{GameSession, Target};
use crate::host::Transport;
use crate::network::Server;
use log::debug;
use shared::{FileField, Packet, PacketFields, PacketWriter, MAX_FILE_SIZE, MAX_TRANS};
use std::io::{self, Read, Seek, SeekFrom};

/// In-process client of a listen server.
pub trait LocalClient {
    /// Called for every packet addressed to the local slot.
    fn receive(&mut self, channel: u8, packet: &Packet);
}

impl<S: GameSession, T: Transport> Server<S, T> {
    /// Encodes `fields` and sends the result. The exclusion in `fields` only
    /// matters for broadcasts.
    pub fn sendf(&mut self, target: Target, channel: u8, fields: &PacketFields<'_>) -> Packet {
        let packet = fields.encode();
        self.send_packet(target, channel, &packet, fields.excluded());
        packet
    }

    /// Sends an encoded packet.
    ///
    /// A broadcast is first offered to the game for recording, then goes to
    /// every occupied slot except `exclude` that the game allows broadcasts to.
    pub fn send_packet(&mut self, target: Target, channel: u8, packet: &Packet, exclude: Option<usize>) {
        match target {
            Target::Client(slot) => self.send_to_slot(slot, channel, packet),
            Target::Broadcast => {
                self.session.record_packet(channel, packet.data());
                let recipients: Vec<usize> = self
                    .clients
                    .iter()
                    .map(|client| client.num)
                    .filter(|&slot| Some(slot) != exclude && self.session.allow_broadcast(slot))
                    .collect();
                for slot in recipients {
                    self.send_to_slot(slot, channel, packet);
                }
            }
        }
    }

    fn send_to_slot(&mut self, slot: usize, channel: u8, packet: &Packet) {
        match self.clients.kind_of(slot) {
            ClientKind::Remote(peer) => {
                if let Some(host) = self.host.as_mut() {
                    host.transport.send(peer, channel, packet);
                    host.bandwidth.sent += packet.len() as u64;
                }
            }
            ClientKind::Local => {
                if let Some(local) = self.local_client.as_mut() {
                    local.receive(channel, packet);
                }
            }
            ClientKind::Empty => {}
        }
    }

    /// Sends the whole of `file` to one slot, preceded by `fields`.
    ///
    /// Returns `Ok(None)` without sending when the slot is out of range or
    /// the file is empty or larger than [`MAX_FILE_SIZE`]. The packet is
    /// always reliable.
    pub fn send_file<R>(
        &mut self,
        slot: usize,
        channel: u8,
        file: &mut R,
        fields: &[FileField<'_>],
    ) -> io::Result<Option<Packet>>
    where
        R: Read + Seek,
    {
        if slot >= self.clients.len() {
            return Ok(None);
        }

        let len = file.seek(SeekFrom::End(0))?;
        let len = match usize::try_from(len) {
            Ok(len) if len > 0 && len <= MAX_FILE_SIZE => len,
            _ => {
                debug!("not sending file of {} bytes to slot {}", len, slot);
                return Ok(None);
            }
        };

        let mut writer = PacketWriter::with_capacity(MAX_TRANS + len);
        for field in fields {
            field.encode(&mut writer, len);
        }
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(writer.reserve_tail(len))?;

        let packet = writer.finish(true);
        self.send_packet(Target::Client(slot), channel, &packet, None);
        Ok(Some(packet))
    }
}

/// Local endpoint that keeps what it receives.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default, Clone)]
    pub struct Inbox {
        pub received: Arc<Mutex<Vec<(u8, Packet)>>>,
    }

    impl Inbox {
        pub fn count(&self) -> usize {
            self.received.lock().unwrap().len()
        }
    }

    impl LocalClient for Inbox {
        fn receive(&mut self, channel: u8, packet: &Packet) {
            self.received.lock().unwrap().push((channel, packet.clone()));
        }
    }
}
