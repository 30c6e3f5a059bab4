//! The boundary between the session core and the game running on top of it
//!
//! The core knows nothing about game rules. Everything game-specific happens
//! in a [`GameSession`], which the server calls at fixed points of its tick.
//! Hooks that want to send something queue it on the [`Outbox`] they are
//! handed; the server routes the queue as soon as the hook returns.

use shared::{DisconnectReason, Packet, PacketFields, PacketReader, PacketWriter};
use std::collections::VecDeque;
use std::net::IpAddr;

/// Where a packet goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every occupied slot the session allows broadcasts to.
    Broadcast,
    Client(usize),
}

/// Requests queued by the game for the router
#[derive(Debug, Clone)]
pub enum GameMessage {
    SendPacket {
        target: Target,
        channel: u8,
        packet: Packet,
        exclude: Option<usize>,
    },
    Disconnect {
        slot: usize,
        reason: DisconnectReason,
    },
}

/// Queue of outgoing [`GameMessage`]s.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: VecDeque<GameMessage>,
}

impl Outbox {
    /// Creates an empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes `fields` and queues the packet. The exclusion from the field
    /// list applies to broadcasts.
    pub fn sendf(&mut self, target: Target, channel: u8, fields: &PacketFields<'_>) -> Packet {
        let packet = fields.encode();
        self.send_packet(target, channel, packet.clone(), fields.excluded());
        packet
    }

    /// Queues an already encoded packet
    ///
    /// `exclude` leaves one slot out of a broadcast and is ignored when the
    /// target is a single client. The packet buffer is shared, not copied,
    /// when the router fans it out.
    pub fn send_packet(
        &mut self,
        target: Target,
        channel: u8,
        packet: Packet,
        exclude: Option<usize>,
    ) {
        self.messages.push_back(GameMessage::SendPacket {
            target,
            channel,
            packet,
            exclude,
        });
    }

    /// Queues a disconnect of `slot` with `reason`
    ///
    /// The server applies it with the same rules as any other disconnect,
    /// so it only takes effect for remote slots.
    pub fn disconnect(&mut self, slot: usize, reason: DisconnectReason) {
        self.messages
            .push_back(GameMessage::Disconnect { slot, reason });
    }

    /// Takes the oldest queued message
    pub fn pop(&mut self) -> Option<GameMessage> {
        self.messages.pop_front()
    }

    /// Number of messages waiting to be routed
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Game-side collaborator driven by the server.
///
/// Slots passed to the hooks are the client table indices; they stay valid
/// until `client_disconnect`/`local_disconnect` for that slot has returned.
pub trait GameSession {
    /// Per-client data owned by the game. The core stores it in the slot and
    /// hands it back on removal without ever looking inside.
    type ClientInfo;

    /// Creates the data stored in a slot when a client is admitted
    fn new_client_info(&mut self) -> Self::ClientInfo;

    /// Receives a slot's data back once the slot is emptied
    fn delete_client_info(&mut self, _info: Self::ClientInfo) {}

    /// A remote peer took `slot`. Returning a reason refuses it.
    fn client_connect(
        &mut self,
        slot: usize,
        ip: IpAddr,
        out: &mut Outbox,
    ) -> Option<DisconnectReason>;

    /// A remote client in `slot` is leaving; its data is still in place.
    fn client_disconnect(&mut self, slot: usize, out: &mut Outbox);

    fn local_connect(&mut self, _slot: usize, _out: &mut Outbox) {}

    fn local_disconnect(&mut self, _slot: usize, _out: &mut Outbox) {}

    /// Interprets one payload. Reading past its end, or calling
    /// [`PacketReader::force_overread`], gets the sender disconnected.
    fn parse_packet(
        &mut self,
        slot: usize,
        channel: u8,
        packet: &mut PacketReader<'_>,
        out: &mut Outbox,
    );

    fn allow_broadcast(&self, _slot: usize) -> bool {
        true
    }

    /// Sees every broadcast payload, e.g. for demo recording.
    fn record_packet(&mut self, _channel: u8, _data: &[u8]) {}

    /// Appends server information to `reply`, which already echoes the
    /// request bytes.
    fn server_info_reply(&mut self, request: &[u8], reply: &mut PacketWriter);

    /// Runs once per tick, before network events are drained.
    fn server_update(&mut self, out: &mut Outbox);

    /// Flushes game-level queues; returns whether anything was sent.
    fn send_packets(&mut self, force: bool, out: &mut Outbox) -> bool;

    /// Server-wide notice, such as a departing client.
    fn send_server_message(&mut self, _message: &str, _out: &mut Outbox) {}

    /// Slots kept on top of `maxclients` when sizing the listener.
    fn reserve_clients(&self) -> usize {
        0
    }

    fn server_init(&mut self) {}

    fn is_paused(&self) -> bool {
        false
    }

    /// Game speed in percent.
    fn game_speed(&self) -> u32 {
        100
    }
}

/// Session double that records every hook call.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        NewInfo(u32),
        DeleteInfo(u32),
        Connect(usize),
        Disconnect(usize),
        LocalConnect(usize),
        LocalDisconnect(usize),
        Parse(usize, u8, Vec<u8>),
        Record(u8, Vec<u8>),
        InfoReply(Vec<u8>),
        Update,
        SendPackets,
        ServerMessage(String),
    }

    #[derive(Debug, Default)]
    pub struct RecordingSession {
        pub calls: Vec<Call>,
        pub next_info: u32,
        pub reject_with: Option<DisconnectReason>,
        pub denied_broadcast: Vec<usize>,
        pub has_pending: bool,
        /// Packets parsed from these slots read one int too many.
        pub overread_from: Vec<usize>,
        pub reply_suffix: Vec<u8>,
    }

    impl RecordingSession {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }

        pub fn parsed_from(&self, slot: usize) -> usize {
            self.count(|c| matches!(c, Call::Parse(s, _, _) if *s == slot))
        }

        pub fn messages(&self) -> Vec<String> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::ServerMessage(m) => Some(m.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl GameSession for RecordingSession {
        type ClientInfo = u32;

        fn new_client_info(&mut self) -> u32 {
            self.next_info += 1;
            self.calls.push(Call::NewInfo(self.next_info));
            self.next_info
        }

        fn delete_client_info(&mut self, info: u32) {
            self.calls.push(Call::DeleteInfo(info));
        }

        fn client_connect(
            &mut self,
            slot: usize,
            _ip: IpAddr,
            _out: &mut Outbox,
        ) -> Option<DisconnectReason> {
            self.calls.push(Call::Connect(slot));
            self.reject_with
        }

        fn client_disconnect(&mut self, slot: usize, _out: &mut Outbox) {
            self.calls.push(Call::Disconnect(slot));
        }

        fn local_connect(&mut self, slot: usize, _out: &mut Outbox) {
            self.calls.push(Call::LocalConnect(slot));
        }

        fn local_disconnect(&mut self, slot: usize, _out: &mut Outbox) {
            self.calls.push(Call::LocalDisconnect(slot));
        }

        fn parse_packet(
            &mut self,
            slot: usize,
            channel: u8,
            packet: &mut PacketReader<'_>,
            _out: &mut Outbox,
        ) {
            let data = packet.get_bytes(packet.remaining()).to_vec();
            self.calls.push(Call::Parse(slot, channel, data));
            if self.overread_from.contains(&slot) {
                packet.get_int();
            }
        }

        fn allow_broadcast(&self, slot: usize) -> bool {
            !self.denied_broadcast.contains(&slot)
        }

        fn record_packet(&mut self, channel: u8, data: &[u8]) {
            self.calls.push(Call::Record(channel, data.to_vec()));
        }

        fn server_info_reply(&mut self, request: &[u8], reply: &mut PacketWriter) {
            self.calls.push(Call::InfoReply(request.to_vec()));
            reply.put_bytes(&self.reply_suffix);
        }

        fn server_update(&mut self, _out: &mut Outbox) {
            self.calls.push(Call::Update);
        }

        fn send_packets(&mut self, _force: bool, _out: &mut Outbox) -> bool {
            self.calls.push(Call::SendPackets);
            std::mem::take(&mut self.has_pending)
        }

        fn send_server_message(&mut self, message: &str, _out: &mut Outbox) {
            self.calls.push(Call::ServerMessage(message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_preserves_order() {
        let mut out = Outbox::new();
        out.sendf(Target::Client(1), 0, &PacketFields::new().int(5));
        out.disconnect(1, DisconnectReason::Kick);

        assert_eq!(out.len(), 2);
        assert!(matches!(
            out.pop(),
            Some(GameMessage::SendPacket { target: Target::Client(1), channel: 0, .. })
        ));
        assert!(matches!(
            out.pop(),
            Some(GameMessage::Disconnect { slot: 1, reason: DisconnectReason::Kick })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_sendf_carries_exclusion() {
        let mut out = Outbox::new();
        let packet = out.sendf(
            Target::Broadcast,
            1,
            &PacketFields::new().reliable().exclude(3).int(9),
        );

        assert!(packet.is_reliable());
        match out.pop() {
            Some(GameMessage::SendPacket { exclude, packet: queued, .. }) => {
                assert_eq!(exclude, Some(3));
                assert_eq!(queued, packet);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }
}
