//! Chat relay game session
//!
//! The session the server binary runs. It has no game rules; it greets
//! clients, answers pings, relays text to everyone else and describes itself
//! to server browsers. Every message starts with a compressed int type:
//!
//! | type | direction | body |
//! |---|---|---|
//! | `Ping` | client → server | token |
//! | `Text` | client → server | text |
//! | `Welcome` | server → client | slot, description |
//! | `ServerMessage` | server → clients | text |
//! | `Pong` | server → client | token |
//! | `Relay` | server → clients | sender slot, text |

use crate::game::{GameSession, Outbox, Target};
use log::{debug, info};
use shared::{DisconnectReason, PacketFields, PacketReader, PacketWriter};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Instant;

/// Bumped whenever a message layout changes.
pub const PROTOCOL_VERSION: i32 = 1;

/// Channel the relay talks on.
pub const RELAY_CHANNEL: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MessageType {
    Ping = 0,
    Text = 1,
    Welcome = 2,
    ServerMessage = 3,
    Pong = 4,
    Relay = 5,
}

impl MessageType {
    pub fn from_i32(n: i32) -> Option<Self> {
        match n {
            0 => Some(MessageType::Ping),
            1 => Some(MessageType::Text),
            2 => Some(MessageType::Welcome),
            3 => Some(MessageType::ServerMessage),
            4 => Some(MessageType::Pong),
            5 => Some(MessageType::Relay),
            _ => None,
        }
    }
}

/// Per-client relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayClient {
    pub joined: Instant,
}

/// Chat relay session with a fixed player capacity.
#[derive(Debug)]
pub struct RelaySession {
    description: String,
    max_players: usize,
    players: BTreeSet<usize>,
    pending: bool,
}

impl RelaySession {
    pub fn new(description: impl Into<String>, max_players: usize) -> Self {
        Self {
            description: description.into(),
            max_players,
            players: BTreeSet::new(),
            pending: false,
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    fn welcome(&mut self, slot: usize, out: &mut Outbox) {
        out.sendf(
            Target::Client(slot),
            RELAY_CHANNEL,
            &PacketFields::new()
                .reliable()
                .int(MessageType::Welcome as i32)
                .int(slot as i32)
                .string(&self.description),
        );
        self.pending = true;
    }
}

impl GameSession for RelaySession {
    type ClientInfo = RelayClient;

    fn new_client_info(&mut self) -> RelayClient {
        RelayClient {
            joined: Instant::now(),
        }
    }

    fn client_connect(&mut self, slot: usize, ip: IpAddr, out: &mut Outbox) -> Option<DisconnectReason> {
        if self.players.len() >= self.max_players {
            info!("refusing {}: relay is full", ip);
            return Some(DisconnectReason::MaxClients);
        }
        self.players.insert(slot);
        self.welcome(slot, out);
        None
    }

    fn client_disconnect(&mut self, slot: usize, _out: &mut Outbox) {
        self.players.remove(&slot);
    }

    fn local_connect(&mut self, slot: usize, out: &mut Outbox) {
        self.players.insert(slot);
        self.welcome(slot, out);
    }

    fn local_disconnect(&mut self, slot: usize, _out: &mut Outbox) {
        self.players.remove(&slot);
    }

    fn parse_packet(&mut self, slot: usize, channel: u8, packet: &mut PacketReader<'_>, out: &mut Outbox) {
        while !packet.is_empty() && !packet.overread() {
            match MessageType::from_i32(packet.get_int()) {
                Some(MessageType::Ping) => {
                    let token = packet.get_int();
                    if packet.overread() {
                        break;
                    }
                    out.sendf(
                        Target::Client(slot),
                        channel,
                        &PacketFields::new().int(MessageType::Pong as i32).int(token),
                    );
                }
                Some(MessageType::Text) => {
                    let text = packet.get_string();
                    if packet.overread() {
                        break;
                    }
                    debug!("slot {}: {}", slot, text);
                    out.sendf(
                        Target::Broadcast,
                        RELAY_CHANNEL,
                        &PacketFields::new()
                            .reliable()
                            .exclude(slot)
                            .int(MessageType::Relay as i32)
                            .int(slot as i32)
                            .string(&text),
                    );
                }
                _ => {
                    out.disconnect(slot, DisconnectReason::MessageError);
                    return;
                }
            }
            self.pending = true;
        }
    }

    fn server_info_reply(&mut self, _request: &[u8], reply: &mut PacketWriter) {
        reply.put_int(PROTOCOL_VERSION);
        reply.put_int(self.players.len() as i32);
        reply.put_int(self.max_players as i32);
        reply.put_string(&self.description);
    }

    fn server_update(&mut self, _out: &mut Outbox) {}

    fn send_packets(&mut self, _force: bool, _out: &mut Outbox) -> bool {
        std::mem::take(&mut self.pending)
    }

    fn send_server_message(&mut self, message: &str, out: &mut Outbox) {
        out.sendf(
            Target::Broadcast,
            RELAY_CHANNEL,
            &PacketFields::new()
                .reliable()
                .int(MessageType::ServerMessage as i32)
                .string(message),
        );
        self.pending = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameMessage;
    use std::net::Ipv4Addr;

    const IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn parse(session: &mut RelaySession, slot: usize, fields: PacketFields<'_>) -> Outbox {
        let packet = fields.encode();
        let mut out = Outbox::new();
        session.parse_packet(slot, RELAY_CHANNEL, &mut packet.reader(), &mut out);
        out
    }

    #[test]
    fn test_connect_sends_welcome() {
        let mut session = RelaySession::new("test relay", 4);
        let mut out = Outbox::new();

        assert_eq!(session.client_connect(2, IP, &mut out), None);
        assert_eq!(session.player_count(), 1);

        match out.pop() {
            Some(GameMessage::SendPacket { target, packet, .. }) => {
                assert_eq!(target, Target::Client(2));
                let mut reader = packet.reader();
                assert_eq!(reader.get_int(), MessageType::Welcome as i32);
                assert_eq!(reader.get_int(), 2);
                assert_eq!(reader.get_string(), "test relay");
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_full_relay_refuses() {
        let mut session = RelaySession::new("tiny", 1);
        let mut out = Outbox::new();
        session.client_connect(0, IP, &mut out);

        assert_eq!(
            session.client_connect(1, IP, &mut out),
            Some(DisconnectReason::MaxClients)
        );
        // the refused slot is still torn down by the server
        session.client_disconnect(1, &mut out);
        assert_eq!(session.player_count(), 1);
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let mut session = RelaySession::new("r", 4);
        let mut out = parse(&mut session, 0, PacketFields::new().int(MessageType::Ping as i32).int(77));

        match out.pop() {
            Some(GameMessage::SendPacket { target, packet, .. }) => {
                assert_eq!(target, Target::Client(0));
                let mut reader = packet.reader();
                assert_eq!(reader.get_int(), MessageType::Pong as i32);
                assert_eq!(reader.get_int(), 77);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
        assert!(session.send_packets(false, &mut out));
        assert!(!session.send_packets(false, &mut out));
    }

    #[test]
    fn test_text_relayed_to_others() {
        let mut session = RelaySession::new("r", 4);
        let mut out = parse(
            &mut session,
            3,
            PacketFields::new().int(MessageType::Text as i32).string("hi all"),
        );

        match out.pop() {
            Some(GameMessage::SendPacket { target, exclude, packet, .. }) => {
                assert_eq!(target, Target::Broadcast);
                assert_eq!(exclude, Some(3));
                let mut reader = packet.reader();
                assert_eq!(reader.get_int(), MessageType::Relay as i32);
                assert_eq!(reader.get_int(), 3);
                assert_eq!(reader.get_string(), "hi all");
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_message_is_error() {
        let mut session = RelaySession::new("r", 4);
        let mut out = parse(&mut session, 1, PacketFields::new().int(99));

        assert!(matches!(
            out.pop(),
            Some(GameMessage::Disconnect { slot: 1, reason: DisconnectReason::MessageError })
        ));
    }

    #[test]
    fn test_truncated_ping_overreads() {
        let mut session = RelaySession::new("r", 4);
        let packet = PacketFields::new().int(MessageType::Ping as i32).encode();
        let mut reader = packet.reader();
        session.parse_packet(0, RELAY_CHANNEL, &mut reader, &mut Outbox::new());

        assert!(reader.overread());
    }

    #[test]
    fn test_info_reply_layout() {
        let mut session = RelaySession::new("lobby", 8);
        session.client_connect(0, IP, &mut Outbox::new());

        let mut reply = PacketWriter::new();
        session.server_info_reply(&[], &mut reply);

        let mut reader = PacketReader::new(reply.as_slice());
        assert_eq!(reader.get_int(), PROTOCOL_VERSION);
        assert_eq!(reader.get_int(), 1);
        assert_eq!(reader.get_int(), 8);
        assert_eq!(reader.get_string(), "lobby");
    }

    #[test]
    fn test_server_message_broadcast() {
        let mut session = RelaySession::new("r", 4);
        let mut out = Outbox::new();
        session.send_server_message("client (x) disconnected", &mut out);

        assert!(matches!(
            out.pop(),
            Some(GameMessage::SendPacket { target: Target::Broadcast, exclude: None, .. })
        ));
    }
}
