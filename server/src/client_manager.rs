//! Client slot management for the server
//!
//! This module owns the table of client slots:
//! - Slot allocation, reusing the lowest free index before growing
//! - Per-slot metadata (kind, peer handle, hostname, game data)
//! - Local and remote client counters
//!
//! Slots are never deleted. A removed client leaves an empty record behind so
//! indices held elsewhere stay meaningful until the slot is handed out again.

use crate::game::GameSession;
use crate::host::PeerId;
use log::debug;

/// What occupies a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Empty,
    /// The in-process client of a listen server.
    Local,
    /// A peer on the reliable transport.
    Remote(PeerId),
}

/// One client slot
///
/// `info` is `Some` exactly while the slot is occupied.
#[derive(Debug)]
pub struct Client<I> {
    /// Position in the table, stable for the slot's lifetime
    pub num: usize,
    pub kind: ClientKind,
    /// Display name, usually the peer IP
    pub hostname: String,
    info: Option<I>,
}

impl<I> Client<I> {
    fn new(num: usize) -> Self {
        Self {
            num,
            kind: ClientKind::Empty,
            hostname: String::new(),
            info: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind == ClientKind::Empty
    }

    pub fn peer(&self) -> Option<PeerId> {
        match self.kind {
            ClientKind::Remote(peer) => Some(peer),
            _ => None,
        }
    }

    pub fn info(&self) -> Option<&I> {
        self.info.as_ref()
    }
}

/// Table of client slots
///
/// The ClientManager hands out slot indices, keeps the local/remote counters in
/// step with the slot states and routes creation and destruction of per-client
/// game data through the [`GameSession`].
#[derive(Debug)]
pub struct ClientManager<I> {
    clients: Vec<Client<I>>,
    local_clients: usize,
    remote_clients: usize,
}

impl<I> ClientManager<I> {
    pub fn new() -> Self {
        Self {
            clients: Vec::new(),
            local_clients: 0,
            remote_clients: 0,
        }
    }

    /// Occupies a slot and returns its index
    ///
    /// Picks the lowest empty slot, or appends one. The game data is created
    /// before the slot is marked occupied. Adding an `Empty` kind is refused.
    pub fn add_client<S>(&mut self, kind: ClientKind, hostname: &str, session: &mut S) -> Option<usize>
    where
        S: GameSession<ClientInfo = I>,
    {
        if kind == ClientKind::Empty {
            return None;
        }

        let num = match self.clients.iter().position(Client::is_empty) {
            Some(num) => num,
            None => {
                self.clients.push(Client::new(self.clients.len()));
                self.clients.len() - 1
            }
        };

        let client = &mut self.clients[num];
        client.info = Some(session.new_client_info());
        client.hostname = hostname.to_string();
        client.kind = kind;
        match kind {
            ClientKind::Remote(_) => self.remote_clients += 1,
            ClientKind::Local => self.local_clients += 1,
            ClientKind::Empty => {}
        }

        debug!("slot {} taken by {}", num, hostname);
        Some(num)
    }

    /// Empties a slot
    ///
    /// Returns false, touching nothing, when the slot is out of range or
    /// already empty. The record itself stays in the table.
    pub fn remove_client<S>(&mut self, num: usize, session: &mut S) -> bool
    where
        S: GameSession<ClientInfo = I>,
    {
        let Some(client) = self.clients.get_mut(num) else {
            return false;
        };

        match client.kind {
            ClientKind::Remote(_) => self.remote_clients -= 1,
            ClientKind::Local => self.local_clients -= 1,
            ClientKind::Empty => return false,
        }

        client.kind = ClientKind::Empty;
        if let Some(info) = client.info.take() {
            session.delete_client_info(info);
        }

        debug!("slot {} released", num);
        true
    }

    /// Returns an occupied slot
    pub fn get(&self, num: usize) -> Option<&Client<I>> {
        self.clients.get(num).filter(|c| !c.is_empty())
    }

    pub fn kind_of(&self, num: usize) -> ClientKind {
        self.get(num).map_or(ClientKind::Empty, |c| c.kind)
    }

    pub fn peer_of(&self, num: usize) -> Option<PeerId> {
        self.get(num).and_then(Client::peer)
    }

    pub fn info_of(&self, num: usize) -> Option<&I> {
        self.get(num).and_then(Client::info)
    }

    pub fn info_mut(&mut self, num: usize) -> Option<&mut I> {
        self.clients
            .get_mut(num)
            .filter(|c| !c.is_empty())
            .and_then(|c| c.info.as_mut())
    }

    pub fn hostname_of(&self, num: usize) -> Option<&str> {
        self.get(num).map(|c| c.hostname.as_str())
    }

    /// Finds the slot a remote peer occupies.
    pub fn slot_of_peer(&self, peer: PeerId) -> Option<usize> {
        self.clients
            .iter()
            .position(|c| c.kind == ClientKind::Remote(peer))
    }

    /// Finds the first local slot.
    pub fn local_slot(&self) -> Option<usize> {
        self.clients.iter().position(|c| c.kind == ClientKind::Local)
    }

    /// Indices of all slots of the given kind class.
    pub fn remote_slots(&self) -> Vec<usize> {
        self.clients
            .iter()
            .filter(|c| matches!(c.kind, ClientKind::Remote(_)))
            .map(|c| c.num)
            .collect()
    }

    pub fn local_slots(&self) -> Vec<usize> {
        self.clients
            .iter()
            .filter(|c| c.kind == ClientKind::Local)
            .map(|c| c.num)
            .collect()
    }

    /// Iterates over occupied slots.
    pub fn iter(&self) -> impl Iterator<Item = &Client<I>> {
        self.clients.iter().filter(|c| !c.is_empty())
    }

    pub fn local_count(&self) -> usize {
        self.local_clients
    }

    pub fn remote_count(&self) -> usize {
        self.remote_clients
    }

    /// Number of slot records, empty ones included
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if the table has never held a client
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl<I> Default for ClientManager<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Test suite for slot management
///
/// Covers slot reuse, counter bookkeeping, idempotent removal and the
/// "not found" behaviour of lookups.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::testing::{Call, RecordingSession};
    use rand::Rng;

    fn remote(n: u32) -> ClientKind {
        ClientKind::Remote(PeerId(n))
    }

    #[test]
    fn test_add_client_appends() {
        let mut session = RecordingSession::new();
        let mut manager = ClientManager::new();

        assert_eq!(manager.add_client(remote(1), "a", &mut session), Some(0));
        assert_eq!(manager.add_client(ClientKind::Local, "local", &mut session), Some(1));
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.remote_count(), 1);
        assert_eq!(manager.local_count(), 1);
        assert_eq!(manager.info_of(0), Some(&1));
        assert_eq!(manager.info_of(1), Some(&2));
    }

    #[test]
    fn test_add_empty_kind_refused() {
        let mut session = RecordingSession::new();
        let mut manager: ClientManager<u32> = ClientManager::new();

        assert_eq!(manager.add_client(ClientKind::Empty, "x", &mut session), None);
        assert!(manager.is_empty());
        assert!(session.calls.is_empty());
    }

    #[test]
    fn test_slot_reuse_prefers_lowest_index() {
        let mut session = RecordingSession::new();
        let mut manager = ClientManager::new();
        for n in 0..4 {
            manager.add_client(remote(n), "h", &mut session);
        }

        assert!(manager.remove_client(2, &mut session));
        assert!(manager.remove_client(1, &mut session));

        assert_eq!(manager.add_client(remote(10), "h", &mut session), Some(1));
        assert_eq!(manager.add_client(remote(11), "h", &mut session), Some(2));
        assert_eq!(manager.add_client(remote(12), "h", &mut session), Some(4));
        assert_eq!(manager.len(), 5);
    }

    #[test]
    fn test_remove_destroys_info_and_keeps_record() {
        let mut session = RecordingSession::new();
        let mut manager = ClientManager::new();
        let slot = manager.add_client(remote(7), "h", &mut session).unwrap();

        assert!(manager.remove_client(slot, &mut session));

        assert_eq!(manager.len(), 1);
        assert!(manager.get(slot).is_none());
        assert_eq!(manager.peer_of(slot), None);
        assert_eq!(manager.slot_of_peer(PeerId(7)), None);
        assert_eq!(session.calls.last(), Some(&Call::DeleteInfo(1)));
    }

    #[test]
    fn test_remove_twice_is_noop() {
        let mut session = RecordingSession::new();
        let mut manager = ClientManager::new();
        let slot = manager.add_client(ClientKind::Local, "local", &mut session).unwrap();

        assert!(manager.remove_client(slot, &mut session));
        let calls_after_first = session.calls.len();

        assert!(!manager.remove_client(slot, &mut session));
        assert_eq!(session.calls.len(), calls_after_first);
        assert_eq!(manager.local_count(), 0);
    }

    #[test]
    fn test_lookups_out_of_range() {
        let manager: ClientManager<u32> = ClientManager::new();

        assert!(manager.get(3).is_none());
        assert_eq!(manager.peer_of(3), None);
        assert_eq!(manager.info_of(3), None);
        assert_eq!(manager.hostname_of(3), None);
        assert_eq!(manager.kind_of(3), ClientKind::Empty);
    }

    #[test]
    fn test_remove_out_of_range() {
        let mut session = RecordingSession::new();
        let mut manager: ClientManager<u32> = ClientManager::new();

        assert!(!manager.remove_client(99, &mut session));
    }

    #[test]
    fn test_peer_only_for_remote() {
        let mut session = RecordingSession::new();
        let mut manager = ClientManager::new();
        let local = manager.add_client(ClientKind::Local, "local", &mut session).unwrap();
        let net = manager.add_client(remote(3), "10.0.0.1", &mut session).unwrap();

        assert_eq!(manager.peer_of(local), None);
        assert_eq!(manager.peer_of(net), Some(PeerId(3)));
        assert_eq!(manager.slot_of_peer(PeerId(3)), Some(net));
        assert_eq!(manager.local_slot(), Some(local));
        assert_eq!(manager.hostname_of(net), Some("10.0.0.1"));
    }

    #[test]
    fn test_counters_match_slots_for_random_sequences() {
        let mut rng = rand::thread_rng();

        for _ in 0..50 {
            let mut session = RecordingSession::new();
            let mut manager = ClientManager::new();

            for step in 0..200u32 {
                if rng.gen_bool(0.55) {
                    let kind = if rng.gen_bool(0.2) {
                        ClientKind::Local
                    } else {
                        remote(step)
                    };
                    manager.add_client(kind, "h", &mut session);
                } else if !manager.is_empty() {
                    let slot = rng.gen_range(0..manager.len() + 2);
                    manager.remove_client(slot, &mut session);
                }

                let occupied = manager.iter().count();
                let local = manager.iter().filter(|c| c.kind == ClientKind::Local).count();
                assert_eq!(manager.local_count() + manager.remote_count(), occupied);
                assert_eq!(manager.local_count(), local);
                assert!(manager.iter().all(|c| c.info().is_some()));
            }

            let created = session.count(|c| matches!(c, Call::NewInfo(_)));
            let destroyed = session.count(|c| matches!(c, Call::DeleteInfo(_)));
            assert_eq!(created - destroyed, manager.iter().count());
        }
    }
}
