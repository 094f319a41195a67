//! Connected-peer registry.
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

struct PeerEntry {
    connections: usize,
    learner_id: Option<u64>,
}

/// Registry of open connections, keyed by remote address.
///
/// Every TCP connection arrives from its own ephemeral source port, so in
/// practice each connection is its own entry; the refcount only aggregates
/// reconnects from an identical address. Metadata attached with
/// [`add_info`](PeerSet::add_info) comes back out of
/// [`disconnect`](PeerSet::disconnect) when the entry's last connection
/// closes — a learner tags its heartbeat connection with its id, and the
/// evolver undoes the registration when that connection dies.
#[derive(Default)]
pub struct PeerSet {
    peers: Mutex<HashMap<SocketAddr, PeerEntry>>,
}

impl PeerSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Records one more connection of `peer`.
    pub fn connect(&self, peer: SocketAddr) {
        let mut peers = self.peers.lock().unwrap();
        peers
            .entry(peer)
            .or_insert(PeerEntry {
                connections: 0,
                learner_id: None,
            })
            .connections += 1;
        info!("{} connected", peer);
    }

    /// Records a closed connection of `peer`.
    ///
    /// Returns the peer's learner id when this was its last connection.
    pub fn disconnect(&self, peer: SocketAddr) -> Option<u64> {
        let mut peers = self.peers.lock().unwrap();
        let last_info = match peers.get_mut(&peer) {
            Some(entry) => {
                entry.connections -= 1;
                if entry.connections == 0 {
                    peers.remove(&peer).and_then(|e| e.learner_id)
                } else {
                    None
                }
            }
            None => None,
        };
        info!("{} disconnected", peer);
        last_info
    }

    /// Tags `peer` with the learner id it registered under.
    pub fn add_info(&self, peer: SocketAddr, learner_id: u64) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(entry) = peers.get_mut(&peer) {
            entry.learner_id = Some(learner_id);
        }
    }

    /// Learner id attached to `peer`, if any.
    pub fn get_info(&self, peer: SocketAddr) -> Option<u64> {
        self.peers.lock().unwrap().get(&peer).and_then(|e| e.learner_id)
    }

    /// Addresses of all currently connected peers.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.peers.lock().unwrap().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_refcounting() {
        let set = PeerSet::new();
        let peer = addr(4000);
        set.connect(peer);
        set.connect(peer);
        set.add_info(peer, 3);

        assert_eq!(set.disconnect(peer), None);
        assert_eq!(set.get_info(peer), Some(3));
        assert_eq!(set.disconnect(peer), Some(3));
        assert!(set.peers().is_empty());
    }
}
