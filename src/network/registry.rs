use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;
use tokio::sync::mpsc;

use crate::message::Message;
use crate::role::Registry;

/// Live peer connections, keyed by the peer id established during the
/// identity handshake. Cheap to clone; all clones share the same map.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    peers: Mutex<HashMap<u64, mpsc::UnboundedSender<Vec<u8>>>>,
    next_message_id: AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pack a message, stamping it with this node's next message id.
    pub fn pack(&self, msg: &Message) -> Vec<u8> {
        let message_id = self.inner.next_message_id.fetch_add(1, Ordering::Relaxed) + 1;
        msg.pack(message_id)
    }

    /// Bind a connection's outbound channel to a peer id. A reconnecting
    /// peer replaces its previous connection.
    pub fn register(&self, peer_id: u64, outbound: mpsc::UnboundedSender<Vec<u8>>) {
        let previous = self.inner.peers.lock().unwrap().insert(peer_id, outbound);
        if previous.is_some() {
            debug!("peer {peer_id} reconnected, replacing its connection");
        }
    }

    /// Drop a peer's connection, unless a newer connection has already
    /// replaced `outbound`.
    pub fn deregister(&self, peer_id: u64, outbound: &mpsc::UnboundedSender<Vec<u8>>) {
        let mut peers = self.inner.peers.lock().unwrap();
        if peers
            .get(&peer_id)
            .is_some_and(|current| current.same_channel(outbound))
        {
            peers.remove(&peer_id);
        }
    }

    pub fn connected_peers(&self) -> Vec<u64> {
        self.inner.peers.lock().unwrap().keys().copied().collect()
    }
}

impl Registry for PeerRegistry {
    fn broadcast(&self, msg: &Message) {
        let frame = self.pack(msg);
        let peers = self.inner.peers.lock().unwrap();
        for (peer_id, outbound) in peers.iter() {
            if outbound.send(frame.clone()).is_err() {
                debug!("broadcast to peer {peer_id} dropped, connection gone");
            }
        }
    }

    fn send_to_id(&self, peer_id: u64, msg: &Message) {
        let frame = self.pack(msg);
        let peers = self.inner.peers.lock().unwrap();
        match peers.get(&peer_id) {
            Some(outbound) => {
                if outbound.send(frame).is_err() {
                    debug!("send to peer {peer_id} dropped, connection gone");
                }
            }
            None => debug!("send to peer {peer_id} dropped, not connected"),
        }
    }
}
