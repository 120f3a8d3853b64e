use std::{collections::HashMap, sync::RwLock};

use base64::prelude::{BASE64_STANDARD, Engine};

use crate::ip_pool::IpLease;

/// Low level peer known to a VPN backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub identity: Vec<u8>,
    /// Addresses leased to the peer, `None` for backends without a routed data plane.
    pub lease: Option<IpLease>,
    pub upload: i64,
    pub download: i64,
}

impl Peer {
    #[must_use]
    pub fn new(identity: &[u8], lease: Option<IpLease>) -> Self {
        Self {
            identity: identity.to_vec(),
            lease,
            upload: 0,
            download: 0,
        }
    }

    /// Base64 encoded identity, used as the session key.
    #[must_use]
    pub fn key(&self) -> String {
        BASE64_STANDARD.encode(&self.identity)
    }
}

/// Peers added through a backend, keyed by identity.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<Vec<u8>, Peer>>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if a peer with the same identity is already registered.
    pub fn insert(&self, peer: Peer) -> bool {
        let mut peers = self.peers.write().unwrap();
        if peers.contains_key(&peer.identity) {
            return false;
        }
        peers.insert(peer.identity.clone(), peer);
        true
    }

    pub fn remove(&self, identity: &[u8]) -> Option<Peer> {
        self.peers.write().unwrap().remove(identity)
    }

    #[must_use]
    pub fn get(&self, identity: &[u8]) -> Option<Peer> {
        self.peers.read().unwrap().get(identity).cloned()
    }

    #[must_use]
    pub fn contains(&self, identity: &[u8]) -> bool {
        self.peers.read().unwrap().contains_key(identity)
    }

    /// Records traffic counters reported by the backend. Unknown peers are ignored.
    pub fn update_usage(&self, identity: &[u8], upload: i64, download: i64) {
        if let Some(peer) = self.peers.write().unwrap().get_mut(identity) {
            peer.upload = upload;
            peer.download = download;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
