use std::collections::BTreeMap;

use log::{debug, trace};

use crate::envelope::MetadataUpdate;
use crate::peer::{PeerId, PeerMetadata};
use crate::wire::WireId;

/// An authenticated peer and the connection it was authenticated on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmPeer {
    pub metadata: PeerMetadata,
    pub wire: WireId,
}

/// Every peer currently known to this client, in ascending id order.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: BTreeMap<PeerId, SwarmPeer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Insert the peer, replacing any older connection of the same peer.
    pub fn on_peer_add(&mut self, wire: WireId, metadata: PeerMetadata) {
        debug!("peer added: {} on {}", metadata.id.short(), wire);
        self.peers
            .insert(metadata.id.clone(), SwarmPeer { metadata, wire });
    }

    /// Forget the peer, unless the entry already belongs to a newer
    /// connection. Returns whether anything was removed.
    pub fn on_peer_drop(&mut self, wire: WireId, id: &PeerId) -> bool {
        match self.peers.get(id) {
            Some(peer) if peer.wire == wire => {
                debug!("peer dropped: {}", id.short());
                self.peers.remove(id);
                true
            }
            Some(_) => {
                trace!("ignoring drop of stale connection {} for {}", wire, id.short());
                false
            }
            None => false,
        }
    }

    /// Replace the peer's metadata with the updated version. Returns the new
    /// metadata, or `None` for unknown peers.
    pub fn on_peer_metadata_change(
        &mut self,
        id: &PeerId,
        update: &MetadataUpdate,
    ) -> Option<&PeerMetadata> {
        let peer = self.peers.get_mut(id)?;
        peer.metadata = update.apply(&peer.metadata);
        debug!(
            "peer {} now follows {}",
            id.short(),
            peer.metadata
                .leader
                .as_ref()
                .map(PeerId::short)
                .unwrap_or("nobody")
        );
        Some(&peer.metadata)
    }

    pub fn get(&self, id: &PeerId) -> Option<&SwarmPeer> {
        self.peers.get(id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SwarmPeer> {
        self.peers.values()
    }

    /// Peers whose declared leader is `leader`.
    pub fn followers_of<'a>(&'a self, leader: &'a PeerId) -> impl Iterator<Item = &'a SwarmPeer> {
        self.iter()
            .filter(move |peer| peer.metadata.leader.as_ref() == Some(leader))
    }

    pub fn snapshot(&self) -> Vec<PeerMetadata> {
        self.iter().map(|peer| peer.metadata.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
