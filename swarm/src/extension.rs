//! The `swarm_comm_ext` protocol object, one per connection.
use std::sync::Arc;

use log::{debug, info, warn};

use crate::envelope::{Envelope, MetadataUpdate};
use crate::handshake::ExtendedHandshake;
use crate::identity::Identity;
use crate::peer::{PeerId, PeerMetadata};
use crate::wire::{Wire, WireId};

/// Changes in the set of authenticated peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Added(PeerMetadata),
    Dropped(PeerId),
}

/// Write access to one connection's extension channel.
///
/// Sending never fails from the caller's point of view: a broken connection
/// is reported by the transport as a close, so errors are only logged.
#[derive(Clone)]
pub struct Outlet {
    wire: Arc<dyn Wire>,
}

impl Outlet {
    pub fn new(wire: Arc<dyn Wire>) -> Self {
        Outlet { wire }
    }

    pub fn wire_id(&self) -> WireId {
        self.wire.id()
    }

    pub fn send(&self, envelope: &Envelope) {
        if let Err(e) = self.wire.send_extended(envelope.encode()) {
            warn!("while sending {} message: {}", envelope.kind(), e);
        }
    }

    pub fn destroy(&self) {
        self.wire.destroy()
    }
}

/// Turns an anonymous wire into an authenticated, identity-bearing channel.
pub struct SwarmCommExtension {
    outlet: Outlet,
    peer: Option<PeerMetadata>,
    leader: Option<PeerId>,
    dropped: bool,
}

impl SwarmCommExtension {
    /// Take over a fresh wire and announce ourselves on it.
    pub fn attach(
        wire: Arc<dyn Wire>,
        identity: &Identity,
        username: &str,
        leader: Option<PeerId>,
    ) -> Self {
        let handshake = ExtendedHandshake::announce(identity, username, leader.as_ref());
        if let Err(e) = wire.send_handshake(handshake.encode()) {
            warn!("while sending handshake: {}", e);
        }
        SwarmCommExtension {
            outlet: Outlet::new(wire),
            peer: None,
            leader,
            dropped: false,
        }
    }

    pub fn wire_id(&self) -> WireId {
        self.outlet.wire_id()
    }

    /// The remote peer, once its handshake has been verified.
    pub fn peer(&self) -> Option<&PeerMetadata> {
        self.peer.as_ref()
    }

    pub fn leader(&self) -> Option<&PeerId> {
        self.leader.as_ref()
    }

    pub fn outlet(&self) -> Outlet {
        self.outlet.clone()
    }

    /// Verify the remote's handshake. Any failure destroys the wire.
    pub fn on_extended_handshake(&mut self, bytes: &[u8]) -> Option<PeerEvent> {
        if let Some(peer) = &self.peer {
            warn!(
                "{}: ignoring repeated handshake from {}",
                self.wire_id(),
                peer.id.short()
            );
            return None;
        }
        let verified = ExtendedHandshake::decode(bytes).and_then(|handshake| handshake.verify());
        match verified {
            Ok(metadata) => {
                info!(
                    "{}: authenticated {} ({})",
                    self.wire_id(),
                    metadata.id.short(),
                    metadata.username
                );
                self.peer = Some(metadata.clone());
                Some(PeerEvent::Added(metadata))
            }
            Err(e) => {
                warn!("{}: rejecting peer: {}", self.wire_id(), e);
                self.destroy();
                None
            }
        }
    }

    /// Decode an extension message. Anything unreadable is dropped.
    pub fn on_message(&mut self, bytes: &[u8]) -> Option<Envelope> {
        let peer = match &self.peer {
            Some(peer) => peer,
            None => {
                debug!("{}: dropping message before handshake", self.wire_id());
                return None;
            }
        };
        match Envelope::decode(bytes) {
            Ok(envelope) => {
                if let Envelope::Metadata(update) = &envelope {
                    self.peer = Some(update.apply(peer));
                }
                Some(envelope)
            }
            Err(e) => {
                warn!("{}: dropping message from {}: {}", self.wire_id(), peer.id.short(), e);
                None
            }
        }
    }

    /// The wire is gone. Reports the peer as dropped at most once, and only
    /// if it had been added in the first place.
    pub fn on_close(&mut self) -> Option<PeerEvent> {
        if self.dropped {
            return None;
        }
        self.dropped = true;
        self.peer.as_ref().map(|peer| {
            debug!("{}: {} disconnected", self.wire_id(), peer.id.short());
            PeerEvent::Dropped(peer.id.clone())
        })
    }

    pub fn send(&self, envelope: &Envelope) {
        self.outlet.send(envelope)
    }

    /// Record who we now follow and tell the remote straight away.
    pub fn set_leader(&mut self, leader: Option<PeerId>) {
        self.leader = leader.clone();
        self.send(&Envelope::Metadata(MetadataUpdate::leader(leader)));
    }

    pub fn destroy(&self) {
        self.outlet.destroy()
    }
}
