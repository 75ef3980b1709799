use std::fmt;

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of a peer's public key.
///
/// This is the only identity a peer has within the swarm; usernames are
/// decoration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(String);

impl PeerId {
    pub fn from_public_key(public_key: &[u8]) -> Self {
        PeerId(hex::encode(Sha256::digest(public_key)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first six characters, for log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(6) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        PeerId(id)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        PeerId(id.to_owned())
    }
}

/// What this peer knows about a remote peer.
///
/// Values are never mutated in place: every change produces a new
/// `PeerMetadata` that replaces the old one wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMetadata {
    pub id: PeerId,
    pub username: String,
    /// Who the peer believes is running the game.
    pub leader: Option<PeerId>,
}

impl PeerMetadata {
    pub fn with_leader(&self, leader: Option<PeerId>) -> Self {
        PeerMetadata {
            leader,
            ..self.clone()
        }
    }

    pub fn with_username(&self, username: String) -> Self {
        PeerMetadata {
            username,
            ..self.clone()
        }
    }

    /// Whether the peer announces that it runs the game itself.
    pub fn is_self_declared_leader(&self) -> bool {
        self.leader.as_ref() == Some(&self.id)
    }
}
