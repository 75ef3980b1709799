#![warn(rust_2018_idioms)]
//! Peer swarm communication: authenticated, leader-aware message channels
//! layered on anonymous peer-wire connections.

use sha2::{Digest, Sha256};

pub mod bencode;
pub mod channel;
pub mod election;
pub mod envelope;
pub mod extension;
pub mod handshake;
pub mod identity;
pub mod memory;
pub mod peer;
pub mod registry;
pub mod schema;
pub mod wire;

pub use channel::Channel;
pub use election::{LeaderChange, LeaderElection};
pub use envelope::{Envelope, MetadataUpdate};
pub use extension::{Outlet, PeerEvent, SwarmCommExtension};
pub use identity::{Identity, KeyStore, KeyStoreError, MemoryKeyStore};
pub use peer::{PeerId, PeerMetadata};
pub use registry::{PeerRegistry, SwarmPeer};
pub use schema::{Fields, Payload, SchemaError};
pub use wire::{Inbound, InboundRx, InboundTx, Wire, WireError, WireEvent, WireId};

/// Seed shared by every game; the game key tells games apart.
pub const DEFAULT_SEED: &str = "6c0d50e0-56c9-4b43-bccf-77f346dd0e04";

/// The topic under which peers of one game find each other.
pub fn topic(seed: &str, game_key: &str) -> String {
    hex::encode(Sha256::digest(format!("{}-{}", seed, game_key).as_bytes()))
}
