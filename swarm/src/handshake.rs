//! The extended handshake, BEP 10 style: a bencoded dictionary exchanged
//! right after the base peer-wire handshake.
//!
//! Besides the standard `m` capability map, this protocol adds four binary
//! fields:
//!
//! * `pk`: the sender's Ed25519 public key,
//! * `sig`: a detached signature of [`HANDSHAKE_MESSAGE`] under `pk`,
//! * `u`: the sender's username, UTF-8,
//! * `l`: the id of the sender's leader, UTF-8, or [`NULL_SENTINEL`].
use std::collections::BTreeMap;

use snafu::{ensure, OptionExt, ResultExt, Snafu};

use crate::bencode::{self, Bencode, DecodeError};
use crate::identity::{self, Identity, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use crate::peer::{PeerId, PeerMetadata};

/// Name under which peers advertise this extension in the `m` map.
pub const EXT_NAME: &str = "swarm_comm_ext";

/// Message id we assign to the extension in our own `m` map.
pub const EXT_ID: i64 = 1;

/// The fixed message every peer signs to prove it owns its public key.
pub const HANDSHAKE_MESSAGE: &[u8] = b"\"hello\"";

/// Stands in for "no leader". Bencode has no null, and an absent key would
/// be indistinguishable from a peer that never sent one.
pub const NULL_SENTINEL: &[u8] = &[0x00];

#[derive(Debug, Snafu)]
pub enum HandshakeError {
    #[snafu(display("handshake is not valid bencode: {}", source))]
    Malformed { source: DecodeError },

    #[snafu(display("handshake is not a dictionary"))]
    NotADict,

    #[snafu(display("handshake lacks field '{}'", field))]
    MissingField { field: &'static str },

    #[snafu(display("handshake field '{}' has the wrong type", field))]
    WrongType { field: &'static str },

    #[snafu(display("peer does not support the '{}' extension", EXT_NAME))]
    Incompatible,

    #[snafu(display("public key is {} bytes long", len))]
    BadPublicKey { len: usize },

    #[snafu(display("signature verification failed"))]
    BadSignature,

    #[snafu(display("leader id is not valid UTF-8"))]
    BadLeader,
}

/// An extended handshake as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedHandshake {
    /// Extension name to message id, the `m` map.
    pub extensions: BTreeMap<String, i64>,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub username: Vec<u8>,
    pub leader: Vec<u8>,
}

impl ExtendedHandshake {
    /// Build and sign the handshake this peer announces.
    pub fn announce(identity: &Identity, username: &str, leader: Option<&PeerId>) -> Self {
        let mut extensions = BTreeMap::new();
        extensions.insert(EXT_NAME.to_owned(), EXT_ID);
        ExtendedHandshake {
            extensions,
            public_key: identity.public_key().to_vec(),
            signature: identity.sign(HANDSHAKE_MESSAGE).to_vec(),
            username: username.as_bytes().to_vec(),
            leader: encode_leader(leader),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let m = self
            .extensions
            .iter()
            .map(|(name, id)| (name.as_bytes().to_vec(), Bencode::Integer(*id)))
            .collect();
        let mut dict = BTreeMap::new();
        dict.insert(b"m".to_vec(), Bencode::Dict(m));
        dict.insert(b"pk".to_vec(), Bencode::Bytes(self.public_key.clone()));
        dict.insert(b"sig".to_vec(), Bencode::Bytes(self.signature.clone()));
        dict.insert(b"u".to_vec(), Bencode::Bytes(self.username.clone()));
        dict.insert(b"l".to_vec(), Bencode::Bytes(self.leader.clone()));
        bencode::encode(&Bencode::Dict(dict))
    }

    /// Parse a handshake. Unknown keys, which other extensions may add, are
    /// ignored; a missing `m` map is read as an empty one.
    pub fn decode(bytes: &[u8]) -> Result<Self, HandshakeError> {
        let value = bencode::decode(bytes).context(MalformedSnafu)?;
        let dict = value.as_dict().context(NotADictSnafu)?;

        let mut extensions = BTreeMap::new();
        if let Some(m) = dict.get(&b"m"[..]) {
            let m = m.as_dict().context(WrongTypeSnafu { field: "m" })?;
            for (name, id) in m {
                // Non-integer ids and non-UTF-8 names belong to someone else.
                if let (Ok(name), Bencode::Integer(id)) = (std::str::from_utf8(name), id) {
                    extensions.insert(name.to_owned(), *id);
                }
            }
        }

        let field = |field: &'static str| -> Result<Vec<u8>, HandshakeError> {
            dict.get(field.as_bytes())
                .context(MissingFieldSnafu { field })?
                .as_bytes()
                .map(<[u8]>::to_vec)
                .context(WrongTypeSnafu { field })
        };

        Ok(ExtendedHandshake {
            extensions,
            public_key: field("pk")?,
            signature: field("sig")?,
            username: field("u")?,
            leader: field("l")?,
        })
    }

    pub fn supports_extension(&self) -> bool {
        self.extensions.contains_key(EXT_NAME)
    }

    /// Check capability and signature, then derive the sender's metadata.
    pub fn verify(&self) -> Result<PeerMetadata, HandshakeError> {
        ensure!(self.supports_extension(), IncompatibleSnafu);
        ensure!(
            self.public_key.len() == PUBLIC_KEY_LENGTH,
            BadPublicKeySnafu {
                len: self.public_key.len()
            }
        );
        ensure!(
            self.signature.len() == SIGNATURE_LENGTH
                && identity::verify(&self.public_key, HANDSHAKE_MESSAGE, &self.signature),
            BadSignatureSnafu
        );
        Ok(PeerMetadata {
            id: PeerId::from_public_key(&self.public_key),
            // Usernames are only ever displayed, so a stray byte is not worth
            // losing the connection over.
            username: String::from_utf8_lossy(&self.username).into_owned(),
            leader: decode_leader(&self.leader)?,
        })
    }
}

pub fn encode_leader(leader: Option<&PeerId>) -> Vec<u8> {
    match leader {
        Some(id) => id.as_str().as_bytes().to_vec(),
        None => NULL_SENTINEL.to_vec(),
    }
}

pub fn decode_leader(bytes: &[u8]) -> Result<Option<PeerId>, HandshakeError> {
    if bytes == NULL_SENTINEL {
        return Ok(None);
    }
    let id = std::str::from_utf8(bytes).ok().context(BadLeaderSnafu)?;
    Ok(Some(PeerId::from(id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announced_handshake_verifies() {
        let identity = Identity::generate();
        let leader = PeerId::from("f00d");
        let handshake = ExtendedHandshake::announce(&identity, "alice", Some(&leader));
        let decoded = ExtendedHandshake::decode(&handshake.encode()).unwrap();
        assert_eq!(decoded, handshake);

        let metadata = decoded.verify().unwrap();
        assert_eq!(&metadata.id, identity.id());
        assert_eq!(metadata.username, "alice");
        assert_eq!(metadata.leader, Some(leader));
    }

    #[test]
    fn null_leader_round_trips_to_none() {
        let identity = Identity::generate();
        let handshake = ExtendedHandshake::announce(&identity, "bob", None);
        assert_eq!(handshake.leader, vec![0x00]);
        let metadata = ExtendedHandshake::decode(&handshake.encode())
            .unwrap()
            .verify()
            .unwrap();
        assert_eq!(metadata.leader, None);
        assert_eq!(decode_leader(b"0").unwrap(), Some(PeerId::from("0")));
        assert_eq!(decode_leader(b"").unwrap(), Some(PeerId::from("")));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let identity = Identity::generate();
        let mut handshake = ExtendedHandshake::announce(&identity, "mallory", None);
        handshake.signature[0] ^= 0x01;
        assert!(matches!(
            handshake.verify(),
            Err(HandshakeError::BadSignature)
        ));
    }

    #[test]
    fn borrowed_public_key_is_rejected() {
        let victim = Identity::generate();
        let thief = Identity::generate();
        let mut handshake = ExtendedHandshake::announce(&thief, "mallory", None);
        handshake.public_key = victim.public_key().to_vec();
        assert!(matches!(
            handshake.verify(),
            Err(HandshakeError::BadSignature)
        ));
    }

    #[test]
    fn missing_capability_is_incompatible() {
        let identity = Identity::generate();
        let mut handshake = ExtendedHandshake::announce(&identity, "carol", None);
        handshake.extensions.clear();
        handshake.extensions.insert("ut_metadata".into(), 2);
        let decoded = ExtendedHandshake::decode(&handshake.encode()).unwrap();
        assert!(!decoded.supports_extension());
        assert!(matches!(decoded.verify(), Err(HandshakeError::Incompatible)));
    }

    #[test]
    fn decode_reports_missing_fields() {
        let bytes = b"d1:md14:swarm_comm_exti1eee";
        assert!(matches!(
            ExtendedHandshake::decode(bytes),
            Err(HandshakeError::MissingField { field: "pk" })
        ));
        assert!(matches!(
            ExtendedHandshake::decode(b"le"),
            Err(HandshakeError::NotADict)
        ));
        assert!(matches!(
            ExtendedHandshake::decode(b"d"),
            Err(HandshakeError::Malformed { .. })
        ));
    }
}
