//! Signing identity of the local peer.
use std::convert::TryFrom;
use std::error::Error;
use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use log::{debug, info};
use rand::rngs::OsRng;
use snafu::Snafu;

use crate::peer::PeerId;

pub use ed25519_dalek::{PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH, SIGNATURE_LENGTH};

/// The raw secret half of an identity, as kept by a `KeyStore`.
pub type SecretBytes = [u8; SECRET_KEY_LENGTH];

/// An Ed25519 keypair plus the peer id derived from it.
///
/// One exists per running client; it is created once and handed to whatever
/// needs to sign on the client's behalf.
pub struct Identity {
    signing: SigningKey,
    id: PeerId,
}

impl Identity {
    /// Create a fresh identity from the operating system's RNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_secret(secret: &SecretBytes) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let id = PeerId::from_public_key(signing.verifying_key().as_bytes());
        Identity { signing, id }
    }

    /// Load the identity kept in `store`, or generate and keep a new one.
    pub fn load_or_generate<S>(store: &mut S) -> Result<Self, KeyStoreError>
    where
        S: KeyStore + ?Sized,
    {
        if let Some(secret) = store.load()? {
            let identity = Self::from_secret(&secret);
            debug!("loaded identity {}", identity.id.short());
            return Ok(identity);
        }
        let identity = Self::generate();
        store.store(&identity.secret())?;
        info!("generated new identity {}", identity.id.short());
        Ok(identity)
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn secret(&self) -> SecretBytes {
        self.signing.to_bytes()
    }

    /// Produce a detached signature over `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.signing.sign(message).to_bytes()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity").field("id", &self.id).finish()
    }
}

/// Check a detached signature. Keys or signatures of the wrong length, and
/// weak or non-canonical keys, simply fail verification.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let public_key = match <[u8; PUBLIC_KEY_LENGTH]>::try_from(public_key) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let signature = match Signature::from_slice(signature) {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    VerifyingKey::from_bytes(&public_key)
        .and_then(|key| key.verify_strict(message, &signature))
        .is_ok()
}

/// Somewhere to keep an identity between sessions.
pub trait KeyStore {
    fn load(&mut self) -> Result<Option<SecretBytes>, KeyStoreError>;
    fn store(&mut self, secret: &SecretBytes) -> Result<(), KeyStoreError>;
}

#[derive(Debug, Snafu)]
pub enum KeyStoreError {
    #[snafu(display("failed to load identity: {}", source))]
    Load {
        source: Box<dyn Error + Send + Sync>,
    },

    #[snafu(display("failed to store identity: {}", source))]
    Store {
        source: Box<dyn Error + Send + Sync>,
    },
}

/// A key store that forgets everything when dropped.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    secret: Option<SecretBytes>,
}

impl KeyStore for MemoryKeyStore {
    fn load(&mut self) -> Result<Option<SecretBytes>, KeyStoreError> {
        Ok(self.secret)
    }

    fn store(&mut self, secret: &SecretBytes) -> Result<(), KeyStoreError> {
        self.secret = Some(*secret);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let identity = Identity::generate();
        let signature = identity.sign(b"hello");
        assert!(verify(&identity.public_key(), b"hello", &signature));
        assert!(!verify(&identity.public_key(), b"hullo", &signature));
    }

    #[test]
    fn verify_rejects_malformed_inputs() {
        let identity = Identity::generate();
        let signature = identity.sign(b"hello");
        assert!(!verify(&identity.public_key()[..31], b"hello", &signature));
        assert!(!verify(&identity.public_key(), b"hello", &signature[..63]));
    }

    #[test]
    fn id_follows_public_key() {
        let identity = Identity::generate();
        assert_eq!(
            identity.id(),
            &PeerId::from_public_key(&identity.public_key())
        );
        let restored = Identity::from_secret(&identity.secret());
        assert_eq!(restored.id(), identity.id());
    }

    #[test]
    fn load_or_generate_is_stable_across_sessions() {
        let mut store = MemoryKeyStore::default();
        let first = Identity::load_or_generate(&mut store).unwrap();
        let second = Identity::load_or_generate(&mut store).unwrap();
        assert_eq!(first.id(), second.id());
    }
}
