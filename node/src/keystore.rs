use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use cardswarm_swarm::identity::SecretBytes;
use cardswarm_swarm::{KeyStore, KeyStoreError};

/// Keeps the identity's secret key in a file, bincode-encoded.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("{}: {}", path.display(), source))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display("{}: {}", path.display(), source))]
    Encoding {
        path: PathBuf,
        source: bincode::Error,
    },
}

#[derive(Deserialize, Serialize)]
struct StoredIdentity {
    secret: SecretBytes,
}

impl FileKeyStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileKeyStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<SecretBytes>, Error> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(IoSnafu { path: &self.path }),
        };
        let stored: StoredIdentity =
            bincode::deserialize(&bytes).context(EncodingSnafu { path: &self.path })?;
        Ok(Some(stored.secret))
    }

    fn write(&self, secret: &SecretBytes) -> Result<(), Error> {
        let bytes = bincode::serialize(&StoredIdentity { secret: *secret })
            .context(EncodingSnafu { path: &self.path })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context(IoSnafu { path: parent })?;
        }
        fs::write(&self.path, bytes).context(IoSnafu { path: &self.path })?;
        debug!("stored identity in {}", self.path.display());
        Ok(())
    }
}

impl KeyStore for FileKeyStore {
    fn load(&mut self) -> Result<Option<SecretBytes>, KeyStoreError> {
        self.read().map_err(|e| KeyStoreError::Load {
            source: Box::new(e),
        })
    }

    fn store(&mut self, secret: &SecretBytes) -> Result<(), KeyStoreError> {
        self.write(secret).map_err(|e| KeyStoreError::Store {
            source: Box::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use cardswarm_swarm::Identity;

    use super::*;

    #[test]
    fn identity_survives_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("identity.bin");
        let first = Identity::load_or_generate(&mut FileKeyStore::new(&path)).unwrap();
        assert!(path.exists());
        let second = Identity::load_or_generate(&mut FileKeyStore::new(&path)).unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn missing_file_means_no_identity() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileKeyStore::new(dir.path().join("nothing"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.bin");
        fs::write(&path, b"nope").unwrap();
        assert!(matches!(
            FileKeyStore::new(&path).load(),
            Err(KeyStoreError::Load { .. })
        ));
    }
}
