//! Secret storage for key material and session state.
//!
//! [`SecretStore`] is the seam the rest of the node talks to. Two backends
//! ship with the crate: [`MemorySecretStore`] for tests and ephemeral nodes,
//! and [`FileSecretStore`], which keeps one XChaCha20-Poly1305 encrypted file
//! per secret under a directory, keyed by a passphrase-derived key.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use beam_shared::constants::KDF_CONTEXT_SECRET_STORE;
use beam_shared::crypto::{self, SymmetricKey};
use zeroize::{Zeroize, Zeroizing};

use crate::error::SecretStoreError;

const SECRET_FILE_EXTENSION: &str = "secret";

pub trait SecretStore: Send + Sync {
    fn save(&self, id: &str, bytes: &[u8]) -> Result<(), SecretStoreError>;

    fn load(&self, id: &str) -> Result<Zeroizing<Vec<u8>>, SecretStoreError>;

    /// Deleting an absent id is not an error.
    fn delete(&self, id: &str) -> Result<(), SecretStoreError>;

    /// Ids currently stored that start with `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<String>, SecretStoreError>;
}

#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, SecretStoreError> {
        self.entries
            .lock()
            .map_err(|_| SecretStoreError::AccessDenied("memory store lock poisoned".into()))
    }
}

impl SecretStore for MemorySecretStore {
    fn save(&self, id: &str, bytes: &[u8]) -> Result<(), SecretStoreError> {
        if let Some(mut old) = self.entries()?.insert(id.to_string(), bytes.to_vec()) {
            old.zeroize();
        }
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Zeroizing<Vec<u8>>, SecretStoreError> {
        self.entries()?
            .get(id)
            .map(|bytes| Zeroizing::new(bytes.clone()))
            .ok_or_else(|| SecretStoreError::NotFound(id.to_string()))
    }

    fn delete(&self, id: &str) -> Result<(), SecretStoreError> {
        if let Some(mut old) = self.entries()?.remove(id) {
            old.zeroize();
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, SecretStoreError> {
        let mut ids: Vec<String> = self
            .entries()?
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl Drop for MemorySecretStore {
    fn drop(&mut self) {
        if let Ok(entries) = self.entries.get_mut() {
            for bytes in entries.values_mut() {
                bytes.zeroize();
            }
        }
    }
}

/// One encrypted file per secret. File names are the hex-encoded id.
pub struct FileSecretStore {
    dir: PathBuf,
    key: SymmetricKey,
}

impl FileSecretStore {
    pub fn open(dir: &Path, passphrase: &str) -> Result<Self, SecretStoreError> {
        fs::create_dir_all(dir)?;
        let key = crypto::derive_key_from_passphrase(passphrase.as_bytes(), KDF_CONTEXT_SECRET_STORE);
        tracing::debug!(path = %dir.display(), "opened file secret store");
        Ok(Self {
            dir: dir.to_path_buf(),
            key,
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{SECRET_FILE_EXTENSION}", hex::encode(id.as_bytes())))
    }
}

impl SecretStore for FileSecretStore {
    fn save(&self, id: &str, bytes: &[u8]) -> Result<(), SecretStoreError> {
        let sealed = crypto::encrypt(&self.key, bytes)
            .map_err(|e| SecretStoreError::AccessDenied(e.to_string()))?;

        let path = self.path_for(id);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &sealed)?;
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Zeroizing<Vec<u8>>, SecretStoreError> {
        let sealed = match fs::read(self.path_for(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SecretStoreError::NotFound(id.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(SecretStoreError::AccessDenied(e.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        crypto::decrypt(&self.key, &sealed)
            .map(Zeroizing::new)
            .map_err(|_| SecretStoreError::Corrupt(id.to_string()))
    }

    fn delete(&self, id: &str) -> Result<(), SecretStoreError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, SecretStoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SECRET_FILE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(raw) = hex::decode(stem) else {
                continue;
            };
            if let Ok(id) = String::from_utf8(raw) {
                if id.starts_with(prefix) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl Drop for FileSecretStore {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
