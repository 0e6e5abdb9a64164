use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const STORAGE_DIR_NAME: &str = ".pr-reminder";
const TOKEN_FILE: &str = "token.json";

/// Key/value persistence for small serialized blobs (snoozes, settings).
pub trait BlobStore {
    fn persist_blob(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
    fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
}

impl<T: BlobStore + ?Sized> BlobStore for &T {
    fn persist_blob(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).persist_blob(key, bytes)
    }

    fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).load_blob(key)
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn persist_blob(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).persist_blob(key, bytes)
    }

    fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).load_blob(key)
    }
}

/// Where the GitHub token lives.
pub trait SecretStore: Send + Sync {
    fn get_secret(&self) -> Option<String>;
    fn set_secret(&self, value: &str) -> Result<(), StorageError>;
    fn delete_secret(&self) -> Result<(), StorageError>;
}

impl<T: SecretStore + ?Sized> SecretStore for Arc<T> {
    fn get_secret(&self) -> Option<String> {
        (**self).get_secret()
    }

    fn set_secret(&self, value: &str) -> Result<(), StorageError> {
        (**self).set_secret(value)
    }

    fn delete_secret(&self) -> Result<(), StorageError> {
        (**self).delete_secret()
    }
}

#[derive(Default, Serialize, Deserialize)]
struct StoredToken {
    token: String,
}

/// File-backed store rooted at a data directory, one JSON file per key.
pub struct FileStore {
    dir: PathBuf,
    token_override: Option<String>,
}

impl FileStore {
    /// Opens `dir`, or `$HOME/.pr-reminder` when none is given.
    pub fn initialize(dir: Option<PathBuf>) -> Result<Self, StorageError> {
        let dir = match dir {
            Some(dir) => dir,
            None => {
                let home = env::var("HOME").map_err(|_| StorageError::HomeDirMissing)?;
                PathBuf::from(home).join(STORAGE_DIR_NAME)
            }
        };
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self {
            dir,
            token_override: None,
        })
    }

    /// A token that wins over the stored one (e.g. from `GITHUB_TOKEN`).
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        self.token_override = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn read_token(&self) -> Result<Option<StoredToken>, StorageError> {
        match fs::read_to_string(self.dir.join(TOKEN_FILE)) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl BlobStore for FileStore {
    fn persist_blob(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.blob_path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        debug!(key, bytes = bytes.len(), "blob persisted");
        Ok(())
    }

    fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.blob_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl SecretStore for FileStore {
    fn get_secret(&self) -> Option<String> {
        if let Some(token) = &self.token_override {
            return Some(token.clone());
        }
        match self.read_token() {
            Ok(stored) => stored.map(|s| s.token).filter(|t| !t.is_empty()),
            Err(err) => {
                tracing::warn!("Failed to read stored token: {err}");
                None
            }
        }
    }

    fn set_secret(&self, value: &str) -> Result<(), StorageError> {
        let data = serde_json::to_string_pretty(&StoredToken {
            token: value.trim().to_owned(),
        })?;
        let path = self.dir.join(TOKEN_FILE);
        fs::write(&path, data)?;
        restrict_permissions(&path)?;
        Ok(())
    }

    fn delete_secret(&self) -> Result<(), StorageError> {
        match fs::remove_file(self.dir.join(TOKEN_FILE)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("HOME environment variable is not set; pass --data-dir to choose a storage location")]
    HomeDirMissing,
    #[error("I/O error while accessing local storage: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize stored data: {0}")]
    Serialization(#[from] serde_json::Error),
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blobs_round_trip_and_missing_keys_are_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::initialize(Some(dir.path().join("nested"))).expect("store");

        assert!(store.load_blob("snoozed_prs").unwrap().is_none());
        store.persist_blob("snoozed_prs", b"[1,2]").unwrap();
        store.persist_blob("snoozed_prs", b"[3]").unwrap();
        assert_eq!(store.load_blob("snoozed_prs").unwrap(), Some(b"[3]".to_vec()));
    }

    #[test]
    fn secret_set_get_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::initialize(Some(dir.path().to_path_buf())).expect("store");

        assert_eq!(store.get_secret(), None);
        store.set_secret(" ghp_abc \n").unwrap();
        assert_eq!(store.get_secret().as_deref(), Some("ghp_abc"));
        store.delete_secret().unwrap();
        assert_eq!(store.get_secret(), None);
        store.delete_secret().unwrap();
    }

    #[test]
    fn token_override_wins_over_stored_token() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::initialize(Some(dir.path().to_path_buf()))
            .expect("store")
            .with_token_override(Some("from-env".into()));
        store.set_secret("stored").unwrap();
        assert_eq!(store.get_secret().as_deref(), Some("from-env"));

        let blank = FileStore::initialize(Some(dir.path().to_path_buf()))
            .expect("store")
            .with_token_override(Some("   ".into()));
        assert_eq!(blank.get_secret().as_deref(), Some("stored"));
    }
}
