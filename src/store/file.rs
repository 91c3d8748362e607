//! Directory-backed store: one file per key.
//!
//! Writes go to a sibling temp file, are fsynced, then renamed over the
//! target, so a crash mid-write leaves either the old or the new value.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{KeyValueStore, StorageError};

#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    // Serializes writers within this process; the rename handles crashes.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), write_lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, ()>, StorageError> {
        self.write_lock
            .lock()
            .map_err(|_| StorageError::Unavailable("file store lock poisoned".into()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let _guard = self.locked()?;
        fs::create_dir_all(&self.dir)?;

        let tmp = path.with_extension("json.tmp");
        let written = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            if e.kind() == ErrorKind::StorageFull {
                return Err(StorageError::QuotaExceeded { key: key.to_owned() });
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let _guard = self.locked()?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
