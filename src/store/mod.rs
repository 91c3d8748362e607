//! Key-value persistence backing the identity and session records.
//!
//! DESIGN
//! ======
//! Values are opaque strings under fixed keys. Backends synchronize
//! internally so one store can be shared through `Arc<dyn KeyValueStore>`
//! between the identity store and the durable session store.
//!
//! Backends report every failure; policy (fall back, degrade, log) lives in
//! the callers.

mod file;
mod session_store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub use file::FileStore;
pub use session_store::{DurableSessionStore, Snapshot};

pub const USER_ID_KEY: &str = "chat-widget-user-id";
pub const USER_DETAILS_KEY: &str = "chat-widget-user-details";
pub const TICKET_INFO_KEY: &str = "chat-widget-ticket-info";
pub const MESSAGES_KEY: &str = "chat-widget-messages";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage quota exceeded for {key}")]
    QuotaExceeded { key: String },
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
}

pub trait KeyValueStore: Send + Sync {
    /// Returns `Ok(None)` when the key was never written or was removed.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// # Errors
    ///
    /// Returns an error when the value could not be stored.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend refuses the removal.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;

/// Process-local store, used for tests and for hosts without a disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
