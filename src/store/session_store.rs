//! Durable session records: user details, ticket info, message history.
//!
//! DESIGN
//! ======
//! Each record is stored as JSON under its own key and parsed on its own, so
//! one corrupt record never takes the others down with it.
//!
//! The first failed write switches the store into memory-only mode for the
//! rest of the process: later writes are skipped and the session keeps
//! running on in-memory state. Removals are still attempted in that mode so
//! a closed ticket is not resurrected on the next load.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use super::{MESSAGES_KEY, SharedStore, StorageError, TICKET_INFO_KEY, USER_DETAILS_KEY};
use crate::model::{Message, TicketInfo, UserDetails};

/// Everything `load` recovered from storage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub user_details: UserDetails,
    pub ticket_info: TicketInfo,
    pub messages: Vec<Message>,
}

pub struct DurableSessionStore {
    kv: SharedStore,
    memory_only: bool,
}

impl DurableSessionStore {
    pub fn new(kv: SharedStore) -> Self {
        Self { kv, memory_only: false }
    }

    /// Load all records, substituting defaults for missing or corrupt ones.
    ///
    /// History without a ticket is the remnant of an interrupted clear; it is
    /// discarded and removed from storage.
    pub fn load(&mut self) -> Snapshot {
        let user_details: UserDetails = self.load_record(USER_DETAILS_KEY);
        let ticket_info: TicketInfo = self.load_record(TICKET_INFO_KEY);
        let mut messages: Vec<Message> = self.load_record(MESSAGES_KEY);

        if !ticket_info.is_active() && !messages.is_empty() {
            warn!(count = messages.len(), "store: discarding message history without a ticket");
            messages.clear();
            self.remove(MESSAGES_KEY);
        }

        debug!(
            ticket = ticket_info.id.as_deref().unwrap_or("-"),
            messages = messages.len(),
            "store: loaded session records"
        );
        Snapshot { user_details, ticket_info, messages }
    }

    pub fn save_user_details(&mut self, details: &UserDetails) {
        self.persist(USER_DETAILS_KEY, details);
    }

    pub fn save_ticket_info(&mut self, info: &TicketInfo) {
        self.persist(TICKET_INFO_KEY, info);
    }

    /// Replace the stored history with the full sequence.
    pub fn save_messages(&mut self, messages: &[Message]) {
        self.persist(MESSAGES_KEY, messages);
    }

    /// Forget the ticket and its history. User details survive.
    ///
    /// The ticket goes first: a crash between the two removals leaves orphan
    /// history, which `load` cleans up.
    pub fn clear_ticket_state(&mut self) {
        self.remove(TICKET_INFO_KEY);
        self.remove(MESSAGES_KEY);
    }

    #[must_use]
    pub fn is_memory_only(&self) -> bool {
        self.memory_only
    }

    fn load_record<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.kv.get(key) {
            Ok(None) => T::default(),
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    error!(key, error = %e, "store: corrupt record, using default");
                    T::default()
                }
            },
            Err(e) => {
                error!(key, error = %e, "store: read failed, using default");
                T::default()
            }
        }
    }

    fn persist<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        if self.memory_only {
            return;
        }
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                error!(key, error = %e, "store: failed to encode record");
                return;
            }
        };
        if let Err(e) = self.kv.set(key, &raw) {
            self.degrade(key, &e);
        }
    }

    fn remove(&mut self, key: &str) {
        if let Err(e) = self.kv.remove(key) {
            warn!(key, error = %e, "store: remove failed");
        }
    }

    fn degrade(&mut self, key: &str, e: &StorageError) {
        self.memory_only = true;
        warn!(key, error = %e, "store: write failed, continuing in memory only");
    }
}
