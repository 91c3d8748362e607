//! Stable anonymous visitor id.
//!
//! The id is created on first use and reused for the life of the install.
//! When storage cannot be read or written the widget still works: the id is
//! kept in memory for this process and simply will not survive a restart.

use tracing::{info, warn};

use crate::model::VisitorId;
use crate::store::{SharedStore, USER_ID_KEY};

pub struct IdentityStore {
    kv: SharedStore,
    cached: Option<VisitorId>,
}

impl IdentityStore {
    pub fn new(kv: SharedStore) -> Self {
        Self { kv, cached: None }
    }

    /// Return the persisted visitor id, creating and storing one if absent.
    ///
    /// Never fails. Repeated calls in one process return the same id.
    pub fn get_or_create_visitor_id(&mut self) -> VisitorId {
        if let Some(id) = &self.cached {
            return id.clone();
        }

        let id = match self.kv.get(USER_ID_KEY) {
            Ok(Some(raw)) if !raw.trim().is_empty() => VisitorId::from(raw.trim().to_owned()),
            Ok(_) => {
                let id = VisitorId::generate();
                match self.kv.set(USER_ID_KEY, id.as_str()) {
                    Ok(()) => info!(visitor_id = %id, "identity: created visitor id"),
                    Err(e) => warn!(error = %e, "identity: could not persist visitor id, using in-memory id"),
                }
                id
            }
            Err(e) => {
                warn!(error = %e, "identity: storage unreadable, using in-memory id");
                VisitorId::generate()
            }
        };

        self.cached = Some(id.clone());
        id
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
