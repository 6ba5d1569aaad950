//! Session registry
//!
//! Presence-only set of live session ids. Existence in the registry is the
//! sole admission criterion for inbound traffic carrying a session id.

use std::fmt;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Opaque session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Concurrency-safe set of live session ids
///
/// Backed by a sharded reader/writer map, so `verify` never contends with
/// other readers and `create`/`remove` only lock one shard.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    live: DashMap<SessionId, ()>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh id and mark it live
    pub fn create(&self) -> SessionId {
        loop {
            match self.live.entry(SessionId::generate()) {
                Entry::Vacant(slot) => {
                    let id = slot.key().clone();
                    slot.insert(());
                    debug!(session_id = %id, "session registered");
                    return id;
                }
                Entry::Occupied(_) => continue,
            }
        }
    }

    /// Check whether `id` is currently live
    pub fn verify(&self, id: &SessionId) -> bool {
        self.live.contains_key(id)
    }

    /// Remove `id`. Returns false when it was not live.
    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = self.live.remove(id).is_some();
        if removed {
            debug!(session_id = %id, "session deregistered");
        }
        removed
    }

    /// Number of live ids
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True when no id is live
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
