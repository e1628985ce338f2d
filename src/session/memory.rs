//! In-memory session store
//!
//! DashMap-backed store for single-process deployments and tests. The
//! entry API gives the atomic read-then-conditional-write the
//! [`SessionStore`] contract requires. Entries past the configured TTL are
//! evicted on access and by [`SessionStore::purge_expired`], so abandoned
//! sessions (e.g. API clients that never return the cookie) do not
//! accumulate.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{Session, SessionStore, VersionedSession};
use crate::{Error, Result};

/// DashMap-backed session store with TTL-based eviction
pub struct MemoryStore {
    sessions: DashMap<String, VersionedSession>,
    ttl: Duration,
}

impl MemoryStore {
    /// Create an empty store whose entries expire `ttl` after creation
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no sessions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn is_expired(&self, entry: &VersionedSession) -> bool {
        Utc::now() >= entry.session.created_at + self.ttl
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<VersionedSession>> {
        let expired = match self.sessions.get(id) {
            Some(entry) if !self.is_expired(&entry) => {
                return Ok(Some(entry.value().clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            // Re-check under the removal lock; a concurrent put may have
            // replaced the entry.
            self.sessions.remove_if(id, |_, entry| self.is_expired(entry));
        }
        Ok(None)
    }

    async fn put(&self, session: Session, expected_version: Option<u64>) -> Result<u64> {
        match self.sessions.entry(session.id.clone()) {
            Entry::Vacant(vacant) => {
                if expected_version.is_some() {
                    // Caller expected an existing session; it was deleted
                    // out from under them.
                    return Err(Error::SessionConflict);
                }
                vacant.insert(VersionedSession {
                    session,
                    version: 1,
                });
                Ok(1)
            }
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().version;
                if expected_version != Some(current) {
                    return Err(Error::SessionConflict);
                }
                let version = current + 1;
                occupied.insert(VersionedSession { session, version });
                Ok(version)
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        self.sessions.retain(|id, entry| {
            if self.is_expired(entry) {
                removed.push(id.clone());
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}
