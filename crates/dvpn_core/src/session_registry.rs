use std::{collections::HashMap, sync::RwLock};

use dvpn_common::db::models::Session;
use tracing::debug;

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, Session>,
    // account address -> key of the most recently set session
    by_address: HashMap<String, String>,
}

impl RegistryInner {
    fn remove(&mut self, key: &str) -> Option<Session> {
        let session = self.sessions.remove(key)?;
        if self.by_address.get(&session.address).map(String::as_str) == Some(key) {
            // fall back to the newest remaining session of the same account
            let replacement = self
                .sessions
                .values()
                .filter(|other| other.address == session.address)
                .max_by_key(|other| (other.updated_at, other.id))
                .map(|other| other.key.clone());
            match replacement {
                Some(other_key) => {
                    self.by_address.insert(session.address.clone(), other_key);
                }
                None => {
                    self.by_address.remove(&session.address);
                }
            }
        }
        Some(session)
    }
}

/// In-memory registry of live sessions keyed by peer key.
///
/// All operations are linearized by a single read/write lock.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding given sessions, e.g. loaded from the database.
    #[must_use]
    pub fn from_sessions(sessions: Vec<Session>) -> Self {
        let registry = Self::new();
        for session in sessions {
            registry.set(session);
        }
        registry
    }

    /// Inserts a session, overwriting any session stored under the same key.
    pub fn set(&self, session: Session) {
        let mut inner = self.inner.write().unwrap();
        let address_changed = inner
            .sessions
            .get(&session.key)
            .is_some_and(|previous| previous.address != session.address);
        if address_changed {
            inner.remove(&session.key);
        }
        debug!("Registering session {session}");
        inner
            .by_address
            .insert(session.address.clone(), session.key.clone());
        inner.sessions.insert(session.key.clone(), session);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Session> {
        self.inner.read().unwrap().sessions.get(key).cloned()
    }

    /// Most recently set session of an account.
    #[must_use]
    pub fn get_by_address(&self, address: &str) -> Option<Session> {
        let inner = self.inner.read().unwrap();
        inner
            .by_address
            .get(address)
            .and_then(|key| inner.sessions.get(key))
            .cloned()
    }

    pub fn delete(&self, key: &str) -> Option<Session> {
        self.inner.write().unwrap().remove(key)
    }

    /// Deletes the most recently set session of an account.
    pub fn delete_by_address(&self, address: &str) -> Option<Session> {
        let mut inner = self.inner.write().unwrap();
        let key = inner.by_address.get(address)?.clone();
        inner.remove(&key)
    }

    /// Replaces traffic counters of a session, returns the updated session.
    pub fn update_usage(
        &self,
        key: &str,
        upload_bytes: i64,
        download_bytes: i64,
    ) -> Option<Session> {
        let mut inner = self.inner.write().unwrap();
        let session = inner.sessions.get_mut(key)?;
        session.set_usage(upload_bytes, download_bytes);
        Some(session.clone())
    }

    /// Calls `visitor` for every session while holding the read lock.
    ///
    /// The visitor must not call back into the registry.
    pub fn iterate<F>(&self, mut visitor: F)
    where
        F: FnMut(&Session),
    {
        let inner = self.inner.read().unwrap();
        for session in inner.sessions.values() {
            visitor(session);
        }
    }

    /// Copy of all sessions ordered by connection time.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Session> {
        let mut sessions = Vec::with_capacity(self.len());
        self.iterate(|session| sessions.push(session.clone()));
        sessions.sort_by_key(|session| (session.connected_at, session.id));
        sessions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
