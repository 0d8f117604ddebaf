//! Session registry: at most one live connection per identity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatrelay_protocol::{ConnectionHandle, ConnectionId};

use crate::ServerError;

/// A live association between an identity and its current connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: String,
    pub handle: Arc<ConnectionHandle>,
}

/// Concurrency-safe map from identity to connection handle.
///
/// Every operation takes the same lock, and no operation holds it across
/// I/O: handles are closed through their synchronous close signal, and the
/// caller of [`upsert`](Self::upsert) closes the replaced handle after the
/// lock is released.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<ConnectionHandle>>>,
    shut_down: AtomicBool,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<ConnectionHandle>>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs `handle` as the current session for `identity`.
    ///
    /// Returns the handle it replaced, if any. Fails once
    /// [`shutdown_all`](Self::shutdown_all) has run.
    pub fn upsert(
        &self,
        identity: &str,
        handle: Arc<ConnectionHandle>,
    ) -> Result<Option<Arc<ConnectionHandle>>, ServerError> {
        let mut sessions = self.lock();
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ServerError::ShuttingDown);
        }
        Ok(sessions.insert(identity.to_owned(), handle))
    }

    /// Removes the entry for `identity` only if it still belongs to `id`.
    ///
    /// A lifecycle that exits after being replaced must not delete its
    /// successor, so removal compares the connection id as well as the key.
    pub fn remove(&self, identity: &str, id: ConnectionId) -> bool {
        let mut sessions = self.lock();
        if sessions.get(identity).is_some_and(|h| h.id() == id) {
            sessions.remove(identity);
            true
        } else {
            false
        }
    }

    /// Point-in-time copy of all sessions.
    pub fn snapshot(&self) -> Vec<Session> {
        self.lock()
            .iter()
            .map(|(identity, handle)| Session {
                identity: identity.clone(),
                handle: Arc::clone(handle),
            })
            .collect()
    }

    /// Closes every registered handle exactly once.
    ///
    /// Only the first call does anything; later or concurrent calls return 0.
    /// Entries stay in the map until each lifecycle removes its own.
    pub fn shutdown_all(&self) -> usize {
        let sessions = self.lock();
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let closed = sessions.values().filter(|handle| handle.close()).count();
        tracing::info!(closed, "closed all sessions");
        closed
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Current handle for `identity`.
    pub fn get(&self, identity: &str) -> Option<Arc<ConnectionHandle>> {
        self.lock().get(identity).cloned()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lock().contains_key(identity)
    }

    /// Registered identities, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
