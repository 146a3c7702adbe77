use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::oneshot, time::Instant};

// -----------------------------------------------------------------------------
// ----- CloseReason -----------------------------------------------------------

/// Why the gateway asked a session to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Stale,
    Shutdown,
}

// -----------------------------------------------------------------------------
// ----- SessionHandle ---------------------------------------------------------

/// Registry-side view of one live session.
#[derive(Debug)]
pub struct SessionHandle {
    client_id: String,
    serial: u64,
    established_at: Instant,
    last_active: Mutex<Instant>,
    closer: Mutex<Option<oneshot::Sender<CloseReason>>>,
}

impl SessionHandle {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Distinguishes successive sessions of the same client.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn established_at(&self) -> Instant {
        self.established_at
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock()
    }

    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// Ask the session to close. Only the first signal is delivered.
    pub fn signal(&self, reason: CloseReason) -> bool {
        match self.closer.lock().take() {
            Some(tx) => tx.send(reason).is_ok(),
            None => false,
        }
    }

    fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_active()) > timeout
    }
}

// -----------------------------------------------------------------------------
// ----- SessionRegistry -------------------------------------------------------

/// Live sessions by client id. One session per client.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    next_serial: AtomicU64,
}

pub type Registration = (Arc<SessionHandle>, oneshot::Receiver<CloseReason>);

pub type HandleList = SmallVec<[Arc<SessionHandle>; 4]>;

// -----------------------------------------------------------------------------
// ----- SessionRegistry: Public -----------------------------------------------

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session for `client_id`. Refused while another one is live.
    pub fn register(&self, client_id: &str) -> Result<Registration, RegistryError> {
        let mut sessions = self.sessions.write();

        if sessions.contains_key(client_id) {
            return Err(RegistryError::AlreadyConnected {
                client_id: client_id.to_string(),
            });
        }

        let now = Instant::now();
        let (tx, rx) = oneshot::channel();
        let handle = Arc::new(SessionHandle {
            client_id: client_id.to_string(),
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
            established_at: now,
            last_active: Mutex::new(now),
            closer: Mutex::new(Some(tx)),
        });

        sessions.insert(client_id.to_string(), handle.clone());
        Ok((handle, rx))
    }

    /// Remove `handle` if it is still the registered session for its client.
    /// Returns false when someone else already removed it. `on_remove` runs
    /// under the registry lock, so no frame of the removed session can slip
    /// in between.
    pub fn unregister(&self, handle: &SessionHandle, on_remove: impl FnOnce(&SessionHandle)) -> bool {
        let mut sessions = self.sessions.write();

        match sessions.get(handle.client_id()) {
            Some(current) if current.serial == handle.serial => {
                sessions.remove(handle.client_id());
                on_remove(handle);
                true
            }
            _ => false,
        }
    }

    /// Remove and return every session idle for longer than `timeout`,
    /// calling `on_remove` for each under the registry lock.
    pub fn take_stale(
        &self,
        now: Instant,
        timeout: Duration,
        mut on_remove: impl FnMut(&SessionHandle),
    ) -> HandleList {
        let mut stale = HandleList::new();

        self.sessions.write().retain(|_, handle| {
            if handle.is_stale(now, timeout) {
                on_remove(handle);
                stale.push(handle.clone());
                false
            } else {
                true
            }
        });

        stale
    }

    /// Remove and return every session, calling `on_remove` for each under the
    /// registry lock.
    pub fn drain(&self, mut on_remove: impl FnMut(&SessionHandle)) -> HandleList {
        let mut sessions = self.sessions.write();

        sessions
            .drain()
            .map(|(_, handle)| {
                on_remove(&handle);
                handle
            })
            .collect()
    }

    /// Run `f` only while `handle` is the registered session for its client.
    /// Removal waits for `f` to finish, so whatever `f` reserves is seen by
    /// the remover's `on_remove`.
    pub fn while_current<R>(&self, handle: &SessionHandle, f: impl FnOnce() -> R) -> Option<R> {
        let sessions = self.sessions.read();

        match sessions.get(handle.client_id()) {
            Some(current) if current.serial == handle.serial => Some(f()),
            _ => None,
        }
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(client_id).cloned()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.sessions.read().contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("client '{client_id}' already has a live session")]
    AlreadyConnected { client_id: String },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
