use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::{
    Mutex,
    mpsc::{self, error::TrySendError},
};
use tracing::{debug, warn};

use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    #[cfg(test)]
    pub(crate) fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lines a session may have waiting for its socket before further lines to
/// it are dropped.
pub const OUTBOUND_CAPACITY: usize = 128;

pub(crate) type Outbound = mpsc::Sender<Arc<str>>;
pub(crate) type Inbox = mpsc::Receiver<Arc<str>>;

/// The broadcaster's view of a session: its identity and the queue drained
/// by the session's writer task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
    outbound: Outbound,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, peer: SocketAddr, outbound: Outbound) -> Self {
        Self { id, peer, outbound }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues a line for this session's socket without waiting on it.
    ///
    /// Fails with [`ChatError::SendFailure`] when the session is gone or its
    /// queue is full; in the latter case the line is dropped for this session
    /// only.
    pub fn send(&self, text: Arc<str>) -> Result<()> {
        match self.outbound.try_send(text) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    session = %self.id,
                    peer = %self.peer,
                    "outbound queue full; dropping line"
                );
                Err(ChatError::SendFailure(self.id))
            }
            Err(TrySendError::Closed(_)) => Err(ChatError::SendFailure(self.id)),
        }
    }
}

/// Active sessions keyed by id.
///
/// A session is present exactly while it is active: the server adds it on
/// accept and the session removes itself during teardown.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_capacity(OUTBOUND_CAPACITY)
    }

    /// Registry whose sessions each buffer at most `capacity` outbound lines.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new session and returns its handle together with the
    /// receiving end of its outbound queue.
    pub(crate) async fn add(&self, peer: SocketAddr) -> (SessionHandle, Inbox) {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbound, inbox) = mpsc::channel(self.capacity);
        let handle = SessionHandle::new(id, peer, outbound);

        self.sessions.lock().await.insert(id, handle.clone());
        debug!(session = %id, %peer, "session registered");
        (handle, inbox)
    }

    /// Removes a session. Removing an unknown or already removed id is a
    /// no-op that returns `None`.
    pub async fn remove(&self, id: SessionId) -> Option<SessionHandle> {
        let removed = self.sessions.lock().await.remove(&id);
        if removed.is_some() {
            debug!(session = %id, "session deregistered");
        }
        removed
    }

    /// Sends `text` to every registered session except `exclude`.
    ///
    /// Returns how many sessions accepted the line. A session whose queue is
    /// closed or full is skipped without affecting the others.
    pub async fn broadcast(&self, text: &str, exclude: Option<SessionId>) -> usize {
        let text: Arc<str> = Arc::from(text);
        let sessions = self.sessions.lock().await;

        let mut delivered = 0;
        for handle in sessions.values() {
            if Some(handle.id) == exclude {
                continue;
            }
            match handle.send(Arc::clone(&text)) {
                Ok(()) => delivered += 1,
                Err(error) => debug!(%error, peer = %handle.peer, "skipping recipient"),
            }
        }
        delivered
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().await.contains_key(&id)
    }

    pub async fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Drops every outbound queue so each writer task shuts its socket down.
    /// Returns how many sessions were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.lock().await.drain().collect();
        drained.len()
    }
}
