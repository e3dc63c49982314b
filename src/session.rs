//! Transfer session records and the shared store observed by the UI.
//!
//! A session is created the moment one concrete item (file, folder
//! member, or text payload) starts moving, mutated by the streaming
//! loop, and kept after it finishes until the user clears it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::throughput::ProgressSample;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    InProgress,
    Complete,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Complete | SessionStatus::Cancelled | SessionStatus::Failed
        )
    }
}

struct Session {
    name: String,
    direction: Direction,
    total_bytes: u64,
    bytes_moved: u64,
    percentage: f64,
    mb_per_sec: f64,
    status: SessionStatus,
    error: Option<String>,
    cancel: Arc<AtomicBool>,
}

/// Immutable snapshot of one session, cheap to hand to a display layer.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub id: SessionId,
    pub name: String,
    pub direction: Direction,
    pub total_bytes: u64,
    pub bytes_moved: u64,
    pub percentage: f64,
    pub mb_per_sec: f64,
    pub status: SessionStatus,
    pub error: Option<String>,
}

/// Thread-safe collection of sessions. Background transfer tasks write
/// through it; the presentation layer reads snapshots.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<SessionId, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a Pending session and return its id plus the cancel flag
    /// the streaming loop must poll.
    pub fn create(
        &self,
        name: &str,
        direction: Direction,
        total_bytes: u64,
    ) -> (SessionId, Arc<AtomicBool>) {
        let id = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        self.inner.lock().insert(
            id,
            Session {
                name: name.to_string(),
                direction,
                total_bytes,
                bytes_moved: 0,
                percentage: 0.0,
                mb_per_sec: 0.0,
                status: SessionStatus::Pending,
                error: None,
                cancel: cancel.clone(),
            },
        );
        (id, cancel)
    }

    pub fn start(&self, id: SessionId) {
        let mut inner = self.inner.lock();
        if let Some(s) = inner.get_mut(&id) {
            if s.status == SessionStatus::Pending {
                s.status = SessionStatus::InProgress;
            }
        }
    }

    /// Record chunk progress. Ignored once the session is terminal, and
    /// byte progress never goes backwards.
    pub fn progress(&self, id: SessionId, bytes_moved: u64, sample: ProgressSample) {
        let mut inner = self.inner.lock();
        if let Some(s) = inner.get_mut(&id) {
            if s.status.is_terminal() || bytes_moved < s.bytes_moved {
                return;
            }
            s.bytes_moved = bytes_moved;
            s.percentage = sample.percentage;
            s.mb_per_sec = sample.mb_per_sec;
        }
    }

    /// Mark Complete. Only honored when every declared byte has moved.
    pub fn complete(&self, id: SessionId) {
        let mut inner = self.inner.lock();
        if let Some(s) = inner.get_mut(&id) {
            if !s.status.is_terminal() && s.bytes_moved == s.total_bytes {
                s.status = SessionStatus::Complete;
                s.percentage = 100.0;
                s.mb_per_sec = 0.0;
            }
        }
    }

    pub fn fail(&self, id: SessionId, error: &str) {
        let mut inner = self.inner.lock();
        if let Some(s) = inner.get_mut(&id) {
            if !s.status.is_terminal() {
                s.status = SessionStatus::Failed;
                s.error = Some(error.to_string());
            }
        }
    }

    /// Mark Cancelled after the streaming loop has observed the flag.
    pub fn mark_cancelled(&self, id: SessionId) {
        let mut inner = self.inner.lock();
        if let Some(s) = inner.get_mut(&id) {
            if !s.status.is_terminal() {
                s.status = SessionStatus::Cancelled;
            }
        }
    }

    /// External cancellation request (UI button, API call). Sets the
    /// flag; the owning loop marks the status when it stops.
    pub fn request_cancel(&self, id: SessionId) -> bool {
        let inner = self.inner.lock();
        match inner.get(&id) {
            Some(s) if !s.status.is_terminal() => {
                s.cancel.store(true, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    pub fn view(&self, id: SessionId) -> Option<SessionView> {
        let inner = self.inner.lock();
        inner.get(&id).map(|s| to_view(id, s))
    }

    /// Snapshot of all sessions, unordered.
    pub fn snapshot(&self) -> Vec<SessionView> {
        let inner = self.inner.lock();
        inner.iter().map(|(id, s)| to_view(*id, s)).collect()
    }

    /// Drop sessions that reached a terminal state. In-flight ones stay.
    pub fn clear_finished(&self) {
        self.inner.lock().retain(|_, s| !s.status.is_terminal());
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

fn to_view(id: SessionId, s: &Session) -> SessionView {
    SessionView {
        id,
        name: s.name.clone(),
        direction: s.direction,
        total_bytes: s.total_bytes,
        bytes_moved: s.bytes_moved,
        percentage: s.percentage,
        mb_per_sec: s.mb_per_sec,
        status: s.status,
        error: s.error.clone(),
    }
}
