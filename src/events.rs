//! Discrete notifications pushed from the engine to the presentation
//! layer. Live progress is not an event; the display layer reads it
//! from the session store snapshots.

use tokio::sync::mpsc;

use crate::session::{SessionId, SessionStatus};

/// How a received text payload should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    /// An absolute http/https URL; offer to open it in a browser.
    Link,
    /// Anything else; show or save it as plain text.
    PlainText,
}

#[derive(Debug, Clone)]
pub enum Event {
    /// One session reached a terminal state.
    SessionFinished {
        id: SessionId,
        name: String,
        status: SessionStatus,
    },
    /// All entries of a Files envelope were processed.
    FilesReceived { count: usize },
    /// All entries of a Folder envelope were processed.
    FolderReceived { root: String },
    /// A text payload arrived and was classified.
    TextReceived { payload: String, kind: TextKind },
}

pub type EventTx = mpsc::UnboundedSender<Event>;
pub type EventRx = mpsc::UnboundedReceiver<Event>;

pub fn channel() -> (EventTx, EventRx) {
    mpsc::unbounded_channel()
}
