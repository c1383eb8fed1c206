use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::device::ScanOptions;
use crate::models::progress::{ProgressSnapshot, SessionId, SessionStatus};
use crate::models::state::SessionState;

/// Shared record of one session: immutable request data plus the latest
/// published status.
///
/// Only the owning `ScanSession` publishes; any number of pollers read.
pub struct SessionRecord {
    id: SessionId,
    device_id: String,
    options: ScanOptions,
    created_at: DateTime<Utc>,
    status: watch::Sender<SessionStatus>,
    finished_at: Mutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl SessionRecord {
    pub fn new(id: SessionId, device_id: impl Into<String>, options: ScanOptions, cancel: CancellationToken) -> Self {
        let (status, _) = watch::channel(SessionStatus::pending());
        Self {
            id,
            device_id: device_id.into(),
            options,
            created_at: Utc::now(),
            status,
            finished_at: Mutex::new(None),
            cancel,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let status = self.status.borrow();
        ProgressSnapshot {
            session_id: self.id,
            device_id: self.device_id.clone(),
            state: status.state.phase(),
            pages_captured: status.pages_captured,
            error: status.state.error().cloned(),
            created_at: self.created_at,
            updated_at: status.updated_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.borrow().state.is_terminal()
    }

    /// When the session reached its terminal state, if it has.
    pub fn finished_at(&self) -> Option<Instant> {
        *self.finished_at.lock()
    }

    /// Publish a new state. Returns `false` (and publishes nothing) if the
    /// change would move progress backwards or leave a terminal state.
    pub(crate) fn publish(&self, state: SessionState) -> bool {
        let terminal = state.is_terminal();
        let published = self.status.send_if_modified(|current| {
            let next = SessionStatus {
                state,
                pages_captured: current.pages_captured,
                updated_at: Utc::now(),
            };
            if !current.precedes(&next) {
                log::warn!(
                    "session {} ignored {} after {}",
                    self.id,
                    next.state.phase(),
                    current.state.phase()
                );
                return false;
            }
            *current = next;
            true
        });
        if published && terminal {
            *self.finished_at.lock() = Some(Instant::now());
        }
        published
    }

    /// Count one more captured page and return the new total.
    pub(crate) fn record_page(&self) -> usize {
        let mut count = 0;
        self.status.send_modify(|current| {
            current.pages_captured += 1;
            current.updated_at = Utc::now();
            count = current.pages_captured;
        });
        count
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("state", &self.status.borrow().state.phase())
            .finish()
    }
}
