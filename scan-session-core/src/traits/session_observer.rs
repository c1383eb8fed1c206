use crate::models::progress::SessionId;
use crate::models::state::SessionState;

/// Event sink for scan session notifications.
///
/// Unlike progress polling, which may skip intermediate snapshots, every
/// transition is delivered here in order. Methods run on the session task;
/// keep them short and non-blocking.
pub trait SessionObserver: Send + Sync {
    /// Called after every published state change.
    fn on_state_changed(&self, session_id: SessionId, device_id: &str, state: &SessionState);

    /// Called after each captured page with the new page count.
    fn on_page_captured(&self, session_id: SessionId, device_id: &str, pages_captured: usize) {
        let _ = (session_id, device_id, pages_captured);
    }
}
