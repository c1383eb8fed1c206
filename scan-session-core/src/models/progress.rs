use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use super::error::ScanError;
use super::state::{ScanPhase, SessionState};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque session identifier. Ids are drawn from one process-wide counter,
/// so no two registries ever hand out the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan-{:06}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("scan-").unwrap_or(s).parse().map(Self)
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Latest published status of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub pages_captured: usize,
    pub updated_at: DateTime<Utc>,
}

impl SessionStatus {
    pub fn pending() -> Self {
        Self {
            state: SessionState::Pending,
            pages_captured: 0,
            updated_at: Utc::now(),
        }
    }

    /// Whether `next` may replace `self` without moving progress backwards.
    pub fn precedes(&self, next: &SessionStatus) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        next.state.phase().rank() >= self.state.phase().rank()
            && next.pages_captured >= self.pages_captured
    }
}

/// Polling view of a session handed to the web layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub session_id: SessionId,
    pub device_id: String,
    pub state: ScanPhase,
    pub pages_captured: usize,
    pub error: Option<ScanError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_round_trips_through_display() {
        let id = SessionId::from_raw(42);
        assert_eq!(id.to_string(), "scan-000042");
        assert_eq!("scan-000042".parse::<SessionId>().unwrap(), id);
        assert_eq!("42".parse::<SessionId>().unwrap(), id);
        assert!("scan-abc".parse::<SessionId>().is_err());
    }

    #[test]
    fn fresh_ids_increase() {
        let first = SessionId::next();
        let second = SessionId::next();
        assert!(second > first);
    }

    #[test]
    fn progress_never_moves_backwards() {
        let capturing = SessionStatus {
            state: SessionState::Capturing,
            pages_captured: 2,
            updated_at: Utc::now(),
        };
        let fewer_pages = SessionStatus {
            pages_captured: 1,
            ..capturing.clone()
        };
        let opening = SessionStatus {
            state: SessionState::Opening,
            ..capturing.clone()
        };
        let cancelled = SessionStatus {
            state: SessionState::Cancelled,
            ..capturing.clone()
        };

        assert!(!capturing.precedes(&fewer_pages));
        assert!(!capturing.precedes(&opening));
        assert!(capturing.precedes(&cancelled));
        assert!(!cancelled.precedes(&capturing));
    }

    #[test]
    fn snapshot_serializes_id_as_string() {
        let snapshot = ProgressSnapshot {
            session_id: SessionId::from_raw(7),
            device_id: "flatbed-0".into(),
            state: ScanPhase::Failed,
            pages_captured: 1,
            error: Some(ScanError::DeviceError("paper jam".into())),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["session_id"], "scan-000007");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["error"]["kind"], "device_error");
        assert_eq!(json["error"]["message"], "paper jam");
    }
}
