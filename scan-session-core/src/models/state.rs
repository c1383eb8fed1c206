use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::artifact::Artifact;
use super::error::ScanError;

/// Scan session state machine.
///
/// State transitions:
/// ```text
/// pending → opening → capturing ⟲ → assembling → done
///    ↓         ↓          ↓              ↓
///    └─────────┴──────────┴──────────────┴──→ failed / cancelled
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Pending,
    Opening,
    Capturing,
    Assembling,
    Done(Arc<Artifact>),
    Failed(ScanError),
    Cancelled,
}

impl SessionState {
    pub fn phase(&self) -> ScanPhase {
        match self {
            Self::Pending => ScanPhase::Pending,
            Self::Opening => ScanPhase::Opening,
            Self::Capturing => ScanPhase::Capturing,
            Self::Assembling => ScanPhase::Assembling,
            Self::Done(_) => ScanPhase::Done,
            Self::Failed(_) => ScanPhase::Failed,
            Self::Cancelled => ScanPhase::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn error(&self) -> Option<&ScanError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn artifact(&self) -> Option<&Arc<Artifact>> {
        match self {
            Self::Done(artifact) => Some(artifact),
            _ => None,
        }
    }
}

/// Data-free tag of a [`SessionState`], suitable for polling responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    Pending,
    Opening,
    Capturing,
    Assembling,
    Done,
    Failed,
    Cancelled,
}

impl ScanPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Position along the session lifecycle. Terminal phases share the
    /// highest rank; a published phase never moves to a lower rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Opening => 1,
            Self::Capturing => 2,
            Self::Assembling => 3,
            Self::Done | Self::Failed | Self::Cancelled => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Opening => "opening",
            Self::Capturing => "capturing",
            Self::Assembling => "assembling",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases_share_top_rank() {
        let terminal = [ScanPhase::Done, ScanPhase::Failed, ScanPhase::Cancelled];
        for phase in terminal {
            assert!(phase.is_terminal());
            assert_eq!(phase.rank(), ScanPhase::Done.rank());
        }
        assert!(ScanPhase::Assembling.rank() < ScanPhase::Done.rank());
        assert!(!ScanPhase::Capturing.is_terminal());
    }

    #[test]
    fn lifecycle_ranks_increase() {
        let order = [
            ScanPhase::Pending,
            ScanPhase::Opening,
            ScanPhase::Capturing,
            ScanPhase::Assembling,
            ScanPhase::Done,
        ];
        assert!(order.windows(2).all(|pair| pair[0].rank() < pair[1].rank()));
    }

    #[test]
    fn failed_state_exposes_error_only() {
        let state = SessionState::Failed(ScanError::Busy("flatbed-0".into()));
        assert_eq!(state.phase(), ScanPhase::Failed);
        assert!(state.error().is_some());
        assert!(state.artifact().is_none());
    }
}
