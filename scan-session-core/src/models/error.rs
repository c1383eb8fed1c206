use serde::Serialize;
use thiserror::Error;

use super::state::ScanPhase;

/// Errors produced while driving a scan.
///
/// Session failures are captured into the session's terminal state; the web
/// layer reads them back from the registry and decides how to present them.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ScanError {
    /// Lock or device unavailable. The caller may retry later.
    #[error("device busy: {0}")]
    Busy(String),

    /// Options rejected by validation or by the device.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Hardware or driver fault. Device state afterwards is unknown.
    #[error("device error: {0}")]
    DeviceError(String),

    /// Encoding or merging the captured pages failed.
    #[error("assembly error: {0}")]
    AssemblyError(String),

    /// No device with this id is known.
    #[error("device not found: {0}")]
    NotFound(String),
}

impl ScanError {
    /// Whether the same request may succeed if repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

/// Reasons an artifact cannot be handed out by the registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("session not found")]
    NotFound,

    #[error("session not ready (currently {phase})")]
    NotReady { phase: ScanPhase },

    #[error("session failed: {0}")]
    Failed(ScanError),

    #[error("session cancelled")]
    Cancelled,
}
