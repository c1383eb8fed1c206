//! # scan-session-core
//!
//! Driver-agnostic scan session coordinator.
//!
//! Serializes access to scanner devices, drives each scan request through
//! its lifecycle, assembles captured pages into a single artifact and keeps
//! finished sessions around for clients to poll and collect. Backends (the
//! SANE `scanimage` frontend, scripted fakes) implement the `ScanDriver`
//! trait and plug into the generic `SessionRegistry`.
//!
//! ## Architecture
//!
//! ```text
//! scan-session-core (this crate)
//! ├── traits/       ← ScanDriver, DeviceHandle, ImageProcessor, SessionObserver
//! ├── models/       ← ScanError, SessionState, Device, ScanOptions, Page, Artifact, config
//! ├── processing/   ← ArtifactAssembler, ImageCodec (png/jpeg/pnm, multi-page tiff)
//! ├── session/      ← ScanLock, ScanSession (state machine), SessionRegistry
//! ├── storage/      ← artifact files and metadata sidecars
//! └── fake          ← FakeDriver (scripted devices for tests and demos)
//! ```

pub mod fake;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::artifact::{Artifact, ArtifactMetadata};
pub use models::config::{ConfigError, CoordinatorConfig, SessionTimeouts};
pub use models::device::{Device, DeviceOption, OptionConstraint, OutputFormat, ScanOptions};
pub use models::error::{ArtifactError, ScanError};
pub use models::page::{Page, PageInfo, PixelLayout};
pub use models::progress::{ProgressSnapshot, SessionId, SessionStatus};
pub use models::state::{ScanPhase, SessionState};
pub use processing::assembler::ArtifactAssembler;
pub use processing::codec::ImageCodec;
pub use session::lock::{LockToken, ScanLock};
pub use session::registry::SessionRegistry;
pub use session::scan::ScanSession;
pub use traits::image_processor::ImageProcessor;
pub use traits::scan_driver::{DeviceHandle, Frame, ScanDriver};
pub use traits::session_observer::SessionObserver;
