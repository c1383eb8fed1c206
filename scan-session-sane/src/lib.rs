//! # scan-session-sane
//!
//! SANE backend for scan-session-core, driving the `scanimage` command
//! line frontend.
//!
//! Provides:
//! - `ScanimageDriver`: `ScanDriver` implementation, one `scanimage` run per frame
//! - `device_enumerator`: device listing via `scanimage -f`
//! - `options`: parser for `scanimage --all-options` listings
//!
//! ## Requirements
//! - `scanimage` from sane-utils on `PATH` (or passed to `with_program`)
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use scan_session_core::{CoordinatorConfig, ScanOptions, SessionRegistry};
//! use scan_session_sane::ScanimageDriver;
//!
//! let registry = SessionRegistry::new(Arc::new(ScanimageDriver::new()), CoordinatorConfig::default());
//! registry.refresh_devices().await?;
//! let id = registry.create(Some("pixma:04A91749_10C2B2"), ScanOptions::default().with_resolution(300))?;
//! ```

mod command;
pub mod device_enumerator;
pub mod driver;
pub mod options;

pub use device_enumerator::{enumerate, parse_device_list};
pub use driver::ScanimageDriver;
pub use options::parse_all_options;
