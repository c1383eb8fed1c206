use async_trait::async_trait;

use crate::models::device::{Device, ScanOptions};
use crate::models::error::ScanError;
use crate::models::page::Page;

/// Result of asking a device for its next frame.
#[derive(Debug)]
pub enum Frame {
    Page(Page),
    /// The device has nothing more to deliver for this scan.
    NoMorePages,
}

/// Interface for scanner backends.
///
/// Implemented by:
/// - `ScanimageDriver` (SANE command line frontend, `scan-session-sane`)
/// - `FakeDriver` (scripted in-process devices for tests)
#[async_trait]
pub trait ScanDriver: Send + Sync {
    /// Enumerate devices currently reachable through this backend.
    async fn list_devices(&self) -> Result<Vec<Device>, ScanError>;

    /// Open a device for exclusive use by one session.
    ///
    /// Fails with `NotFound` for unknown ids and `Busy` when the device is
    /// held outside this process.
    async fn open(&self, device_id: &str) -> Result<Box<dyn DeviceHandle>, ScanError>;
}

/// An open scanner. Owned by exactly one session at a time.
#[async_trait]
pub trait DeviceHandle: Send {
    fn device_id(&self) -> &str;

    /// Apply validated options. The device may still reject a combination
    /// with `InvalidOptions`.
    async fn configure(&mut self, options: &ScanOptions) -> Result<(), ScanError>;

    /// Acquire one frame, or report that the scan has no further pages.
    async fn read_frame(&mut self) -> Result<Frame, ScanError>;

    /// Release the device. Called exactly once per successful `open`.
    async fn close(&mut self) -> Result<(), ScanError>;
}
