//! Scripted in-process scanners.
//!
//! Each [`FakeDevice`] replays its script of frames on every open and the
//! [`FakeDriver`] counts opens, closes and concurrently open handles per
//! device so tests can check exclusivity and cleanup.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::models::device::{Device, DeviceOption, OptionConstraint, ScanOptions};
use crate::models::error::ScanError;
use crate::models::page::{Page, PixelLayout};
use crate::traits::scan_driver::{DeviceHandle, Frame, ScanDriver};

/// One scripted step of a fake scan.
#[derive(Debug, Clone)]
pub enum FakeFrame {
    /// Deliver this exact page.
    Page(Page),
    /// Deliver a small generated page matching the configured resolution
    /// and mode.
    Synthetic,
    /// Fail the read with `DeviceError`.
    Fault(String),
    /// Wait, then play the inner frame.
    Delayed(Duration, Box<FakeFrame>),
    /// Never complete. Only cancellation or a timeout ends the read.
    Stall,
}

/// Counters kept per device by [`FakeDriver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub opens: usize,
    pub closes: usize,
    pub open_now: usize,
    pub max_concurrent_open: usize,
    pub frames_read: usize,
}

/// A fake scanner: its description plus the script replayed on each open.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    device: Device,
    script: Vec<FakeFrame>,
    open_delay: Duration,
    open_failure: Option<ScanError>,
    configure_failure: Option<String>,
}

impl FakeDevice {
    /// Flatbed with one synthetic page per scan.
    pub fn flatbed(id: impl Into<String>) -> Self {
        Self::new(id, "Fake Flatbed", "flatbed scanner", &["Flatbed"], vec![FakeFrame::Synthetic])
    }

    /// Document feeder with an empty tray. Add pages with
    /// [`with_pages`](Self::with_pages) or [`then_page`](Self::then_page).
    pub fn feeder(id: impl Into<String>) -> Self {
        Self::new(id, "Fake Feeder", "sheetfed scanner", &["ADF", "ADF Duplex"], Vec::new())
    }

    fn new(id: impl Into<String>, label: &str, kind: &str, sources: &[&str], script: Vec<FakeFrame>) -> Self {
        let choices = |values: &[&str]| {
            OptionConstraint::Choices(values.iter().map(|v| v.to_string()).collect())
        };
        let option = |name: &str,
                      title: &str,
                      constraint: OptionConstraint,
                      unit: Option<&str>,
                      default: &str| DeviceOption {
            name: name.into(),
            title: title.into(),
            description: format!("{title} used for the scan."),
            unit: unit.map(String::from),
            constraint,
            default: Some(default.into()),
        };

        Self {
            device: Device {
                id: id.into(),
                label: label.into(),
                kind: kind.into(),
                options: vec![
                    option(
                        ScanOptions::RESOLUTION,
                        "Scan resolution",
                        choices(&["75", "150", "300", "600"]),
                        Some("dpi"),
                        "150",
                    ),
                    option(
                        ScanOptions::MODE,
                        "Scan mode",
                        choices(&["Color", "Gray", "Lineart"]),
                        None,
                        "Color",
                    ),
                    option(ScanOptions::SOURCE, "Scan source", choices(sources), None, sources[0]),
                    option(
                        "brightness",
                        "Brightness",
                        OptionConstraint::Range { min: -100, max: 100, step: 1 },
                        Some("%"),
                        "0",
                    ),
                    option("preview", "Preview", OptionConstraint::Boolean, None, "no"),
                ],
            },
            script,
            open_delay: Duration::ZERO,
            open_failure: None,
            configure_failure: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.device.id
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Replace the script with `count` synthetic pages.
    pub fn with_pages(mut self, count: usize) -> Self {
        self.script = vec![FakeFrame::Synthetic; count];
        self
    }

    pub fn with_script(mut self, script: Vec<FakeFrame>) -> Self {
        self.script = script;
        self
    }

    pub fn then_page(mut self, page: Page) -> Self {
        self.script.push(FakeFrame::Page(page));
        self
    }

    pub fn then_synthetic(mut self) -> Self {
        self.script.push(FakeFrame::Synthetic);
        self
    }

    pub fn then_fault(mut self, message: impl Into<String>) -> Self {
        self.script.push(FakeFrame::Fault(message.into()));
        self
    }

    pub fn then_delayed(mut self, delay: Duration, frame: FakeFrame) -> Self {
        self.script.push(FakeFrame::Delayed(delay, Box::new(frame)));
        self
    }

    pub fn then_stall(mut self) -> Self {
        self.script.push(FakeFrame::Stall);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn failing_open(mut self, error: ScanError) -> Self {
        self.open_failure = Some(error);
        self
    }

    /// Reject every `configure` call, as hardware does for option
    /// combinations it cannot honor.
    pub fn rejecting_configure(mut self, message: impl Into<String>) -> Self {
        self.configure_failure = Some(message.into());
        self
    }
}

/// [`ScanDriver`] over a set of [`FakeDevice`]s.
#[derive(Default)]
pub struct FakeDriver {
    devices: Mutex<BTreeMap<String, FakeDevice>>,
    stats: Arc<Mutex<HashMap<String, DeviceStats>>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device: FakeDevice) -> Self {
        self.add_device(device);
        self
    }

    /// Plug in (or replace) a device. Visible after the next
    /// `refresh_devices`.
    pub fn add_device(&self, device: FakeDevice) {
        self.devices.lock().insert(device.id().to_string(), device);
    }

    pub fn remove_device(&self, device_id: &str) -> bool {
        self.devices.lock().remove(device_id).is_some()
    }

    pub fn stats(&self, device_id: &str) -> DeviceStats {
        self.stats.lock().get(device_id).copied().unwrap_or_default()
    }

    /// Handles opened but not yet closed, across all devices.
    pub fn open_handles(&self) -> usize {
        self.stats.lock().values().map(|stats| stats.open_now).sum()
    }
}

impl std::fmt::Debug for FakeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeDriver")
            .field("devices", &self.devices.lock().keys().collect::<Vec<_>>())
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

#[async_trait]
impl ScanDriver for FakeDriver {
    async fn list_devices(&self) -> Result<Vec<Device>, ScanError> {
        Ok(self
            .devices
            .lock()
            .values()
            .map(|fake| fake.device.clone())
            .collect())
    }

    async fn open(&self, device_id: &str) -> Result<Box<dyn DeviceHandle>, ScanError> {
        let fake = self
            .devices
            .lock()
            .get(device_id)
            .cloned()
            .ok_or_else(|| ScanError::NotFound(device_id.to_string()))?;

        if !fake.open_delay.is_zero() {
            tokio::time::sleep(fake.open_delay).await;
        }
        if let Some(error) = fake.open_failure {
            return Err(error);
        }

        {
            let mut stats = self.stats.lock();
            let entry = stats.entry(device_id.to_string()).or_default();
            entry.opens += 1;
            entry.open_now += 1;
            entry.max_concurrent_open = entry.max_concurrent_open.max(entry.open_now);
        }
        log::debug!("fake device {} opened", device_id);

        Ok(Box::new(FakeHandle {
            device_id: device_id.to_string(),
            script: fake.script.into(),
            configure_failure: fake.configure_failure,
            options: None,
            stats: Arc::clone(&self.stats),
            closed: false,
        }))
    }
}

struct FakeHandle {
    device_id: String,
    script: VecDeque<FakeFrame>,
    configure_failure: Option<String>,
    options: Option<ScanOptions>,
    stats: Arc<Mutex<HashMap<String, DeviceStats>>>,
    closed: bool,
}

impl FakeHandle {
    fn synthetic_page(&self) -> Page {
        let options = self.options.as_ref();
        let dpi = options.and_then(ScanOptions::resolution).unwrap_or(150);
        let layout = match options.and_then(ScanOptions::mode) {
            Some(mode) if mode.eq_ignore_ascii_case("color") => PixelLayout::Rgb8,
            Some(_) => PixelLayout::Gray8,
            None => PixelLayout::Rgb8,
        };
        // Letter-shaped and tiny: 8.5 x 11 units at one pixel per 25 dpi.
        let width = (dpi / 25).max(1) * 17 / 2;
        let height = (dpi / 25).max(1) * 11;
        let len = width as usize * height as usize * layout.channels();
        let data = (0..len).map(|i| (i % 251) as u8).collect();
        Page::new(width, height, layout, dpi, data)
    }

    fn count_frame(&self) {
        if let Some(stats) = self.stats.lock().get_mut(&self.device_id) {
            stats.frames_read += 1;
        }
    }
}

#[async_trait]
impl DeviceHandle for FakeHandle {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn configure(&mut self, options: &ScanOptions) -> Result<(), ScanError> {
        if let Some(message) = &self.configure_failure {
            return Err(ScanError::InvalidOptions(message.clone()));
        }
        self.options = Some(options.clone());
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame, ScanError> {
        let mut next = self.script.pop_front();
        loop {
            match next {
                None => return Ok(Frame::NoMorePages),
                Some(FakeFrame::Page(page)) => {
                    self.count_frame();
                    return Ok(Frame::Page(page));
                }
                Some(FakeFrame::Synthetic) => {
                    self.count_frame();
                    return Ok(Frame::Page(self.synthetic_page()));
                }
                Some(FakeFrame::Fault(message)) => {
                    return Err(ScanError::DeviceError(format!("{}: {}", self.device_id, message)));
                }
                Some(FakeFrame::Delayed(delay, frame)) => {
                    tokio::time::sleep(delay).await;
                    next = Some(*frame);
                }
                Some(FakeFrame::Stall) => return std::future::pending().await,
            }
        }
    }

    async fn close(&mut self) -> Result<(), ScanError> {
        if self.closed {
            return Err(ScanError::DeviceError(format!("{} closed twice", self.device_id)));
        }
        self.closed = true;
        if let Some(stats) = self.stats.lock().get_mut(&self.device_id) {
            stats.closes += 1;
            stats.open_now -= 1;
        }
        log::debug!("fake device {} closed", self.device_id);
        Ok(())
    }
}
