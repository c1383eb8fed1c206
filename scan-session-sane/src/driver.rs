use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use scan_session_core::models::device::{Device, DeviceOption, ScanOptions};
use scan_session_core::models::error::ScanError;
use scan_session_core::processing::codec::ImageCodec;
use scan_session_core::traits::scan_driver::{DeviceHandle, Frame, ScanDriver};

use crate::command::{run_scanimage, Failure};
use crate::device_enumerator::{enumerate, query_options};
use crate::options::parse_all_options;

/// Default upper bound for a single `scanimage` run. Sessions apply their
/// own, usually tighter, open and frame timeouts on top.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// [`ScanDriver`] backed by the SANE `scanimage` command line frontend.
#[derive(Debug, Clone)]
pub struct ScanimageDriver {
    program: PathBuf,
    command_timeout: Duration,
}

impl ScanimageDriver {
    /// Use `scanimage` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("scanimage")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, limit: Duration) -> Self {
        self.command_timeout = limit;
        self
    }
}

impl Default for ScanimageDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScanDriver for ScanimageDriver {
    async fn list_devices(&self) -> Result<Vec<Device>, ScanError> {
        enumerate(&self.program, self.command_timeout).await
    }

    async fn open(&self, device_id: &str) -> Result<Box<dyn DeviceHandle>, ScanError> {
        // Listing the options doubles as the "does the device answer" check.
        let listing = query_options(&self.program, device_id, self.command_timeout).await?;
        let options = parse_all_options(&listing);
        log::debug!("opened {} ({} options)", device_id, options.len());

        Ok(Box::new(ScanimageHandle {
            device_id: device_id.to_string(),
            program: self.program.clone(),
            command_timeout: self.command_timeout,
            options,
            args: Vec::new(),
            resolution_dpi: 0,
            feeder: false,
            exhausted: false,
        }))
    }
}

/// One scan on one device. Every frame is a separate `scanimage` run.
struct ScanimageHandle {
    device_id: String,
    program: PathBuf,
    command_timeout: Duration,
    options: Vec<DeviceOption>,
    args: Vec<String>,
    resolution_dpi: u32,
    feeder: bool,
    exhausted: bool,
}

impl ScanimageHandle {
    fn scan_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--device-name={}", self.device_id),
            "--format=pnm".to_string(),
        ];
        args.extend(self.args.iter().cloned());
        args
    }
}

#[async_trait]
impl DeviceHandle for ScanimageHandle {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn configure(&mut self, options: &ScanOptions) -> Result<(), ScanError> {
        let device = Device {
            id: self.device_id.clone(),
            label: self.device_id.clone(),
            kind: String::new(),
            options: self.options.clone(),
        };
        let validated = device.validate(options)?;

        self.args = option_args(&self.options, &validated);
        self.resolution_dpi = validated
            .resolution()
            .or_else(|| {
                device
                    .option(ScanOptions::RESOLUTION)
                    .and_then(|option| option.default.as_deref()?.parse().ok())
            })
            .unwrap_or(0);
        self.feeder = validated
            .source()
            .or_else(|| {
                device
                    .option(ScanOptions::SOURCE)
                    .and_then(|option| option.default.as_deref())
            })
            .is_some_and(is_feeder_source);

        log::debug!(
            "{} configured: {} ({})",
            self.device_id,
            if self.args.is_empty() { "defaults".to_string() } else { self.args.join(" ") },
            if self.feeder { "feeder" } else { "flatbed" }
        );
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame, ScanError> {
        if self.exhausted {
            return Ok(Frame::NoMorePages);
        }

        let output = match run_scanimage(&self.program, &self.scan_args(), self.command_timeout).await {
            Ok(output) => output,
            Err(Failure::OutOfDocuments) if self.feeder => {
                self.exhausted = true;
                return Ok(Frame::NoMorePages);
            }
            Err(failure) => return Err(failure.into_error(&self.device_id)),
        };

        let mut pages = ImageCodec::decode_pages(&output).map_err(|e| {
            ScanError::DeviceError(format!("{} sent an unreadable frame: {}", self.device_id, e))
        })?;
        let Some(mut page) = pages.pop() else {
            return Err(ScanError::DeviceError(format!("{} sent an empty frame", self.device_id)));
        };
        page.resolution_dpi = self.resolution_dpi;

        if !self.feeder {
            self.exhausted = true;
        }
        Ok(Frame::Page(page))
    }

    async fn close(&mut self) -> Result<(), ScanError> {
        // Nothing stays open between scanimage runs.
        self.exhausted = true;
        log::debug!("closed {}", self.device_id);
        Ok(())
    }
}

/// Command line arguments for every validated value that differs from the
/// device default.
fn option_args(declared: &[DeviceOption], options: &ScanOptions) -> Vec<String> {
    options
        .values
        .iter()
        .filter(|(name, value)| {
            declared
                .iter()
                .find(|option| &option.name == *name)
                .and_then(|option| option.default.as_ref())
                != Some(*value)
        })
        .flat_map(|(name, value)| {
            if name.len() == 1 {
                vec![format!("-{name}"), value.clone()]
            } else {
                vec![format!("--{name}={value}")]
            }
        })
        .collect()
}

fn is_feeder_source(source: &str) -> bool {
    let source = source.to_ascii_lowercase();
    source.contains("adf") || source.contains("feeder")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_session_core::models::device::OptionConstraint;

    fn declared() -> Vec<DeviceOption> {
        parse_all_options(
            "  Scan mode:\n    --resolution 75|150|300dpi [75]\n    --mode Color|Gray [Color]\n  Geometry:\n    -x 0..216.069mm [216.069]\n",
        )
    }

    #[test]
    fn defaults_are_not_passed() {
        let options = ScanOptions::default()
            .with_resolution(300)
            .with_mode("Color")
            .with("x", "100");
        let args = option_args(&declared(), &options);
        assert_eq!(args, vec!["--resolution=300", "-x", "100"]);
    }

    #[test]
    fn feeder_sources_are_detected() {
        assert!(is_feeder_source("Automatic Document Feeder"));
        assert!(is_feeder_source("ADF Duplex"));
        assert!(!is_feeder_source("Flatbed"));
    }

    #[test]
    fn declared_listing_feeds_validation() {
        let resolution = declared()
            .into_iter()
            .find(|option| option.name == "resolution")
            .unwrap();
        assert_eq!(
            resolution.constraint,
            OptionConstraint::Choices(vec!["75".into(), "150".into(), "300".into()])
        );
    }
}
