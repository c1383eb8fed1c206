//! SANE device enumeration via `scanimage -f`.
//!
//! Each device is printed on its own line as
//! `<name>\t<vendor>\t<model>\t<type>`, then queried with `--all-options`
//! for the options it supports.

use std::path::Path;
use std::time::Duration;

use scan_session_core::models::device::Device;
use scan_session_core::models::error::ScanError;

use crate::command::{run_scanimage, Failure};
use crate::options::{listed_device, parse_all_options};

/// Format string handed to `scanimage -f`. `%n` is a newline.
pub const LIST_FORMAT: &str = "%d\t%v\t%m\t%t%n";

/// List every device `scanimage` can see, with its options.
///
/// A device whose option listing cannot be read is still returned, with no
/// options, so it shows up in the catalog.
pub async fn enumerate(program: &Path, limit: Duration) -> Result<Vec<Device>, ScanError> {
    let output = run_scanimage(program, &["-f".to_string(), LIST_FORMAT.to_string()], limit)
        .await
        .map_err(|failure| failure.into_error("scanner list"))?;
    let mut devices = parse_device_list(&String::from_utf8_lossy(&output));

    for device in &mut devices {
        match query_options(program, &device.id, limit).await {
            Ok(listing) => {
                if let Some(listed) = listed_device(&listing) {
                    if listed != device.id {
                        log::warn!("options listing for {} names {}", device.id, listed);
                    }
                }
                device.options = parse_all_options(&listing);
            }
            Err(e) => log::warn!("could not read options of {}: {}", device.id, e),
        }
    }
    Ok(devices)
}

/// Raw `--all-options` listing for one device.
pub async fn query_options(program: &Path, device_id: &str, limit: Duration) -> Result<String, ScanError> {
    let args = [
        format!("--device-name={device_id}"),
        "--format=pnm".to_string(),
        "--dont-scan".to_string(),
        "--all-options".to_string(),
    ];
    match run_scanimage(program, &args, limit).await {
        Ok(output) => Ok(String::from_utf8_lossy(&output).into_owned()),
        Err(Failure::NotFound(_)) => Err(ScanError::NotFound(device_id.to_string())),
        Err(failure) => Err(failure.into_error(device_id)),
    }
}

/// Parse `scanimage -f` output produced with [`LIST_FORMAT`].
pub fn parse_device_list(output: &str) -> Vec<Device> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t').map(str::trim);
            let id = fields.next().filter(|id| !id.is_empty())?;
            let vendor = fields.next().unwrap_or_default();
            let model = fields.next().unwrap_or_default();
            let kind = fields.next().unwrap_or_default();

            let label = match (vendor.is_empty(), model.is_empty()) {
                (false, false) => format!("{vendor} {model}"),
                (true, false) => model.to_string(),
                (false, true) => vendor.to_string(),
                (true, true) => id.to_string(),
            };

            Some(Device {
                id: id.to_string(),
                label,
                kind: kind.to_string(),
                options: Vec::new(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tab_separated_listing() {
        let output = "pixma:04A91749_10C2B2\tCANON\tCanoScan LiDE 220\tflatbed scanner\n\
                      airscan:e0:HP OfficeJet\tHP\tOfficeJet 8010\teSCL network scanner\n";
        let devices = parse_device_list(output);

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "pixma:04A91749_10C2B2");
        assert_eq!(devices[0].label, "CANON CanoScan LiDE 220");
        assert_eq!(devices[0].kind, "flatbed scanner");
        assert_eq!(devices[1].id, "airscan:e0:HP OfficeJet");
    }

    #[test]
    fn missing_fields_fall_back_to_id() {
        let devices = parse_device_list("test:0\t\t\t\n\n");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].label, "test:0");
        assert!(devices[0].kind.is_empty());
    }

    #[test]
    fn empty_output_means_no_devices() {
        assert!(parse_device_list("").is_empty());
    }
}
