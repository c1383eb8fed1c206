use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ScanError;

/// Allowed values for a device option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionConstraint {
    /// One of a fixed list of values.
    Choices(Vec<String>),
    /// Integer in `min..=max`, reachable from `min` in multiples of `step`.
    Range { min: i64, max: i64, step: i64 },
    Boolean,
}

impl OptionConstraint {
    /// Returns the canonical form of `value` if it satisfies the constraint.
    ///
    /// Choice matching is case-insensitive so `"color"` selects a device's
    /// `"Color"` mode. Booleans accept `yes/no`, `true/false` and `1/0`.
    pub fn canonicalize(&self, value: &str) -> Option<String> {
        match self {
            Self::Choices(choices) => choices
                .iter()
                .find(|choice| choice.eq_ignore_ascii_case(value))
                .cloned(),
            Self::Range { min, max, step } => {
                let parsed: i64 = value.trim().parse().ok()?;
                if parsed < *min || parsed > *max {
                    return None;
                }
                if *step > 1 && (parsed - min) % step != 0 {
                    return None;
                }
                Some(parsed.to_string())
            }
            Self::Boolean => match value.to_ascii_lowercase().as_str() {
                "yes" | "true" | "1" => Some("yes".into()),
                "no" | "false" | "0" => Some("no".into()),
                _ => None,
            },
        }
    }
}

impl fmt::Display for OptionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Choices(choices) => write!(f, "{}", choices.join("|")),
            Self::Range { min, max, step } if *step > 1 => {
                write!(f, "{min}..{max} (in steps of {step})")
            }
            Self::Range { min, max, .. } => write!(f, "{min}..{max}"),
            Self::Boolean => write!(f, "yes|no"),
        }
    }
}

/// A configurable capture option declared by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOption {
    pub name: String,
    pub title: String,
    pub description: String,
    pub unit: Option<String>,
    pub constraint: OptionConstraint,
    pub default: Option<String>,
}

/// A scanner as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub label: String,
    pub kind: String,
    pub options: Vec<DeviceOption>,
}

impl Device {
    pub fn option(&self, name: &str) -> Option<&DeviceOption> {
        self.options.iter().find(|option| option.name == name)
    }

    /// Check every value in `options` against this device's constraints and
    /// return a copy with values in the device's canonical spelling.
    pub fn validate(&self, options: &ScanOptions) -> Result<ScanOptions, ScanError> {
        let mut validated = ScanOptions::new(options.format);
        for (name, value) in &options.values {
            let option = self.option(name).ok_or_else(|| {
                ScanError::InvalidOptions(format!("{} has no option '{}'", self.id, name))
            })?;
            let canonical = option.constraint.canonicalize(value).ok_or_else(|| {
                ScanError::InvalidOptions(format!(
                    "'{}' is not a valid {} for {} (expected {})",
                    value, name, self.id, option.constraint
                ))
            })?;
            validated.values.insert(name.clone(), canonical);
        }
        Ok(validated)
    }
}

/// Encoded output format of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    Pnm,
    Tiff,
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Pnm => "image/x-portable-anymap",
            Self::Tiff => "image/tiff",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Pnm => "pnm",
            Self::Tiff => "tiff",
        }
    }

    /// Whether one file of this format can hold several pages.
    pub fn supports_multipage(&self) -> bool {
        matches!(self, Self::Tiff)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "pnm" => Ok(Self::Pnm),
            "tiff" | "tif" => Ok(Self::Tiff),
            other => Err(ScanError::InvalidOptions(format!(
                "output type must be pnm, tiff, png, or jpeg (got '{other}')"
            ))),
        }
    }
}

/// Option values chosen for one scan, keyed by device option name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanOptions {
    pub values: BTreeMap<String, String>,
    pub format: OutputFormat,
}

impl ScanOptions {
    pub const RESOLUTION: &'static str = "resolution";
    pub const MODE: &'static str = "mode";
    pub const SOURCE: &'static str = "source";

    pub fn new(format: OutputFormat) -> Self {
        Self {
            values: BTreeMap::new(),
            format,
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn with_resolution(self, dpi: u32) -> Self {
        self.with(Self::RESOLUTION, dpi.to_string())
    }

    pub fn with_mode(self, mode: impl Into<String>) -> Self {
        self.with(Self::MODE, mode)
    }

    pub fn with_source(self, source: impl Into<String>) -> Self {
        self.with(Self::SOURCE, source)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn resolution(&self) -> Option<u32> {
        self.get(Self::RESOLUTION)?.parse().ok()
    }

    pub fn mode(&self) -> Option<&str> {
        self.get(Self::MODE)
    }

    pub fn source(&self) -> Option<&str> {
        self.get(Self::SOURCE)
    }

    /// Fill in `defaults` for options the caller left unset.
    pub fn merged_over(mut self, defaults: &BTreeMap<String, String>) -> Self {
        for (name, value) in defaults {
            self.values
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flatbed() -> Device {
        Device {
            id: "flatbed-0".into(),
            label: "Test Flatbed".into(),
            kind: "flatbed scanner".into(),
            options: vec![
                DeviceOption {
                    name: "resolution".into(),
                    title: "Resolution".into(),
                    description: "Sets the resolution of the scanned image.".into(),
                    unit: Some("dpi".into()),
                    constraint: OptionConstraint::Choices(vec![
                        "75".into(),
                        "150".into(),
                        "300".into(),
                    ]),
                    default: Some("75".into()),
                },
                DeviceOption {
                    name: "mode".into(),
                    title: "Mode".into(),
                    description: "Selects the scan mode.".into(),
                    unit: None,
                    constraint: OptionConstraint::Choices(vec!["Color".into(), "Gray".into()]),
                    default: Some("Color".into()),
                },
                DeviceOption {
                    name: "brightness".into(),
                    title: "Brightness".into(),
                    description: String::new(),
                    unit: None,
                    constraint: OptionConstraint::Range {
                        min: -100,
                        max: 100,
                        step: 10,
                    },
                    default: Some("0".into()),
                },
            ],
        }
    }

    #[test]
    fn validate_canonicalizes_choice_case() {
        let options = ScanOptions::default().with_resolution(300).with_mode("color");
        let validated = flatbed().validate(&options).unwrap();
        assert_eq!(validated.mode(), Some("Color"));
        assert_eq!(validated.resolution(), Some(300));
    }

    #[test]
    fn validate_rejects_unsupported_value() {
        let options = ScanOptions::default().with_resolution(1200);
        let err = flatbed().validate(&options).unwrap_err();
        assert!(matches!(err, ScanError::InvalidOptions(_)));
    }

    #[test]
    fn validate_rejects_unknown_option() {
        let options = ScanOptions::default().with("page-size", "A4");
        assert!(matches!(
            flatbed().validate(&options),
            Err(ScanError::InvalidOptions(_))
        ));
    }

    #[test]
    fn range_respects_step() {
        let device = flatbed();
        assert!(device
            .validate(&ScanOptions::default().with("brightness", "30"))
            .is_ok());
        assert!(device
            .validate(&ScanOptions::default().with("brightness", "35"))
            .is_err());
        assert!(device
            .validate(&ScanOptions::default().with("brightness", "110"))
            .is_err());
    }

    #[test]
    fn boolean_constraint_normalizes() {
        let constraint = OptionConstraint::Boolean;
        assert_eq!(constraint.canonicalize("TRUE").as_deref(), Some("yes"));
        assert_eq!(constraint.canonicalize("0").as_deref(), Some("no"));
        assert_eq!(constraint.canonicalize("maybe"), None);
    }

    #[test]
    fn defaults_do_not_override_caller_values() {
        let defaults = BTreeMap::from([
            ("mode".to_string(), "Gray".to_string()),
            ("resolution".to_string(), "75".to_string()),
        ]);
        let merged = ScanOptions::default().with_mode("Color").merged_over(&defaults);
        assert_eq!(merged.mode(), Some("Color"));
        assert_eq!(merged.resolution(), Some(75));
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!("JPG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("tiff".parse::<OutputFormat>().unwrap(), OutputFormat::Tiff);
        assert!("gif".parse::<OutputFormat>().is_err());
        assert!(OutputFormat::Tiff.supports_multipage());
        assert!(!OutputFormat::Png.supports_multipage());
    }
}
