use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::device::OutputFormat;

/// Errors raised while loading coordinator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Bounded waits applied by a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub lock: Duration,
    pub open: Duration,
    pub frame: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        CoordinatorConfig::default().timeouts()
    }
}

/// Configuration injected into the session registry.
///
/// Every field has a default so a partial TOML document is enough:
///
/// ```toml
/// default_device = "pixma:04A91749_10C2B2"
/// retention_secs = 300
///
/// [default_options]
/// resolution = "300"
/// mode = "Color"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Device preselected for clients that do not name one.
    pub default_device: Option<String>,

    /// Option values applied when the client leaves them unset and the
    /// device supports them.
    pub default_options: BTreeMap<String, String>,

    /// Output format used when the client does not ask for one.
    pub default_format: OutputFormat,

    /// How long finished sessions stay retrievable (default: 600).
    pub retention_secs: u64,

    /// Maximum wait for a busy device (default: 5000).
    pub lock_timeout_ms: u64,

    /// Maximum wait for the driver to open a device (default: 10000).
    pub open_timeout_ms: u64,

    /// Maximum wait for a single frame (default: 120000).
    pub frame_timeout_ms: u64,

    /// Interval of the background eviction sweep (default: 30).
    pub sweep_interval_secs: u64,

    /// Directory where finished artifacts are written, if any.
    pub artifact_dir: Option<PathBuf>,
}

impl CoordinatorConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid("lock_timeout_ms must be positive".into()));
        }
        if self.open_timeout_ms == 0 {
            return Err(ConfigError::Invalid("open_timeout_ms must be positive".into()));
        }
        if self.frame_timeout_ms == 0 {
            return Err(ConfigError::Invalid("frame_timeout_ms must be positive".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be positive".into(),
            ));
        }
        if let Some(device) = &self.default_device {
            if device.trim().is_empty() {
                return Err(ConfigError::Invalid("default_device must not be blank".into()));
            }
        }
        Ok(())
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            lock: Duration::from_millis(self.lock_timeout_ms),
            open: Duration::from_millis(self.open_timeout_ms),
            frame: Duration::from_millis(self.frame_timeout_ms),
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_device: None,
            default_options: BTreeMap::new(),
            default_format: OutputFormat::Png,
            retention_secs: 600,
            lock_timeout_ms: 5_000,
            open_timeout_ms: 10_000,
            frame_timeout_ms: 120_000,
            sweep_interval_secs: 30,
            artifact_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = CoordinatorConfig::from_toml_str(
            r#"
            default_device = "flatbed-0"
            retention_secs = 60
            default_format = "tiff"

            [default_options]
            resolution = "300"
            "#,
        )
        .unwrap();

        assert_eq!(config.default_device.as_deref(), Some("flatbed-0"));
        assert_eq!(config.retention(), Duration::from_secs(60));
        assert_eq!(config.default_format, OutputFormat::Tiff);
        assert_eq!(config.default_options["resolution"], "300");
        assert_eq!(config.timeouts().lock, Duration::from_millis(5_000));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = CoordinatorConfig::from_toml_str("frame_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = CoordinatorConfig::from_toml_str("retention_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn blank_default_device_is_rejected() {
        let config = CoordinatorConfig {
            default_device: Some("  ".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
