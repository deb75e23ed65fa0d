//! Configuration: TOML file with a default for every field.
//!
//! ```toml
//! [scanner]
//! duplicate_window_ms = 5000
//! permission_poll_ms = 1000
//!
//! [remote]
//! endpoint = "https://example.test/exec"
//! timeout_ms = 10000
//! ```
use crate::platform::{CaptureRegion, DecodeConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    pub remote: RemoteConfig,
}

/// Scan session tuning.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ScannerConfig {
    /// Identical payloads within this window are dropped.
    pub duplicate_window_ms: u64,
    /// Interval between permission re-checks while the scan view is active.
    pub permission_poll_ms: u64,
    /// Target recogniser frame rate.
    pub fps: u32,
    pub region_width: u32,
    pub region_height: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            duplicate_window_ms: 5_000,
            permission_poll_ms: 1_000,
            fps: 60,
            region_width: 300,
            region_height: 500,
        }
    }
}

impl ScannerConfig {
    pub fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.duplicate_window_ms)
    }

    pub fn permission_poll_interval(&self) -> Duration {
        Duration::from_millis(self.permission_poll_ms)
    }

    /// Engine settings derived from this config.
    pub fn decode_config(&self) -> DecodeConfig {
        DecodeConfig {
            fps: self.fps,
            region: CaptureRegion {
                width: self.region_width,
                height: self.region_height,
            },
        }
    }
}

/// Backend connection settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Backend URL every JSON request is POSTed to.
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
    /// Longest HTTP error body (in characters) echoed into error messages.
    pub diagnostic_limit: usize,
    pub ping_interval_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 10_000,
            diagnostic_limit: 1_000,
            ping_interval_ms: 1_000,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// The configured endpoint, or an error naming the missing key.
    pub fn require_endpoint(&self) -> Result<&str, ConfigError> {
        self.endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid("remote.endpoint is not set".into()))
    }
}

impl AppConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Reject values that would stall the session or the request layer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scanner.permission_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "scanner.permission_poll_ms must be > 0".into(),
            ));
        }
        if self.remote.timeout_ms == 0 {
            return Err(ConfigError::Invalid("remote.timeout_ms must be > 0".into()));
        }
        if self.remote.ping_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "remote.ping_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}
