//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `blelink.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::time::Duration;

use blelink_adapter_btleplug::BtleplugConfig;
use blelink_adapter_simulated::SimulatedConfig;
use blelink_app::config::{CentralConfig, ScanConfig, ScanMode};
use blelink_domain::address::DeviceAddress;
use serde::Deserialize;
use uuid::Uuid;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub radio: RadioConfig,
    pub central: CentralConfig,
    pub scan: ScanSettings,
    pub session: SessionConfig,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
    /// Capacity of the event bus the logger subscribes to.
    pub event_capacity: usize,
}

/// Which radio backs the central.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioKind {
    #[default]
    Simulated,
    Btleplug,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub kind: RadioKind,
    pub btleplug: BtleplugConfig,
    pub simulated: SimulatedConfig,
}

/// Scan session run at startup.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// How long to scan before listing devices, in seconds.
    pub duration_secs: u64,
    pub mode: ScanMode,
    pub service_uuids: Vec<Uuid>,
}

/// What to do once the scan is over.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Address to connect to, e.g. `C0:FF:EE:00:00:01`.
    pub connect: Option<String>,
    /// Characteristics read once the link is ready.
    pub read: Vec<Uuid>,
    /// Characteristics whose value pushes are logged until shutdown.
    pub subscribe: Vec<Uuid>,
}

impl Config {
    /// Load configuration from `blelink.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if
    /// the resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("blelink.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BLELINK_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("BLELINK_CONNECT") {
            self.session.connect = Some(val);
        }
        if let Ok(val) = std::env::var("BLELINK_RADIO") {
            match val.as_str() {
                "simulated" => self.radio.kind = RadioKind::Simulated,
                "btleplug" => self.radio.kind = RadioKind::Btleplug,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.central.has_valid_mtu() {
            return Err(ConfigError::Validation(format!(
                "target_mtu must be within 23..=517, got {}",
                self.central.target_mtu
            )));
        }
        if self.scan.duration_secs == 0 {
            return Err(ConfigError::Validation(
                "scan duration must be non-zero".to_string(),
            ));
        }
        self.connect_address()?;
        Ok(())
    }

    /// Parsed address of the device to connect to, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the address is malformed.
    pub fn connect_address(&self) -> Result<Option<DeviceAddress>, ConfigError> {
        self.session
            .connect
            .as_deref()
            .map(str::parse::<DeviceAddress>)
            .transpose()
            .map_err(|err| ConfigError::Validation(format!("invalid connect address: {err}")))
    }
}

impl ScanSettings {
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    #[must_use]
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            mode: self.mode,
            service_uuids: self.service_uuids.clone(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "blelinkd=info,blelink_app=info".to_string(),
            event_capacity: 256,
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            duration_secs: 5,
            mode: ScanMode::default(),
            service_uuids: Vec::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
