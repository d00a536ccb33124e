/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! TOML configuration for the position sources

use crate::device::LinkTiming;
use crate::SetupError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which position source to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Uart,
    Gpsd,
}

impl Default for SourceKind {
    fn default() -> Self {
        SourceKind::Uart
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceKind,
    pub uart: UartConfig,
    pub gpsd: GpsdConfig,
    pub logging: LoggingConfig,
}

/// Receiver attached to a serial device node
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UartConfig {
    pub device: PathBuf,
    /// Wait for a poll response at each baud rate
    pub detection_timeout_ms: u64,
    /// Restart bring-up if the link is not ready by then
    pub init_timeout_ms: u64,
    /// Quiet time after changing line speed
    pub settle_ms: u64,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/ttyACM0"),
            detection_timeout_ms: 500,
            init_timeout_ms: 3000,
            settle_ms: 50,
        }
    }
}

impl UartConfig {
    pub fn timing(&self) -> LinkTiming {
        LinkTiming {
            detection: Duration::from_millis(self.detection_timeout_ms),
            initialization: Duration::from_millis(self.init_timeout_ms),
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GpsdConfig {
    /// gpsd host:port
    pub address: String,
    /// Named pipe between the worker and the reader
    pub pipe: PathBuf,
    /// Bounds how long the worker takes to notice a stop request
    pub read_timeout_ms: u64,
}

impl Default for GpsdConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:2947".to_string(),
            pipe: PathBuf::from("/tmp/gpsd_position_pipe"),
            read_timeout_ms: 1000,
        }
    }
}

impl GpsdConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

impl Config {
    /// Load from a TOML file; missing keys take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SetupError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| SetupError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, SetupError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| SetupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        let uart = &self.uart;
        if uart.detection_timeout_ms == 0 {
            return Err(SetupError::Config(
                "uart.detection_timeout_ms must be positive".into(),
            ));
        }
        if uart.init_timeout_ms <= uart.detection_timeout_ms {
            return Err(SetupError::Config(
                "uart.init_timeout_ms must exceed uart.detection_timeout_ms".into(),
            ));
        }
        if self.gpsd.read_timeout_ms == 0 {
            // a zero socket timeout means block forever
            return Err(SetupError::Config(
                "gpsd.read_timeout_ms must be positive".into(),
            ));
        }
        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(SetupError::Config(format!(
                "unknown log level {:?}",
                self.logging.level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let config = Config::default();
        assert_eq!(config.source, SourceKind::Uart);
        assert_eq!(config.uart.timing(), LinkTiming::default());
        assert_eq!(config.gpsd.address, "127.0.0.1:2947");
        assert_eq!(config.gpsd.read_timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            source = "gpsd"

            [gpsd]
            pipe = "/run/position"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.source, SourceKind::Gpsd);
        assert_eq!(config.gpsd.pipe, PathBuf::from("/run/position"));
        assert_eq!(config.gpsd.address, "127.0.0.1:2947");
        assert_eq!(config.uart.device, PathBuf::from("/dev/ttyACM0"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Config::from_toml_str("source = \"bluetooth\""),
            Err(SetupError::Config(_))
        ));
        assert!(Config::from_toml_str("[uart]\ninit_timeout_ms = 100").is_err());
        assert!(Config::from_toml_str("[gpsd]\nread_timeout_ms = 0").is_err());
        assert!(Config::from_toml_str("[logging]\nlevel = \"loud\"").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[uart]\ndevice = \"/dev/ttyUSB1\"\nsettle_ms = 20").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.uart.device, PathBuf::from("/dev/ttyUSB1"));
        assert_eq!(config.uart.timing().settle, Duration::from_millis(20));

        assert!(Config::load("/nonexistent/position.toml").is_err());
    }
}
