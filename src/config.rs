//! Configuration management for the RFID terminal.
//!
//! Handles loading, saving, and validating configuration from JSON files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/opt/rfid-terminal/config.json";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// I2C bus number of the LCD backpack
    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: u8,

    /// 7-bit I2C address of the PCF8574 expander
    #[serde(default = "default_lcd_address")]
    pub lcd_address: u8,

    /// Display rows
    #[serde(default = "default_rows")]
    pub rows: u8,

    /// Display columns
    #[serde(default = "default_columns")]
    pub columns: u8,

    /// Base URL of the message bridge scans are published to
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Port of the local listener receiving topic messages
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Topic scans are published on
    #[serde(default = "default_scan_topic")]
    pub scan_topic: String,

    /// Topic lookup results arrive on
    #[serde(default = "default_response_topic")]
    pub response_topic: String,

    /// Reader identifier sent with every scan
    #[serde(default = "default_reader_id")]
    pub reader_id: String,

    /// Idle greeting, first row
    #[serde(default = "default_idle_line1")]
    pub idle_line1: String,

    /// Idle greeting, second row
    #[serde(default = "default_idle_line2")]
    pub idle_line2: String,

    /// How long transient messages stay on screen
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,

    /// Window in which repeated scans of the same tag are ignored
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Tag source: "-" for stdin, otherwise a device or FIFO path
    #[serde(default = "default_scan_input")]
    pub scan_input: String,

    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

fn default_i2c_bus() -> u8 {
    1
}

fn default_lcd_address() -> u8 {
    crate::display::hd44780::DEFAULT_ADDRESS
}

fn default_rows() -> u8 {
    2
}

fn default_columns() -> u8 {
    16
}

fn default_broker_url() -> String {
    "http://192.168.18.73:8080".to_string()
}

fn default_http_port() -> u16 {
    8888
}

fn default_scan_topic() -> String {
    "rfid/scanner/uid".to_string()
}

fn default_response_topic() -> String {
    "rfid/scanner/response".to_string()
}

fn default_reader_id() -> String {
    "ESP32_LEITOR_01".to_string()
}

fn default_idle_line1() -> String {
    "Sistema pronto".to_string()
}

fn default_idle_line2() -> String {
    "Aproxime cartao".to_string()
}

fn default_message_timeout_ms() -> u64 {
    5000
}

fn default_debounce_ms() -> u64 {
    3000
}

fn default_scan_input() -> String {
    "-".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            i2c_bus: default_i2c_bus(),
            lcd_address: default_lcd_address(),
            rows: default_rows(),
            columns: default_columns(),
            broker_url: default_broker_url(),
            http_port: default_http_port(),
            scan_topic: default_scan_topic(),
            response_topic: default_response_topic(),
            reader_id: default_reader_id(),
            idle_line1: default_idle_line1(),
            idle_line2: default_idle_line2(),
            message_timeout_ms: default_message_timeout_ms(),
            debounce_ms: default_debounce_ms(),
            scan_input: default_scan_input(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file atomically
    ///
    /// Uses a write-to-temp-then-rename pattern so a power loss mid-write
    /// never leaves a truncated config behind.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Write to temporary file first
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;

        // Atomic rename - either fully succeeds or fails, never partial
        std::fs::rename(&tmp_path, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            ConfigError::ReadError(e)
        })?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lcd_address > 0x7F {
            return Err(ConfigError::ValidationError(format!(
                "lcd_address 0x{:02X} is not a 7-bit I2C address",
                self.lcd_address
            )));
        }

        if !(1..=4).contains(&self.rows) {
            return Err(ConfigError::ValidationError(
                "rows must be between 1 and 4".to_string(),
            ));
        }

        if !(1..=40).contains(&self.columns) {
            return Err(ConfigError::ValidationError(
                "columns must be between 1 and 40".to_string(),
            ));
        }

        if self.http_port == 0 {
            return Err(ConfigError::ValidationError(
                "http_port must be greater than 0".to_string(),
            ));
        }

        let url = self.broker_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "broker_url '{}' must start with http:// or https://",
                self.broker_url
            )));
        }

        for (name, topic) in [
            ("scan_topic", &self.scan_topic),
            ("response_topic", &self.response_topic),
        ] {
            if topic.trim().is_empty() || topic.starts_with('/') {
                return Err(ConfigError::ValidationError(format!(
                    "{} '{}' must be non-empty and must not start with '/'",
                    name, topic
                )));
            }
        }

        if self.scan_topic == self.response_topic {
            return Err(ConfigError::ValidationError(
                "scan_topic and response_topic must differ".to_string(),
            ));
        }

        if self.reader_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "reader_id cannot be empty".to_string(),
            ));
        }

        if self.message_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "message_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.scan_input.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "scan_input cannot be empty (use \"-\" for stdin)".to_string(),
            ));
        }

        Ok(())
    }

    /// Lifetime of transient messages
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    /// Debounce window for repeated scans
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.lcd_address, 0x27);
        assert_eq!(config.message_timeout(), Duration::from_millis(5000));
        assert_eq!(config.debounce_window(), Duration::from_millis(3000));
    }

    #[test]
    fn test_partial_json_overrides_fields() {
        let config =
            Config::from_json(r#"{"lcd_address": 63, "reader_id": "PORTARIA", "rows": 4, "columns": 20}"#)
                .unwrap();
        assert_eq!(config.lcd_address, 0x3F);
        assert_eq!(config.reader_id, "PORTARIA");
        assert_eq!(config.rows, 4);
        assert_eq!(config.scan_topic, "rfid/scanner/uid");
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            Config::from_json(r#"{"rows": 5}"#),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"lcd_address": 200}"#),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"broker_url": "mqtt://host"}"#),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"response_topic": "rfid/scanner/uid"}"#),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"message_timeout_ms": 0}"#),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(
            Config::from_json("{not json"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("rfid-terminal-test-{}", std::process::id()));
        let path = dir.join("config.json");

        let mut config = Config::default();
        config.reader_id = "LAB_02".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(!path.with_extension("json.tmp").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
