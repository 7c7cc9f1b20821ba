//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::link::LinkPolicy;
use crate::wire::protocol::{ChannelSpec, FrameSchema, PULSE_MAX_MS, PULSE_MIN_MS};

/// UART rates the rig firmware is known to run at
const ALLOWED_BAUD_RATES: &[u32] = &[1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub frame: FrameConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub actions: ActionsConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Device path, or "auto" to probe enumerated ports
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Read silence treated as link loss
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Post-open quiet period for boards that reset on open
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Consecutive failed connects before the link reports faulted
    #[serde(default = "default_fault_threshold")]
    pub fault_threshold: u32,
}

/// Telemetry frame configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FrameConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Output channels in wire order, after the timestamp and angle fields
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelSpec>,
}

/// Telemetry persistence configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Records kept in the in-memory snapshot history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

/// Action scheduling configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ActionsConfig {
    /// Pulse length used when a trigger does not specify one
    #[serde(default = "default_pulse_ms")]
    pub default_pulse_ms: u64,
}

// Default value functions
fn default_serial_port() -> String { "auto".to_string() }
fn default_baud_rate() -> u32 { 9600 }
fn default_read_timeout_ms() -> u64 { 5000 }
fn default_reconnect_delay_ms() -> u64 { 2000 }
fn default_settle_ms() -> u64 { 2000 }
fn default_fault_threshold() -> u32 { 5 }

fn default_delimiter() -> char { ',' }
fn default_channels() -> Vec<ChannelSpec> {
    vec![
        ChannelSpec::new("buzzer", 'B', 1),
        ChannelSpec::new("fan", 'F', 1),
    ]
}

fn default_log_dir() -> String { "./logs".to_string() }
fn default_history_capacity() -> usize { 100 }

fn default_pulse_ms() -> u64 { 300 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            settle_ms: default_settle_ms(),
            fault_threshold: default_fault_threshold(),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            channels: default_channels(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            default_pulse_ms: default_pulse_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            frame: FrameConfig::default(),
            telemetry: TelemetryConfig::default(),
            actions: ActionsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and fields fall back to their defaults, so a file
    /// only needs to name what it changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the contents are not
    /// valid TOML, or a value fails validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field against its allowed range
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    fn validate(&self) -> Result<()> {
        // Serial section
        if self.serial.port.is_empty() {
            return Err(crate::error::RigBridgeError::Config(
                toml::de::Error::custom("serial port cannot be empty")
            ));
        }

        if !ALLOWED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(crate::error::RigBridgeError::Config(
                toml::de::Error::custom(format!(
                    "baud_rate must be one of: {:?}",
                    ALLOWED_BAUD_RATES
                ))
            ));
        }

        // Timing fields
        if self.serial.read_timeout_ms == 0 || self.serial.read_timeout_ms > 60000 {
            return Err(crate::error::RigBridgeError::Config(
                toml::de::Error::custom("read_timeout_ms must be between 1 and 60000")
            ));
        }

        if self.serial.reconnect_delay_ms == 0 || self.serial.reconnect_delay_ms > 60000 {
            return Err(crate::error::RigBridgeError::Config(
                toml::de::Error::custom("reconnect_delay_ms must be between 1 and 60000")
            ));
        }

        if self.serial.settle_ms > 10000 {
            return Err(crate::error::RigBridgeError::Config(
                toml::de::Error::custom("settle_ms must be at most 10000")
            ));
        }

        if self.serial.fault_threshold == 0 || self.serial.fault_threshold > 100 {
            return Err(crate::error::RigBridgeError::Config(
                toml::de::Error::custom("fault_threshold must be between 1 and 100")
            ));
        }

        // Frame section
        if self.frame.delimiter.is_ascii_digit()
            || self.frame.delimiter.is_alphabetic()
            || self.frame.delimiter == '\n'
            || self.frame.delimiter == '\r'
        {
            return Err(crate::error::RigBridgeError::Config(
                toml::de::Error::custom(
                    "delimiter cannot be a digit, a letter, or a line terminator",
                )
            ));
        }

        if self.frame.channels.is_empty() {
            return Err(crate::error::RigBridgeError::Config(
                toml::de::Error::custom("at least one output channel must be configured")
            ));
        }

        for channel in &self.frame.channels {
            if channel.name.is_empty() {
                return Err(crate::error::RigBridgeError::Config(
                    toml::de::Error::custom("channel name cannot be empty")
                ));
            }

            if !channel.code.is_ascii_alphabetic() {
                return Err(crate::error::RigBridgeError::Config(
                    toml::de::Error::custom(format!(
                        "channel {} code must be an ASCII letter, got {:?}",
                        channel.name, channel.code
                    ))
                ));
            }

            if channel.on_value > 1 {
                return Err(crate::error::RigBridgeError::Config(
                    toml::de::Error::custom(format!(
                        "channel {} on_value must be 0 or 1",
                        channel.name
                    ))
                ));
            }
        }

        for (i, channel) in self.frame.channels.iter().enumerate() {
            for other in &self.frame.channels[i + 1..] {
                if channel.name == other.name {
                    return Err(crate::error::RigBridgeError::Config(
                        toml::de::Error::custom(format!(
                            "duplicate channel name {:?}",
                            channel.name
                        ))
                    ));
                }
                if channel.code.eq_ignore_ascii_case(&other.code) {
                    return Err(crate::error::RigBridgeError::Config(
                        toml::de::Error::custom(format!(
                            "duplicate channel code {:?}",
                            channel.code
                        ))
                    ));
                }
            }
        }

        // Telemetry section
        if self.telemetry.log_dir.is_empty() {
            return Err(crate::error::RigBridgeError::Config(
                toml::de::Error::custom("telemetry log_dir cannot be empty")
            ));
        }

        if self.telemetry.history_capacity == 0 {
            return Err(crate::error::RigBridgeError::Config(
                toml::de::Error::custom("history_capacity must be greater than 0")
            ));
        }

        // Action section
        if !(PULSE_MIN_MS..=PULSE_MAX_MS).contains(&self.actions.default_pulse_ms) {
            return Err(crate::error::RigBridgeError::Config(
                toml::de::Error::custom(format!(
                    "default_pulse_ms must be between {} and {}",
                    PULSE_MIN_MS, PULSE_MAX_MS
                ))
            ));
        }

        Ok(())
    }

    /// Frame schema for the wire codec, built from the `[frame]` section.
    pub fn frame_schema(&self) -> FrameSchema {
        FrameSchema::new(self.frame.delimiter, self.frame.channels.clone())
    }

    /// Link reconnect policy, built from the `[serial]` section.
    pub fn link_policy(&self) -> LinkPolicy {
        LinkPolicy {
            read_timeout: Duration::from_millis(self.serial.read_timeout_ms),
            reconnect_delay: Duration::from_millis(self.serial.reconnect_delay_ms),
            fault_threshold: self.serial.fault_threshold,
        }
    }
}
