//! # Error Types
//!
//! Custom error types for Rig Bridge using `thiserror`.
//!
//! The taxonomy mirrors how failures propagate through the link:
//! - [`TransportError`]: open/read/write failures; absorbed by the link
//!   manager's reconnect policy, never fatal to the process.
//! - [`ParseError`]: malformed or out-of-range telemetry lines; dropped,
//!   counted and logged while the read loop continues.
//! - [`EncodeError`]: invalid outgoing commands; rejected before any bytes
//!   reach the wire.
//! - [`LoggerError`]: persistence failures; reported to the `append` caller
//!   without halting telemetry processing.

use thiserror::Error;

/// Main error type for Rig Bridge
#[derive(Debug, Error)]
pub enum RigBridgeError {
    /// Transport open/read/write failures
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Malformed inbound telemetry
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Invalid outbound command
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Durable log failures
    #[error(transparent)]
    Logger(#[from] LoggerError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Rig Bridge
pub type Result<T> = std::result::Result<T, RigBridgeError>;

/// Failures at the serial transport boundary.
///
/// All variants trigger the reconnect policy when they occur inside the read
/// loop; `send` surfaces them to the caller instead.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No usable serial device among the probed paths
    #[error("No serial port found (tried: {0})")]
    PortNotFound(String),

    /// Opening a specific device failed
    #[error("Failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// Enumerating system serial ports failed
    #[error("Failed to enumerate serial ports: {0}")]
    Enumerate(String),

    /// Read side of the link failed
    #[error("Read failed: {0}")]
    Read(#[source] std::io::Error),

    /// Write side of the link failed
    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),

    /// No bytes arrived within the configured silence window
    #[error("No data received for {0} ms")]
    IdleTimeout(u64),

    /// The device closed the stream
    #[error("Transport closed by peer")]
    Eof,

    /// A write was requested while no transport is open
    #[error("Not connected")]
    NotConnected,
}

/// A telemetry line that could not be turned into a record.
///
/// Carries the raw line so operators can see exactly what the device sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Malformed frame {line:?}: {reason}")]
pub struct ParseError {
    /// The offending line, delimiter intact, terminator stripped
    pub line: String,
    /// Why the line was rejected
    pub reason: ParseReason,
}

impl ParseError {
    pub fn new(line: impl Into<String>, reason: ParseReason) -> Self {
        Self {
            line: line.into(),
            reason,
        }
    }
}

/// The specific validation that failed for a telemetry line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseReason {
    /// Line had the wrong number of delimited fields
    #[error("expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    /// A field did not parse as a base-10 integer
    #[error("field {index} ({name}) is not an integer: {value:?}")]
    NotAnInteger {
        index: usize,
        name: String,
        value: String,
    },

    /// Angle outside its declared range
    #[error("angle {angle} outside {min}..={max} degrees")]
    AngleOutOfRange { angle: i64, min: u16, max: u16 },

    /// Output channel value other than 0 or 1
    #[error("output {name} must be 0 or 1, got {value}")]
    OutputOutOfRange { name: String, value: i64 },
}

/// An outgoing command rejected before encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Pulse duration outside the permitted range
    #[error("pulse duration {duration_ms} ms outside {min}..={max} ms")]
    DurationOutOfRange {
        duration_ms: u64,
        min: u64,
        max: u64,
    },

    /// Command references a channel the schema does not define
    #[error("unknown output channel {0:?}")]
    UnknownChannel(String),
}

/// Durable log failures.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// Creating the log file or its directory failed
    #[error("Failed to create log at {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing or flushing a row failed
    #[error("Failed to write log row: {0}")]
    Write(#[from] csv::Error),

    /// Flushing buffered rows to the file failed
    #[error("Failed to flush log: {0}")]
    Flush(#[source] std::io::Error),

    /// `append` was called after `close`
    #[error("Logger is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_carries_line_and_reason() {
        let err = ParseError::new(
            "abc,90,1,0",
            ParseReason::NotAnInteger {
                index: 0,
                name: "timestamp".to_string(),
                value: "abc".to_string(),
            },
        );

        let message = err.to_string();
        assert!(message.contains("abc,90,1,0"));
        assert!(message.contains("timestamp"));
    }

    #[test]
    fn test_angle_out_of_range_display() {
        let reason = ParseReason::AngleOutOfRange {
            angle: 181,
            min: 0,
            max: 180,
        };
        assert!(reason.to_string().contains("181"));
        assert!(reason.to_string().contains("0..=180"));
    }

    #[test]
    fn test_umbrella_conversions() {
        let err: RigBridgeError = TransportError::NotConnected.into();
        assert!(matches!(err, RigBridgeError::Transport(_)));

        let err: RigBridgeError = EncodeError::UnknownChannel("led".to_string()).into();
        assert!(matches!(err, RigBridgeError::Encode(_)));

        let err: RigBridgeError = LoggerError::Closed.into();
        assert!(matches!(err, RigBridgeError::Logger(_)));
    }
}
