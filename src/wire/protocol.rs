//! # Rig Protocol Constants and Types
//!
//! Core definitions for the line-oriented telemetry/control protocol spoken
//! by the rig firmware over the serial link.

use serde::{Deserialize, Serialize};

/// Lowest angle the rig's servo can report, in degrees
pub const ANGLE_MIN_DEGREES: u16 = 0;

/// Highest angle the rig's servo can report, in degrees
pub const ANGLE_MAX_DEGREES: u16 = 180;

/// Fields that precede the output channels in every telemetry line
/// (`timestamp_ms` and `angle_deg`)
pub const FIXED_FIELD_COUNT: usize = 2;

/// Default field delimiter used by the firmware
pub const DEFAULT_DELIMITER: char = ',';

/// Shortest pulse the firmware accepts, in milliseconds
pub const PULSE_MIN_MS: u64 = 1;

/// Longest pulse the firmware accepts, in milliseconds
pub const PULSE_MAX_MS: u64 = 60_000;

/// Opcode switching the rig to autonomous threshold control
pub const OPCODE_MODE_AUTO: &str = "MA";

/// Opcode switching the rig to host-driven control
pub const OPCODE_MODE_MANUAL: &str = "MM";

/// Opcode driving every output to its de-asserted level
pub const OPCODE_ALL_OFF: &str = "XX";

/// Every outbound command token ends with this byte
pub const COMMAND_TERMINATOR: u8 = b'\n';

fn default_on_value() -> u8 {
    1
}

/// One named binary output channel as the deployment wires it.
///
/// `on_value` is the wire value that means "active" for this channel; a rig
/// wired active-low sets it to 0. `code` is the single letter used in
/// outbound `SetOutput` tokens (`F1`, `B0`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Channel name as it appears in snapshots and the log header
    pub name: String,

    /// Code letter for outbound set-output tokens
    pub code: char,

    /// Wire value meaning "active" (0 or 1)
    #[serde(default = "default_on_value")]
    pub on_value: u8,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, code: char, on_value: u8) -> Self {
        Self {
            name: name.into(),
            code,
            on_value,
        }
    }

    /// Interpret a raw wire value through this channel's polarity
    pub fn is_active(&self, raw: u8) -> bool {
        raw == self.on_value
    }

    /// Wire level that drives this channel to the requested state.
    ///
    /// Outbound mirror of [`ChannelSpec::is_active`]: for an active-low
    /// channel, asserting means driving the line to 0.
    pub fn level_for(&self, active: bool) -> u8 {
        if active {
            self.on_value
        } else {
            1 - self.on_value
        }
    }
}

/// The fixed per-deployment shape of inbound telemetry lines.
///
/// A line is `timestamp,angle` followed by exactly one value per channel, in
/// the order the channels are listed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSchema {
    delimiter: char,
    channels: Vec<ChannelSpec>,
}

impl FrameSchema {
    /// Build a schema from a delimiter and the deployment's channel list.
    ///
    /// Channel names and code letters are expected to be unique; the
    /// configuration layer enforces that before a schema is built.
    pub fn new(delimiter: char, channels: Vec<ChannelSpec>) -> Self {
        Self {
            delimiter,
            channels,
        }
    }

    /// Field delimiter for inbound lines
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Output channels in wire order
    pub fn channels(&self) -> &[ChannelSpec] {
        &self.channels
    }

    /// Total fields an inbound line must carry
    pub fn field_count(&self) -> usize {
        FIXED_FIELD_COUNT + self.channels.len()
    }

    /// Look up a channel by name
    pub fn channel(&self, name: &str) -> Option<&ChannelSpec> {
        self.channels.iter().find(|c| c.name == name)
    }
}

/// One output's level inside a telemetry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLevel {
    /// Channel name from the schema
    pub channel: String,

    /// Raw wire value (0 or 1) exactly as the device sent it
    pub raw: u8,

    /// `raw` interpreted through the channel's polarity
    pub active: bool,
}

/// One parsed, validated telemetry frame.
///
/// Immutable once constructed; the state store and logger consume it as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryRecord {
    /// Device-relative timestamp in milliseconds, monotonic non-decreasing
    pub timestamp_ms: u64,

    /// Servo angle in degrees (0..=180)
    pub angle: u16,

    /// Output levels in schema order
    pub outputs: Vec<OutputLevel>,
}

impl TelemetryRecord {
    /// Look up an output by channel name
    pub fn output(&self, channel: &str) -> Option<&OutputLevel> {
        self.outputs.iter().find(|o| o.channel == channel)
    }

    /// Polarity-normalized level of a channel, if present
    pub fn is_active(&self, channel: &str) -> Option<bool> {
        self.output(channel).map(|o| o.active)
    }
}

/// Reporting/control mode of the rig firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    /// Firmware drives outputs from its own thresholds
    Auto,
    /// Host drives outputs explicitly
    Manual,
}

/// An outbound control command.
///
/// Fire-and-forget: the device may echo a token back, but echoes are
/// informational and never required for correctness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Pulse the rig's actuation output for the given duration; the firmware
    /// times the release itself
    Pulse { duration_ms: u64 },

    /// Drive one named output to a level
    SetOutput { channel: String, active: bool },

    /// Switch the firmware's control mode
    SetMode(DeviceMode),

    /// Drive every output to its de-asserted level (quiesce)
    AllOff,
}
