//! # Command Encoder
//!
//! Encodes outbound [`Command`]s into wire tokens.
//!
//! Outbound traffic is simpler than inbound telemetry: a bare decimal
//! duration for pulses, or a fixed two-character opcode, each terminated
//! by a newline.

use crate::error::EncodeError;

use super::protocol::{
    Command, DeviceMode, FrameSchema, COMMAND_TERMINATOR, OPCODE_ALL_OFF, OPCODE_MODE_AUTO,
    OPCODE_MODE_MANUAL, PULSE_MAX_MS, PULSE_MIN_MS,
};

/// Encode a command into the bytes written to the transport.
///
/// Encoding is pure and total for every valid command; the only rejections
/// are a pulse duration outside `PULSE_MIN_MS..=PULSE_MAX_MS` and a
/// `SetOutput` naming a channel the schema does not define. `SetOutput`
/// maps the requested state through the channel's polarity, so asserting
/// an active-low channel drives the line to 0.
///
/// # Errors
///
/// Returns [`EncodeError`] before any bytes are produced; a rejected command
/// never reaches the wire.
pub fn encode_command(schema: &FrameSchema, command: &Command) -> Result<Vec<u8>, EncodeError> {
    let token = match command {
        Command::Pulse { duration_ms } => {
            if *duration_ms < PULSE_MIN_MS || *duration_ms > PULSE_MAX_MS {
                return Err(EncodeError::DurationOutOfRange {
                    duration_ms: *duration_ms,
                    min: PULSE_MIN_MS,
                    max: PULSE_MAX_MS,
                });
            }
            duration_ms.to_string()
        }
        Command::SetOutput { channel, active } => {
            let spec = schema
                .channel(channel)
                .ok_or_else(|| EncodeError::UnknownChannel(channel.clone()))?;
            format!("{}{}", spec.code, spec.level_for(*active))
        }
        Command::SetMode(DeviceMode::Auto) => OPCODE_MODE_AUTO.to_string(),
        Command::SetMode(DeviceMode::Manual) => OPCODE_MODE_MANUAL.to_string(),
        Command::AllOff => OPCODE_ALL_OFF.to_string(),
    };

    let mut bytes = token.into_bytes();
    bytes.push(COMMAND_TERMINATOR);
    Ok(bytes)
}
