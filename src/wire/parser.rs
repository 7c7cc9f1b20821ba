//! # Telemetry Line Parser
//!
//! Turns one raw line of device output into a validated [`TelemetryRecord`].
//!
//! Validation is strict: a line with the wrong field count, a non-integer
//! field, or an out-of-range value is rejected whole. Nothing is clamped
//! or guessed; silently repairing a frame would hide a wiring or sensor
//! fault.

use crate::error::{ParseError, ParseReason};

use super::protocol::{
    FrameSchema, OutputLevel, TelemetryRecord, ANGLE_MAX_DEGREES, ANGLE_MIN_DEGREES,
};

/// Parse one telemetry line against the deployment schema.
///
/// The line may carry a trailing `\r` and/or `\n`; both are stripped before
/// splitting. Fields must be base-10 integers: an unsigned timestamp, an
/// angle within 0..=180, and exactly one 0/1 value per configured channel.
///
/// # Errors
///
/// Returns a [`ParseError`] carrying the raw line and the first validation
/// that failed. The error never reflects partially-applied state; callers
/// get either a complete record or nothing.
pub fn parse_line(schema: &FrameSchema, line: &str) -> Result<TelemetryRecord, ParseError> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = trimmed.split(schema.delimiter()).collect();

    let expected = schema.field_count();
    if fields.len() != expected {
        return Err(ParseError::new(
            trimmed,
            ParseReason::FieldCount {
                expected,
                actual: fields.len(),
            },
        ));
    }

    let timestamp_ms = fields[0].parse::<u64>().map_err(|_| {
        ParseError::new(
            trimmed,
            ParseReason::NotAnInteger {
                index: 0,
                name: "timestamp".to_string(),
                value: fields[0].to_string(),
            },
        )
    })?;

    // Angle parses as signed so that negative readings report as range
    // violations rather than "not an integer".
    let angle_raw = fields[1].parse::<i64>().map_err(|_| {
        ParseError::new(
            trimmed,
            ParseReason::NotAnInteger {
                index: 1,
                name: "angle".to_string(),
                value: fields[1].to_string(),
            },
        )
    })?;

    if angle_raw < i64::from(ANGLE_MIN_DEGREES) || angle_raw > i64::from(ANGLE_MAX_DEGREES) {
        return Err(ParseError::new(
            trimmed,
            ParseReason::AngleOutOfRange {
                angle: angle_raw,
                min: ANGLE_MIN_DEGREES,
                max: ANGLE_MAX_DEGREES,
            },
        ));
    }

    let mut outputs = Vec::with_capacity(schema.channels().len());
    for (offset, spec) in schema.channels().iter().enumerate() {
        let index = super::protocol::FIXED_FIELD_COUNT + offset;
        let value = fields[index].parse::<i64>().map_err(|_| {
            ParseError::new(
                trimmed,
                ParseReason::NotAnInteger {
                    index,
                    name: spec.name.clone(),
                    value: fields[index].to_string(),
                },
            )
        })?;

        if value != 0 && value != 1 {
            return Err(ParseError::new(
                trimmed,
                ParseReason::OutputOutOfRange {
                    name: spec.name.clone(),
                    value,
                },
            ));
        }

        let raw = value as u8;
        outputs.push(OutputLevel {
            channel: spec.name.clone(),
            raw,
            active: spec.is_active(raw),
        });
    }

    Ok(TelemetryRecord {
        timestamp_ms,
        angle: angle_raw as u16,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::protocol::ChannelSpec;

    fn lab_schema() -> FrameSchema {
        FrameSchema::new(
            ',',
            vec![
                ChannelSpec::new("buzzer", 'B', 1),
                ChannelSpec::new("fan", 'F', 1),
            ],
        )
    }

    #[test]
    fn test_parse_valid_line() {
        let record = parse_line(&lab_schema(), "1200,90,1,0").unwrap();

        assert_eq!(record.timestamp_ms, 1200);
        assert_eq!(record.angle, 90);
        assert_eq!(record.outputs.len(), 2);
        assert_eq!(record.is_active("buzzer"), Some(true));
        assert_eq!(record.is_active("fan"), Some(false));
    }

    #[test]
    fn test_parse_strips_line_terminators() {
        let record = parse_line(&lab_schema(), "1200,90,1,0\r\n").unwrap();
        assert_eq!(record.timestamp_ms, 1200);

        let record = parse_line(&lab_schema(), "1200,90,1,0\n").unwrap();
        assert_eq!(record.angle, 90);
    }

    #[test]
    fn test_parse_angle_boundaries() {
        assert_eq!(parse_line(&lab_schema(), "0,0,0,0").unwrap().angle, 0);
        assert_eq!(parse_line(&lab_schema(), "0,180,0,0").unwrap().angle, 180);
    }

    #[test]
    fn test_parse_non_integer_timestamp() {
        let err = parse_line(&lab_schema(), "abc,90,1,0").unwrap_err();
        assert_eq!(err.line, "abc,90,1,0");
        assert!(matches!(
            err.reason,
            ParseReason::NotAnInteger { index: 0, .. }
        ));
    }

    #[test]
    fn test_parse_negative_timestamp_rejected() {
        let err = parse_line(&lab_schema(), "-5,90,1,0").unwrap_err();
        assert!(matches!(
            err.reason,
            ParseReason::NotAnInteger { index: 0, .. }
        ));
    }

    #[test]
    fn test_parse_angle_above_range() {
        let err = parse_line(&lab_schema(), "1200,181,1,0").unwrap_err();
        assert_eq!(
            err.reason,
            ParseReason::AngleOutOfRange {
                angle: 181,
                min: 0,
                max: 180,
            }
        );
    }

    #[test]
    fn test_parse_negative_angle_is_range_violation() {
        let err = parse_line(&lab_schema(), "1200,-10,1,0").unwrap_err();
        assert!(matches!(
            err.reason,
            ParseReason::AngleOutOfRange { angle: -10, .. }
        ));
    }

    #[test]
    fn test_parse_too_few_fields() {
        let err = parse_line(&lab_schema(), "1200,90,1").unwrap_err();
        assert_eq!(
            err.reason,
            ParseReason::FieldCount {
                expected: 4,
                actual: 3,
            }
        );
    }

    #[test]
    fn test_parse_too_many_fields() {
        let err = parse_line(&lab_schema(), "1200,90,1,0,7").unwrap_err();
        assert_eq!(
            err.reason,
            ParseReason::FieldCount {
                expected: 4,
                actual: 5,
            }
        );
    }

    #[test]
    fn test_parse_empty_line() {
        let err = parse_line(&lab_schema(), "").unwrap_err();
        assert!(matches!(err.reason, ParseReason::FieldCount { actual: 1, .. }));
    }

    #[test]
    fn test_parse_output_out_of_range() {
        let err = parse_line(&lab_schema(), "1200,90,2,0").unwrap_err();
        assert_eq!(
            err.reason,
            ParseReason::OutputOutOfRange {
                name: "buzzer".to_string(),
                value: 2,
            }
        );
    }

    #[test]
    fn test_parse_whitespace_in_field_rejected() {
        // Strict integer parsing: padded fields indicate a firmware mismatch
        let err = parse_line(&lab_schema(), " 1200,90,1,0").unwrap_err();
        assert!(matches!(err.reason, ParseReason::NotAnInteger { .. }));
    }

    #[test]
    fn test_parse_respects_channel_polarity() {
        let schema = FrameSchema::new(
            ',',
            vec![
                ChannelSpec::new("buzzer", 'B', 1),
                ChannelSpec::new("fan", 'F', 0), // active-low wiring
            ],
        );

        let record = parse_line(&schema, "10,45,0,0").unwrap();
        assert_eq!(record.is_active("buzzer"), Some(false));
        assert_eq!(record.is_active("fan"), Some(true));
        assert_eq!(record.output("fan").map(|o| o.raw), Some(0));
    }

    #[test]
    fn test_parse_single_channel_schema() {
        let schema = FrameSchema::new(',', vec![ChannelSpec::new("buzzer", 'B', 1)]);
        let record = parse_line(&schema, "500,45,1").unwrap();
        assert_eq!(record.outputs.len(), 1);
        assert_eq!(record.is_active("buzzer"), Some(true));
    }

    #[test]
    fn test_parse_alternate_delimiter() {
        let schema = FrameSchema::new(';', vec![ChannelSpec::new("buzzer", 'B', 1)]);
        let record = parse_line(&schema, "500;45;1").unwrap();
        assert_eq!(record.timestamp_ms, 500);
    }
}
