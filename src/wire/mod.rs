//! # Wire Protocol Module
//!
//! Frame codec for the line-oriented rig protocol.
//!
//! This module handles:
//! - Telemetry line parsing (`timestamp,angle,out1[,out2...]`) with strict
//!   arity, type and range validation
//! - Outbound command encoding (pulse durations and two-character opcodes)
//! - The frame schema: channel names, code letters and polarity

pub mod encoder;
pub mod parser;
pub mod protocol;
