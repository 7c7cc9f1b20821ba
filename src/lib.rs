//! # Rig Bridge Library
//!
//! Bidirectional serial telemetry and control link for bench-top lab rigs.
//!
//! This library reads delimiter-framed telemetry lines from a rig over a
//! serial port, keeps a concurrently readable device snapshot, persists every
//! accepted record to CSV, and sends validated control commands back, with
//! automatic reconnection and an ordered shutdown sequence.

pub mod actions;
pub mod bridge;
pub mod config;
pub mod error;
pub mod link;
pub mod logger;
pub mod shutdown;
pub mod state;
pub mod wire;
