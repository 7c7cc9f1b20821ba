//! # Telemetry Logger Module
//!
//! Append-only CSV persistence for accepted telemetry records.
//!
//! This module handles:
//! - Header-first CSV files naming the channels present
//! - One row per accepted record, flushed before `append` returns
//! - Session-stamped file naming inside a log directory
//! - Idempotent close, safe during shutdown even if nothing was written
//!
//! A crash therefore loses at most the record being written, never a row
//! that `append` already acknowledged.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::error::LoggerError;
use crate::wire::protocol::{FrameSchema, TelemetryRecord};

/// File name prefix for session log files
const SESSION_FILE_PREFIX: &str = "telemetry";

struct Inner {
    writer: Option<csv::Writer<File>>,
    rows: u64,
}

/// Durable, append-only telemetry log.
///
/// Rows carry the raw wire values, so the log reproduces exactly what the
/// device sent. Shared across tasks behind an `Arc`; the internal lock is
/// held only for the duration of one synchronous write.
pub struct TelemetryLogger {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for TelemetryLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryLogger")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl TelemetryLogger {
    /// Create a log file at an explicit path and write the header row.
    ///
    /// The header is `time_ms,angle_deg` followed by the schema's channel
    /// names in wire order. Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Create`] if the file or its directory cannot
    /// be created, or a write error if the header cannot be flushed.
    pub fn create<P: AsRef<Path>>(path: P, schema: &FrameSchema) -> Result<Self, LoggerError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| LoggerError::Create {
                    path: path.display().to_string(),
                    source,
                })?;
            }
        }

        let file = File::create(&path).map_err(|source| LoggerError::Create {
            path: path.display().to_string(),
            source,
        })?;

        let mut writer = csv::Writer::from_writer(file);

        let mut header: Vec<String> = vec!["time_ms".to_string(), "angle_deg".to_string()];
        header.extend(schema.channels().iter().map(|c| c.name.clone()));
        writer.write_record(&header)?;
        writer.flush().map_err(LoggerError::Flush)?;

        info!("Telemetry log created at {}", path.display());

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                writer: Some(writer),
                rows: 0,
            }),
        })
    }

    /// Create a session-stamped log file inside `dir`.
    ///
    /// Files are named `telemetry-YYYYmmdd-HHMMSS.csv`, one per process
    /// session, so successive runs never clobber each other's data.
    pub fn create_in_dir<P: AsRef<Path>>(dir: P, schema: &FrameSchema) -> Result<Self, LoggerError> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let file_name = format!("{}-{}.csv", SESSION_FILE_PREFIX, stamp);
        Self::create(dir.as_ref().join(file_name), schema)
    }

    // Assign-only state behind the lock; recover from poisoning instead of
    // refusing to close the file.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one record as a CSV row and flush it before returning.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Closed`] after `close`, or the underlying
    /// write/flush error. Failures are the caller's to report; they never
    /// poison the logger itself.
    pub fn append(&self, record: &TelemetryRecord) -> Result<(), LoggerError> {
        let mut inner = self.lock();
        let writer = inner.writer.as_mut().ok_or(LoggerError::Closed)?;

        let mut row: Vec<String> = Vec::with_capacity(2 + record.outputs.len());
        row.push(record.timestamp_ms.to_string());
        row.push(record.angle.to_string());
        row.extend(record.outputs.iter().map(|o| o.raw.to_string()));

        writer.write_record(&row)?;
        writer.flush().map_err(LoggerError::Flush)?;
        inner.rows += 1;
        Ok(())
    }

    /// Flush and close the log file.
    ///
    /// Idempotent: the first call closes, every later call is a no-op. Safe
    /// to call during shutdown even if no record was ever appended.
    pub fn close(&self) -> Result<(), LoggerError> {
        let mut inner = self.lock();
        if let Some(mut writer) = inner.writer.take() {
            writer.flush().map_err(LoggerError::Flush)?;
            debug!(
                "Telemetry log closed after {} rows at {}",
                inner.rows,
                self.path.display()
            );
        }
        Ok(())
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.lock().writer.is_none()
    }

    /// Rows appended so far (header excluded).
    pub fn rows_written(&self) -> u64 {
        self.lock().rows
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
