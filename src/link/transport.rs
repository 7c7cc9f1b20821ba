//! Transport abstraction over the device link to enable testing.
//!
//! The link manager reads and writes plain byte streams; this module
//! supplies them. Production uses [`SerialPortFactory`] to open a real
//! serial device, tests swap in a scripted factory handing out in-memory
//! duplex streams.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialPortType};
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Port name sentinel that enables auto-probing of system serial ports
pub const AUTO_PORT: &str = "auto";

/// Byte-stream requirements for a device link
pub trait TransportIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TransportIo for T {}

/// Boxed transport handed to the link manager on each connection
pub type TransportStream = Box<dyn TransportIo>;

/// Source of fresh transports for the reconnect loop
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a new transport, ready for framed I/O.
    async fn connect(&self) -> Result<TransportStream, TransportError>;

    /// Human-readable target for connection logging.
    fn describe(&self) -> String;
}

/// Serial Port Factory
///
/// Opens the configured device at 8N1 with no flow control. With the
/// port set to [`AUTO_PORT`] it probes system serial ports instead,
/// USB devices first.
///
/// After a successful open the factory waits out the settle window
/// (boards that reset on DTR need it) and discards whatever stale bytes
/// accumulated in the input buffer, so the first frame the link sees is
/// a current one.
pub struct SerialPortFactory {
    /// Device path (e.g., /dev/ttyUSB0) or [`AUTO_PORT`]
    port: String,
    /// Line speed in baud
    baud_rate: u32,
    /// Post-open settle window
    settle: Duration,
}

impl std::fmt::Debug for SerialPortFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortFactory")
            .field("port", &self.port)
            .field("baud_rate", &self.baud_rate)
            .finish_non_exhaustive()
    }
}

impl SerialPortFactory {
    pub fn new(port: impl Into<String>, baud_rate: u32, settle_ms: u64) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            settle: Duration::from_millis(settle_ms),
        }
    }

    /// Open a specific serial port with 8N1 settings
    fn open_port(&self, path: &str) -> Result<tokio_serial::SerialStream, TransportError> {
        tokio_serial::new(path, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TransportError::Open {
                port: path.to_string(),
                reason: e.to_string(),
            })
    }

    /// Wait for the device to settle, then drop stale input bytes.
    async fn settle(&self, port: &mut tokio_serial::SerialStream, path: &str) {
        if !self.settle.is_zero() {
            debug!("Waiting {} ms for {} to settle", self.settle.as_millis(), path);
            tokio::time::sleep(self.settle).await;
        }

        if let Err(e) = port.clear(tokio_serial::ClearBuffer::Input) {
            warn!("Failed to discard stale input on {}: {}", path, e);
        }
    }

    /// Paths to try, in order of preference.
    fn candidates(&self) -> Result<Vec<String>, TransportError> {
        if self.port != AUTO_PORT {
            return Ok(vec![self.port.clone()]);
        }

        let ports =
            tokio_serial::available_ports().map_err(|e| TransportError::Enumerate(e.to_string()))?;

        // USB CDC devices and USB-to-serial adapters before on-board UARTs
        let mut usb = Vec::new();
        let mut rest = Vec::new();
        for info in ports {
            match info.port_type {
                SerialPortType::UsbPort(_) => usb.push(info.port_name),
                _ => rest.push(info.port_name),
            }
        }
        usb.extend(rest);
        Ok(usb)
    }
}

#[async_trait]
impl TransportFactory for SerialPortFactory {
    async fn connect(&self) -> Result<TransportStream, TransportError> {
        let candidates = self.candidates()?;
        if candidates.is_empty() {
            return Err(TransportError::PortNotFound(
                "no serial ports present".to_string(),
            ));
        }

        for path in &candidates {
            debug!("Trying to open serial port: {}", path);

            match self.open_port(path) {
                Ok(mut port) => {
                    info!("Successfully opened device at {} ({} baud)", path, self.baud_rate);
                    self.settle(&mut port, path).await;
                    return Ok(Box::new(port));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(TransportError::PortNotFound(candidates.join(", ")))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port, self.baud_rate)
    }
}

/// List system serial port names, for startup diagnostics.
pub fn list_ports() -> Result<Vec<String>, TransportError> {
    let ports =
        tokio_serial::available_ports().map_err(|e| TransportError::Enumerate(e.to_string()))?;
    Ok(ports.into_iter().map(|info| info.port_name).collect())
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted transport factory for link tests.
    ///
    /// Hands out pre-arranged streams in push order; once the script runs
    /// dry every connect fails, which lets tests observe the reconnect and
    /// fault paths deterministically.
    pub struct MockTransportFactory {
        endpoints: Mutex<VecDeque<TransportStream>>,
        connects: AtomicUsize,
    }

    impl MockTransportFactory {
        pub fn new() -> Self {
            Self {
                endpoints: Mutex::new(VecDeque::new()),
                connects: AtomicUsize::new(0),
            }
        }

        pub fn push_endpoint<T: TransportIo + 'static>(&self, stream: T) {
            self.endpoints.lock().unwrap().push_back(Box::new(stream));
        }

        pub fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn connect(&self) -> Result<TransportStream, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.endpoints
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| TransportError::PortNotFound("mock script exhausted".to_string()))
        }

        fn describe(&self) -> String {
            "mock transport".to_string()
        }
    }
}
