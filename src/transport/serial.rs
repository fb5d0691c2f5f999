//! Serial bridge transport
//!
//! A microcontroller on the other end of a UART replays the reports to the
//! console. The link carries one hex frame per line outbound and single
//! status bytes inbound:
//!
//! | byte | meaning                                 | ready |
//! |------|-----------------------------------------|-------|
//! | `S`  | bridge can take the next report         | yes   |
//! | `R`  | bridge received and forwarded a report  | no    |
//! | `O`  | bridge buffer overrun                   | no    |
//! | `P`  | reply to our liveness ping              | no    |
//!
//! When nothing arrives within the read timeout a single `P` ping is sent;
//! liveness loss is logged once per transition.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use super::backend::Transport;
use crate::error::{AppError, Result};
use crate::hid::ControllerState;

/// Default serial read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Bridge status bytes
pub mod status {
    pub const READY: u8 = b'S';
    pub const RECEIVED: u8 = b'R';
    pub const OVERRUN: u8 = b'O';
    pub const PING: u8 = b'P';
}

/// Byte stream to the bridge
pub trait SerialLink: Read + Write + Send {}

impl<T: Read + Write + Send> SerialLink for T {}

/// Whether the bridge has been heard from recently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Silent,
}

/// Serial link counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SerialStats {
    pub overruns: u64,
    /// Alive -> Silent transitions
    pub silent_transitions: u64,
    pub pings_sent: u64,
    pub unexpected: u64,
}

pub struct SerialTransport {
    port_path: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn SerialLink>>,
    liveness: Liveness,
    ping_outstanding: bool,
    stats: SerialStats,
}

impl SerialTransport {
    pub fn new(port_path: &str, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port_path: port_path.to_string(),
            baud_rate,
            timeout,
            port: None,
            liveness: Liveness::Alive,
            ping_outstanding: false,
            stats: SerialStats::default(),
        }
    }

    /// Use an already open link instead of opening `port_path`
    pub fn with_link(name: &str, link: Box<dyn SerialLink>) -> Self {
        let mut transport = Self::new(name, 0, Duration::from_millis(DEFAULT_READ_TIMEOUT_MS));
        transport.port = Some(link);
        transport
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub fn stats(&self) -> SerialStats {
        self.stats
    }

    fn serial_error(&self, operation: &str, e: impl std::fmt::Display) -> AppError {
        AppError::Serial {
            port: self.port_path.clone(),
            reason: format!("{}: {}", operation, e),
        }
    }

    fn link(&mut self) -> Result<&mut Box<dyn SerialLink>> {
        match self.port.as_mut() {
            Some(port) => Ok(port),
            None => Err(AppError::Serial {
                port: self.port_path.clone(),
                reason: "port not opened".to_string(),
            }),
        }
    }

    /// Read at most one status byte; `None` on timeout
    fn read_status(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        let read = self.link()?.read(&mut byte);
        match read {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(e) => Err(self.serial_error("Failed to read from bridge", e)),
        }
    }

    fn mark_alive(&mut self) {
        self.ping_outstanding = false;
        if self.liveness == Liveness::Silent {
            info!("Bridge on {} is responding again", self.port_path);
            self.liveness = Liveness::Alive;
        }
    }

    fn on_silence(&mut self) -> Result<()> {
        if !self.ping_outstanding {
            let link = self.link()?;
            let sent = link.write_all(&[status::PING]).and_then(|_| link.flush());
            sent.map_err(|e| self.serial_error("Failed to send ping", e))?;
            self.ping_outstanding = true;
            self.stats.pings_sent += 1;
            trace!("Sent liveness ping");
        }

        if self.liveness == Liveness::Alive {
            self.liveness = Liveness::Silent;
            self.stats.silent_transitions += 1;
            warn!("{} on {}", AppError::RemoteUnresponsive, self.port_path);
        }
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.port_path, self.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(self.timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => {
                    AppError::DeviceNotFound(format!("{}: {}", self.port_path, e))
                }
                _ => self.serial_error("Failed to open serial port", e),
            })?;

        self.port = Some(Box::new(port));
        info!("Using {} at {} baud for comms", self.port_path, self.baud_rate);
        Ok(())
    }

    fn poll(&mut self) -> Result<bool> {
        let Some(byte) = self.read_status()? else {
            self.on_silence()?;
            return Ok(false);
        };

        match byte {
            status::READY => {
                self.mark_alive();
                Ok(true)
            }
            status::RECEIVED => Ok(false),
            status::OVERRUN => {
                self.stats.overruns += 1;
                error!("Bridge reported: {}", AppError::BufferOverrun);
                Ok(false)
            }
            status::PING => {
                self.mark_alive();
                Ok(false)
            }
            other => {
                self.stats.unexpected += 1;
                warn!("Unexpected byte from bridge: {:#04x}", other);
                Ok(false)
            }
        }
    }

    fn write(&mut self, state: &ControllerState) -> Result<()> {
        let frame = state.encode_hex();
        let written = self.link()?.write_all(frame.as_bytes());
        written.map_err(|e| self.serial_error("Failed to write to bridge", e))?;
        trace!("Serial TX: {}", frame.trim_end());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.port_path);
        }
        Ok(())
    }
}
