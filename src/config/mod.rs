//! Relay configuration
//!
//! An optional TOML file provides the base configuration; command line
//! flags are merged on top of it.

mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{AppError, Result};
use crate::transport::TransportKind;

/// Values given on the command line; `None` keeps the file/default value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Serial device path or transport keyword
    pub destination: Option<String>,
    pub baud_rate: Option<u32>,
    pub udc: Option<String>,
    pub gadget_name: Option<String>,
    pub record: Option<PathBuf>,
    pub playback: Option<PathBuf>,
    pub dont_exit: bool,
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&text)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AppError::Config(e.to_string()))
    }

    /// Select the transport from a destination identifier: a keyword
    /// (`functionfs`, `gadgetfs`, `null`) or a serial device path
    pub fn apply_destination(&mut self, destination: &str) -> Result<()> {
        if destination.is_empty() {
            return Err(AppError::Config("empty destination".to_string()));
        }
        match TransportKind::from_keyword(destination) {
            Some(kind) => self.transport = kind,
            None => {
                self.transport = TransportKind::Serial;
                self.serial.port = destination.to_string();
            }
        }
        Ok(())
    }

    /// Merge command line values over this configuration
    pub fn apply(&mut self, overrides: Overrides) -> Result<()> {
        if let Some(destination) = overrides.destination {
            self.apply_destination(&destination)?;
        }
        if let Some(baud_rate) = overrides.baud_rate {
            if baud_rate == 0 {
                return Err(AppError::Config("baud rate must be non-zero".to_string()));
            }
            self.serial.baud_rate = baud_rate;
        }
        if let Some(udc) = overrides.udc {
            self.gadget.udc = udc;
        }
        if let Some(name) = overrides.gadget_name {
            self.gadget.name = name;
        }
        if overrides.record.is_some() {
            self.replay.record = overrides.record;
        }
        if overrides.playback.is_some() {
            self.replay.playback = overrides.playback;
        }
        self.replay.dont_exit |= overrides.dont_exit;
        Ok(())
    }
}
