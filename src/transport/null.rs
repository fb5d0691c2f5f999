//! Null transport: accepts and discards every report

use std::time::Duration;

use tracing::{debug, trace};

use super::backend::Transport;
use crate::error::Result;
use crate::hid::ControllerState;

/// Pace of a dry run, roughly one report per USB frame interval
pub const NULL_POLL_INTERVAL: Duration = Duration::from_millis(8);

#[derive(Debug)]
pub struct NullTransport {
    interval: Duration,
    discarded: u64,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::with_interval(NULL_POLL_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            discarded: 0,
        }
    }

    /// Reports written so far
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl Default for NullTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for NullTransport {
    fn name(&self) -> &'static str {
        "null"
    }

    fn open(&mut self) -> Result<()> {
        debug!("Null transport: reports are discarded");
        Ok(())
    }

    fn poll(&mut self) -> Result<bool> {
        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
        Ok(true)
    }

    fn write(&mut self, state: &ControllerState) -> Result<()> {
        trace!("Discarding report {}", state);
        self.discarded += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
