//! The driving loop: wait for the transport to be ready, then hand it the
//! next state
//!
//! ```text
//! states --> [poll until ready] --> write --> (recorder)
//!                  ^                              |
//!                  +------------------------------+
//! ```

use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::hid::{ControllerState, Recorder};
use crate::transport::Transport;

/// Counters collected while relaying
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// States handed to the transport
    pub sent: u64,
    /// `poll` calls that returned not-ready
    pub not_ready: u64,
    /// Non-fatal errors logged and skipped
    pub recovered: u64,
}

pub struct Relay<T: Transport> {
    transport: T,
    recorder: Option<Recorder<BufWriter<File>>>,
    shutdown: Arc<AtomicBool>,
    stats: RelayStats,
}

impl<T: Transport> Relay<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            recorder: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: RelayStats::default(),
        }
    }

    /// Append every relayed state to `recorder`
    pub fn with_recorder(mut self, recorder: Recorder<BufWriter<File>>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Flag that stops the loop at the next poll when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open the transport, relay `states` until they run out or shutdown is
    /// requested, then tear the transport down
    ///
    /// A teardown failure never replaces an error from relaying.
    pub fn run<I>(&mut self, states: I) -> Result<RelayStats>
    where
        I: IntoIterator<Item = ControllerState>,
    {
        info!("Opening {} transport", self.transport.name());
        self.transport.open()?;

        let relayed = self.pump(states);
        let flushed = self.flush_recorder();
        let closed = self.transport.close();

        match (relayed.and(flushed), closed) {
            (Ok(()), Ok(())) => Ok(self.stats),
            (Ok(()), Err(e)) if !e.is_fatal() => {
                warn!("Teardown incomplete: {}", e);
                Ok(self.stats)
            }
            (Ok(()), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown)) => {
                warn!("Teardown after error failed: {}", teardown);
                Err(e)
            }
        }
    }

    fn pump<I>(&mut self, states: I) -> Result<()>
    where
        I: IntoIterator<Item = ControllerState>,
    {
        for state in states {
            if !self.wait_ready()? {
                info!("Stopping relay");
                return Ok(());
            }

            self.transport.write(&state)?;
            self.stats.sent += 1;
            trace!("Relayed {}", state.to_hex());

            if let Some(recorder) = self.recorder.as_mut() {
                recorder.record(&state)?;
            }
        }
        debug!("State source exhausted");
        Ok(())
    }

    /// Poll until the transport is ready; `false` when shutdown was requested
    fn wait_ready(&mut self) -> Result<bool> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(false);
            }
            match self.transport.poll() {
                Ok(true) => return Ok(true),
                Ok(false) => self.stats.not_ready += 1,
                Err(e) if !e.is_fatal() => {
                    self.stats.recovered += 1;
                    warn!("{}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn flush_recorder(&mut self) -> Result<()> {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.flush()?;
            debug!("Recorded {} states", recorder.written());
        }
        Ok(())
    }
}
