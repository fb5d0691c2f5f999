//! ep0 and interrupt endpoint plumbing shared by the gadget transports

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{AppError, Result};
use crate::otg::aio::{wait_readable, AsyncEndpoint, Direction};
use crate::otg::control::{ControlAction, HidControl, SetupPacket};
use crate::otg::descriptors::EP_MAX_PACKET;

/// What one harvest pass observed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Harvest {
    /// An IN transfer completed (report taken by the host)
    pub delivered: bool,
    /// Bytes drained from the OUT endpoint
    pub drained: usize,
}

/// IN endpoint for reports, OUT endpoint kept armed and drained
pub struct EndpointPair {
    ep_in: AsyncEndpoint,
    ep_out: AsyncEndpoint,
    /// Latest report written while the previous one was still in flight
    pending: Option<Vec<u8>>,
    delivered: u64,
    replaced: u64,
}

impl EndpointPair {
    pub fn open(in_path: &Path, out_path: &Path) -> Result<Self> {
        let ep_in = AsyncEndpoint::open(in_path, Direction::In, EP_MAX_PACKET as usize)?;
        let ep_out = AsyncEndpoint::open(out_path, Direction::Out, EP_MAX_PACKET as usize)?;
        Self::from_endpoints(ep_in, ep_out)
    }

    /// Pair up two endpoints and arm the OUT one
    pub fn from_endpoints(ep_in: AsyncEndpoint, mut ep_out: AsyncEndpoint) -> Result<Self> {
        ep_out.submit_read()?;
        debug!(
            "Opened endpoints {} / {}",
            ep_in.path().display(),
            ep_out.path().display()
        );

        Ok(Self {
            ep_in,
            ep_out,
            pending: None,
            delivered: 0,
            replaced: 0,
        })
    }

    /// No IN transfer outstanding
    pub fn is_ready(&self) -> bool {
        !self.ep_in.in_flight()
    }

    /// Reports the host has taken
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Reports overwritten by a newer one before they could be queued
    pub fn replaced(&self) -> u64 {
        self.replaced
    }

    pub fn notifiers(&self) -> [BorrowedFd<'_>; 2] {
        [self.ep_in.notifier(), self.ep_out.notifier()]
    }

    /// Queue a report; while one is in flight the newest report waits
    pub fn queue(&mut self, report: &[u8]) -> Result<()> {
        if self.ep_in.in_flight() {
            if self.pending.replace(report.to_vec()).is_some() {
                self.replaced += 1;
            }
            return Ok(());
        }
        self.ep_in.submit_write(report)
    }

    /// Collect completions on both endpoints without blocking
    pub fn harvest(&mut self) -> Result<Harvest> {
        let mut harvest = Harvest::default();

        match self.ep_in.harvest() {
            Ok(Some(n)) => {
                trace!("IN transfer of {} bytes completed", n);
                self.delivered += 1;
                harvest.delivered = true;
            }
            Ok(None) => {}
            // The host may drop a transfer (e.g. on reset); the report is lost
            Err(e) => warn!("IN transfer on {} failed: {}", self.ep_in.path().display(), e),
        }
        if !self.ep_in.in_flight() {
            if let Some(report) = self.pending.take() {
                self.ep_in.submit_write(&report)?;
            }
        }

        match self.ep_out.harvest() {
            Ok(Some(n)) => {
                trace!("OUT data: {:02x?}", self.ep_out.data(n));
                harvest.drained = n;
            }
            Ok(None) => {}
            Err(e) => warn!("OUT transfer on {} failed: {}", self.ep_out.path().display(), e),
        }
        if !self.ep_out.in_flight() {
            self.ep_out.submit_read()?;
        }

        Ok(harvest)
    }

    /// Cancel outstanding transfers and close both endpoint files
    pub fn close(self) {
        if self.pending.is_some() {
            debug!("Dropping report that was never queued");
        }
        self.ep_in.close();
        self.ep_out.close();
    }
}

/// Bounded wait used by the gadget transports' `poll`
pub const GADGET_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Control endpoint, enumeration state and (once configured) data endpoints
pub struct GadgetLink {
    ep0: File,
    control: HidControl,
    endpoints: Option<EndpointPair>,
}

impl GadgetLink {
    /// `ep0` must be opened non-blocking
    pub fn new(ep0: File, control: HidControl) -> Self {
        Self {
            ep0,
            control,
            endpoints: None,
        }
    }

    pub fn control(&self) -> &HidControl {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut HidControl {
        &mut self.control
    }

    pub fn endpoints_open(&self) -> bool {
        self.endpoints.is_some()
    }

    /// Write a blob (descriptors, strings) to ep0
    pub fn write_ep0(&mut self, data: &[u8]) -> Result<()> {
        self.ep0.write_all(data)?;
        Ok(())
    }

    /// Read whatever event records are queued on ep0; empty when none are
    pub fn read_events(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.ep0.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Perform the data/status stage for `action`
    ///
    /// Stalling is signalled by transferring in the direction opposite to
    /// the request's data stage; the kernel reports that with an error,
    /// which is expected.
    pub fn answer(&mut self, setup: &SetupPacket, action: &ControlAction) -> Result<()> {
        let result = match action {
            ControlAction::Reply(data) if !data.is_empty() => self.ep0.write_all(data),
            // A zero-length reply is still a transfer: it completes the status stage
            ControlAction::Reply(_)
            | ControlAction::Ack
            | ControlAction::Configure
            | ControlAction::Deconfigure => {
                if setup.is_in() {
                    self.ep0.write(&[]).map(|_| ())
                } else {
                    self.ep0.read(&mut []).map(|_| ())
                }
            }
            ControlAction::Stall => {
                let stalled = if setup.is_in() {
                    self.ep0.read(&mut []).map(|_| ())
                } else {
                    self.ep0.write(&[]).map(|_| ())
                };
                if let Err(e) = stalled {
                    trace!("ep0 stalled: {}", e);
                }
                return Ok(());
            }
        };
        result.map_err(|e| AppError::ProtocolViolation(format!("ep0 reply to {} failed: {}", setup, e)))
    }

    /// Host selected the configuration
    pub fn attach(&mut self, pair: EndpointPair) {
        if let Some(old) = self.endpoints.replace(pair) {
            old.close();
        }
        self.control.endpoints_opened();
    }

    /// Host deconfigured, disabled or went away
    pub fn detach(&mut self) {
        if let Some(pair) = self.endpoints.take() {
            pair.close();
        }
        self.control.endpoints_closed();
    }

    /// Wait (bounded) for ep0 or endpoint activity and collect completions
    ///
    /// Returns whether a new report can be queued.
    pub fn service(&mut self, timeout: Duration) -> Result<bool> {
        if self.collect()? {
            return Ok(true);
        }

        match self.endpoints.as_ref() {
            Some(pair) => {
                let [ep_in, ep_out] = pair.notifiers();
                wait_readable(&[self.ep0.as_fd(), ep_in, ep_out], timeout)?;
            }
            None => {
                wait_readable(&[self.ep0.as_fd()], timeout)?;
            }
        }
        self.collect()
    }

    fn collect(&mut self) -> Result<bool> {
        let Some(pair) = self.endpoints.as_mut() else {
            return Ok(false);
        };
        let harvest = pair.harvest()?;
        if harvest.delivered {
            self.control.mark_active();
        }
        Ok(pair.is_ready())
    }

    /// Queue a report, or drop it if the host has not configured us yet
    pub fn queue(&mut self, report: &[u8]) -> Result<()> {
        match self.endpoints.as_mut() {
            Some(pair) => pair.queue(report),
            None => {
                debug!("Endpoints not open, dropping report");
                Ok(())
            }
        }
    }

    pub fn delivered(&self) -> u64 {
        self.endpoints.as_ref().map_or(0, |p| p.delivered())
    }
}
