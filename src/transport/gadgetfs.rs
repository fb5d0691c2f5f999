//! gadgetfs transport
//!
//! No configfs involved: the device and configuration descriptors are
//! written straight into the controller's ep0 file under the gadgetfs mount,
//! which binds the gadget. Endpoint files have fixed, controller-specific
//! names and are configured by writing their descriptors into them.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace};

use super::backend::Transport;
use super::endpoints::{EndpointPair, GadgetLink, GADGET_POLL_TIMEOUT};
use crate::error::{AppError, Result};
use crate::hid::ControllerState;
use crate::otg::aio::{AsyncEndpoint, Direction};
use crate::otg::control::{ControlAction, GadgetFsEvent, GadgetState, HidControl, EVENT_SIZE};
use crate::otg::descriptors::{gadgetfs, EP_IN_ADDRESS, EP_MAX_PACKET, EP_OUT_ADDRESS};
use crate::otg::report_desc::{DeviceIdentity, GAMEPAD, MAX_POWER_MA};

/// Default gadgetfs mount point
pub const GADGETFS_PATH: &str = "/dev/gadget";

/// Known controllers and the endpoint files to use as (IN, OUT)
const UDC_ENDPOINTS: &[(&str, &str, &str)] = &[
    ("dummy_udc", "ep1in-bulk", "ep2out-bulk"),
    ("20980000.usb", "ep1in", "ep2out"),
];

/// gadgetfs names the ep0 file after the controller driver, without the
/// instance suffix configfs shows (`dummy_udc.0` -> `dummy_udc`)
pub fn normalize_udc(udc: &str) -> &str {
    match udc.strip_prefix("dummy_udc") {
        Some(suffix) if suffix.is_empty() || suffix.starts_with('.') => "dummy_udc",
        _ => udc,
    }
}

/// (IN, OUT) endpoint file names for a controller
pub fn endpoint_names(udc: &str) -> Option<(&'static str, &'static str)> {
    UDC_ENDPOINTS
        .iter()
        .find(|(name, _, _)| *name == udc)
        .map(|(_, ep_in, ep_out)| (*ep_in, *ep_out))
}

pub struct RawGadgetTransport {
    dev_dir: PathBuf,
    udc: String,
    identity: DeviceIdentity,
    link: Option<GadgetLink>,
}

impl RawGadgetTransport {
    pub fn new(dev_dir: PathBuf, udc: &str) -> Self {
        Self {
            dev_dir,
            udc: normalize_udc(udc).to_string(),
            identity: DeviceIdentity::default(),
            link: None,
        }
    }

    pub fn state(&self) -> GadgetState {
        self.link
            .as_ref()
            .map_or(GadgetState::Unbound, |link| link.control().state())
    }

    /// Open an endpoint file and write its configuration into it
    fn configure_endpoint(path: &Path, address: u8, direction: Direction) -> Result<AsyncEndpoint> {
        let mut file: File = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| AppError::DeviceNotFound(format!("{}: {}", path.display(), e)))?;
        file.write_all(&gadgetfs::endpoint_config(address))?;
        AsyncEndpoint::from_file(file, path, direction, EP_MAX_PACKET as usize)
    }

    fn open_endpoints(link: &mut GadgetLink, dev_dir: &Path, udc: &str) -> Result<()> {
        let (ep_in, ep_out) = endpoint_names(udc)
            .ok_or_else(|| AppError::DeviceNotFound(format!("no endpoint names known for {}", udc)))?;

        // Release the previous configuration's files before reopening them
        link.detach();
        let ep_in = Self::configure_endpoint(&dev_dir.join(ep_in), EP_IN_ADDRESS, Direction::In)?;
        let ep_out = Self::configure_endpoint(&dev_dir.join(ep_out), EP_OUT_ADDRESS, Direction::Out)?;
        link.attach(EndpointPair::from_endpoints(ep_in, ep_out)?);
        info!("Host configured the gadget");
        Ok(())
    }

    fn handle_event(link: &mut GadgetLink, dev_dir: &Path, udc: &str, event: GadgetFsEvent) -> Result<()> {
        trace!("ep0 event: {:?}", event);
        match event {
            GadgetFsEvent::Setup(setup) => {
                let action = link.control_mut().on_setup(&setup);
                link.answer(&setup, &action)?;
                match action {
                    ControlAction::Configure => Self::open_endpoints(link, dev_dir, udc)?,
                    ControlAction::Deconfigure => link.detach(),
                    _ => {}
                }
            }
            GadgetFsEvent::Disconnect => {
                debug!("Host disconnected");
                link.detach();
            }
            GadgetFsEvent::Connect => debug!("Host connected"),
            GadgetFsEvent::Nop | GadgetFsEvent::Suspend => {}
            GadgetFsEvent::Unknown(kind) => debug!("Unknown ep0 event type {}", kind),
        }
        Ok(())
    }

    fn pump_events(link: &mut GadgetLink, dev_dir: &Path, udc: &str) -> Result<()> {
        let mut buf = [0u8; EVENT_SIZE * 4];
        loop {
            let n = link.read_events(&mut buf)?;
            for record in buf[..n].chunks(EVENT_SIZE) {
                match GadgetFsEvent::parse(record) {
                    Ok(event) => Self::handle_event(link, dev_dir, udc, event)?,
                    Err(e) => debug!("{}", e),
                }
            }
            if n < buf.len() {
                return Ok(());
            }
        }
    }
}

impl Transport for RawGadgetTransport {
    fn name(&self) -> &'static str {
        "gadgetfs"
    }

    fn open(&mut self) -> Result<()> {
        if endpoint_names(&self.udc).is_none() {
            return Err(AppError::DeviceNotFound(format!(
                "no endpoint names known for {}",
                self.udc
            )));
        }

        let ep0_path = self.dev_dir.join(&self.udc);
        info!("Creating gadgetfs gadget on {}", ep0_path.display());
        let mut ep0 = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&ep0_path)
            .map_err(|e| AppError::DeviceNotFound(format!("{}: {}", ep0_path.display(), e)))?;

        // The descriptor write blocks until the gadget is registered, so ep0
        // only becomes non-blocking afterwards
        let config = gadgetfs::device_config(&self.identity, GAMEPAD.len() as u16, MAX_POWER_MA);
        ep0.write_all(&config).map_err(|e| AppError::BindFailure {
            udc: self.udc.clone(),
            reason: e.to_string(),
        })?;
        set_nonblocking(&ep0)?;

        let control = HidControl::new(GAMEPAD).with_strings(&self.identity.manufacturer, &self.identity.product);
        let mut link = GadgetLink::new(ep0, control);
        link.control_mut().descriptors_installed();
        link.control_mut().bound();
        self.link = Some(link);
        Ok(())
    }

    fn poll(&mut self) -> Result<bool> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| AppError::Internal("gadgetfs transport not open".to_string()))?;

        Self::pump_events(link, &self.dev_dir, &self.udc)?;
        let ready = link.service(GADGET_POLL_TIMEOUT)?;
        if !ready {
            Self::pump_events(link, &self.dev_dir, &self.udc)?;
        }
        Ok(ready)
    }

    fn write(&mut self, state: &ControllerState) -> Result<()> {
        match self.link.as_mut() {
            Some(link) => link.queue(&state.encode()),
            None => Err(AppError::Internal("gadgetfs transport not open".to_string())),
        }
    }

    fn close(&mut self) -> Result<()> {
        // Closing ep0 unregisters the gadget
        if let Some(mut link) = self.link.take() {
            info!("Tearing down gadget");
            link.detach();
            link.control_mut().unbound();
        }
        Ok(())
    }
}

fn set_nonblocking(file: &File) -> Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    use std::os::fd::AsRawFd;

    let flags = OFlag::from_bits_truncate(fcntl(file.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otg::control::SetupPacket;
    use tempfile::TempDir;

    fn setup_event(raw: [u8; 8]) -> GadgetFsEvent {
        let mut record = [0u8; EVENT_SIZE];
        record[..8].copy_from_slice(&raw);
        record[8..].copy_from_slice(&3u32.to_le_bytes());
        GadgetFsEvent::parse(&record).unwrap()
    }

    #[test]
    fn test_udc_names() {
        assert_eq!(normalize_udc("dummy_udc.0"), "dummy_udc");
        assert_eq!(normalize_udc("dummy_udc"), "dummy_udc");
        assert_eq!(normalize_udc("20980000.usb"), "20980000.usb");
        assert_eq!(endpoint_names("dummy_udc"), Some(("ep1in-bulk", "ep2out-bulk")));
        assert_eq!(endpoint_names("20980000.usb"), Some(("ep1in", "ep2out")));
        assert_eq!(endpoint_names("musb-hdrc.0"), None);
    }

    #[test]
    fn test_set_configuration_opens_named_endpoints() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        for name in ["dummy_udc", "ep1in-bulk", "ep2out-bulk"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }

        let ep0 = OpenOptions::new().read(true).write(true).open(dir.join("dummy_udc")).unwrap();
        let mut control = HidControl::new(GAMEPAD).with_strings("HORI CO.,LTD.", "HORIPAD S");
        control.descriptors_installed();
        control.bound();
        let mut link = GadgetLink::new(ep0, control);

        let set_config = setup_event([0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert!(matches!(set_config, GadgetFsEvent::Setup(SetupPacket { request: 0x09, .. })));
        RawGadgetTransport::handle_event(&mut link, dir, "dummy_udc", set_config).unwrap();
        assert_eq!(link.control().state(), GadgetState::EndpointsOpen);

        // Endpoint configuration blobs went into the endpoint files
        let ep1 = std::fs::read(dir.join("ep1in-bulk")).unwrap();
        assert_eq!(&ep1[..4], &[1, 0, 0, 0]);
        assert_eq!(ep1[6], 0x81);
        let ep2 = std::fs::read(dir.join("ep2out-bulk")).unwrap();
        assert_eq!(ep2[6], 0x02);

        // String descriptors are answered from ep0
        let product = setup_event([0x80, 0x06, 0x02, 0x03, 0x09, 0x04, 0xff, 0x00]);
        RawGadgetTransport::handle_event(&mut link, dir, "dummy_udc", product).unwrap();
        let ep0 = std::fs::read(dir.join("dummy_udc")).unwrap();
        assert_eq!(ep0[0] as usize, 2 + 2 * "HORIPAD S".len());
        assert_eq!(ep0[1], 3);

        let disconnect = {
            let mut record = [0u8; EVENT_SIZE];
            record[8] = 2;
            GadgetFsEvent::parse(&record).unwrap()
        };
        RawGadgetTransport::handle_event(&mut link, dir, "dummy_udc", disconnect).unwrap();
        assert_eq!(link.control().state(), GadgetState::Configured);
    }

    #[test]
    fn test_reconfiguration_releases_old_endpoints() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        for name in ["dummy_udc", "ep1in-bulk", "ep2out-bulk"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }

        let ep0 = OpenOptions::new().read(true).write(true).open(dir.join("dummy_udc")).unwrap();
        let mut control = HidControl::new(GAMEPAD);
        control.descriptors_installed();
        control.bound();
        let mut link = GadgetLink::new(ep0, control);

        let set_config = [0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        RawGadgetTransport::handle_event(&mut link, dir, "dummy_udc", setup_event(set_config)).unwrap();
        RawGadgetTransport::handle_event(&mut link, dir, "dummy_udc", setup_event(set_config)).unwrap();
        assert_eq!(link.control().state(), GadgetState::EndpointsOpen);
        assert!(link.endpoints_open());

        // A failed reopen leaves no stale pair behind
        std::fs::remove_file(dir.join("ep2out-bulk")).unwrap();
        let err = RawGadgetTransport::handle_event(&mut link, dir, "dummy_udc", setup_event(set_config));
        assert!(matches!(err, Err(AppError::DeviceNotFound(_))));
        assert!(!link.endpoints_open());
        assert_eq!(link.control().state(), GadgetState::Configured);
    }

    #[test]
    fn test_open_unknown_controller() {
        let temp_dir = TempDir::new().unwrap();
        let mut transport = RawGadgetTransport::new(temp_dir.path().to_path_buf(), "musb-hdrc.0");
        assert!(matches!(transport.open(), Err(AppError::DeviceNotFound(_))));
        assert_eq!(transport.state(), GadgetState::Unbound);
        transport.close().unwrap();
    }
}
