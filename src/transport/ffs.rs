//! configfs + FunctionFS gadget transport
//!
//! Lifecycle:
//! ```text
//! open:  configfs tree -> mount functionfs -> descriptors/strings to ep0 -> bind UDC
//! poll:  ep0 events (ENABLE opens ep1/ep2) -> AIO completions on ep1/ep2
//! close: unbind -> close endpoints/ep0 -> umount -> remove configfs tree
//! ```

use std::fs::{self, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::mount::{mount, umount, MsFlags};
use tracing::{debug, info, trace, warn};

use super::backend::Transport;
use super::endpoints::{EndpointPair, GadgetLink, GADGET_POLL_TIMEOUT};
use crate::error::{AppError, Result};
use crate::hid::ControllerState;
use crate::otg::configfs::{find_udc, ConfigTree};
use crate::otg::control::{ControlAction, FfsEvent, GadgetState, HidControl, EVENT_SIZE};
use crate::otg::descriptors::{ffs, LANG_EN_US};
use crate::otg::manager::GadgetManager;
use crate::otg::report_desc::{DeviceIdentity, GAMEPAD, INTERFACE};

type MountFn = fn(&str, &Path) -> nix::Result<()>;
type UmountFn = fn(&Path) -> nix::Result<()>;

fn mount_functionfs(instance: &str, target: &Path) -> nix::Result<()> {
    mount(Some(instance), target, Some("functionfs"), MsFlags::empty(), None::<&str>)
}

fn umount_functionfs(target: &Path) -> nix::Result<()> {
    umount(target)
}

pub struct GadgetTransport {
    manager: GadgetManager,
    udc: String,
    mount_point: PathBuf,
    created_mount_point: bool,
    mounted: bool,
    link: Option<GadgetLink>,
    mount_fs: MountFn,
    umount_fs: UmountFn,
}

impl GadgetTransport {
    pub fn new(configfs_root: PathBuf, name: &str, udc: &str, mount_point: PathBuf) -> Self {
        Self {
            manager: GadgetManager::new(ConfigTree::new(configfs_root), name, DeviceIdentity::default()),
            udc: udc.to_string(),
            mount_point,
            created_mount_point: false,
            mounted: false,
            link: None,
            mount_fs: mount_functionfs,
            umount_fs: umount_functionfs,
        }
    }

    pub fn state(&self) -> GadgetState {
        self.link
            .as_ref()
            .map_or(GadgetState::Unbound, |link| link.control().state())
    }

    fn resolve_udc(&self) -> Result<String> {
        if !self.udc.is_empty() {
            return Ok(self.udc.clone());
        }
        find_udc().ok_or_else(|| AppError::DeviceNotFound("no USB Device Controller found".to_string()))
    }

    fn mount(&mut self) -> Result<()> {
        if !self.mount_point.exists() {
            fs::create_dir_all(&self.mount_point)?;
            self.created_mount_point = true;
        }

        let instance = self.manager.function().instance().to_string();
        (self.mount_fs)(&instance, &self.mount_point).map_err(|e| match e {
            Errno::ENODEV => AppError::DeviceNotFound("functionfs is not supported by this kernel".to_string()),
            Errno::ENOENT => AppError::DeviceNotFound(format!("no functionfs function named {}", instance)),
            e => AppError::Io(e.into()),
        })?;
        self.mounted = true;
        debug!("Mounted functionfs {} at {}", instance, self.mount_point.display());
        Ok(())
    }

    fn bring_up(&mut self) -> Result<()> {
        let udc = self.resolve_udc()?;
        self.manager.setup()?;
        self.mount()?;

        let ep0_path = self.mount_point.join("ep0");
        let ep0 = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&ep0_path)
            .map_err(|e| AppError::DeviceNotFound(format!("{}: {}", ep0_path.display(), e)))?;

        let mut link = GadgetLink::new(ep0, HidControl::new(GAMEPAD));
        link.write_ep0(&ffs::descriptors(GAMEPAD.len() as u16))?;
        link.write_ep0(&ffs::strings(LANG_EN_US, &[INTERFACE]))?;
        link.control_mut().descriptors_installed();
        self.link = Some(link);

        self.manager.bind(&udc)?;
        if let Some(link) = self.link.as_mut() {
            link.control_mut().bound();
        }
        Ok(())
    }

    /// Drain queued ep0 events
    fn pump_events(link: &mut GadgetLink, dir: &Path) -> Result<()> {
        let mut buf = [0u8; EVENT_SIZE * 4];
        loop {
            let n = link.read_events(&mut buf)?;
            for record in buf[..n].chunks(EVENT_SIZE) {
                match FfsEvent::parse(record) {
                    Ok(event) => Self::handle_event(link, dir, event)?,
                    Err(e) => debug!("{}", e),
                }
            }
            if n < buf.len() {
                return Ok(());
            }
        }
    }

    fn open_endpoints(link: &mut GadgetLink, dir: &Path) -> Result<()> {
        // A repeated ENABLE must not find the previous pair still open
        link.detach();
        let pair = EndpointPair::open(&dir.join("ep1"), &dir.join("ep2"))?;
        link.attach(pair);
        Ok(())
    }

    fn handle_event(link: &mut GadgetLink, dir: &Path, event: FfsEvent) -> Result<()> {
        trace!("ep0 event: {:?}", event);
        match event {
            FfsEvent::Bind => debug!("Function bound"),
            FfsEvent::Unbind | FfsEvent::Disable => link.detach(),
            FfsEvent::Enable => {
                // SET_CONFIGURATION is answered by the composite layer
                Self::open_endpoints(link, dir)?;
                info!("Host enabled the gadget");
            }
            FfsEvent::Setup(setup) => {
                let action = link.control_mut().on_setup(&setup);
                link.answer(&setup, &action)?;
                match action {
                    ControlAction::Configure => Self::open_endpoints(link, dir)?,
                    ControlAction::Deconfigure => link.detach(),
                    _ => {}
                }
            }
            FfsEvent::Suspend | FfsEvent::Resume => {}
            FfsEvent::Unknown(kind) => debug!("Unknown ep0 event type {}", kind),
        }
        Ok(())
    }
}

impl Transport for GadgetTransport {
    fn name(&self) -> &'static str {
        "functionfs"
    }

    fn open(&mut self) -> Result<()> {
        info!("Creating functionfs gadget {}", self.manager.gadget_name());
        if let Err(e) = self.bring_up() {
            if let Err(teardown) = self.close() {
                warn!("Teardown after failed open: {}", teardown);
            }
            return Err(e);
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<bool> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| AppError::Internal("functionfs transport not open".to_string()))?;

        Self::pump_events(link, &self.mount_point)?;
        let ready = link.service(GADGET_POLL_TIMEOUT)?;
        if !ready {
            Self::pump_events(link, &self.mount_point)?;
        }
        Ok(ready)
    }

    fn write(&mut self, state: &ControllerState) -> Result<()> {
        match self.link.as_mut() {
            Some(link) => link.queue(&state.encode()),
            None => Err(AppError::Internal("functionfs transport not open".to_string())),
        }
    }

    fn close(&mut self) -> Result<()> {
        info!("Tearing down gadget");
        let mut first_err = None;

        // Unbinding releases the host's claim on the function
        if let Err(e) = self.manager.unbind() {
            warn!("Unbind failed: {}", e);
            first_err.get_or_insert(e);
        }

        if let Some(mut link) = self.link.take() {
            link.detach();
            link.control_mut().unbound();
        }

        if self.mounted {
            match (self.umount_fs)(&self.mount_point) {
                Ok(()) => self.mounted = false,
                Err(Errno::EBUSY) => {
                    info!("Can't tear down gadget because functionfs is still in use");
                    return Err(first_err
                        .unwrap_or_else(|| AppError::ResourceBusy(self.mount_point.display().to_string())));
                }
                Err(e) => {
                    warn!("Unmounting {} failed: {}", self.mount_point.display(), e);
                    return Err(first_err.unwrap_or_else(|| AppError::Io(e.into())));
                }
            }
        }

        if self.created_mount_point {
            if let Err(e) = fs::remove_dir(&self.mount_point) {
                debug!("Could not remove {}: {}", self.mount_point.display(), e);
            }
            self.created_mount_point = false;
        }

        if let Err(e) = self.manager.remove() {
            warn!("Removing gadget tree failed: {}", e);
            first_err.get_or_insert(e);
        }

        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otg::control::SetupPacket;
    use crate::otg::manager::testing::{drop_attributes, drop_default_groups};
    use crate::otg::manager::Progress;
    use tempfile::TempDir;

    fn mounted(_: &str, _: &Path) -> nix::Result<()> {
        Ok(())
    }

    fn no_functionfs(_: &str, _: &Path) -> nix::Result<()> {
        Err(Errno::ENODEV)
    }

    fn unmounted(_: &Path) -> nix::Result<()> {
        Ok(())
    }

    fn busy(_: &Path) -> nix::Result<()> {
        Err(Errno::EBUSY)
    }

    /// Opened transport over a plain directory tree; the "mount point" is a
    /// directory holding a regular ep0 file
    fn opened(temp_dir: &TempDir, umount_fs: UmountFn) -> GadgetTransport {
        let root = temp_dir.path().join("usb_gadget");
        let mount_point = temp_dir.path().join("ffs-pad");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&mount_point).unwrap();
        fs::write(mount_point.join("ep0"), b"").unwrap();

        let mut transport = GadgetTransport::new(root, "pad", "dummy_udc.0", mount_point);
        transport.mount_fs = mounted;
        transport.umount_fs = umount_fs;
        transport.open().unwrap();
        assert_eq!(transport.state(), GadgetState::Configured);
        transport
    }

    fn event(kind: u8, setup: [u8; 8]) -> FfsEvent {
        let mut record = [0u8; EVENT_SIZE];
        record[..8].copy_from_slice(&setup);
        record[8] = kind;
        FfsEvent::parse(&record).unwrap()
    }

    #[test]
    fn test_events_drive_enumeration() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        for name in ["ep0", "ep1", "ep2"] {
            fs::write(dir.join(name), b"").unwrap();
        }

        let ep0 = OpenOptions::new().read(true).write(true).open(dir.join("ep0")).unwrap();
        let mut control = HidControl::new(GAMEPAD);
        control.descriptors_installed();
        control.bound();
        let mut link = GadgetLink::new(ep0, control);

        let report = [0x81, 0x06, 0x00, 0x22, 0x00, 0x00, 0x50, 0x00];
        GadgetTransport::handle_event(&mut link, dir, event(4, report)).unwrap();
        assert_eq!(fs::read(dir.join("ep0")).unwrap(), GAMEPAD);

        GadgetTransport::handle_event(&mut link, dir, event(2, [0; 8])).unwrap();
        assert_eq!(link.control().state(), GadgetState::EndpointsOpen);

        GadgetTransport::handle_event(&mut link, dir, event(3, [0; 8])).unwrap();
        assert_eq!(link.control().state(), GadgetState::Configured);
        assert!(!link.endpoints_open());

        // A raw SET_CONFIGURATION is honoured as well
        let set_config = SetupPacket::parse(&[0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        GadgetTransport::handle_event(&mut link, dir, FfsEvent::Setup(set_config)).unwrap();
        assert_eq!(link.control().state(), GadgetState::EndpointsOpen);
    }

    #[test]
    fn test_repeated_enable_reopens_endpoints() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        for name in ["ep0", "ep1", "ep2"] {
            fs::write(dir.join(name), b"").unwrap();
        }

        let ep0 = OpenOptions::new().read(true).write(true).open(dir.join("ep0")).unwrap();
        let mut control = HidControl::new(GAMEPAD);
        control.descriptors_installed();
        control.bound();
        let mut link = GadgetLink::new(ep0, control);

        GadgetTransport::handle_event(&mut link, dir, event(2, [0; 8])).unwrap();
        GadgetTransport::handle_event(&mut link, dir, event(2, [0; 8])).unwrap();
        assert_eq!(link.control().state(), GadgetState::EndpointsOpen);

        // The old pair is gone even when the new one can't be opened
        fs::remove_file(dir.join("ep2")).unwrap();
        assert!(GadgetTransport::handle_event(&mut link, dir, event(2, [0; 8])).is_err());
        assert!(!link.endpoints_open());
        assert_eq!(link.control().state(), GadgetState::Configured);
    }

    #[test]
    fn test_close_before_open_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let mut transport = GadgetTransport::new(
            temp_dir.path().join("usb_gadget"),
            "pad",
            "dummy_udc.0",
            temp_dir.path().join("ffs-pad"),
        );
        assert_eq!(transport.state(), GadgetState::Unbound);
        transport.close().unwrap();
        assert!(transport.poll().is_err());
    }

    #[test]
    fn test_busy_mount_leaves_tree_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let gadget = temp_dir.path().join("usb_gadget/pad");
        let mut transport = opened(&temp_dir, busy);

        let mut expected = transport.manager.progress().clone();
        assert_eq!(expected.bound_udc.as_deref(), Some("dummy_udc.0"));
        expected.bound_udc = None;

        let err = transport.close().unwrap_err();
        assert!(matches!(err, AppError::ResourceBusy(_)));
        assert!(!err.is_fatal());

        // Unbound and endpoints closed, but nothing removed
        assert_eq!(fs::read_to_string(gadget.join("UDC")).unwrap().trim(), "");
        assert_eq!(transport.state(), GadgetState::Unbound);
        assert!(transport.mounted);
        assert!(fs::symlink_metadata(gadget.join("configs/c.1/ffs.pad")).is_ok());
        assert_eq!(transport.manager.progress(), &expected);
    }

    #[test]
    fn test_busy_mount_keeps_unbind_failure() {
        let temp_dir = TempDir::new().unwrap();
        let mut transport = opened(&temp_dir, busy);

        // An attribute that can't be written
        let udc = temp_dir.path().join("usb_gadget/pad/UDC");
        fs::remove_file(&udc).unwrap();
        fs::create_dir(&udc).unwrap();

        let err = transport.close().unwrap_err();
        assert!(matches!(err, AppError::ConfigFs { .. }));
        assert!(err.is_fatal());
        assert!(transport.manager.progress().bound_udc.is_some());
    }

    #[test]
    fn test_teardown_order() {
        let temp_dir = TempDir::new().unwrap();
        let gadget = temp_dir.path().join("usb_gadget/pad");
        let mut transport = opened(&temp_dir, unmounted);

        // Link and function go first; c.1 still holds MaxPower
        let err = transport.close().unwrap_err();
        assert!(matches!(err, AppError::ConfigFs { op: "rmdir", .. }));
        assert!(!transport.mounted);
        let progress = transport.manager.progress().clone();
        assert!(!progress.linked && !progress.function);
        assert!(progress.config && progress.strings && progress.gadget);
        assert!(fs::symlink_metadata(gadget.join("configs/c.1/ffs.pad")).is_err());
        assert!(!gadget.join("functions/ffs.pad").exists());

        // Then c.1 and the strings, stopping at the gadget itself
        drop_attributes(&gadget);
        transport.close().unwrap_err();
        let progress = transport.manager.progress().clone();
        assert!(!progress.config && !progress.strings);
        assert!(progress.gadget);
        assert!(!gadget.join("configs/c.1").exists());
        assert!(!gadget.join("strings/0x409").exists());

        drop_default_groups(&gadget);
        transport.close().unwrap();
        assert!(!gadget.exists());
        assert_eq!(transport.manager.progress(), &Progress::default());

        // The mount point was not ours to remove
        assert!(temp_dir.path().join("ffs-pad").exists());
    }

    #[test]
    fn test_failed_mount_unwinds_setup() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("usb_gadget");
        let mount_point = temp_dir.path().join("ffs-pad");
        fs::create_dir_all(&root).unwrap();

        let mut transport = GadgetTransport::new(root.clone(), "pad", "dummy_udc.0", mount_point.clone());
        transport.mount_fs = no_functionfs;
        transport.umount_fs = busy;

        let err = transport.open().unwrap_err();
        assert!(matches!(err, AppError::DeviceNotFound(_)));
        assert_eq!(transport.state(), GadgetState::Unbound);

        // Never bound, so nothing was written to UDC
        let gadget = root.join("pad");
        assert!(!gadget.join("UDC").exists());
        assert_eq!(transport.manager.progress().bound_udc, None);

        // Removal still ran up to the first attribute-bearing directory
        assert!(!transport.manager.progress().linked);
        assert!(!transport.manager.progress().function);
        assert!(fs::symlink_metadata(gadget.join("configs/c.1/ffs.pad")).is_err());
        assert!(!mount_point.exists());
    }
}
