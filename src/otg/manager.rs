//! Gadget Manager - configfs provisioning and ordered teardown of the HID gadget

use tracing::{debug, info, warn};

use super::configfs::{ConfigNode, ConfigTree, Value};
use super::function::{FfsFunction, GadgetFunction};
use super::report_desc::{DeviceIdentity, MAX_POWER_MA};
use crate::error::{AppError, Result};

const LANG_DIR: &str = "strings/0x409";
const CONFIG_DIR: &str = "configs/c.1";

/// Which provisioning steps have completed
///
/// Teardown only undoes steps recorded here and clears each flag once the
/// step has been undone, so a teardown that stopped half-way can be resumed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Progress {
    pub gadget: bool,
    pub strings: bool,
    pub config: bool,
    pub function: bool,
    pub linked: bool,
    pub bound_udc: Option<String>,
}

/// One configfs gadget carrying a single FunctionFS function
pub struct GadgetManager {
    tree: ConfigTree,
    gadget_name: String,
    identity: DeviceIdentity,
    function: FfsFunction,
    progress: Progress,
}

impl GadgetManager {
    pub fn new(tree: ConfigTree, gadget_name: &str, identity: DeviceIdentity) -> Self {
        Self {
            tree,
            gadget_name: gadget_name.to_string(),
            identity,
            function: FfsFunction::new(gadget_name),
            progress: Progress::default(),
        }
    }

    pub fn gadget_name(&self) -> &str {
        &self.gadget_name
    }

    pub fn function(&self) -> &FfsFunction {
        &self.function
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    fn gadget(&self) -> ConfigNode {
        self.tree.get(&self.gadget_name)
    }

    fn config(&self) -> ConfigNode {
        self.gadget().child("configs").child("c.1")
    }

    pub fn gadget_exists(&self) -> bool {
        self.gadget().exists()
    }

    /// UDC the gadget is currently bound to, as reported by configfs
    pub fn bound_to(&self) -> Option<String> {
        self.gadget()
            .child("UDC")
            .state()
            .ok()
            .and_then(|s| s.text())
            .filter(|udc| !udc.is_empty())
    }

    fn set(&self, path: &str, value: Value<'_>) -> Result<()> {
        self.tree.set(format!("{}/{}", self.gadget_name, path), value)
    }

    /// Create the gadget tree: device attributes, strings, configuration and
    /// the function linked into it
    pub fn setup(&mut self) -> Result<()> {
        info!("Setting up USB gadget: {}", self.gadget_name);

        if !self.tree.root().exists() {
            return Err(AppError::DeviceNotFound(format!(
                "configfs not available at {}",
                self.tree.root().path().display()
            )));
        }

        if self.gadget_exists() {
            if let Some(udc) = self.bound_to() {
                return Err(AppError::BindFailure {
                    udc,
                    reason: format!("gadget {} is already bound", self.gadget_name),
                });
            }
            warn!("Gadget {} exists but is not bound, reusing it", self.gadget_name);
        }

        self.gadget().mkdir()?;
        self.progress.gadget = true;

        self.set_device_descriptors()?;

        self.set(LANG_DIR, Value::Directory)?;
        self.progress.strings = true;
        self.set(&format!("{}/manufacturer", LANG_DIR), Value::Text(&self.identity.manufacturer))?;
        self.set(&format!("{}/product", LANG_DIR), Value::Text(&self.identity.product))?;
        debug!("Created USB strings");

        self.set(CONFIG_DIR, Value::Directory)?;
        self.progress.config = true;
        self.set(
            &format!("{}/MaxPower", CONFIG_DIR),
            Value::Text(&MAX_POWER_MA.to_string()),
        )?;
        debug!("Created configuration c.1");

        let gadget = self.gadget();
        self.function.create(&gadget)?;
        self.progress.function = true;
        self.function.link(&self.config(), &gadget)?;
        self.progress.linked = true;

        info!("USB gadget setup complete");
        Ok(())
    }

    fn set_device_descriptors(&self) -> Result<()> {
        let attrs = [
            ("idVendor", format!("0x{:04x}", self.identity.vendor_id)),
            ("idProduct", format!("0x{:04x}", self.identity.product_id)),
            ("bcdUSB", format!("0x{:04x}", self.identity.bcd_usb)),
            ("bcdDevice", format!("0x{:04x}", self.identity.bcd_device)),
            ("bDeviceClass", "0x0".to_string()),
            ("bDeviceSubClass", "0x0".to_string()),
            ("bDeviceProtocol", "0x0".to_string()),
        ];
        for (name, value) in &attrs {
            self.set(name, Value::Text(value))?;
        }
        debug!("Set device descriptors");
        Ok(())
    }

    /// Bind the gadget to `udc`; the host starts enumerating right away
    pub fn bind(&mut self, udc: &str) -> Result<()> {
        info!("Binding to {}", udc);
        self.set("UDC", Value::Text(udc)).map_err(|e| AppError::BindFailure {
            udc: udc.to_string(),
            reason: e.to_string(),
        })?;
        self.progress.bound_udc = Some(udc.to_string());
        Ok(())
    }

    /// Release the UDC; no-op if we never bound
    pub fn unbind(&mut self) -> Result<()> {
        if let Some(udc) = self.progress.bound_udc.as_deref() {
            debug!("Unbinding from {}", udc);
            self.set("UDC", Value::Text(""))?;
            self.progress.bound_udc = None;
            info!("Unbound gadget from UDC");
        }
        Ok(())
    }

    /// Remove the gadget tree in reverse creation order
    ///
    /// Must run after [`unbind`](Self::unbind) and after the function's
    /// mount is gone. Stops at the first failing step.
    pub fn remove(&mut self) -> Result<()> {
        if self.progress.bound_udc.is_some() {
            return Err(AppError::Internal(
                "gadget must be unbound before it is removed".to_string(),
            ));
        }

        let gadget = self.gadget();
        let config = self.config();

        if self.progress.linked {
            self.function.unlink(&config)?;
            self.progress.linked = false;
        }
        if self.progress.function {
            self.function.cleanup(&gadget)?;
            self.progress.function = false;
        }
        if self.progress.config {
            self.tree.delete(format!("{}/{}", self.gadget_name, CONFIG_DIR))?;
            self.progress.config = false;
        }
        if self.progress.strings {
            self.tree.delete(format!("{}/{}", self.gadget_name, LANG_DIR))?;
            self.progress.strings = false;
        }
        if self.progress.gadget {
            gadget.remove()?;
            self.progress.gadget = false;
        }

        info!("USB gadget {} removed", self.gadget_name);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{drop_attributes, drop_default_groups};
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn manager(root: &Path) -> GadgetManager {
        GadgetManager::new(ConfigTree::new(root), "pad", DeviceIdentity::default())
    }

    #[test]
    fn test_setup_writes_tree() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = manager(temp_dir.path());
        manager.setup().unwrap();

        let tree = ConfigTree::new(temp_dir.path());
        let text = |p: &str| tree.get(p).state().unwrap().text().unwrap();
        assert_eq!(text("pad/idVendor"), "0x0f0d");
        assert_eq!(text("pad/idProduct"), "0x00c1");
        assert_eq!(text("pad/bcdDevice"), "0x0572");
        assert_eq!(text("pad/strings/0x409/manufacturer"), "HORI CO.,LTD.");
        assert_eq!(text("pad/strings/0x409/product"), "HORIPAD S");
        assert_eq!(text("pad/configs/c.1/MaxPower"), "250");

        let link = tree.get("pad/configs/c.1/ffs.pad");
        assert_eq!(
            fs::read_link(link.path()).unwrap(),
            temp_dir.path().join("pad/functions/ffs.pad")
        );
        assert!(manager.progress().linked);
    }

    #[test]
    fn test_bind_and_unbind() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = manager(temp_dir.path());
        manager.setup().unwrap();

        manager.bind("dummy_udc.0").unwrap();
        assert_eq!(manager.bound_to().as_deref(), Some("dummy_udc.0"));

        // A second instance refuses a bound gadget
        let mut other = GadgetManager::new(
            ConfigTree::new(temp_dir.path()),
            "pad",
            DeviceIdentity::default(),
        );
        assert!(matches!(other.setup(), Err(AppError::BindFailure { .. })));

        // Removal is refused while bound
        assert!(manager.remove().is_err());

        manager.unbind().unwrap();
        assert_eq!(manager.bound_to(), None);
        assert_eq!(manager.progress().bound_udc, None);
    }

    #[test]
    fn test_remove_stops_at_non_empty_node_and_resumes() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = manager(temp_dir.path());
        manager.setup().unwrap();

        // MaxPower still sits in c.1 on a plain filesystem
        let err = manager.remove().unwrap_err();
        assert!(matches!(err, AppError::ConfigFs { op: "rmdir", .. }));
        assert!(!manager.progress().linked);
        assert!(!manager.progress().function);
        assert!(manager.progress().config);
        assert!(manager.gadget_exists());

        drop_attributes(&temp_dir.path().join("pad"));
        let err = manager.remove().unwrap_err();
        assert!(matches!(err, AppError::ConfigFs { op: "rmdir", .. }));
        assert!(!manager.progress().config);
        assert!(!manager.progress().strings);
        assert!(manager.progress().gadget);

        drop_default_groups(&temp_dir.path().join("pad"));
        manager.remove().unwrap();
        assert!(!manager.gadget_exists());
        assert_eq!(manager.progress(), &Progress::default());
    }

    #[test]
    fn test_remove_without_setup_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = manager(temp_dir.path());
        manager.remove().unwrap();
        manager.unbind().unwrap();
    }
}
