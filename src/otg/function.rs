//! USB Gadget function nodes

use crate::error::Result;

use super::configfs::ConfigNode;

/// A function instance living under `<gadget>/functions`
pub trait GadgetFunction: Send + Sync {
    /// Instance directory name (e.g., "ffs.padlink")
    fn name(&self) -> &str;

    /// Create the function directory
    fn create(&self, gadget: &ConfigNode) -> Result<()>;

    /// Reference the function from a configuration
    fn link(&self, config: &ConfigNode, gadget: &ConfigNode) -> Result<()>;

    fn unlink(&self, config: &ConfigNode) -> Result<()>;

    /// Remove the function directory
    fn cleanup(&self, gadget: &ConfigNode) -> Result<()>;
}

/// FunctionFS function: descriptors and requests are handled from userspace
/// through the `functionfs` mount named after the instance
#[derive(Debug, Clone)]
pub struct FfsFunction {
    instance: String,
    name: String,
}

impl FfsFunction {
    pub fn new(instance: &str) -> Self {
        Self {
            instance: instance.to_string(),
            name: format!("ffs.{}", instance),
        }
    }

    /// Device name to pass to `mount -t functionfs`
    pub fn instance(&self) -> &str {
        &self.instance
    }

    fn node(&self, gadget: &ConfigNode) -> ConfigNode {
        gadget.child("functions").child(&self.name)
    }
}

impl GadgetFunction for FfsFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, gadget: &ConfigNode) -> Result<()> {
        self.node(gadget).mkdir()
    }

    fn link(&self, config: &ConfigNode, gadget: &ConfigNode) -> Result<()> {
        config.link_child(&self.name, &self.node(gadget))
    }

    fn unlink(&self, config: &ConfigNode) -> Result<()> {
        let link = config.child(&self.name);
        if link.exists() {
            link.remove()?;
        }
        Ok(())
    }

    fn cleanup(&self, gadget: &ConfigNode) -> Result<()> {
        let node = self.node(gadget);
        if node.exists() {
            node.remove()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ffs_function_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let gadget = ConfigNode::new(temp_dir.path().join("g1"));
        let config = gadget.child("configs").child("c.1");
        let func = FfsFunction::new("pad");

        assert_eq!(func.name(), "ffs.pad");
        assert_eq!(func.instance(), "pad");

        func.create(&gadget).unwrap();
        func.link(&config, &gadget).unwrap();
        assert!(config.child("ffs.pad").exists());

        // Link first, then the directory it points at
        func.unlink(&config).unwrap();
        func.cleanup(&gadget).unwrap();
        assert!(!gadget.child("functions").child("ffs.pad").exists());

        // Idempotent once gone
        func.unlink(&config).unwrap();
        func.cleanup(&gadget).unwrap();
    }
}
