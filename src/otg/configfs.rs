//! ConfigFS tree operations for USB Gadget
//!
//! A [`ConfigTree`] maps a closed set of node operations onto the
//! configfs pseudo-filesystem:
//!
//! | operation            | filesystem primitive              |
//! |----------------------|-----------------------------------|
//! | `write_scalar`       | create-or-truncate, single write  |
//! | `link_child`         | symlink (replaces existing link)  |
//! | `mkdir`              | mkdir -p                          |
//! | `remove`             | rmdir for directories, else unlink|
//!
//! Writing below a missing node creates the missing parent directories
//! first, since the kernel does not lay out a gadget tree in advance.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{AppError, Result};

/// ConfigFS base path for USB gadgets
pub const CONFIGFS_PATH: &str = "/sys/kernel/config/usb_gadget";

/// Find available UDC (USB Device Controller)
pub fn find_udc() -> Option<String> {
    let udc_path = Path::new("/sys/class/udc");
    if !udc_path.exists() {
        return None;
    }

    fs::read_dir(udc_path)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .next()
}

/// Value assigned to a node by [`ConfigTree::set`]
#[derive(Debug, Clone, Copy)]
pub enum Value<'a> {
    /// Text attribute, written newline-terminated in one syscall
    Text(&'a str),
    /// Binary attribute, written as-is
    Bytes(&'a [u8]),
    /// Empty directory
    Directory,
    /// Symlink to another node
    Link(&'a ConfigNode),
}

/// What currently sits at a node's path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Missing,
    Directory,
    Attribute(Vec<u8>),
}

impl NodeState {
    pub fn is_present(&self) -> bool {
        !matches!(self, NodeState::Missing)
    }

    /// Attribute content as trimmed text
    pub fn text(&self) -> Option<String> {
        match self {
            NodeState::Attribute(bytes) => Some(String::from_utf8_lossy(bytes).trim().to_string()),
            _ => None,
        }
    }
}

/// Handle to one path inside a configfs-style tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigNode {
    path: PathBuf,
}

impl ConfigNode {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn child(&self, name: &str) -> ConfigNode {
        ConfigNode::new(self.path.join(name))
    }

    /// Inspect the node, following symlinks
    pub fn state(&self) -> Result<NodeState> {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(NodeState::Missing),
            Err(e) => return Err(AppError::configfs(&self.path, "stat", e)),
        };

        if meta.is_dir() {
            Ok(NodeState::Directory)
        } else {
            fs::read(&self.path)
                .map(NodeState::Attribute)
                .map_err(|e| AppError::configfs(&self.path, "read", e))
        }
    }

    pub fn exists(&self) -> bool {
        fs::symlink_metadata(&self.path).is_ok()
    }

    /// Create-or-truncate and write `data` in a single write
    ///
    /// sysfs/configfs attributes process the value on the first write(),
    /// so the complete buffer must go out in one call.
    pub fn write_scalar(&self, data: &[u8]) -> Result<()> {
        self.vivify_parent()?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| AppError::configfs(&self.path, "open", e))?;

        file.write_all(data)
            .map_err(|e| AppError::configfs(&self.path, "write", e))?;
        file.flush()
            .map_err(|e| AppError::configfs(&self.path, "flush", e))?;

        trace!("Wrote {} bytes to {}", data.len(), self.path.display());
        Ok(())
    }

    /// Write a text attribute, newline-terminated
    pub fn write_text(&self, content: &str) -> Result<()> {
        if content.ends_with('\n') {
            self.write_scalar(content.as_bytes())
        } else {
            let mut buf = Vec::with_capacity(content.len() + 1);
            buf.extend_from_slice(content.as_bytes());
            buf.push(b'\n');
            self.write_scalar(&buf)
        }
    }

    /// Make `target` reachable as `self/name`; an existing link is replaced
    pub fn link_child(&self, name: &str, target: &ConfigNode) -> Result<()> {
        self.mkdir()?;
        let link = self.path.join(name);

        match std::os::unix::fs::symlink(&target.path, &link) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                fs::remove_file(&link).map_err(|e| AppError::configfs(&link, "unlink", e))?;
                std::os::unix::fs::symlink(&target.path, &link)
                    .map_err(|e| AppError::configfs(&link, "symlink", e))?;
            }
            Err(e) => return Err(AppError::configfs(&link, "symlink", e)),
        }

        trace!("Linked {} -> {}", link.display(), target.path.display());
        Ok(())
    }

    /// Create the directory (and missing parents); no-op if it already is one
    pub fn mkdir(&self) -> Result<()> {
        fs::create_dir_all(&self.path).map_err(|e| AppError::configfs(&self.path, "mkdir", e))
    }

    /// rmdir for directories, unlink for everything else (symlinks included)
    ///
    /// Directories must be empty: children are never removed implicitly.
    pub fn remove(&self) -> Result<()> {
        let meta = fs::symlink_metadata(&self.path)
            .map_err(|e| AppError::configfs(&self.path, "lstat", e))?;

        if meta.is_dir() {
            fs::remove_dir(&self.path).map_err(|e| AppError::configfs(&self.path, "rmdir", e))
        } else {
            fs::remove_file(&self.path).map_err(|e| AppError::configfs(&self.path, "unlink", e))
        }
    }

    fn vivify_parent(&self) -> Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.exists() => fs::create_dir_all(parent)
                .map_err(|e| AppError::configfs(parent, "mkdir", e)),
            _ => Ok(()),
        }
    }
}

/// A configfs-style tree rooted at one directory
#[derive(Debug, Clone)]
pub struct ConfigTree {
    root: ConfigNode,
}

impl ConfigTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: ConfigNode::new(root),
        }
    }

    pub fn root(&self) -> &ConfigNode {
        &self.root
    }

    /// Node at `path`, relative to the tree root
    pub fn get(&self, path: impl AsRef<Path>) -> ConfigNode {
        ConfigNode::new(self.root.path.join(path))
    }

    pub fn set(&self, path: impl AsRef<Path>, value: Value<'_>) -> Result<()> {
        let path = path.as_ref();
        let node = self.get(path);

        match value {
            Value::Text(text) => node.write_text(text),
            Value::Bytes(bytes) => node.write_scalar(bytes),
            Value::Directory => node.mkdir(),
            Value::Link(target) => {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| AppError::Internal(format!("invalid link name: {}", path.display())))?;
                let parent = path.parent().map(|p| self.get(p)).unwrap_or_else(|| self.root.clone());
                parent.link_child(name, target)
            }
        }
    }

    pub fn delete(&self, path: impl AsRef<Path>) -> Result<()> {
        self.get(path).remove()
    }
}
