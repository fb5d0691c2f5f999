use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::otg::configfs::CONFIGFS_PATH;
use crate::transport::gadgetfs::GADGETFS_PATH;
use crate::transport::serial::DEFAULT_READ_TIMEOUT_MS;
use crate::transport::TransportKind;

/// Main relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Where reports go
    pub transport: TransportKind,
    /// USB gadget settings (functionfs and gadgetfs transports)
    pub gadget: GadgetConfig,
    /// Serial bridge settings
    pub serial: SerialConfig,
    /// Recording and playback
    pub replay: ReplayConfig,
}

/// USB gadget configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GadgetConfig {
    /// Gadget directory name under the configfs root
    pub name: String,
    /// UDC (USB Device Controller) to bind to; empty picks the first one
    pub udc: String,
    /// configfs usb_gadget directory
    pub configfs_root: PathBuf,
    /// gadgetfs mount point
    pub gadget_dev_dir: PathBuf,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            name: "padlink".to_string(),
            udc: "dummy_udc.0".to_string(),
            configfs_root: PathBuf::from(CONFIGFS_PATH),
            gadget_dev_dir: PathBuf::from(GADGETFS_PATH),
        }
    }
}

/// Serial bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device path
    pub port: String,
    pub baud_rate: u32,
    /// How long `poll` waits for a status byte
    pub read_timeout_ms: u64,
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

/// Recording and playback configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplayConfig {
    /// Append every relayed state to this file
    pub record: Option<PathBuf>,
    /// Replay states from this file
    pub playback: Option<PathBuf>,
    /// Keep relaying neutral input once playback ends
    pub dont_exit: bool,
}
