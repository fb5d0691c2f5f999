//! Transport trait definition and backend selection

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ffs::GadgetTransport;
use super::gadgetfs::RawGadgetTransport;
use super::null::NullTransport;
use super::serial::SerialTransport;
use crate::config::{GadgetConfig, SerialConfig};
use crate::error::Result;
use crate::hid::ControllerState;

/// Where controller reports go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportKind {
    /// Microcontroller bridge on a serial line (see `SerialConfig`)
    #[default]
    Serial,
    /// configfs gadget with a FunctionFS function
    FunctionFs,
    /// Legacy gadgetfs character device
    GadgetFs,
    /// Discard everything
    Null,
}

impl TransportKind {
    /// Gadget/null keyword of a destination identifier; anything else is a
    /// serial device path
    pub fn from_keyword(destination: &str) -> Option<Self> {
        match destination {
            "functionfs" => Some(Self::FunctionFs),
            "gadgetfs" => Some(Self::GadgetFs),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    /// Get transport name as string
    pub fn name_str(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::FunctionFs => "functionfs",
            Self::GadgetFs => "gadgetfs",
            Self::Null => "null",
        }
    }
}

/// Report sink shared by all backends
///
/// The caller alternates `poll` (until it returns `true`) and `write`.
/// `poll` is the only call that may wait, and only for a bounded time.
pub trait Transport {
    /// Get transport name
    fn name(&self) -> &'static str;

    /// Acquire the device and bring the link up
    fn open(&mut self) -> Result<()>;

    /// Service the link; `true` when the next report can be written
    fn poll(&mut self) -> Result<bool>;

    /// Queue one report; never blocks
    fn write(&mut self, state: &ControllerState) -> Result<()>;

    /// Release everything `open` acquired, in reverse order
    fn close(&mut self) -> Result<()>;
}

/// The backend chosen at construction time
pub enum AnyTransport {
    Serial(SerialTransport),
    Gadget(GadgetTransport),
    RawGadget(RawGadgetTransport),
    Null(NullTransport),
}

impl AnyTransport {
    pub fn new(kind: &TransportKind, serial: &SerialConfig, gadget: &GadgetConfig) -> Self {
        match kind {
            TransportKind::Serial => Self::Serial(SerialTransport::new(
                &serial.port,
                serial.baud_rate,
                serial.read_timeout(),
            )),
            TransportKind::FunctionFs => Self::Gadget(GadgetTransport::new(
                gadget.configfs_root.clone(),
                &gadget.name,
                &gadget.udc,
                PathBuf::from(format!("/dev/ffs-{}", gadget.name)),
            )),
            TransportKind::GadgetFs => {
                Self::RawGadget(RawGadgetTransport::new(gadget.gadget_dev_dir.clone(), &gadget.udc))
            }
            TransportKind::Null => Self::Null(NullTransport::new()),
        }
    }

    fn inner(&mut self) -> &mut dyn Transport {
        match self {
            Self::Serial(t) => t,
            Self::Gadget(t) => t,
            Self::RawGadget(t) => t,
            Self::Null(t) => t,
        }
    }
}

impl Transport for AnyTransport {
    fn name(&self) -> &'static str {
        match self {
            Self::Serial(t) => t.name(),
            Self::Gadget(t) => t.name(),
            Self::RawGadget(t) => t.name(),
            Self::Null(t) => t.name(),
        }
    }

    fn open(&mut self) -> Result<()> {
        self.inner().open()
    }

    fn poll(&mut self) -> Result<bool> {
        self.inner().poll()
    }

    fn write(&mut self, state: &ControllerState) -> Result<()> {
        self.inner().write(state)
    }

    fn close(&mut self) -> Result<()> {
        self.inner().close()
    }
}
