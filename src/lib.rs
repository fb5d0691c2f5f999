//! padlink - relay controller state to a game console
//!
//! States are carried either to a microcontroller bridge over a serial line
//! or straight to the console by emulating a USB gamepad through the Linux
//! USB gadget interfaces (configfs + functionfs, or gadgetfs).

pub mod config;
pub mod error;
pub mod hid;
pub mod otg;
pub mod relay;
pub mod transport;

pub use error::{AppError, Result};
pub use relay::{Relay, RelayStats};
