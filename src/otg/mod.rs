//! USB gadget plumbing
//!
//! ```text
//! GadgetManager (configfs tree lifecycle)
//!     └── FfsFunction (functionfs instance)
//! HidControl (ep0 requests, enumeration state)
//! AsyncEndpoint (kernel AIO on ep1/ep2)
//! ```
//!
//! Descriptor blobs are built by the pure functions in `descriptors`.

pub mod aio;
pub mod configfs;
pub mod control;
pub mod descriptors;
pub mod function;
pub mod manager;
pub mod report_desc;

pub use aio::{AsyncEndpoint, Direction};
pub use configfs::{ConfigNode, ConfigTree, NodeState, Value};
pub use control::{ControlAction, GadgetState, HidControl, SetupPacket};
pub use function::{FfsFunction, GadgetFunction};
pub use manager::GadgetManager;
pub use report_desc::{DeviceIdentity, GAMEPAD};
