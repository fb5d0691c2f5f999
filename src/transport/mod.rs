//! Report transports
//!
//! Every backend exposes the same contract: `poll` waits (bounded) until the
//! remote side can take another report, `write` only enqueues one.
//!
//! ```text
//! relay loop --> AnyTransport --+--> SerialTransport    (bridge MCU over UART)
//!                               +--> GadgetTransport    (configfs + functionfs)
//!                               +--> RawGadgetTransport (gadgetfs)
//!                               +--> NullTransport      (dry run)
//! ```

pub mod backend;
pub mod endpoints;
pub mod ffs;
pub mod gadgetfs;
pub mod null;
pub mod serial;

pub use backend::{AnyTransport, Transport, TransportKind};
pub use ffs::GadgetTransport;
pub use gadgetfs::RawGadgetTransport;
pub use null::NullTransport;
pub use serial::{Liveness, SerialStats, SerialTransport};
