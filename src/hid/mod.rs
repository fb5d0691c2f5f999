//! Controller state model
//!
//! `ControllerState` is the payload every transport carries. States come
//! from a producer (a replay file, or the neutral idle stream) and can be
//! recorded to the same line-oriented format they are replayed from.

pub mod replay;
pub mod source;
pub mod types;

pub use replay::{Recorder, ReplayReader};
pub use source::StateSource;
pub use types::{ControllerState, Hat, FRAME_LEN};
