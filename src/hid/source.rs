//! State producers used by the relay binary
//!
//! Live capture is not part of this crate; the neutral stream stands in for
//! it so a replay can keep the console connected after it finishes.

use std::iter;
use std::path::Path;

use super::replay::ReplayReader;
use super::types::ControllerState;
use crate::error::Result;

/// A boxed stream of states
pub type StateSource = Box<dyn Iterator<Item = ControllerState> + Send>;

/// Endless stream of the neutral state
pub fn neutral() -> StateSource {
    Box::new(iter::repeat(ControllerState::default()))
}

/// Build the input stream: optional playback, then neutral input if
/// `dont_exit` is set or no playback was requested
pub fn build(playback: Option<&Path>, dont_exit: bool) -> Result<StateSource> {
    match playback {
        Some(path) => {
            let replay = ReplayReader::open(path)?;
            if dont_exit {
                Ok(Box::new(replay.chain(iter::repeat(ControllerState::default()))))
            } else {
                Ok(Box::new(replay))
            }
        }
        None => Ok(neutral()),
    }
}
