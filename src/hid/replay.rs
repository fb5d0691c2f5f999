//! Persisted state files: one hex frame per line, no header

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::Path;

use tracing::{debug, warn};

use super::types::ControllerState;
use crate::error::{AppError, Result};

/// Iterator over the states stored in a replay file
///
/// Malformed lines are dropped with a warning.
pub struct ReplayReader<R: BufRead> {
    lines: Lines<R>,
    line_no: usize,
    skipped: usize,
}

impl ReplayReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            AppError::DeviceNotFound(format!("replay file {}: {}", path.display(), e))
        })?;
        debug!("Replaying states from {}", path.display());
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> ReplayReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            skipped: 0,
        }
    }

    /// Number of malformed lines dropped so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<R: BufRead> Iterator for ReplayReader<R> {
    type Item = ControllerState;

    fn next(&mut self) -> Option<ControllerState> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!("Replay read failed at line {}: {}", self.line_no + 1, e);
                    return None;
                }
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            match ControllerState::decode_hex(&line) {
                Ok(state) => return Some(state),
                Err(e) => {
                    self.skipped += 1;
                    warn!("Dropping replay line {}: {}", self.line_no, e);
                }
            }
        }
    }
}

/// Appends every relayed state to a replay file
pub struct Recorder<W: Write> {
    out: W,
    written: u64,
}

impl Recorder<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        debug!("Recording states to {}", path.display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> Recorder<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn record(&mut self, state: &ControllerState) -> Result<()> {
        self.out.write_all(state.encode_hex().as_bytes())?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
