//! Controller state and its wire codec
//!
//! Wire format (little-endian):
//! ```text
//! ┌──────────────┬─────┬────┬────┬────┬────┐
//! │ buttons: u16 │ hat │ lx │ ly │ rx │ ry │
//! └──────────────┴─────┴────┴────┴────┴────┘
//! ```
//! The text form is the lowercase hex of those bytes followed by `\n`.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign, Not};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Encoded frame length in bytes: buttons (2) + hat (1) + four axes
pub const FRAME_LEN: usize = 7;

/// Axis center value
pub const AXIS_CENTER: u8 = 128;

/// Axis value used by a freshly constructed state
pub const AXIS_NEUTRAL: u8 = 127;

/// Hat switch direction, clockwise from up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Hat {
    Up = 0,
    UpRight = 1,
    Right = 2,
    DownRight = 3,
    Down = 4,
    DownLeft = 5,
    Left = 6,
    UpLeft = 7,
    Neutral = 8,
}

impl TryFrom<u8> for Hat {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Hat::Up,
            1 => Hat::UpRight,
            2 => Hat::Right,
            3 => Hat::DownRight,
            4 => Hat::Down,
            5 => Hat::DownLeft,
            6 => Hat::Left,
            7 => Hat::UpLeft,
            8 => Hat::Neutral,
            other => {
                return Err(AppError::MalformedFrame(format!(
                    "hat value {} out of range 0..=8",
                    other
                )))
            }
        })
    }
}

impl From<Hat> for u8 {
    fn from(hat: Hat) -> Self {
        hat as u8
    }
}

/// One controller snapshot
///
/// `hat` is kept as the raw byte so that every frame decodes; use
/// [`ControllerState::hat`] or [`ControllerState::validate`] when the
/// direction must be in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerState {
    /// Button bitmask, bit order fixed by the report descriptor
    pub buttons: u16,
    /// Hat direction code (8 = neutral)
    pub hat: u8,
    /// Axes: lx, ly, rx, ry
    pub axes: [u8; 4],
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new(0, Hat::Neutral as u8, [AXIS_NEUTRAL; 4])
    }
}

impl ControllerState {
    pub const fn new(buttons: u16, hat: u8, axes: [u8; 4]) -> Self {
        Self { buttons, hat, axes }
    }

    /// State with every bit set
    pub const fn all() -> Self {
        Self::new(0xffff, 0xff, [0xff; 4])
    }

    /// State with every bit clear
    pub const fn none() -> Self {
        Self::new(0, 0, [0; 4])
    }

    pub fn with_buttons(mut self, buttons: u16) -> Self {
        self.buttons = buttons;
        self
    }

    pub fn with_hat(mut self, hat: Hat) -> Self {
        self.hat = hat.into();
        self
    }

    pub fn with_left_stick(mut self, x: u8, y: u8) -> Self {
        self.axes[0] = x;
        self.axes[1] = y;
        self
    }

    pub fn with_right_stick(mut self, x: u8, y: u8) -> Self {
        self.axes[2] = x;
        self.axes[3] = y;
        self
    }

    pub fn lx(&self) -> u8 {
        self.axes[0]
    }

    pub fn ly(&self) -> u8 {
        self.axes[1]
    }

    pub fn rx(&self) -> u8 {
        self.axes[2]
    }

    pub fn ry(&self) -> u8 {
        self.axes[3]
    }

    /// Checked hat direction
    pub fn hat(&self) -> Result<Hat> {
        Hat::try_from(self.hat)
    }

    /// Strict validation for consumers that need an in-range hat
    pub fn validate(&self) -> Result<()> {
        self.hat().map(|_| ())
    }

    /// Encode to the wire frame
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let [b0, b1] = self.buttons.to_le_bytes();
        let [lx, ly, rx, ry] = self.axes;
        [b0, b1, self.hat, lx, ly, rx, ry]
    }

    /// Decode a wire frame
    ///
    /// Total over the `FRAME_LEN`-byte domain; only the length is checked.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let frame: &[u8; FRAME_LEN] = bytes.try_into().map_err(|_| {
            AppError::MalformedFrame(format!(
                "expected {} bytes, got {}",
                FRAME_LEN,
                bytes.len()
            ))
        })?;

        Ok(Self {
            buttons: u16::from_le_bytes([frame[0], frame[1]]),
            hat: frame[2],
            axes: [frame[3], frame[4], frame[5], frame[6]],
        })
    }

    /// Lowercase hex of the frame, without line terminator
    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    /// Newline-terminated hex line, as sent over serial and stored in replay files
    pub fn encode_hex(&self) -> String {
        let mut line = self.to_hex();
        line.push('\n');
        line
    }

    /// Decode a hex line; surrounding whitespace (including the newline) is ignored
    pub fn decode_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text.trim())
            .map_err(|e| AppError::MalformedFrame(format!("invalid hex frame: {}", e)))?;
        Self::decode(&bytes)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "buttons=0x{:04x} hat=0x{:x} lx=0x{:x} ly=0x{:x} rx=0x{:x} ry=0x{:x}",
            self.buttons, self.hat, self.axes[0], self.axes[1], self.axes[2], self.axes[3]
        )
    }
}

fn zip_axes(a: [u8; 4], b: [u8; 4], op: impl Fn(u8, u8) -> u8) -> [u8; 4] {
    [op(a[0], b[0]), op(a[1], b[1]), op(a[2], b[2]), op(a[3], b[3])]
}

impl BitAnd for ControllerState {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self::new(
            self.buttons & rhs.buttons,
            self.hat & rhs.hat,
            zip_axes(self.axes, rhs.axes, |a, b| a & b),
        )
    }
}

impl BitOr for ControllerState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::new(
            self.buttons | rhs.buttons,
            self.hat | rhs.hat,
            zip_axes(self.axes, rhs.axes, |a, b| a | b),
        )
    }
}

impl BitXor for ControllerState {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self {
        Self::new(
            self.buttons ^ rhs.buttons,
            self.hat ^ rhs.hat,
            zip_axes(self.axes, rhs.axes, |a, b| a ^ b),
        )
    }
}

impl Not for ControllerState {
    type Output = Self;

    fn not(self) -> Self {
        Self::new(!self.buttons, !self.hat, self.axes.map(|a| !a))
    }
}

impl BitAndAssign for ControllerState {
    fn bitand_assign(&mut self, rhs: Self) {
        *self = *self & rhs;
    }
}

impl BitOrAssign for ControllerState {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

impl BitXorAssign for ControllerState {
    fn bitxor_assign(&mut self, rhs: Self) {
        *self = *self ^ rhs;
    }
}
