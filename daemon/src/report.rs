//! F710 input report decoding
//!
//! Turns one raw interrupt report from the F710 (XInput mode) into a
//! [`ControllerState`]. Reports are full-state snapshots, so every decode
//! starts from the neutral state.
//!
//! ## Report layout
//! ```text
//! [2]  D-pad       bit0 up, bit1 down, bit2 left, bit3 right
//! [3]  Buttons     bit0 LB, bit1 RB, bit4 A, bit5 B, bit6 X, bit7 Y
//! [4]  LT          any of 0b0001_1111
//! [5]  RT          any of 0b0001_1101
//! [6]  Left X      [8]  Left Y
//! [10] Right X     [12] Right Y
//! ```
//!
//! SPDX-License-Identifier: GPL-3.0

use serde::Serialize;
use std::fmt;

/// Minimum number of bytes needed to decode a report
pub const REPORT_MIN_LEN: usize = 13;

/// Byte offsets into the report
pub mod offset {
    pub const DPAD: usize = 2;
    pub const BUTTONS: usize = 3;
    pub const LEFT_TRIGGER: usize = 4;
    pub const RIGHT_TRIGGER: usize = 5;
    pub const LEFT_X: usize = 6;
    pub const LEFT_Y: usize = 8;
    pub const RIGHT_X: usize = 10;
    pub const RIGHT_Y: usize = 12;
}

/// Bit masks within the button, trigger and D-pad bytes
pub mod mask {
    pub const LEFT_BUMPER: u8 = 1 << 0;
    pub const RIGHT_BUMPER: u8 = 1 << 1;
    pub const A: u8 = 1 << 4;
    pub const B: u8 = 1 << 5;
    pub const X: u8 = 1 << 6;
    pub const Y: u8 = 1 << 7;

    pub const LEFT_TRIGGER: u8 = 0b0001_1111;
    pub const RIGHT_TRIGGER: u8 = 0b0001_1101;

    pub const DPAD_UP: u8 = 1 << 0;
    pub const DPAD_DOWN: u8 = 1 << 1;
    pub const DPAD_LEFT: u8 = 1 << 2;
    pub const DPAD_RIGHT: u8 = 1 << 3;
}

/// Decoded controller state
///
/// `Default` is the safe state: every button released, every axis centred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ControllerState {
    /// LB
    pub left_bumper: bool,
    /// RB
    pub right_bumper: bool,
    /// LT, reported as a button
    pub left_trigger: bool,
    /// RT, reported as a button
    pub right_trigger: bool,
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
    pub dpad_up: bool,
    pub dpad_down: bool,
    pub dpad_left: bool,
    pub dpad_right: bool,
    /// Stick axes in [-1.0, 0.9921875]
    pub left_x: f32,
    pub left_y: f32,
    pub right_x: f32,
    pub right_y: f32,
}

impl ControllerState {
    /// The all-neutral state published whenever connectivity is lost
    pub const SAFE: ControllerState = ControllerState {
        left_bumper: false,
        right_bumper: false,
        left_trigger: false,
        right_trigger: false,
        a: false,
        b: false,
        x: false,
        y: false,
        dpad_up: false,
        dpad_down: false,
        dpad_left: false,
        dpad_right: false,
        left_x: 0.0,
        left_y: 0.0,
        right_x: 0.0,
        right_y: 0.0,
    };

    /// True if no button is pressed
    pub fn no_buttons_pressed(&self) -> bool {
        self.buttons().iter().all(|pressed| !pressed)
    }

    /// All twelve button flags in a fixed order
    pub fn buttons(&self) -> [bool; 12] {
        [
            self.left_bumper,
            self.right_bumper,
            self.left_trigger,
            self.right_trigger,
            self.a,
            self.b,
            self.x,
            self.y,
            self.dpad_up,
            self.dpad_down,
            self.dpad_left,
            self.dpad_right,
        ]
    }
}

/// Scale a raw stick byte to an axis value
///
/// 0 maps to -1.0, 128 to 0.0 and 255 to 0.9921875.
#[inline]
pub fn axis_from_byte(raw: u8) -> f32 {
    (raw as f32 / 128.0) - 1.0
}

/// Decode one raw report
pub fn decode_report(data: &[u8]) -> Result<ControllerState, DecodeError> {
    if data.len() < REPORT_MIN_LEN {
        return Err(DecodeError::TooShort { len: data.len() });
    }

    let buttons = data[offset::BUTTONS];
    let dpad = data[offset::DPAD];

    Ok(ControllerState {
        left_bumper: buttons & mask::LEFT_BUMPER != 0,
        right_bumper: buttons & mask::RIGHT_BUMPER != 0,
        left_trigger: data[offset::LEFT_TRIGGER] & mask::LEFT_TRIGGER != 0,
        right_trigger: data[offset::RIGHT_TRIGGER] & mask::RIGHT_TRIGGER != 0,
        a: buttons & mask::A != 0,
        b: buttons & mask::B != 0,
        x: buttons & mask::X != 0,
        y: buttons & mask::Y != 0,
        // Diagonals set two bits at once
        dpad_up: dpad & mask::DPAD_UP != 0,
        dpad_down: dpad & mask::DPAD_DOWN != 0,
        dpad_left: dpad & mask::DPAD_LEFT != 0,
        dpad_right: dpad & mask::DPAD_RIGHT != 0,
        left_x: axis_from_byte(data[offset::LEFT_X]),
        left_y: axis_from_byte(data[offset::LEFT_Y]),
        right_x: axis_from_byte(data[offset::RIGHT_X]),
        right_y: axis_from_byte(data[offset::RIGHT_Y]),
    })
}

/// Render a raw report the way it is exposed on `full-data`
pub fn format_raw(data: &[u8]) -> String {
    format!("{:?}", data)
}

/// Report decoding error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the fixed layout needs
    TooShort { len: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort { len } => write!(
                f,
                "report too short: {} bytes, need at least {}",
                len, REPORT_MIN_LEN
            ),
        }
    }
}

impl std::error::Error for DecodeError {}
