use super::{ButtonState, Direction};
use crate::config::PadConfig;
use std::collections::HashMap;

/// Offset of the first key slot in a boot keyboard report: [mods, reserved, k1..k6]
const KEY_SLOTS_START: usize = 2;
const KEYBOARD_REPORT_LEN: usize = 8;
const BITMASK_REPORT_MIN_LEN: usize = 4;

/// Layout of the raw reports a pad interface sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// 8 byte boot keyboard report, up to 6 key codes in bytes 2..8
    Keyboard,
    /// Gamepad report with one bit per panel in byte 0
    Bitmask,
}

/// Turns raw reports into the set of held directions.
///
/// Pure lookup tables, no device state. Unknown codes are ignored and
/// short reports decode to `None` so the caller drops them.
#[derive(Debug, Clone)]
pub struct ReportDecoder {
    keyboard_codes: HashMap<u8, Direction>,
    bitmask_bits: Vec<(u8, Direction)>,
    joystick_buttons: HashMap<u32, Direction>,
}

impl ReportDecoder {
    pub fn new(config: &PadConfig) -> Self {
        Self {
            keyboard_codes: config.keyboard_codes.iter().map(|(k, v)| (*k, *v)).collect(),
            bitmask_bits: config.bitmask_bits.iter().map(|(k, v)| (*k, *v)).collect(),
            joystick_buttons: config.joystick_buttons.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }

    pub fn decode(&self, format: ReportFormat, report: &[u8]) -> Option<ButtonState> {
        match format {
            ReportFormat::Keyboard => self.decode_keyboard(report),
            ReportFormat::Bitmask => self.decode_bitmask(report),
        }
    }

    pub fn decode_keyboard(&self, report: &[u8]) -> Option<ButtonState> {
        if report.len() < KEYBOARD_REPORT_LEN {
            return None;
        }

        Some(
            report[KEY_SLOTS_START..KEYBOARD_REPORT_LEN]
                .iter()
                .filter(|code| **code != 0)
                .filter_map(|code| self.keyboard_codes.get(code).copied())
                .collect(),
        )
    }

    pub fn decode_bitmask(&self, report: &[u8]) -> Option<ButtonState> {
        if report.len() < BITMASK_REPORT_MIN_LEN {
            return None;
        }

        let buttons = report[0];
        Some(
            self.bitmask_bits
                .iter()
                .filter(|(mask, _)| buttons & *mask != 0)
                .map(|(_, direction)| *direction)
                .collect(),
        )
    }

    /// Joystick pads report held buttons by code plus a D-pad hat
    pub fn decode_joystick<I>(&self, held_buttons: I, hat: (i8, i8)) -> ButtonState
    where
        I: IntoIterator<Item = u32>,
    {
        let mut state: ButtonState = held_buttons
            .into_iter()
            .filter_map(|code| self.joystick_buttons.get(&code).copied())
            .collect();

        if let Some(direction) = hat_direction(hat) {
            state.insert(direction);
        }

        state
    }
}

/// Horizontal hat wins over vertical, y is positive upwards
pub fn hat_direction((x, y): (i8, i8)) -> Option<Direction> {
    match (x, y) {
        (-1, _) => Some(Direction::Left),
        (1, _) => Some(Direction::Right),
        (_, 1) => Some(Direction::Up),
        (_, -1) => Some(Direction::Down),
        _ => None,
    }
}
