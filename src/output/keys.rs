use crate::pad::Direction;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Keys a player's panels can be mapped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKey {
    Up,
    Down,
    Left,
    Right,
    F1,
    F2,
    F3,
    F4,
    A,
    D,
    E,
    F,
    I,
    J,
    K,
    L,
    S,
    W,
}

impl OutputKey {
    /// Linux input event code (KEY_*)
    #[allow(dead_code)]
    pub fn linux_code(self) -> u16 {
        match self {
            Self::Up => 103,
            Self::Down => 108,
            Self::Left => 105,
            Self::Right => 106,
            Self::F1 => 59,
            Self::F2 => 60,
            Self::F3 => 61,
            Self::F4 => 62,
            Self::A => 30,
            Self::D => 32,
            Self::E => 18,
            Self::F => 33,
            Self::I => 23,
            Self::J => 36,
            Self::K => 37,
            Self::L => 38,
            Self::S => 31,
            Self::W => 17,
        }
    }

    /// Windows virtual key code (VK_*)
    #[allow(dead_code)]
    pub fn windows_vk(self) -> u16 {
        match self {
            Self::Up => 0x26,
            Self::Down => 0x28,
            Self::Left => 0x25,
            Self::Right => 0x27,
            Self::F1 => 0x70,
            Self::F2 => 0x71,
            Self::F3 => 0x72,
            Self::F4 => 0x73,
            Self::A => b'A' as u16,
            Self::D => b'D' as u16,
            Self::E => b'E' as u16,
            Self::F => b'F' as u16,
            Self::I => b'I' as u16,
            Self::J => b'J' as u16,
            Self::K => b'K' as u16,
            Self::L => b'L' as u16,
            Self::S => b'S' as u16,
            Self::W => b'W' as u16,
        }
    }
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Up => "Up",
            Self::Down => "Down",
            Self::Left => "Left",
            Self::Right => "Right",
            Self::F1 => "F1",
            Self::F2 => "F2",
            Self::F3 => "F3",
            Self::F4 => "F4",
            Self::A => "A",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
            Self::I => "I",
            Self::J => "J",
            Self::K => "K",
            Self::L => "L",
            Self::S => "S",
            Self::W => "W",
        };
        f.write_str(name)
    }
}

/// The four output keys of one player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadLayout {
    pub up: OutputKey,
    pub down: OutputKey,
    pub left: OutputKey,
    pub right: OutputKey,
}

impl PadLayout {
    pub fn arrows() -> Self {
        Self {
            up: OutputKey::Up,
            down: OutputKey::Down,
            left: OutputKey::Left,
            right: OutputKey::Right,
        }
    }

    pub fn function_keys() -> Self {
        Self {
            left: OutputKey::F1,
            down: OutputKey::F2,
            up: OutputKey::F3,
            right: OutputKey::F4,
        }
    }

    pub fn key_for(&self, direction: Direction) -> OutputKey {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }

    pub fn keys(&self) -> [OutputKey; 4] {
        [self.up, self.down, self.left, self.right]
    }

    pub fn describe(&self) -> String {
        format!(
            "left={} down={} up={} right={}",
            self.left, self.down, self.up, self.right
        )
    }
}
