use crate::output::PadLayout;
use crate::pad::{DeviceId, Direction, Player};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILENAME: &str = "padsplit_config.json";
/// Shortest report any decoder accepts
const MIN_REPORT_SIZE: usize = 8;

/// A calibrated pad remembered between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedBinding {
    pub device_id: DeviceId,
    pub player: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PadConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Only interfaces reporting this manufacturer string are used
    pub manufacturer: Option<String>,

    pub hold_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub read_timeout_ms: i32,
    pub command_poll_ms: u64,
    pub report_size: usize,
    /// Reports logged per pad with --raw
    pub raw_dump_limit: usize,

    /// Keyboard usage id -> panel. Placeholder values, check with --raw
    pub keyboard_codes: BTreeMap<u8, Direction>,
    /// Bit in byte 0 of a gamepad report -> panel
    pub bitmask_bits: BTreeMap<u8, Direction>,
    /// Joystick button code -> panel
    pub joystick_buttons: BTreeMap<u32, Direction>,

    /// Output keys for player 1 and player 2
    pub players: [PadLayout; 2],

    pub bindings: Vec<SavedBinding>,
}

impl Default for PadConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0x4D47,
            product_id: 0x5761,
            manufacturer: Some("MusicGame".to_string()),
            hold_interval_ms: 30,
            poll_interval_ms: 10,
            read_timeout_ms: 50,
            command_poll_ms: 100,
            report_size: 64,
            raw_dump_limit: 32,
            keyboard_codes: BTreeMap::from([
                (0x04, Direction::Left),  // a
                (0x16, Direction::Down),  // s
                (0x1A, Direction::Up),    // w
                (0x07, Direction::Right), // d
                (0x1B, Direction::Down),  // x
            ]),
            bitmask_bits: BTreeMap::from([
                (0x01, Direction::Up),
                (0x02, Direction::Down),
                (0x04, Direction::Left),
                (0x08, Direction::Right),
            ]),
            joystick_buttons: BTreeMap::from([
                (0, Direction::Left),
                (1, Direction::Down),
                (2, Direction::Up),
                (3, Direction::Right),
            ]),
            players: [PadLayout::arrows(), PadLayout::function_keys()],
            bindings: Vec::new(),
        }
    }
}

impl PadConfig {
    /// Loads from `path` or the default location. Falls back to defaults
    /// when the file is missing or broken.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str::<PadConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {:?}", path);
                        return config.clamped();
                    }
                    Err(e) => {
                        log::error!("Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    log::error!("Failed to read config file: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Raises zero or negative timings to 1 ms. A zero hold interval
    /// would spin the repeat timers and a negative read timeout blocks
    /// the readers until a report arrives.
    fn clamped(mut self) -> Self {
        for (name, value) in [
            ("hold_interval_ms", &mut self.hold_interval_ms),
            ("poll_interval_ms", &mut self.poll_interval_ms),
            ("command_poll_ms", &mut self.command_poll_ms),
        ] {
            if *value == 0 {
                log::warn!("{} must be at least 1, using 1", name);
                *value = 1;
            }
        }
        if self.read_timeout_ms < 1 {
            log::warn!("read_timeout_ms must be at least 1, using 1");
            self.read_timeout_ms = 1;
        }
        if self.report_size < MIN_REPORT_SIZE {
            log::warn!("report_size must be at least {}, using {}", MIN_REPORT_SIZE, MIN_REPORT_SIZE);
            self.report_size = MIN_REPORT_SIZE;
        }
        self
    }

    pub fn save(&self, path: Option<&Path>) -> anyhow::Result<()> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        log::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_FILENAME)
    }

    pub fn layout(&self, player: Player) -> &PadLayout {
        &self.players[player.index()]
    }

    pub fn hold_interval(&self) -> Duration {
        Duration::from_millis(self.hold_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn command_poll(&self) -> Duration {
        Duration::from_millis(self.command_poll_ms)
    }

    /// Saved HID bindings that name a valid player
    pub fn saved_bindings(&self) -> Vec<(DeviceId, Player)> {
        self.bindings
            .iter()
            .filter(|b| !b.device_id.is_joystick())
            .filter_map(|b| Player::from_number(b.player).map(|p| (b.device_id.clone(), p)))
            .collect()
    }

    /// Replaces the saved bindings. Joystick identities are renumbered
    /// on every start, so a set containing one is refused and the
    /// existing bindings stay.
    pub fn set_saved_bindings(&mut self, bindings: &[(DeviceId, Player)]) -> bool {
        if bindings.iter().any(|(device_id, _)| device_id.is_joystick()) {
            return false;
        }

        self.bindings = bindings
            .iter()
            .map(|(device_id, player)| SavedBinding {
                device_id: device_id.clone(),
                player: player.number(),
            })
            .collect();
        true
    }
}
