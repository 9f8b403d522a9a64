mod keys;
#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
mod uinput_ffi;
#[cfg(windows)]
mod windows;

pub use keys::*;

use crate::error::PadError;
use crate::hold::HoldSink;
use crate::pad::{Direction, Player};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Platform capability that turns a player's pressed keys into OS input
pub trait KeyInjector: Send {
    /// Send the complete set of currently pressed keys
    fn send_pressed(&mut self, pressed: &BTreeSet<OutputKey>) -> anyhow::Result<()>;
    /// Autorepeat for a key that stays down
    fn repeat(&mut self, key: OutputKey) -> anyhow::Result<()>;
}

/// Creates the injector for one player on this platform
pub fn create_injector(player: Player, layout: &PadLayout) -> Result<Box<dyn KeyInjector>, PadError> {
    #[cfg(target_os = "linux")]
    {
        linux::VirtualKeyboard::new(player, layout)
            .map(|kb| Box::new(kb) as Box<dyn KeyInjector>)
            .map_err(|e| PadError::InjectionUnavailable(e.to_string()))
    }
    #[cfg(windows)]
    {
        let _ = layout;
        log::info!("Using SendInput key events for {}", player);
        Ok(Box::new(windows::SendInputKeyboard::default()))
    }
    #[cfg(not(any(target_os = "linux", windows)))]
    {
        let _ = (player, layout);
        Err(PadError::InjectionUnavailable(
            "no virtual keyboard backend on this platform".to_string(),
        ))
    }
}

struct PlayerKeys {
    pressed: BTreeSet<OutputKey>,
    injector: Box<dyn KeyInjector>,
}

struct PlayerOutput {
    player: Player,
    layout: PadLayout,
    keys: Mutex<PlayerKeys>,
    failed: AtomicBool,
}

impl PlayerOutput {
    fn report_failure(&self, error: anyhow::Error) {
        if !self.failed.swap(true, Ordering::SeqCst) {
            log::error!("Failed to send keys for {}: {}", self.player, error);
        } else {
            log::debug!("Failed to send keys for {}: {}", self.player, error);
        }
    }

    fn update(&self, direction: Direction, pressed: bool) {
        let key = self.layout.key_for(direction);
        let Ok(mut keys) = self.keys.lock() else {
            return;
        };

        if pressed {
            keys.pressed.insert(key);
        } else {
            keys.pressed.remove(&key);
        }

        let PlayerKeys { pressed, injector } = &mut *keys;
        if let Err(e) = injector.send_pressed(pressed) {
            self.report_failure(e);
        }
    }

    fn repeat(&self, direction: Direction) {
        let key = self.layout.key_for(direction);
        let Ok(mut keys) = self.keys.lock() else {
            return;
        };

        // released between the tick and now
        if !keys.pressed.contains(&key) {
            return;
        }
        if let Err(e) = keys.injector.repeat(key) {
            self.report_failure(e);
        }
    }

    fn release_all(&self) {
        let Ok(mut keys) = self.keys.lock() else {
            return;
        };
        if keys.pressed.is_empty() {
            return;
        }

        keys.pressed.clear();
        let PlayerKeys { pressed, injector } = &mut *keys;
        if let Err(e) = injector.send_pressed(pressed) {
            self.report_failure(e);
        }
    }
}

/// Synthetic keyboard output, one injector per player
pub struct KeyboardEmitter {
    players: Vec<PlayerOutput>,
}

impl KeyboardEmitter {
    pub fn new(layouts: [PadLayout; 2], injectors: [Box<dyn KeyInjector>; 2]) -> Self {
        let players = Player::ALL
            .into_iter()
            .zip(layouts)
            .zip(injectors)
            .map(|((player, layout), injector)| PlayerOutput {
                player,
                layout,
                keys: Mutex::new(PlayerKeys {
                    pressed: BTreeSet::new(),
                    injector,
                }),
                failed: AtomicBool::new(false),
            })
            .collect();
        Self { players }
    }

    fn player(&self, player: Player) -> &PlayerOutput {
        &self.players[player.index()]
    }
}

/// Where pad events end up
pub enum Emitter {
    /// Log lines only
    Log,
    Keyboard(KeyboardEmitter),
}

impl Emitter {
    /// Keyboard output when `synthetic` is set and the platform allows it,
    /// logging otherwise
    pub fn select(synthetic: bool, layouts: [PadLayout; 2]) -> Self {
        if !synthetic {
            return Self::Log;
        }

        match Self::keyboard(layouts) {
            Ok(emitter) => emitter,
            Err(e) => {
                log::warn!("{}. Falling back to logging pad events", e);
                Self::Log
            }
        }
    }

    pub fn keyboard(layouts: [PadLayout; 2]) -> Result<Self, PadError> {
        let first = create_injector(Player::One, &layouts[0])?;
        let second = create_injector(Player::Two, &layouts[1])?;
        Ok(Self::Keyboard(KeyboardEmitter::new(layouts, [first, second])))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Keyboard(_) => "keyboard",
        }
    }

    pub fn emit(&self, player: Player, direction: Direction, pressed: bool) {
        let state = if pressed { "DOWN" } else { "UP" };
        match self {
            Self::Log => log::info!("P{}: {} {}", player.number(), direction, state),
            Self::Keyboard(keyboard) => {
                log::debug!("P{}: {} {}", player.number(), direction, state);
                keyboard.player(player).update(direction, pressed);
            }
        }
    }

    pub fn repeat(&self, player: Player, direction: Direction) {
        match self {
            Self::Log => log::debug!("P{}: {} HOLD", player.number(), direction),
            Self::Keyboard(keyboard) => keyboard.player(player).repeat(direction),
        }
    }

    /// Lifts every key still down on every player
    pub fn release_all(&self) {
        if let Self::Keyboard(keyboard) = self {
            for output in &keyboard.players {
                output.release_all();
            }
        }
    }
}

impl HoldSink for Emitter {
    fn press(&self, player: Player, direction: Direction) {
        self.emit(player, direction, true);
    }

    fn repeat(&self, player: Player, direction: Direction) {
        Emitter::repeat(self, player, direction);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Sent {
        Report(Player, Vec<OutputKey>),
        Repeat(Player, OutputKey),
    }

    /// Records what would have reached the OS
    pub(crate) struct RecordingInjector {
        pub player: Player,
        pub log: Arc<Mutex<Vec<Sent>>>,
    }

    impl KeyInjector for RecordingInjector {
        fn send_pressed(&mut self, pressed: &BTreeSet<OutputKey>) -> anyhow::Result<()> {
            let keys = pressed.iter().copied().collect();
            self.log.lock().unwrap().push(Sent::Report(self.player, keys));
            Ok(())
        }

        fn repeat(&mut self, key: OutputKey) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(Sent::Repeat(self.player, key));
            Ok(())
        }
    }

    pub(crate) fn recording_emitter() -> (Emitter, Arc<Mutex<Vec<Sent>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let injectors: [Box<dyn KeyInjector>; 2] = [
            Box::new(RecordingInjector { player: Player::One, log: log.clone() }),
            Box::new(RecordingInjector { player: Player::Two, log: log.clone() }),
        ];
        let emitter = Emitter::Keyboard(KeyboardEmitter::new(
            [PadLayout::arrows(), PadLayout::function_keys()],
            injectors,
        ));
        (emitter, log)
    }

    #[test]
    fn reports_carry_every_held_key() {
        let (emitter, log) = recording_emitter();
        emitter.emit(Player::One, Direction::Left, true);
        emitter.emit(Player::One, Direction::Up, true);
        emitter.emit(Player::One, Direction::Left, false);

        let sent = log.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![
                Sent::Report(Player::One, vec![OutputKey::Left]),
                Sent::Report(Player::One, vec![OutputKey::Up, OutputKey::Left]),
                Sent::Report(Player::One, vec![OutputKey::Up]),
            ]
        );
    }

    #[test]
    fn players_have_separate_key_sets() {
        let (emitter, log) = recording_emitter();
        emitter.emit(Player::One, Direction::Down, true);
        emitter.emit(Player::Two, Direction::Down, true);

        let sent = log.lock().unwrap().clone();
        assert_eq!(sent[1], Sent::Report(Player::Two, vec![OutputKey::F2]));
    }

    #[test]
    fn repeat_only_for_held_keys() {
        let (emitter, log) = recording_emitter();
        emitter.repeat(Player::Two, Direction::Right);
        assert!(log.lock().unwrap().is_empty());

        emitter.emit(Player::Two, Direction::Right, true);
        emitter.repeat(Player::Two, Direction::Right);
        assert_eq!(
            log.lock().unwrap().last(),
            Some(&Sent::Repeat(Player::Two, OutputKey::F4))
        );
    }

    #[test]
    fn release_all_sends_empty_reports_once() {
        let (emitter, log) = recording_emitter();
        emitter.emit(Player::One, Direction::Up, true);
        emitter.release_all();
        emitter.release_all();

        let sent = log.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], Sent::Report(Player::One, vec![]));
    }

    #[test]
    fn log_strategy_never_fails() {
        let emitter = Emitter::select(false, [PadLayout::arrows(), PadLayout::function_keys()]);
        assert_eq!(emitter.name(), "log");
        emitter.emit(Player::One, Direction::Up, true);
        emitter.repeat(Player::One, Direction::Up);
        emitter.release_all();
    }
}
