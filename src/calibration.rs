use crate::error::PadError;
use crate::input::RawDeviceDescriptor;
use crate::pad::{DeviceId, Player};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStep {
    Idle,
    AwaitingFirstPad,
    AwaitingSecondPad,
    Bound,
}

impl CalibrationStep {
    pub fn instructions(&self) -> &'static str {
        match self {
            Self::Idle => "Pads are not assigned yet. Type 'c' and press enter to calibrate",
            Self::AwaitingFirstPad => {
                "Step 1: press ANY arrow on the pad you want to be Player 1"
            }
            Self::AwaitingSecondPad => {
                "Step 2: press ANY arrow on the OTHER pad, it becomes Player 2"
            }
            Self::Bound => "Both pads assigned",
        }
    }

    pub fn is_calibrating(&self) -> bool {
        matches!(self, Self::AwaitingFirstPad | Self::AwaitingSecondPad)
    }
}

/// Bijective partial map between pads and players
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    by_device: HashMap<DeviceId, Player>,
}

impl Bindings {
    pub fn player_for(&self, device: &DeviceId) -> Option<Player> {
        self.by_device.get(device).copied()
    }

    pub fn device_for(&self, player: Player) -> Option<&DeviceId> {
        self.by_device
            .iter()
            .find(|(_, p)| **p == player)
            .map(|(device, _)| device)
    }

    /// Binds `device` to `player`, dropping any previous binding of either side
    fn bind(&mut self, device: DeviceId, player: Player) {
        self.by_device.retain(|d, p| *d != device && *p != player);
        self.by_device.insert(device, player);
    }

    fn clear(&mut self) {
        self.by_device.clear();
    }

    pub fn len(&self) -> usize {
        self.by_device.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_device.is_empty()
    }

    /// Bindings ordered by player
    pub fn entries(&self) -> Vec<(DeviceId, Player)> {
        let mut entries: Vec<_> = self
            .by_device
            .iter()
            .map(|(device, player)| (device.clone(), *player))
            .collect();
        entries.sort_by_key(|(_, player)| *player);
        entries
    }
}

/// Result of feeding a press to the binder while calibrating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationProgress {
    /// Not calibrating, the press is not for us
    NotCalibrating,
    /// A pad was bound, more pads are needed
    PlayerBound(Player),
    /// Both pads are bound
    Complete,
}

/// Maps raw pad identities to player numbers.
///
/// Either interactively (first press wins, one step per player) or
/// automatically by sorting serial numbers.
#[derive(Debug, Clone)]
pub struct IdentityBinder {
    step: CalibrationStep,
    bindings: Bindings,
}

impl Default for IdentityBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityBinder {
    pub fn new() -> Self {
        Self {
            step: CalibrationStep::Idle,
            bindings: Bindings::default(),
        }
    }

    pub fn step(&self) -> CalibrationStep {
        self.step
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn player_for(&self, device: &DeviceId) -> Option<Player> {
        self.bindings.player_for(device)
    }

    /// Clears every binding and waits for the Player 1 pad
    pub fn start_calibration(&mut self) {
        self.bindings.clear();
        self.step = CalibrationStep::AwaitingFirstPad;
    }

    /// Feed a press. Releases never reach the binder.
    pub fn observe_press(&mut self, device: &DeviceId) -> Result<CalibrationProgress, PadError> {
        match self.step {
            CalibrationStep::AwaitingFirstPad => {
                self.bindings.bind(device.clone(), Player::One);
                self.step = CalibrationStep::AwaitingSecondPad;
                Ok(CalibrationProgress::PlayerBound(Player::One))
            }
            CalibrationStep::AwaitingSecondPad => {
                if self.bindings.player_for(device) == Some(Player::One) {
                    return Err(PadError::DuplicateCalibrationInput(device.clone()));
                }
                self.bindings.bind(device.clone(), Player::Two);
                self.step = CalibrationStep::Bound;
                Ok(CalibrationProgress::Complete)
            }
            CalibrationStep::Idle | CalibrationStep::Bound => {
                Ok(CalibrationProgress::NotCalibrating)
            }
        }
    }

    /// Binds the first two pads in serial order. Needs at least two
    /// distinct pads, otherwise nothing changes.
    pub fn auto_bind(&mut self, devices: &[RawDeviceDescriptor]) -> bool {
        let mut identities: Vec<DeviceId> = devices.iter().map(|d| d.identity()).collect();
        identities.sort();
        identities.dedup();

        if identities.len() < 2 {
            return false;
        }

        self.bindings.clear();
        for (device, player) in identities.into_iter().zip(Player::ALL) {
            self.bindings.bind(device, player);
        }
        self.step = CalibrationStep::Bound;
        true
    }

    /// Restores saved bindings when every saved pad is attached right now
    pub fn restore(&mut self, saved: &[(DeviceId, Player)], attached: &[DeviceId]) -> bool {
        let complete = Player::ALL
            .iter()
            .all(|player| saved.iter().any(|(_, p)| p == player));
        let present = saved.iter().all(|(device, _)| attached.contains(device));
        if !complete || !present {
            return false;
        }

        self.bindings.clear();
        for (device, player) in saved {
            self.bindings.bind(device.clone(), *player);
        }
        if self.bindings.len() != Player::ALL.len() {
            self.bindings.clear();
            return false;
        }
        self.step = CalibrationStep::Bound;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InterfaceKind, USAGE_KEYBOARD};
    use std::ffi::CString;

    fn pad(serial: &str) -> RawDeviceDescriptor {
        RawDeviceDescriptor {
            id: 0,
            instance_id: None,
            serial: Some(serial.to_string()),
            name: "DDR Pad".to_string(),
            manufacturer: None,
            path: CString::new(format!("/dev/{}", serial)).unwrap(),
            interface_kind: InterfaceKind::HidKeyboard,
            usage: USAGE_KEYBOARD,
            usage_page: 1,
            interface_number: 0,
            vendor_id: 0,
            product_id: 0,
        }
    }

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s)
    }

    #[test]
    fn two_distinct_pads_complete_calibration() {
        let mut binder = IdentityBinder::new();
        binder.start_calibration();
        assert_eq!(binder.step(), CalibrationStep::AwaitingFirstPad);

        assert_eq!(
            binder.observe_press(&id("X")).unwrap(),
            CalibrationProgress::PlayerBound(Player::One)
        );
        assert_eq!(
            binder.observe_press(&id("Y")).unwrap(),
            CalibrationProgress::Complete
        );

        assert_eq!(binder.step(), CalibrationStep::Bound);
        assert_eq!(binder.player_for(&id("X")), Some(Player::One));
        assert_eq!(binder.player_for(&id("Y")), Some(Player::Two));
    }

    #[test]
    fn same_pad_twice_does_not_advance() {
        let mut binder = IdentityBinder::new();
        binder.start_calibration();
        binder.observe_press(&id("X")).unwrap();

        let err = binder.observe_press(&id("X")).unwrap_err();
        assert!(matches!(err, PadError::DuplicateCalibrationInput(ref d) if *d == id("X")));
        assert_eq!(binder.step(), CalibrationStep::AwaitingSecondPad);
        assert_eq!(binder.bindings().device_for(Player::Two), None);
    }

    #[test]
    fn recalibration_clears_previous_bindings() {
        let mut binder = IdentityBinder::new();
        binder.auto_bind(&[pad("AAA"), pad("BBB")]);
        assert_eq!(binder.step(), CalibrationStep::Bound);

        binder.start_calibration();
        assert!(binder.bindings().is_empty());
        assert_eq!(binder.player_for(&id("AAA")), None);

        binder.observe_press(&id("BBB")).unwrap();
        binder.observe_press(&id("AAA")).unwrap();
        assert_eq!(binder.player_for(&id("BBB")), Some(Player::One));
        assert_eq!(binder.player_for(&id("AAA")), Some(Player::Two));
    }

    #[test]
    fn presses_outside_calibration_are_not_consumed() {
        let mut binder = IdentityBinder::new();
        assert_eq!(
            binder.observe_press(&id("X")).unwrap(),
            CalibrationProgress::NotCalibrating
        );
        assert!(binder.bindings().is_empty());
    }

    #[test]
    fn auto_bind_sorts_by_serial() {
        for _ in 0..3 {
            let mut binder = IdentityBinder::new();
            assert!(binder.auto_bind(&[pad("BBB"), pad("AAA")]));
            assert_eq!(binder.player_for(&id("AAA")), Some(Player::One));
            assert_eq!(binder.player_for(&id("BBB")), Some(Player::Two));
        }
    }

    #[test]
    fn auto_bind_needs_two_pads() {
        let mut binder = IdentityBinder::new();
        assert!(!binder.auto_bind(&[pad("AAA"), pad("AAA")]));
        assert_eq!(binder.step(), CalibrationStep::Idle);
    }

    #[test]
    fn auto_bind_takes_first_two_of_three() {
        let mut binder = IdentityBinder::new();
        binder.auto_bind(&[pad("CCC"), pad("BBB"), pad("AAA")]);
        assert_eq!(binder.player_for(&id("CCC")), None);
        assert_eq!(binder.bindings().len(), 2);
    }

    #[test]
    fn restore_requires_both_pads_attached() {
        let saved = vec![(id("AAA"), Player::One), (id("BBB"), Player::Two)];

        let mut binder = IdentityBinder::new();
        assert!(!binder.restore(&saved, &[id("AAA")]));
        assert_eq!(binder.step(), CalibrationStep::Idle);

        assert!(binder.restore(&saved, &[id("BBB"), id("AAA")]));
        assert_eq!(binder.player_for(&id("BBB")), Some(Player::Two));
    }

    #[test]
    fn restore_rejects_one_pad_for_both_players() {
        let saved = vec![(id("AAA"), Player::One), (id("AAA"), Player::Two)];
        let mut binder = IdentityBinder::new();
        assert!(!binder.restore(&saved, &[id("AAA")]));
        assert!(binder.bindings().is_empty());
    }

    #[test]
    fn bindings_stay_bijective() {
        let mut bindings = Bindings::default();
        bindings.bind(id("A"), Player::One);
        bindings.bind(id("B"), Player::One);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings.device_for(Player::One), Some(&id("B")));

        bindings.bind(id("B"), Player::Two);
        assert_eq!(bindings.entries(), vec![(id("B"), Player::Two)]);
    }
}
