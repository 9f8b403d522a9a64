mod enumerator;
pub mod joystick;

pub use enumerator::*;

use crate::error::PadError;
use crate::pad::{DeviceId, ReportFormat};
use std::ffi::CString;

pub const USAGE_PAGE_GENERIC_DESKTOP: u16 = 0x01;
pub const USAGE_JOYSTICK: u16 = 0x04;
pub const USAGE_GAMEPAD: u16 = 0x05;
pub const USAGE_KEYBOARD: u16 = 0x06;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    Joystick,
    HidKeyboard,
    HidGamepad,
    Other,
}

impl InterfaceKind {
    pub fn from_usage(usage_page: u16, usage: u16) -> Self {
        if usage_page != USAGE_PAGE_GENERIC_DESKTOP {
            return Self::Other;
        }
        match usage {
            USAGE_KEYBOARD => Self::HidKeyboard,
            USAGE_GAMEPAD => Self::HidGamepad,
            USAGE_JOYSTICK => Self::Joystick,
            _ => Self::Other,
        }
    }

    /// Report layout the pad sends on this interface, if we can read it
    pub fn report_format(self) -> Option<ReportFormat> {
        match self {
            Self::HidKeyboard => Some(ReportFormat::Keyboard),
            Self::HidGamepad => Some(ReportFormat::Bitmask),
            Self::Joystick | Self::Other => None,
        }
    }
}

/// Identifying fields of one attached input interface, fresh from a scan
#[derive(Debug, Clone)]
pub struct RawDeviceDescriptor {
    /// Position in this scan only
    pub id: usize,
    /// Session-stable instance number, joysticks only
    pub instance_id: Option<usize>,
    pub serial: Option<String>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub path: CString,
    pub interface_kind: InterfaceKind,
    pub usage: u16,
    pub usage_page: u16,
    pub interface_number: i32,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl RawDeviceDescriptor {
    /// Serial when the pad reports one, otherwise the OS path or instance
    pub fn identity(&self) -> DeviceId {
        match (&self.serial, self.instance_id) {
            (Some(serial), _) if !serial.is_empty() => DeviceId::new(serial.clone()),
            (_, Some(instance)) => DeviceId::joystick(instance),
            _ => DeviceId::new(self.path.to_string_lossy()),
        }
    }

    pub fn serial_or_unknown(&self) -> &str {
        self.serial
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
    }
}

/// Bounded-timeout raw report source for one pad
pub trait PadReader: Send {
    /// Bytes read into `buf`, 0 when the timeout passed without a report
    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, PadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn descriptor(serial: Option<&str>, usage: u16, interface: i32) -> RawDeviceDescriptor {
        RawDeviceDescriptor {
            id: 0,
            instance_id: None,
            serial: serial.map(str::to_string),
            name: "DDR Pad".to_string(),
            manufacturer: Some("MusicGame".to_string()),
            path: CString::new(format!("/dev/hidraw{}{}", usage, interface)).unwrap(),
            interface_kind: InterfaceKind::from_usage(USAGE_PAGE_GENERIC_DESKTOP, usage),
            usage,
            usage_page: USAGE_PAGE_GENERIC_DESKTOP,
            interface_number: interface,
            vendor_id: 0x4D47,
            product_id: 0x5761,
        }
    }

    #[test]
    fn identity_prefers_serial() {
        assert_eq!(descriptor(Some("AAA"), 6, 0).identity(), DeviceId::new("AAA"));
        assert_eq!(
            descriptor(None, 6, 1).identity(),
            DeviceId::new("/dev/hidraw61")
        );
        assert_eq!(
            descriptor(Some(""), 6, 1).identity(),
            DeviceId::new("/dev/hidraw61")
        );
    }

    #[test]
    fn joystick_identity_uses_instance() {
        let mut js = descriptor(None, USAGE_JOYSTICK, 0);
        js.instance_id = Some(3);
        assert_eq!(js.identity(), DeviceId::new("js:3"));
        assert!(js.identity().is_joystick());
    }

    #[test]
    fn usage_maps_to_report_format() {
        assert_eq!(
            InterfaceKind::from_usage(1, USAGE_KEYBOARD).report_format(),
            Some(ReportFormat::Keyboard)
        );
        assert_eq!(
            InterfaceKind::from_usage(1, USAGE_GAMEPAD).report_format(),
            Some(ReportFormat::Bitmask)
        );
        assert_eq!(InterfaceKind::from_usage(0x0C, USAGE_KEYBOARD), InterfaceKind::Other);
    }
}
