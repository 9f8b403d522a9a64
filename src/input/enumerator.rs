use super::{InterfaceKind, PadReader, RawDeviceDescriptor, USAGE_GAMEPAD, USAGE_KEYBOARD};
use crate::config::PadConfig;
use crate::error::{open_hint, PadError};
use crate::pad::ReportFormat;
use hidapi::{HidApi, HidDevice};
use std::collections::BTreeMap;

/// Which attached interfaces belong to a supported pad
#[derive(Debug, Clone)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
}

impl DeviceFilter {
    pub fn new(config: &PadConfig) -> Self {
        Self {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
            manufacturer: config.manufacturer.clone(),
        }
    }

    pub fn matches(&self, device: &RawDeviceDescriptor) -> bool {
        if device.vendor_id != self.vendor_id || device.product_id != self.product_id {
            return false;
        }
        match &self.manufacturer {
            Some(wanted) => device.manufacturer.as_deref() == Some(wanted.as_str()),
            None => true,
        }
    }
}

/// One interface picked to stand for a physical pad
#[derive(Debug, Clone)]
pub struct SelectedPad {
    /// 1-based, in serial order
    pub pad_index: usize,
    pub descriptor: RawDeviceDescriptor,
    pub format: ReportFormat,
}

impl SelectedPad {
    pub fn label(&self) -> String {
        format!(
            "Pad {} (SN {}) iface={} usage={}",
            self.pad_index,
            self.descriptor.serial_or_unknown(),
            self.descriptor.interface_number,
            self.descriptor.usage
        )
    }
}

/// Group interfaces by physical pad and choose one readable interface each.
///
/// Groups are ordered by serial. Keyboard interfaces win over gamepad
/// interfaces, then the lowest interface number.
pub fn select_pads(devices: &[RawDeviceDescriptor]) -> Vec<SelectedPad> {
    let mut groups: BTreeMap<String, Vec<&RawDeviceDescriptor>> = BTreeMap::new();
    for device in devices {
        groups
            .entry(device.identity().as_str().to_string())
            .or_default()
            .push(device);
    }

    let mut selected = Vec::new();
    for (serial, interfaces) in groups {
        let pad_index = selected.len() + 1;
        let best = interfaces
            .into_iter()
            .filter_map(|d| usage_rank(d.usage).map(|rank| (rank, d.interface_number, d)))
            .min_by_key(|(rank, interface, _)| (*rank, *interface));

        let Some((_, _, descriptor)) = best else {
            log::warn!(
                "No keyboard or gamepad interface found for pad SN {}, skipping it",
                serial
            );
            continue;
        };

        let Some(format) = descriptor.interface_kind.report_format() else {
            continue;
        };

        selected.push(SelectedPad {
            pad_index,
            descriptor: descriptor.clone(),
            format,
        });
    }

    selected
}

fn usage_rank(usage: u16) -> Option<u8> {
    match usage {
        USAGE_KEYBOARD => Some(0),
        USAGE_GAMEPAD => Some(1),
        _ => None,
    }
}

/// Lists HID interfaces through hidapi. Never fatal: a broken HID
/// backend just means nothing is found.
pub struct DeviceEnumerator {
    api: Option<HidApi>,
    filter: DeviceFilter,
}

impl DeviceEnumerator {
    pub fn new(config: &PadConfig) -> Self {
        let api = match HidApi::new() {
            Ok(api) => Some(api),
            Err(e) => {
                log::error!("{}", PadError::Enumeration(e.to_string()));
                None
            }
        };

        Self {
            api,
            filter: DeviceFilter::new(config),
        }
    }

    /// Interfaces that belong to supported pads
    pub fn scan(&mut self) -> Vec<RawDeviceDescriptor> {
        let filter = self.filter.clone();
        self.scan_all()
            .into_iter()
            .filter(|d| filter.matches(d))
            .collect()
    }

    /// Every HID interface the OS reports
    pub fn scan_all(&mut self) -> Vec<RawDeviceDescriptor> {
        let Some(api) = self.api.as_mut() else {
            return Vec::new();
        };

        if let Err(e) = api.refresh_devices() {
            log::error!("{}", PadError::Enumeration(e.to_string()));
            return Vec::new();
        }

        api.device_list()
            .enumerate()
            .map(|(id, info)| RawDeviceDescriptor {
                id,
                instance_id: None,
                serial: info.serial_number().map(str::to_string),
                name: info.product_string().unwrap_or("Unknown").to_string(),
                manufacturer: info.manufacturer_string().map(str::to_string),
                path: info.path().to_owned(),
                interface_kind: InterfaceKind::from_usage(info.usage_page(), info.usage()),
                usage: info.usage(),
                usage_page: info.usage_page(),
                interface_number: info.interface_number(),
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
            })
            .collect()
    }

    pub fn open(&self, pad: &SelectedPad) -> Result<HidPad, PadError> {
        let label = pad.label();
        let api = self
            .api
            .as_ref()
            .ok_or_else(|| PadError::Enumeration("HID backend not initialised".to_string()))?;

        let device = api
            .open_path(&pad.descriptor.path)
            .map_err(|source| PadError::DeviceOpen {
                label: label.clone(),
                hint: open_hint(&source),
                source,
            })?;

        Ok(HidPad { label, device })
    }

    /// Open and immediately close a descriptor, for --list
    pub fn probe(&self, device: &RawDeviceDescriptor) -> Result<(), String> {
        let api = self.api.as_ref().ok_or("HID backend not initialised")?;
        api.open_path(&device.path)
            .map(drop)
            .map_err(|e| format!("{} ({})", e, open_hint(&e)))
    }
}

/// An opened HID interface
pub struct HidPad {
    label: String,
    device: HidDevice,
}

impl PadReader for HidPad {
    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, PadError> {
        self.device
            .read_timeout(buf, timeout_ms)
            .map_err(|e| PadError::Read {
                label: self.label.clone(),
                reason: e.to_string(),
            })
    }
}
