use crate::pad::DeviceId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PadError {
    #[error("failed to open {label}: {source}. {hint}")]
    DeviceOpen {
        label: String,
        hint: &'static str,
        #[source]
        source: hidapi::HidError,
    },

    #[error("read failed on {label}: {reason}")]
    Read { label: String, reason: String },

    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("pad {0} is already bound to player 1, press on the other pad")]
    DuplicateCalibrationInput(DeviceId),

    #[error("synthetic keyboard output unavailable: {0}")]
    InjectionUnavailable(String),

    #[error("no usable pads found")]
    NoUsablePads,
}

/// Best guess at why a HID open failed, from the OS error text
pub fn open_hint(error: &hidapi::HidError) -> &'static str {
    let text = error.to_string().to_lowercase();
    if text.contains("permission") || text.contains("access") {
        "Check permissions (udev rule for the pad, or run as root)"
    } else if text.contains("busy") || text.contains("in use") {
        "Close other applications using the pad"
    } else if text.contains("no such") || text.contains("not found") {
        "The pad was unplugged, reconnect it and restart"
    } else {
        "Run with --list to check which interfaces can be opened"
    }
}
