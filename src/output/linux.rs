use super::uinput_ffi::*;
use super::{KeyInjector, OutputKey, PadLayout};
use crate::pad::Player;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;

/// A uinput keyboard that only knows one player's four keys
pub struct VirtualKeyboard {
    uinput_file: File,
    keys: [OutputKey; 4],
}

impl VirtualKeyboard {
    pub fn new(player: Player, layout: &PadLayout) -> anyhow::Result<Self> {
        let uinput_file = OpenOptions::new()
            .write(true)
            .open(UINPUT_PATH)
            .map_err(|e| anyhow::anyhow!(
                "Failed to open {}: {}. Try: sudo chmod 666 /dev/uinput",
                UINPUT_PATH, e
            ))?;

        let uinput_fd = uinput_file.as_raw_fd();
        let keys = layout.keys();

        unsafe {
            if libc::ioctl(uinput_fd, UI_SET_EVBIT, EV_KEY as libc::c_int) < 0 {
                return Err(anyhow::anyhow!("Failed to set EV_KEY"));
            }
            if libc::ioctl(uinput_fd, UI_SET_EVBIT, EV_SYN as libc::c_int) < 0 {
                return Err(anyhow::anyhow!("Failed to set EV_SYN"));
            }

            for key in keys {
                if libc::ioctl(uinput_fd, UI_SET_KEYBIT, key.linux_code() as libc::c_int) < 0 {
                    return Err(anyhow::anyhow!("Failed to set key {}", key));
                }
            }

            let mut dev: UinputUserDev = std::mem::zeroed();
            let name = format!("padsplit Player {} Keyboard", player.number());
            let name = name.as_bytes();
            let len = name.len().min(dev.name.len() - 1);
            dev.name[..len].copy_from_slice(&name[..len]);
            dev.id.bustype = BUS_USB;
            dev.id.vendor = 0x4D47;
            dev.id.product = 0x5762;
            dev.id.version = player.number() as u16;

            let dev_bytes = std::slice::from_raw_parts(
                &dev as *const _ as *const u8,
                std::mem::size_of::<UinputUserDev>()
            );

            if libc::write(uinput_fd, dev_bytes.as_ptr() as *const libc::c_void, dev_bytes.len()) < 0 {
                return Err(anyhow::anyhow!("Failed to write device struct"));
            }

            if libc::ioctl(uinput_fd, UI_DEV_CREATE) < 0 {
                return Err(anyhow::anyhow!("Failed to create device: {}", std::io::Error::last_os_error()));
            }
        }

        log::info!("Uinput keyboard created for {} ({})", player, layout.describe());

        Ok(Self { uinput_file, keys })
    }

    fn write_event(&mut self, type_: u16, code: u16, value: i32) -> anyhow::Result<()> {
        let event = InputEvent::new(type_, code, value);
        let bytes = unsafe {
            std::slice::from_raw_parts(
                &event as *const _ as *const u8,
                std::mem::size_of::<InputEvent>()
            )
        };
        self.uinput_file.write_all(bytes)?;
        Ok(())
    }

    fn sync(&mut self) -> anyhow::Result<()> {
        self.write_event(EV_SYN, SYN_REPORT, 0)?;
        self.uinput_file.flush()?;
        Ok(())
    }
}

impl Drop for VirtualKeyboard {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::ioctl(self.uinput_file.as_raw_fd(), UI_DEV_DESTROY);
        }
    }
}

impl KeyInjector for VirtualKeyboard {
    fn send_pressed(&mut self, pressed: &BTreeSet<OutputKey>) -> anyhow::Result<()> {
        // the kernel drops writes that do not change a key, so the whole set goes out
        for key in self.keys {
            let value = if pressed.contains(&key) { KEY_PRESSED } else { KEY_RELEASED };
            self.write_event(EV_KEY, key.linux_code(), value)?;
        }
        self.sync()
    }

    fn repeat(&mut self, key: OutputKey) -> anyhow::Result<()> {
        self.write_event(EV_KEY, key.linux_code(), KEY_AUTOREPEAT)?;
        self.sync()
    }
}
