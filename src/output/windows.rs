use super::{KeyInjector, OutputKey};
use std::collections::BTreeSet;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYBD_EVENT_FLAGS,
    KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP, VIRTUAL_KEY,
};

/// Posts single key down/up events to the system input queue.
///
/// Windows has no per-player virtual keyboard without a driver, so this
/// diffs the pressed set and sends only the keys that changed.
#[derive(Default)]
pub struct SendInputKeyboard {
    down: BTreeSet<OutputKey>,
}

fn key_input(key: OutputKey, up: bool) -> INPUT {
    let mut flags = KEYBD_EVENT_FLAGS(0);
    if matches!(key, OutputKey::Up | OutputKey::Down | OutputKey::Left | OutputKey::Right) {
        flags = flags | KEYEVENTF_EXTENDEDKEY;
    }
    if up {
        flags = flags | KEYEVENTF_KEYUP;
    }

    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(key.windows_vk()),
                wScan: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn send(inputs: &[INPUT]) -> anyhow::Result<()> {
    if inputs.is_empty() {
        return Ok(());
    }

    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(anyhow::anyhow!(
            "SendInput accepted {} of {} events: {}",
            sent,
            inputs.len(),
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

impl KeyInjector for SendInputKeyboard {
    fn send_pressed(&mut self, pressed: &BTreeSet<OutputKey>) -> anyhow::Result<()> {
        let inputs: Vec<INPUT> = self
            .down
            .difference(pressed)
            .map(|key| key_input(*key, true))
            .chain(pressed.difference(&self.down).map(|key| key_input(*key, false)))
            .collect();

        send(&inputs)?;
        self.down = pressed.clone();
        Ok(())
    }

    fn repeat(&mut self, key: OutputKey) -> anyhow::Result<()> {
        send(&[key_input(key, false)])
    }
}
