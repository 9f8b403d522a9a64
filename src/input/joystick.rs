use super::{InterfaceKind, RawDeviceDescriptor};
use crate::pad::{DeviceId, EdgeDetector, ReportDecoder};
use crate::session::PadSession;
use gilrs::{Axis, Button, EventType, GamepadId, Gilrs};
use std::collections::{BTreeSet, HashMap};
use std::ffi::CString;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const AXIS_THRESHOLD: f32 = 0.5;

/// Held-button and hat tracking for one joystick-class pad
#[derive(Debug, Default)]
struct JoystickPad {
    held: BTreeSet<u32>,
    dpad: (i8, i8),
    axis_hat: (i8, i8),
    detector: EdgeDetector,
}

impl JoystickPad {
    fn button(&mut self, button: Button, code: u32, pressed: bool) -> bool {
        let (dx, dy) = match button {
            Button::DPadUp => (0, 1),
            Button::DPadDown => (0, -1),
            Button::DPadLeft => (-1, 0),
            Button::DPadRight => (1, 0),
            _ => {
                return if pressed {
                    self.held.insert(code)
                } else {
                    self.held.remove(&code)
                };
            }
        };

        let sign = if pressed { 1 } else { -1 };
        self.dpad.0 = (self.dpad.0 + dx * sign).clamp(-1, 1);
        self.dpad.1 = (self.dpad.1 + dy * sign).clamp(-1, 1);
        true
    }

    fn axis(&mut self, axis: Axis, value: f32) -> bool {
        let step = if value > AXIS_THRESHOLD {
            1
        } else if value < -AXIS_THRESHOLD {
            -1
        } else {
            0
        };

        match axis {
            Axis::DPadX => self.axis_hat.0 = step,
            Axis::DPadY => self.axis_hat.1 = step,
            _ => return false,
        }
        true
    }

    fn hat(&self) -> (i8, i8) {
        let pick = |a: i8, b: i8| if a != 0 { a } else { b };
        (pick(self.dpad.0, self.axis_hat.0), pick(self.dpad.1, self.axis_hat.1))
    }
}

fn identity(id: GamepadId) -> DeviceId {
    DeviceId::joystick(usize::from(id))
}

fn describe(gilrs: &Gilrs) -> Vec<RawDeviceDescriptor> {
    gilrs
        .gamepads()
        .enumerate()
        .map(|(index, (id, gamepad))| {
            let instance = usize::from(id);
            log::info!("Found joystick {}: {}", instance, gamepad.name());
            RawDeviceDescriptor {
                id: index,
                instance_id: Some(instance),
                serial: None,
                name: gamepad.name().to_string(),
                manufacturer: None,
                path: CString::new(DeviceId::joystick(instance).as_str()).unwrap_or_default(),
                interface_kind: InterfaceKind::Joystick,
                usage: super::USAGE_JOYSTICK,
                usage_page: super::USAGE_PAGE_GENERIC_DESKTOP,
                interface_number: -1,
                vendor_id: gamepad.vendor_id().unwrap_or(0),
                product_id: gamepad.product_id().unwrap_or(0),
            }
        })
        .collect()
}

/// Starts the joystick thread and returns it with the pads it found.
///
/// gilrs is not `Send`, so the thread creates it and reports back what
/// it enumerated before it starts routing events.
pub fn spawn_joystick_reader(
    session: Arc<PadSession>,
    decoder: Arc<ReportDecoder>,
    timeout: Duration,
) -> anyhow::Result<(JoinHandle<()>, Vec<RawDeviceDescriptor>)> {
    let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

    let handle = thread::Builder::new()
        .name("joystick".to_string())
        .spawn(move || {
            let mut gilrs = match Gilrs::new() {
                Ok(gilrs) => gilrs,
                Err(e) => {
                    let _ = ready_tx.send(Err(anyhow::anyhow!("Failed to initialize gilrs: {}", e)));
                    return;
                }
            };

            let found = describe(&gilrs);
            for pad in &found {
                session.register_device(&pad.identity(), &format!("Joystick {}", pad.name));
            }
            if ready_tx.send(Ok(found)).is_err() {
                return;
            }

            run_joysticks(&session, &decoder, &mut gilrs, timeout);
        })?;

    let found = ready_rx
        .recv()
        .map_err(|_| anyhow::anyhow!("Joystick thread exited during startup"))??;
    Ok((handle, found))
}

fn run_joysticks(session: &PadSession, decoder: &ReportDecoder, gilrs: &mut Gilrs, timeout: Duration) {
    let mut pads: HashMap<GamepadId, JoystickPad> = HashMap::new();

    while session.is_running() {
        let Some(event) = gilrs.next_event_blocking(Some(timeout)) else {
            continue;
        };
        let device = identity(event.id);

        let changed = match event.event {
            EventType::ButtonPressed(button, code) => pads
                .entry(event.id)
                .or_default()
                .button(button, code.into_u32(), true),
            EventType::ButtonReleased(button, code) => pads
                .entry(event.id)
                .or_default()
                .button(button, code.into_u32(), false),
            EventType::AxisChanged(axis, value, _) => {
                pads.entry(event.id).or_default().axis(axis, value)
            }
            EventType::Connected => {
                let name = gilrs.gamepad(event.id).name().to_string();
                log::info!("Joystick connected: {} ({})", name, device);
                session.register_device(&device, &format!("Joystick {}", name));
                false
            }
            EventType::Disconnected => {
                log::warn!("Joystick disconnected: {}", session.label_for(&device));
                if let Some(mut pad) = pads.remove(&event.id) {
                    let edges = pad.detector.release_all();
                    session.handle_edges(&device, &edges);
                }
                session.device_lost(&device);
                false
            }
            _ => false,
        };

        if !changed {
            continue;
        }

        if let Some(pad) = pads.get_mut(&event.id) {
            let state = decoder.decode_joystick(pad.held.iter().copied(), pad.hat());
            let edges = pad.detector.update(state);
            if !edges.is_empty() {
                session.handle_edges(&device, &edges);
            }
        }
    }

    for (id, mut pad) in pads {
        let edges = pad.detector.release_all();
        session.handle_edges(&identity(id), &edges);
    }
}
