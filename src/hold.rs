use crate::pad::{DeviceId, Direction, Player};
use crossbeam_channel::{select, tick, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Receives the output of held panels
pub trait HoldSink: Send + Sync + 'static {
    /// First emission, right when the panel goes down
    fn press(&self, player: Player, direction: Direction);
    /// Every hold interval after that until release
    fn repeat(&self, player: Player, direction: Direction);
}

type HoldKey = (DeviceId, Direction);

/// A running repeat thread. Dropping `stop` wakes it up.
struct HoldTimer {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl HoldTimer {
    /// Returns once the thread has exited, so nothing fires afterwards
    fn cancel(self) {
        drop(self.stop);
        if let Err(e) = self.handle.join() {
            log::error!("Hold repeat thread panicked: {:?}", e);
        }
    }
}

#[derive(Default)]
struct Timers {
    active: HashMap<HoldKey, HoldTimer>,
    closed: bool,
}

/// Repeats the output of held panels at a fixed cadence.
///
/// At most one timer per (pad, direction). Cancelling joins the timer
/// thread, so once `on_release` or `shutdown` returns that key is silent.
pub struct HoldRepeater {
    interval: Duration,
    sink: Arc<dyn HoldSink>,
    timers: Mutex<Timers>,
}

impl HoldRepeater {
    pub fn new(interval: Duration, sink: Arc<dyn HoldSink>) -> Self {
        Self {
            interval,
            sink,
            timers: Mutex::new(Timers::default()),
        }
    }

    /// Starts repeating. A second press of a held key is a no-op.
    pub fn on_press(&self, device: &DeviceId, player: Player, direction: Direction) {
        let Ok(mut timers) = self.timers.lock() else {
            log::error!("Hold timer table poisoned");
            return;
        };

        let key = (device.clone(), direction);
        if timers.closed || timers.active.contains_key(&key) {
            return;
        }

        self.sink.press(player, direction);

        let (stop, stopped) = crossbeam_channel::bounded::<()>(0);
        let ticker = tick(self.interval);
        let sink = Arc::clone(&self.sink);
        let spawned = thread::Builder::new()
            .name(format!("hold-p{}-{}", player.number(), direction))
            .spawn(move || loop {
                let stop = select! {
                    recv(stopped) -> _ => true,
                    recv(ticker) -> _ => {
                        sink.repeat(player, direction);
                        false
                    }
                };
                if stop {
                    break;
                }
            });

        match spawned {
            Ok(handle) => {
                timers.active.insert(key, HoldTimer { stop, handle });
            }
            Err(e) => log::error!("Failed to start hold repeat for {} {}: {}", player, direction, e),
        }
    }

    /// Stops repeating. Nothing happens if the key was not held.
    pub fn on_release(&self, device: &DeviceId, direction: Direction) {
        let timer = match self.timers.lock() {
            Ok(mut timers) => timers.active.remove(&(device.clone(), direction)),
            Err(_) => None,
        };

        // join outside the lock, the timer thread never takes it
        if let Some(timer) = timer {
            timer.cancel();
        }
    }

    /// Cancels every timer belonging to `device`
    pub fn release_device(&self, device: &DeviceId) {
        for direction in Direction::ALL {
            self.on_release(device, direction);
        }
    }

    /// Cancels all timers while leaving the repeater usable
    pub fn cancel_all(&self) {
        let drained: Vec<HoldTimer> = match self.timers.lock() {
            Ok(mut timers) => timers.active.drain().map(|(_, timer)| timer).collect(),
            Err(_) => Vec::new(),
        };

        for timer in drained {
            timer.cancel();
        }
    }

    /// Cancels all timers and refuses new ones
    pub fn shutdown(&self) {
        if let Ok(mut timers) = self.timers.lock() {
            timers.closed = true;
        }
        self.cancel_all();
        log::debug!("Hold repeater shut down");
    }

    pub fn active_count(&self) -> usize {
        self.timers.lock().map(|t| t.active.len()).unwrap_or(0)
    }
}

impl Drop for HoldRepeater {
    fn drop(&mut self) {
        self.shutdown();
    }
}
