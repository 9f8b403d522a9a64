use crate::calibration::{CalibrationProgress, CalibrationStep, IdentityBinder};
use crate::hold::{HoldRepeater, HoldSink};
use crate::input::{PadReader, RawDeviceDescriptor};
use crate::output::Emitter;
use crate::pad::{DeviceId, Direction, Edge, EdgeDetector, Player, ReportDecoder, ReportFormat};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type CalibratedHook = Box<dyn Fn(&[(DeviceId, Player)]) + Send + Sync>;

/// Binder plus the presses it swallowed, so their releases are swallowed too
#[derive(Default)]
struct BindingState {
    binder: IdentityBinder,
    swallowed: HashSet<(DeviceId, Direction)>,
}

/// Everything the reader threads share.
///
/// The running flag is the only stop signal. Binding changes happen under
/// one lock, so "first press wins" holds even when both pads race.
pub struct PadSession {
    running: AtomicBool,
    state: Mutex<BindingState>,
    hold: Option<HoldRepeater>,
    emitter: Arc<Emitter>,
    labels: Mutex<HashMap<DeviceId, String>>,
    on_calibrated: Option<CalibratedHook>,
}

impl PadSession {
    /// `hold_interval` of `None` turns hold repeat off
    pub fn new(emitter: Arc<Emitter>, hold_interval: Option<Duration>) -> Self {
        let hold = hold_interval.map(|interval| {
            HoldRepeater::new(interval, Arc::clone(&emitter) as Arc<dyn HoldSink>)
        });

        Self {
            running: AtomicBool::new(true),
            state: Mutex::new(BindingState::default()),
            hold,
            emitter,
            labels: Mutex::new(HashMap::new()),
            on_calibrated: None,
        }
    }

    /// Called with the new bindings whenever interactive calibration completes
    pub fn with_calibration_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&[(DeviceId, Player)]) + Send + Sync + 'static,
    {
        self.on_calibrated = Some(Box::new(hook));
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn register_device(&self, device: &DeviceId, label: &str) {
        if let Ok(mut labels) = self.labels.lock() {
            labels.insert(device.clone(), label.to_string());
        }
    }

    pub fn label_for(&self, device: &DeviceId) -> String {
        self.labels
            .lock()
            .ok()
            .and_then(|labels| labels.get(device).cloned())
            .unwrap_or_else(|| device.to_string())
    }

    pub fn step(&self) -> CalibrationStep {
        self.state
            .lock()
            .map(|s| s.binder.step())
            .unwrap_or(CalibrationStep::Idle)
    }

    pub fn bindings(&self) -> Vec<(DeviceId, Player)> {
        self.state
            .lock()
            .map(|s| s.binder.bindings().entries())
            .unwrap_or_default()
    }

    /// Drops all bindings and waits for the Player 1 pad. No output is
    /// produced until both pads are bound again.
    pub fn start_calibration(&self) {
        // held through the teardown so a press routed before it cannot land after it
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.binder.start_calibration();
        state.swallowed.clear();

        if let Some(hold) = &self.hold {
            hold.cancel_all();
        }
        self.emitter.release_all();
        drop(state);

        log::info!("Calibration started");
        log::info!("{}", CalibrationStep::AwaitingFirstPad.instructions());
    }

    /// Player 1 and 2 go to the first two pads in serial order
    pub fn auto_bind(&self, devices: &[RawDeviceDescriptor]) -> bool {
        let bound = self
            .state
            .lock()
            .map(|mut s| s.binder.auto_bind(devices))
            .unwrap_or(false);
        if bound {
            log::info!("Pads assigned by serial number");
            self.log_bindings();
        }
        bound
    }

    pub fn restore_bindings(&self, saved: &[(DeviceId, Player)], attached: &[DeviceId]) -> bool {
        let restored = self
            .state
            .lock()
            .map(|mut s| s.binder.restore(saved, attached))
            .unwrap_or(false);
        if restored {
            log::info!("Restored saved pad assignment");
            self.log_bindings();
        }
        restored
    }

    pub fn device_for(&self, player: Player) -> Option<DeviceId> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.binder.bindings().device_for(player).cloned())
    }

    /// Panels currently repeating
    pub fn held_count(&self) -> usize {
        self.hold.as_ref().map_or(0, HoldRepeater::active_count)
    }

    /// Drops any hold timer still running for a pad that went away
    pub fn device_lost(&self, device: &DeviceId) {
        if let Some(hold) = &self.hold {
            hold.release_device(device);
        }
    }

    pub fn log_bindings(&self) {
        let entries = match self.state.lock() {
            Ok(state) if !state.binder.bindings().is_empty() => state.binder.bindings().entries(),
            _ => {
                log::info!("No pads assigned");
                return;
            }
        };
        for (device, player) in entries {
            log::info!("{} -> {}", self.label_for(&device), player);
        }
    }

    /// Routes edges from one pad to the binder while calibrating, to the
    /// outputs once the pad is bound.
    ///
    /// Routing and output happen under one lock, so a calibration started
    /// from another thread sees either none or all of an edge's output.
    pub fn handle_edges(&self, device: &DeviceId, edges: &[Edge]) {
        for edge in edges {
            let mut completed = None;
            {
                let Ok(mut state) = self.state.lock() else {
                    return;
                };
                match self.route(&mut state, device, *edge, &mut completed) {
                    Route::Player(player) => self.dispatch(device, player, *edge),
                    Route::Unbound => log::debug!(
                        "{}: {} ignored, pad not assigned (press 'c' to calibrate)",
                        self.label_for(device),
                        edge.direction
                    ),
                    Route::Consumed => {}
                }
            }

            if let (Some(bindings), Some(hook)) = (completed, &self.on_calibrated) {
                hook(bindings.as_slice());
            }
        }
    }

    fn route(
        &self,
        state: &mut BindingState,
        device: &DeviceId,
        edge: Edge,
        completed: &mut Option<Vec<(DeviceId, Player)>>,
    ) -> Route {
        let key = (device.clone(), edge.direction);

        if !edge.pressed && state.swallowed.remove(&key) {
            return Route::Consumed;
        }

        if !state.binder.step().is_calibrating() {
            return match state.binder.player_for(device) {
                Some(player) => Route::Player(player),
                None => Route::Unbound,
            };
        }

        if !edge.pressed {
            return Route::Consumed;
        }

        state.swallowed.insert(key);
        match state.binder.observe_press(device) {
            Ok(CalibrationProgress::PlayerBound(player)) => {
                log::info!("{} pad registered ({})", player, self.label_for(device));
                log::info!("{}", state.binder.step().instructions());
            }
            Ok(CalibrationProgress::Complete) => {
                log::info!("Player 2 pad registered ({})", self.label_for(device));
                log::info!("Calibration complete! Both pads ready.");
                *completed = Some(state.binder.bindings().entries());
            }
            Ok(CalibrationProgress::NotCalibrating) => {}
            Err(e) => log::warn!("{}", e),
        }
        Route::Consumed
    }

    fn dispatch(&self, device: &DeviceId, player: Player, edge: Edge) {
        match (&self.hold, edge.pressed) {
            (Some(hold), true) => hold.on_press(device, player, edge.direction),
            (Some(hold), false) => {
                hold.on_release(device, edge.direction);
                self.emitter.emit(player, edge.direction, false);
            }
            (None, pressed) => self.emitter.emit(player, edge.direction, pressed),
        }
    }

    /// Stops every hold timer and lifts every key. Call after the reader
    /// threads are joined.
    pub fn shutdown(&self) {
        self.request_stop();
        if let Some(hold) = &self.hold {
            hold.shutdown();
        }
        self.emitter.release_all();
    }
}

enum Route {
    Player(Player),
    Unbound,
    Consumed,
}

/// Read loop knobs shared by all pads
#[derive(Debug, Clone)]
pub struct ReaderTiming {
    pub read_timeout_ms: i32,
    pub poll_interval: Duration,
    pub report_size: usize,
    /// Reports to dump in hex per pad, 0 for none
    pub raw_dump: usize,
}

/// One opened pad, ready for a reader thread
pub struct PadTask {
    pub device_id: DeviceId,
    pub label: String,
    pub format: ReportFormat,
    pub reader: Box<dyn PadReader>,
}

/// Reads one pad until the session stops or the pad goes away
pub fn run_reader(session: &PadSession, decoder: &ReportDecoder, timing: &ReaderTiming, mut task: PadTask) {
    let mut buf = vec![0u8; timing.report_size];
    let mut detector = EdgeDetector::new();
    let mut raw_left = timing.raw_dump;

    log::info!("Reading {}", task.label);

    while session.is_running() {
        match task.reader.read_report(&mut buf, timing.read_timeout_ms) {
            Ok(0) => thread::sleep(timing.poll_interval),
            Ok(len) => {
                let report = &buf[..len.min(buf.len())];
                if raw_left > 0 {
                    raw_left -= 1;
                    log::info!("{} raw: {}", task.label, hex(report));
                }

                let Some(state) = decoder.decode(task.format, report) else {
                    log::trace!("{}: dropped {} byte report", task.label, report.len());
                    continue;
                };

                let edges = detector.update(state);
                if !edges.is_empty() {
                    let held = detector.previous();
                    log::debug!("{}: {} ({} held)", task.label, held, held.len());
                    session.handle_edges(&task.device_id, &edges);
                }
            }
            Err(e) => {
                log::error!("{}. Stopping this pad", e);
                break;
            }
        }
    }

    // lift anything still held so no key or hold timer outlives the pad
    let edges = detector.release_all();
    if !edges.is_empty() {
        session.handle_edges(&task.device_id, &edges);
    }
    session.device_lost(&task.device_id);

    log::info!("{} closed", task.label);
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Owns the reader threads of a session
pub struct PadController {
    session: Arc<PadSession>,
    readers: Vec<JoinHandle<()>>,
}

impl PadController {
    pub fn new(session: Arc<PadSession>) -> Self {
        Self {
            session,
            readers: Vec::new(),
        }
    }

    pub fn spawn_reader(
        &mut self,
        decoder: Arc<ReportDecoder>,
        timing: ReaderTiming,
        task: PadTask,
    ) -> anyhow::Result<()> {
        self.session.register_device(&task.device_id, &task.label);

        let session = Arc::clone(&self.session);
        let handle = thread::Builder::new()
            .name(format!("reader-{}", task.device_id))
            .spawn(move || run_reader(&session, &decoder, &timing, task))?;

        self.readers.push(handle);
        Ok(())
    }

    /// Adopt a thread started elsewhere that also watches the running flag
    pub fn adopt(&mut self, handle: JoinHandle<()>) {
        self.readers.push(handle);
    }

    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    /// Signals stop, waits for every reader, then tears down timers and keys
    pub fn stop(self) {
        self.session.request_stop();
        for handle in self.readers {
            if let Err(e) = handle.join() {
                log::error!("Reader thread panicked: {:?}", e);
            }
        }
        self.session.shutdown();
        log::info!("Session stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PadConfig;
    use crate::error::PadError;
    use crate::output::tests::{recording_emitter, RecordingInjector, Sent};
    use crate::output::{KeyInjector, KeyboardEmitter, OutputKey, PadLayout};
    use std::collections::BTreeSet;
    use crossbeam_channel::{Receiver, Sender};

    const LEFT: [u8; 8] = [0, 0, 0x04, 0, 0, 0, 0, 0];
    const UP: [u8; 8] = [0, 0, 0x1A, 0, 0, 0, 0, 0];
    const NONE: [u8; 8] = [0; 8];

    /// Hands out queued reports, times out when the queue is empty
    struct ScriptedReader {
        reports: Receiver<Vec<u8>>,
    }

    impl PadReader for ScriptedReader {
        fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, PadError> {
            match self.reports.recv_timeout(Duration::from_millis(timeout_ms as u64)) {
                Ok(report) => {
                    let len = report.len().min(buf.len());
                    buf[..len].copy_from_slice(&report[..len]);
                    Ok(len)
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(0),
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(PadError::Read {
                    label: "scripted".to_string(),
                    reason: "unplugged".to_string(),
                }),
            }
        }
    }

    fn timing() -> ReaderTiming {
        ReaderTiming {
            read_timeout_ms: 5,
            poll_interval: Duration::from_millis(1),
            report_size: 64,
            raw_dump: 0,
        }
    }

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s)
    }

    fn scripted(device: &str) -> (PadTask, Sender<Vec<u8>>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let task = PadTask {
            device_id: id(device),
            label: format!("Pad {}", device),
            format: ReportFormat::Keyboard,
            reader: Box::new(ScriptedReader { reports: rx }),
        };
        (task, tx)
    }

    fn bound_session(hold: Option<Duration>) -> (Arc<PadSession>, Arc<Mutex<Vec<Sent>>>) {
        let (emitter, log) = recording_emitter();
        let session = Arc::new(PadSession::new(Arc::new(emitter), hold));
        let saved = [(id("AAA"), Player::One), (id("BBB"), Player::Two)];
        assert!(session.restore_bindings(&saved, &[id("AAA"), id("BBB")]));
        (session, log)
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn bound_pads_press_and_release_their_own_keys() {
        let (session, log) = bound_session(None);
        session.handle_edges(&id("AAA"), &[Edge::press(Direction::Left)]);
        session.handle_edges(&id("BBB"), &[Edge::press(Direction::Left)]);
        session.handle_edges(&id("AAA"), &[Edge::release(Direction::Left)]);

        let sent = log.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![
                Sent::Report(Player::One, vec![OutputKey::Left]),
                Sent::Report(Player::Two, vec![OutputKey::F1]),
                Sent::Report(Player::One, vec![]),
            ]
        );
    }

    #[test]
    fn unbound_pads_produce_nothing() {
        let (session, log) = bound_session(None);
        session.handle_edges(&id("ZZZ"), &[Edge::press(Direction::Up)]);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn calibration_swallows_input_and_rebinds() {
        let (emitter, log) = recording_emitter();
        let calibrated = Arc::new(Mutex::new(Vec::new()));
        let session = {
            let calibrated = calibrated.clone();
            PadSession::new(Arc::new(emitter), None).with_calibration_hook(move |b| {
                calibrated.lock().unwrap().extend_from_slice(b);
            })
        };

        session.start_calibration();
        assert_eq!(session.step(), CalibrationStep::AwaitingFirstPad);

        session.handle_edges(&id("BBB"), &[Edge::press(Direction::Up)]);
        // same pad again is rejected
        session.handle_edges(&id("BBB"), &[Edge::release(Direction::Up), Edge::press(Direction::Down)]);
        assert_eq!(session.step(), CalibrationStep::AwaitingSecondPad);

        session.handle_edges(&id("AAA"), &[Edge::press(Direction::Right)]);
        assert_eq!(session.step(), CalibrationStep::Bound);
        assert_eq!(
            session.bindings(),
            vec![(id("BBB"), Player::One), (id("AAA"), Player::Two)]
        );
        assert_eq!(calibrated.lock().unwrap().len(), 2);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn releases_of_calibration_presses_are_swallowed() {
        let (emitter, log) = recording_emitter();
        let session = PadSession::new(Arc::new(emitter), None);

        session.start_calibration();
        session.handle_edges(&id("AAA"), &[Edge::press(Direction::Up)]);
        session.handle_edges(&id("BBB"), &[Edge::press(Direction::Up)]);
        assert_eq!(session.step(), CalibrationStep::Bound);

        session.handle_edges(&id("BBB"), &[Edge::release(Direction::Up)]);
        assert!(log.lock().unwrap().is_empty());

        session.handle_edges(&id("BBB"), &[Edge::press(Direction::Up)]);
        assert_eq!(
            log.lock().unwrap().clone(),
            vec![Sent::Report(Player::Two, vec![OutputKey::F3])]
        );
    }

    #[test]
    fn starting_calibration_lifts_held_keys() {
        let (session, log) = bound_session(Some(Duration::from_millis(10)));
        session.handle_edges(&id("AAA"), &[Edge::press(Direction::Down)]);
        session.start_calibration();

        let count = log.lock().unwrap().len();
        assert_eq!(
            log.lock().unwrap().last(),
            Some(&Sent::Report(Player::One, vec![]))
        );
        thread::sleep(Duration::from_millis(50));
        assert_eq!(log.lock().unwrap().len(), count);
    }

    #[test]
    fn reader_decodes_reports_into_edges() {
        let (session, log) = bound_session(None);
        let mut controller = PadController::new(session.clone());
        let (task, reports) = scripted("AAA");
        let decoder = Arc::new(ReportDecoder::new(&PadConfig::default()));
        controller.spawn_reader(decoder, timing(), task).unwrap();

        reports.send(LEFT.to_vec()).unwrap();
        reports.send(LEFT.to_vec()).unwrap();
        reports.send(vec![0, 0, 0x04]).unwrap();
        reports.send(NONE.to_vec()).unwrap();
        wait_for(|| log.lock().unwrap().len() >= 2);

        controller.stop();
        assert_eq!(
            log.lock().unwrap().clone(),
            vec![
                Sent::Report(Player::One, vec![OutputKey::Left]),
                Sent::Report(Player::One, vec![]),
            ]
        );
    }

    #[test]
    fn unplugged_pad_releases_keys_and_leaves_others_running() {
        let (session, log) = bound_session(None);
        let mut controller = PadController::new(session.clone());
        let decoder = Arc::new(ReportDecoder::new(&PadConfig::default()));
        let (first, first_reports) = scripted("AAA");
        let (second, second_reports) = scripted("BBB");
        controller.spawn_reader(decoder.clone(), timing(), first).unwrap();
        controller.spawn_reader(decoder, timing(), second).unwrap();
        assert_eq!(controller.reader_count(), 2);

        first_reports.send(UP.to_vec()).unwrap();
        wait_for(|| log.lock().unwrap().len() == 1);
        drop(first_reports);
        wait_for(|| log.lock().unwrap().len() == 2);
        assert_eq!(log.lock().unwrap()[1], Sent::Report(Player::One, vec![]));

        second_reports.send(UP.to_vec()).unwrap();
        wait_for(|| log.lock().unwrap().len() == 3);
        assert!(session.is_running());

        controller.stop();
        assert_eq!(
            log.lock().unwrap().last(),
            Some(&Sent::Report(Player::Two, vec![]))
        );
    }

    #[test]
    fn stop_silences_active_hold_timers() {
        let (session, log) = bound_session(Some(Duration::from_millis(10)));
        let mut controller = PadController::new(session.clone());
        let decoder = Arc::new(ReportDecoder::new(&PadConfig::default()));
        let (task, reports) = scripted("AAA");
        controller.spawn_reader(decoder, timing(), task).unwrap();

        session.handle_edges(&id("BBB"), &[Edge::press(Direction::Up), Edge::press(Direction::Left)]);
        reports.send(UP.to_vec()).unwrap();
        wait_for(|| {
            log.lock()
                .unwrap()
                .iter()
                .any(|s| *s == Sent::Repeat(Player::One, OutputKey::Up))
        });

        controller.stop();
        let at_stop = log.lock().unwrap().len();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(log.lock().unwrap().len(), at_stop);
        assert!(!session.is_running());
    }

    /// Records like `RecordingInjector`, but parks the first report until released
    struct GatedInjector {
        entered: Sender<()>,
        go: Receiver<()>,
        gated: bool,
        log: Arc<Mutex<Vec<Sent>>>,
    }

    impl KeyInjector for GatedInjector {
        fn send_pressed(&mut self, pressed: &BTreeSet<OutputKey>) -> anyhow::Result<()> {
            if self.gated {
                self.gated = false;
                self.entered.send(()).unwrap();
                self.go.recv().unwrap();
            }
            let keys = pressed.iter().copied().collect();
            self.log.lock().unwrap().push(Sent::Report(Player::One, keys));
            Ok(())
        }

        fn repeat(&mut self, key: OutputKey) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(Sent::Repeat(Player::One, key));
            Ok(())
        }
    }

    #[test]
    fn calibration_started_mid_press_leaves_nothing_held() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (go_tx, go_rx) = crossbeam_channel::unbounded();
        let injectors: [Box<dyn KeyInjector>; 2] = [
            Box::new(GatedInjector {
                entered: entered_tx,
                go: go_rx,
                gated: true,
                log: log.clone(),
            }),
            Box::new(RecordingInjector { player: Player::Two, log: log.clone() }),
        ];
        let emitter = Emitter::Keyboard(KeyboardEmitter::new(
            [PadLayout::arrows(), PadLayout::function_keys()],
            injectors,
        ));
        let session = Arc::new(PadSession::new(Arc::new(emitter), Some(Duration::from_millis(10))));
        let saved = [(id("AAA"), Player::One), (id("BBB"), Player::Two)];
        assert!(session.restore_bindings(&saved, &[id("AAA"), id("BBB")]));

        let reader = {
            let session = session.clone();
            thread::spawn(move || session.handle_edges(&id("AAA"), &[Edge::press(Direction::Up)]))
        };
        entered_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let operator = {
            let session = session.clone();
            thread::spawn(move || session.start_calibration())
        };
        thread::sleep(Duration::from_millis(20));
        go_tx.send(()).unwrap();
        reader.join().unwrap();
        operator.join().unwrap();

        assert_eq!(session.step(), CalibrationStep::AwaitingFirstPad);
        assert_eq!(session.held_count(), 0);
        assert_eq!(
            log.lock().unwrap().last(),
            Some(&Sent::Report(Player::One, vec![]))
        );

        // release of the interrupted press is swallowed, nothing keeps repeating
        session.handle_edges(&id("AAA"), &[Edge::release(Direction::Up)]);
        let settled = log.lock().unwrap().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(log.lock().unwrap().len(), settled);
    }
}
