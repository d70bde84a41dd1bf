use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use gpio_core::platform::{PalError, PowerCommand, PowerControl, PowerOutcome, PowerState};
use gpio_core::target::{
    EventRejected, HandleState, PRDY_EVENT_DETECTED, PinEventCode, ReadType, TargetError,
    TargetEvent, TargetPins, WORKER_PERIOD,
};
use gpiod::error::DaemonError;
use gpiod::target::TargetControlHandle;

/// Thread-safe debug-port pins. Event latches clear when read.
struct SharedPins {
    pltrst_event: AtomicBool,
    pltrst_asserted: AtomicBool,
    prdy_event: AtomicBool,
    preq_level: AtomicBool,
    xdp_event: AtomicBool,
    xdp_owned: AtomicBool,
    initialized: AtomicU32,
    pin_reads: AtomicU32,
}

impl SharedPins {
    fn new() -> Self {
        Self {
            pltrst_event: AtomicBool::new(false),
            pltrst_asserted: AtomicBool::new(false),
            prdy_event: AtomicBool::new(false),
            preq_level: AtomicBool::new(true),
            xdp_event: AtomicBool::new(false),
            xdp_owned: AtomicBool::new(true),
            initialized: AtomicU32::new(0),
            pin_reads: AtomicU32::new(0),
        }
    }

    fn touch(&self) {
        self.pin_reads.fetch_add(1, Ordering::SeqCst);
    }
}

impl TargetPins for SharedPins {
    fn initialize(&self, _fru: u8) -> Result<(), PalError> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn platform_reset_event(&self, _fru: u8) -> Result<bool, PalError> {
        self.touch();
        Ok(self.pltrst_event.swap(false, Ordering::SeqCst))
    }

    fn platform_reset_asserted(&self, _fru: u8) -> Result<bool, PalError> {
        Ok(self.pltrst_asserted.load(Ordering::SeqCst))
    }

    fn prdy_event(&self, _fru: u8) -> Result<bool, PalError> {
        self.touch();
        Ok(self.prdy_event.swap(false, Ordering::SeqCst))
    }

    fn prdy_level(&self, _fru: u8) -> Result<bool, PalError> {
        Ok(true)
    }

    fn preq_assert(&self, _fru: u8, assert: bool) -> Result<(), PalError> {
        self.preq_level.store(!assert, Ordering::SeqCst);
        Ok(())
    }

    fn preq_level(&self, _fru: u8) -> Result<bool, PalError> {
        Ok(self.preq_level.load(Ordering::SeqCst))
    }

    fn power_debug_assert(&self, _fru: u8, _assert: bool) -> Result<(), PalError> {
        Ok(())
    }

    fn power_debug_asserted(&self, _fru: u8) -> Result<bool, PalError> {
        Ok(false)
    }

    fn xdp_present_event(&self, _fru: u8) -> Result<bool, PalError> {
        self.touch();
        Ok(self.xdp_event.swap(false, Ordering::SeqCst))
    }

    fn xdp_present_asserted(&self, _fru: u8) -> Result<bool, PalError> {
        Ok(self.xdp_owned.load(Ordering::SeqCst))
    }
}

struct SharedPower {
    on: AtomicBool,
    commands: Mutex<Vec<PowerCommand>>,
}

impl SharedPower {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            on: AtomicBool::new(true),
            commands: Mutex::new(Vec::new()),
        })
    }
}

impl PowerControl for SharedPower {
    fn server_power(&self, _fru: u8) -> Result<PowerState, PalError> {
        Ok(if self.on.load(Ordering::SeqCst) {
            PowerState::On
        } else {
            PowerState::Off
        })
    }

    fn set_server_power(&self, _fru: u8, command: PowerCommand) -> Result<PowerOutcome, PalError> {
        self.commands.lock().expect("commands").push(command);
        Ok(PowerOutcome::Applied)
    }
}

type Events = Arc<Mutex<Vec<TargetEvent>>>;

fn recorder() -> (Events, impl Fn(TargetEvent) -> Result<(), EventRejected> + Send + Sync) {
    let events: Events = Arc::default();
    let sink = Arc::clone(&events);
    let handler = move |event: TargetEvent| -> Result<(), EventRejected> {
        sink.lock().expect("events").push(event);
        Ok(())
    };
    (events, handler)
}

fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    done()
}

#[test]
fn lifecycle_runs_and_stops_the_worker() {
    let (events, handler) = recorder();
    let power = SharedPower::new();
    let mut handle = TargetControlHandle::new(1, SharedPins::new(), Arc::clone(&power), handler);
    assert_eq!(handle.state(), HandleState::Uninitialized);

    handle.initialize().expect("initialize");
    assert_eq!(handle.state(), HandleState::Running);
    assert_eq!(handle.pins().initialized.load(Ordering::SeqCst), 1);

    power.on.store(false, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(1), || {
        events.lock().expect("events").len() == 1
    }));
    assert_eq!(
        events.lock().expect("events")[0],
        TargetEvent::Pin(PinEventCode::PowerFail)
    );

    let start = Instant::now();
    handle.deinitialize().expect("deinitialize");
    assert!(start.elapsed() < WORKER_PERIOD * 40, "join took {:?}", start.elapsed());
    assert_eq!(handle.state(), HandleState::Stopped);
    assert_eq!(handle.pins().initialized.load(Ordering::SeqCst), 2);

    let reads = handle.pins().pin_reads.load(Ordering::SeqCst);
    thread::sleep(WORKER_PERIOD * 4);
    assert_eq!(handle.pins().pin_reads.load(Ordering::SeqCst), reads);
}

#[test]
fn attached_probe_blocks_initialization() {
    let (events, handler) = recorder();
    let pins = SharedPins::new();
    pins.xdp_owned.store(false, Ordering::SeqCst);
    let mut handle = TargetControlHandle::new(1, pins, SharedPower::new(), handler);

    let err = handle.initialize().expect_err("probe attached");
    assert!(matches!(err, DaemonError::Target(TargetError::ProbeAttached)));
    assert_eq!(handle.state(), HandleState::Uninitialized);
    assert_eq!(handle.pins().initialized.load(Ordering::SeqCst), 0);
    assert_eq!(*events.lock().expect("events"), vec![TargetEvent::XdpPresent]);
}

#[test]
fn probe_attach_stops_the_worker_after_one_event() {
    let (events, handler) = recorder();
    let mut handle = TargetControlHandle::new(1, SharedPins::new(), SharedPower::new(), handler);
    handle.initialize().expect("initialize");

    handle.pins().xdp_owned.store(false, Ordering::SeqCst);
    handle.pins().xdp_event.store(true, Ordering::SeqCst);

    assert!(wait_until(Duration::from_secs(1), || {
        handle.state() == HandleState::Stopped
    }));
    let reads = handle.pins().pin_reads.load(Ordering::SeqCst);
    thread::sleep(WORKER_PERIOD * 4);
    assert_eq!(handle.pins().pin_reads.load(Ordering::SeqCst), reads);
    assert_eq!(*events.lock().expect("events"), vec![TargetEvent::XdpPresent]);

    handle.pins().xdp_owned.store(true, Ordering::SeqCst);
    handle.initialize().expect("restart after the probe left");
    assert_eq!(handle.state(), HandleState::Running);
    handle.deinitialize().expect("deinitialize");
}

#[test]
fn wait_for_ready_signal_times_out_quietly() {
    let (_events, handler) = recorder();
    let handle = TargetControlHandle::new(1, SharedPins::new(), SharedPower::new(), handler);

    let start = Instant::now();
    handle.wait_for_ready_signal(0).expect("timeout is not an error");
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[test]
fn wait_for_ready_signal_consumes_the_event() {
    let (_events, handler) = recorder();
    let handle = TargetControlHandle::new(1, SharedPins::new(), SharedPower::new(), handler);
    handle.pins().prdy_event.store(true, Ordering::SeqCst);

    handle.wait_for_ready_signal(20).expect("ready");
    assert!(!handle.pins().prdy_event.load(Ordering::SeqCst));
}

#[test]
fn enabling_prdy_reports_discards_a_stale_event() {
    let (_events, handler) = recorder();
    let handle = TargetControlHandle::new(1, SharedPins::new(), SharedPower::new(), handler);
    handle.pins().prdy_event.store(true, Ordering::SeqCst);

    handle.write_event_config(2, true).expect("report PRDY");
    assert_eq!(handle.read(ReadType::Probe, PRDY_EVENT_DETECTED), Ok(false));
    assert_eq!(
        handle.write_event_config(9, true),
        Err(TargetError::InvalidEventConfig(9))
    );
}

#[test]
fn output_writes_reach_power_control_and_preq() {
    let (_events, handler) = recorder();
    let power = SharedPower::new();
    let handle = TargetControlHandle::new(1, SharedPins::new(), Arc::clone(&power), handler);

    handle.write(3, false).expect("power button");
    handle.write(2, true).expect("reset button");
    assert_eq!(
        *power.commands.lock().expect("commands"),
        vec![PowerCommand::Off, PowerCommand::Reset]
    );

    handle.write(1, true).expect("PREQ");
    assert_eq!(handle.read(ReadType::Pin, 1), Ok(true));
    assert_eq!(handle.read(ReadType::Pin, 0), Ok(true));
    assert_eq!(handle.write(6, true), Err(TargetError::UnsupportedPin(6)));
}

#[test]
fn initialize_after_probe_event_sees_the_worker_leaving() {
    let (events, handler) = recorder();
    let mut handle = TargetControlHandle::new(1, SharedPins::new(), SharedPower::new(), handler);
    handle.initialize().expect("initialize");

    handle.pins().xdp_owned.store(false, Ordering::SeqCst);
    handle.pins().xdp_event.store(true, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(1), || {
        !events.lock().expect("events").is_empty()
    }));

    let err = handle.initialize().expect_err("probe still attached");
    assert!(matches!(err, DaemonError::Target(TargetError::ProbeAttached)));
    assert_ne!(handle.state(), HandleState::Running);
    assert_eq!(
        *events.lock().expect("events"),
        vec![TargetEvent::XdpPresent, TargetEvent::XdpPresent]
    );
}
