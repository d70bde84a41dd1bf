//! Threaded target control handle.
//!
//! One worker thread per handle runs [`TargetMonitor::poll_once`] every
//! [`WORKER_PERIOD`] under the handle's mutex. The same mutex serializes
//! probe-register reads, event configuration and the PRDY wait against the
//! worker. Output pin writes bypass it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use gpio_core::platform::PowerControl;
use gpio_core::target::{
    HandleState, PRDY_EVENT_DETECTED, ReadType, TargetError, TargetEventHandler, TargetMonitor,
    TargetPins, WORKER_PERIOD, WorkerStep, WriteConfig, prdy_timeout, read_pin, write_pin,
};
use log::{debug, error, info};

use crate::error::DaemonError;
use crate::platform::ThreadDelay;

pub mod sysfs_pins;

pub use sysfs_pins::SysfsTargetPins;

/// Sleep between PRDY checks while waiting.
const READY_SPIN: Duration = Duration::from_micros(1);

struct Shared<P, W, H> {
    monitor: Mutex<TargetMonitor>,
    state: Mutex<HandleState>,
    exit: AtomicBool,
    pins: P,
    power: Arc<W>,
    handler: H,
}

impl<P, W, H> Shared<P, W, H> {
    fn monitor(&self) -> MutexGuard<'_, TargetMonitor> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: HandleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn state(&self) -> HandleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct TargetControlHandle<P, W, H>
where
    P: TargetPins + Send + Sync + 'static,
    W: PowerControl + Send + Sync + 'static,
    H: TargetEventHandler + Send + Sync + 'static,
{
    fru: u8,
    shared: Arc<Shared<P, W, H>>,
    worker: Option<JoinHandle<()>>,
}

impl<P, W, H> TargetControlHandle<P, W, H>
where
    P: TargetPins + Send + Sync + 'static,
    W: PowerControl + Send + Sync + 'static,
    H: TargetEventHandler + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(fru: u8, pins: P, power: Arc<W>, handler: H) -> Self {
        Self {
            fru,
            shared: Arc::new(Shared {
                monitor: Mutex::new(TargetMonitor::new(fru)),
                state: Mutex::new(HandleState::Uninitialized),
                exit: AtomicBool::new(false),
                pins,
                power,
                handler,
            }),
            worker: None,
        }
    }

    #[must_use]
    pub fn fru(&self) -> u8 {
        self.fru
    }

    #[must_use]
    pub fn state(&self) -> HandleState {
        self.shared.state()
    }

    #[must_use]
    pub fn pins(&self) -> &P {
        &self.shared.pins
    }

    /// Checks for a probe, sets up the pins and starts the worker.
    ///
    /// A handle whose worker stopped on its own can be initialized again.
    pub fn initialize(&mut self) -> Result<(), DaemonError> {
        {
            // A worker that is leaving marks itself Stopping while it still
            // holds the monitor, so this check cannot see a stale Running.
            let _monitor = self.shared.monitor();
            if self.state() == HandleState::Running {
                debug!("target handle for FRU {} already running", self.fru);
                return Ok(());
            }
        }
        self.join_worker();

        self.shared
            .monitor()
            .start(&self.shared.pins, &self.shared.handler)?;

        self.shared.exit.store(false, Ordering::Release);
        self.shared.set_state(HandleState::Running);
        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name(format!("target-{}", self.fru))
            .spawn(move || worker_loop(&shared))
            .map_err(|source| {
                error!("error creating target worker thread: {source}");
                self.shared.set_state(HandleState::Uninitialized);
                DaemonError::Spawn {
                    name: "target worker",
                    source,
                }
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Stops the worker and returns the pins to their idle setup.
    pub fn deinitialize(&mut self) -> Result<(), TargetError> {
        self.shared.exit.store(true, Ordering::Release);
        if self.worker.is_some() {
            if self.state() == HandleState::Running {
                self.shared.set_state(HandleState::Stopping);
            }
            self.join_worker();
            self.shared.set_state(HandleState::Stopped);
        }
        Ok(self.shared.pins.initialize(self.fru)?)
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("target worker for FRU {} panicked", self.fru);
            }
        }
    }

    /// Drives a logical output pin. Does not wait for the worker.
    pub fn write(&self, pin: u8, assert: bool) -> Result<(), TargetError> {
        write_pin(
            &self.shared.pins,
            &*self.shared.power,
            self.fru,
            pin,
            assert,
        )
    }

    /// Reads a probe register (consuming the PRDY latch) or a pin level.
    pub fn read(&self, kind: ReadType, pin: u8) -> Result<bool, TargetError> {
        match kind {
            ReadType::Probe => self.shared.monitor().read_probe(&self.shared.pins, pin),
            ReadType::Pin => read_pin(&self.shared.pins, &*self.shared.power, self.fru, pin),
        }
    }

    pub fn write_event_config(&self, option: u8, enable: bool) -> Result<(), TargetError> {
        let option = WriteConfig::from_raw(option)?;
        self.shared
            .monitor()
            .write_event_config(&self.shared.pins, option, enable)
    }

    /// Spins until PRDY fires or `2^log2_timeout` JTAG clocks pass.
    ///
    /// Always succeeds; a timeout is only logged.
    pub fn wait_for_ready_signal(&self, log2_timeout: u8) -> Result<(), TargetError> {
        let timeout = prdy_timeout(log2_timeout);
        let start = Instant::now();
        loop {
            let triggered = self
                .shared
                .monitor()
                .read_probe(&self.shared.pins, PRDY_EVENT_DETECTED);
            match triggered {
                Ok(true) => {
                    debug!("PRDY triggered after {:?}", start.elapsed());
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => error!("PRDY event read failed: {err}"),
            }
            if start.elapsed() >= timeout {
                info!("wait for PRDY timed out after {timeout:?}");
                return Ok(());
            }
            thread::sleep(READY_SPIN);
        }
    }
}

impl<P, W, H> Drop for TargetControlHandle<P, W, H>
where
    P: TargetPins + Send + Sync + 'static,
    W: PowerControl + Send + Sync + 'static,
    H: TargetEventHandler + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shared.exit.store(true, Ordering::Release);
        self.join_worker();
    }
}

fn worker_loop<P, W, H>(shared: &Shared<P, W, H>)
where
    P: TargetPins,
    W: PowerControl,
    H: TargetEventHandler,
{
    debug!("pin monitoring thread started");
    shared.monitor().prime(&*shared.power);

    while !shared.exit.load(Ordering::Acquire) {
        let mut monitor = shared.monitor();
        let step = monitor.poll_once(&shared.pins, &*shared.power, &shared.handler, &ThreadDelay);
        if step == WorkerStep::Exit {
            shared.set_state(HandleState::Stopping);
            drop(monitor);
            info!("debug probe attached, target worker exiting");
            break;
        }
        drop(monitor);
        thread::sleep(WORKER_PERIOD);
    }
    shared.set_state(HandleState::Stopped);
}
