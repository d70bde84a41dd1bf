//! Background loops that run beside the poller.
//!
//! Each loop checks the shared stop flag once per period and returns when it
//! is set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use gpio_core::cpld::{CpldBus, CpldReading, PowerFailMonitor};
use gpio_core::faults::{AGGREGATOR_PERIOD, FaultAggregator, FaultCounters};
use gpio_core::platform::{
    GpioAccess, KeyValueStore, Launcher, PowerControl, PowerState, SelLogger,
};
use gpio_core::telemetry::EventSink;
use gpio_core::timers::{
    ElapsedSnapshot, ElapsedTimers, LastPowerStateTracker, TimerSource, tick_once,
};
use log::{debug, info};

use crate::config::Profile;

/// Background loop started beside the poller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Task {
    /// Elapsed timers and last power state.
    Timers,
    /// CATERR/MSMI aggregation.
    Faults,
    /// CPLD rail failure polling.
    Cpld,
}

impl Task {
    /// Loops a profile runs. The sled has no host power of its own to
    /// track, so it runs none.
    #[must_use]
    pub const fn for_profile(profile: Profile) -> &'static [Task] {
        match profile {
            Profile::Mainboard => &[Task::Timers, Task::Faults, Task::Cpld],
            Profile::Sled => &[],
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Task::Timers => "timers",
            Task::Faults => "faults",
            Task::Cpld => "cpld",
        }
    }
}

/// Period of the elapsed-time tick.
pub const TIMER_PERIOD: Duration = Duration::from_secs(1);

/// Elapsed counters shared across threads behind one mutex.
#[derive(Debug, Default)]
pub struct SharedTimers(Mutex<ElapsedTimers>);

impl SharedTimers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ElapsedTimers> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TimerSource for SharedTimers {
    fn snapshot(&self) -> ElapsedSnapshot {
        self.lock().snapshot()
    }

    fn tick(&self, state: PowerState) -> i64 {
        self.lock().tick(state)
    }

    fn reset_since_reset(&self) {
        self.lock().reset_since_reset();
    }

    fn reset_power_on(&self) {
        self.lock().reset_power_on();
    }
}

/// Runs `step` every `period` until `stop` is set.
pub fn every<F>(period: Duration, stop: &AtomicBool, mut step: F)
where
    F: FnMut(),
{
    while !stop.load(Ordering::Acquire) {
        step();
        thread::sleep(period);
    }
}

/// 1 Hz elapsed-time tick and last power state persistence.
pub fn run_timers<P, T, S>(platform: &P, fru: u8, timers: &T, sink: &S, stop: &AtomicBool)
where
    P: PowerControl + KeyValueStore + ?Sized,
    T: TimerSource + ?Sized,
    S: EventSink + ?Sized,
{
    let mut tracker = LastPowerStateTracker::new();
    every(TIMER_PERIOD, stop, || {
        tick_once(platform, fru, timers, &mut tracker, sink);
    });
    debug!("timer loop stopped");
}

/// CATERR/MSMI aggregation.
pub fn run_faults<P, S>(counters: &FaultCounters, platform: &P, sink: &S, stop: &AtomicBool)
where
    P: GpioAccess + SelLogger + Launcher + ?Sized,
    S: EventSink + ?Sized,
{
    let mut aggregator = FaultAggregator::new();
    every(AGGREGATOR_PERIOD, stop, || {
        aggregator.tick(counters, platform, sink);
    });
    debug!("fault aggregator stopped");
}

/// Polls the CPLD for rail failures and logs when the reading changes.
pub fn run_cpld<B, P, S>(bus: &mut B, platform: &P, sink: &S, period: Duration, stop: &AtomicBool)
where
    B: CpldBus + ?Sized,
    P: GpioAccess + SelLogger + ?Sized,
    S: EventSink + ?Sized,
{
    let mut monitor = PowerFailMonitor::new();
    let mut last = CpldReading::Skip;
    every(period, stop, || {
        let reading = monitor.poll(bus, platform, sink);
        if reading != CpldReading::Skip && reading != last {
            info!("CPLD power fail reading: {reading:?}");
            last = reading;
        }
    });
    debug!("CPLD monitor stopped");
}
