//! Elapsed-time counters used to gate noisy signals.
//!
//! Two signed second counters are maintained by a 1 Hz tick: time since the
//! platform left reset and time since power was applied. While the server is
//! off the power-on counter keeps counting *down*, so a negative value reads
//! as "seconds since power went away". The last-power-state writer relies on
//! that to tell a real power loss (below [`POWER_LOSS_THRESHOLD`]) from a
//! brief bounce.

use core::cell::RefCell;

use log::{info, warn};

use crate::platform::{KeyValueStore, PowerControl, PowerState};
use crate::telemetry::{EventSink, GpioEvent};

/// The power-on counter must fall below this before "off" is persisted.
pub const POWER_LOSS_THRESHOLD: i64 = -2;
/// Ticks to wait after start-up before touching the persisted power state.
pub const LAST_STATE_WARMUP_TICKS: u8 = 20;
/// Key holding the persisted last power state.
pub const LAST_POWER_STATE_KEY: &str = "pwr_server_last_state";

/// Point-in-time copy of both counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ElapsedSnapshot {
    pub since_reset: i64,
    pub power_on: i64,
}

/// The counters themselves. Callers share them through a [`TimerSource`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ElapsedTimers {
    since_reset: i64,
    power_on: i64,
}

impl ElapsedTimers {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            since_reset: 0,
            power_on: 0,
        }
    }

    /// Advances one second. Returns the new power-on counter.
    pub fn tick(&mut self, state: PowerState) -> i64 {
        if state.is_on() {
            self.since_reset = self.since_reset.saturating_add(1);
            self.power_on = self.power_on.saturating_add(1);
        } else {
            self.power_on = self.power_on.saturating_sub(1);
        }
        self.power_on
    }

    pub fn reset_since_reset(&mut self) {
        self.since_reset = 0;
    }

    pub fn reset_power_on(&mut self) {
        self.power_on = 0;
    }

    #[must_use]
    pub const fn snapshot(&self) -> ElapsedSnapshot {
        ElapsedSnapshot {
            since_reset: self.since_reset,
            power_on: self.power_on,
        }
    }
}

/// Shared handle to the counters. Every access takes the implementation's lock.
pub trait TimerSource {
    fn snapshot(&self) -> ElapsedSnapshot;

    fn tick(&self, state: PowerState) -> i64;

    fn reset_since_reset(&self);

    fn reset_power_on(&self);
}

/// Single-threaded sharing, used by host tests.
impl TimerSource for RefCell<ElapsedTimers> {
    fn snapshot(&self) -> ElapsedSnapshot {
        self.borrow().snapshot()
    }

    fn tick(&self, state: PowerState) -> i64 {
        self.borrow_mut().tick(state)
    }

    fn reset_since_reset(&self) {
        self.borrow_mut().reset_since_reset();
    }

    fn reset_power_on(&self) {
        self.borrow_mut().reset_power_on();
    }
}

/// Persists the last power state once the host has finished booting its
/// own power-on scripts.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LastPowerStateTracker {
    ticks: u8,
}

impl LastPowerStateTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self { ticks: 0 }
    }

    #[must_use]
    pub const fn is_warming_up(&self) -> bool {
        self.ticks < LAST_STATE_WARMUP_TICKS
    }

    /// Called once per tick with the state observed and the updated counter.
    pub fn observe<K, S>(&mut self, state: PowerState, power_on: i64, store: &K, sink: &S)
    where
        K: KeyValueStore + ?Sized,
        S: EventSink + ?Sized,
    {
        if self.is_warming_up() {
            self.ticks += 1;
            return;
        }

        let target = match state {
            PowerState::On => PowerState::On,
            PowerState::Off if power_on < POWER_LOSS_THRESHOLD => PowerState::Off,
            PowerState::Off => return,
        };

        let mut buf = [0_u8; 8];
        let stored = match store.get_value(LAST_POWER_STATE_KEY, &mut buf) {
            Ok(len) => buf.get(..len).unwrap_or_default(),
            Err(_) => &[],
        };
        if stored.starts_with(target.as_str().as_bytes()) {
            return;
        }

        match store.set_value(LAST_POWER_STATE_KEY, target.as_str()) {
            Ok(()) => {
                info!("last power state set to {}", target.as_str());
                sink.emit(GpioEvent::LastPowerState(target));
            }
            Err(err) => warn!("failed to persist last power state: {err}"),
        }
    }
}

/// One pass of the 1 Hz timer loop.
pub fn tick_once<P, T, S>(
    platform: &P,
    fru: u8,
    timers: &T,
    tracker: &mut LastPowerStateTracker,
    sink: &S,
) where
    P: PowerControl + KeyValueStore + ?Sized,
    T: TimerSource + ?Sized,
    S: EventSink + ?Sized,
{
    let state = platform.server_power(fru).unwrap_or_else(|err| {
        warn!("power state read failed: {err}");
        PowerState::Off
    });
    let power_on = timers.tick(state);
    tracker.observe(state, power_on, platform, sink);
}
