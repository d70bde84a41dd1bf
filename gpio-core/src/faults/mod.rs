//! CATERR/MSMI aggregation.
//!
//! The poll thread only bumps a lock-free counter when a fault pin falls.
//! [`FaultAggregator::tick`] runs every [`AGGREGATOR_PERIOD`] on its own
//! thread, waits one extra tick before committing, classifies a lone
//! assertion as IERR or MCERR from the live pin level, and reports any
//! coalesced extras as MCERR.

use core::fmt;
use core::time::Duration;

use log::warn;
use portable_atomic::{AtomicU32, Ordering};

use crate::pins::PinLevel;
use crate::pins::mainboard::{CPU_CATERR, CPU_MSMI, FAULT_LED};
use crate::platform::{DetachedCommand, GpioAccess, Launcher, SelLogger};
use crate::telemetry::{EventSink, GpioEvent};

pub const AGGREGATOR_PERIOD: Duration = Duration::from_millis(25);

/// Ticks a pending fault must survive before it is reported.
const CONFIRM_TICKS: u8 = 2;

/// Fault signal a pending count belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultClass {
    Caterr,
    Msmi,
}

impl FaultClass {
    pub const ALL: [FaultClass; 2] = [FaultClass::Caterr, FaultClass::Msmi];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            FaultClass::Caterr => "CATERR",
            FaultClass::Msmi => "MSMI",
        }
    }

    /// Line whose live level classifies a lone assertion.
    #[must_use]
    pub const fn status_line(self) -> &'static str {
        match self {
            FaultClass::Caterr => CPU_CATERR,
            FaultClass::Msmi => CPU_MSMI,
        }
    }

    const fn index(self) -> usize {
        match self {
            FaultClass::Caterr => 0,
            FaultClass::Msmi => 1,
        }
    }
}

/// Decoded kind of a reported fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultKind {
    Ierr,
    Mcerr,
}

impl FaultKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            FaultKind::Ierr => "IERR",
            FaultKind::Mcerr => "MCERR",
        }
    }

    /// A line still held low means the CPU latched an internal error.
    #[must_use]
    pub const fn from_status(level: PinLevel) -> Self {
        match level {
            PinLevel::Low => FaultKind::Ierr,
            PinLevel::High => FaultKind::Mcerr,
        }
    }
}

/// Unprocessed assertion counter shared by the poll thread and the aggregator.
#[derive(Debug, Default)]
pub struct FaultCounter(AtomicU32);

impl FaultCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Counts one assertion. Never blocks.
    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    #[must_use]
    pub fn pending(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Removes one pending assertion, if any.
    pub fn take_one(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Drains everything above one. Returns how many were removed.
    pub fn drain_to_one(&self) -> u32 {
        match self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n > 1).then_some(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }
}

/// Counters for both fault classes.
#[derive(Debug, Default)]
pub struct FaultCounters {
    counters: [FaultCounter; 2],
}

impl FaultCounters {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counters: [FaultCounter::new(), FaultCounter::new()],
        }
    }

    #[must_use]
    pub fn get(&self, class: FaultClass) -> &FaultCounter {
        &self.counters[class.index()]
    }

    pub fn record(&self, class: FaultClass) {
        self.get(class).record();
    }
}

/// Per-class aggregator phase.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AggregatorState {
    /// Nothing pending.
    Idle,
    /// Something pending, waiting one more tick before committing.
    Confirming,
    /// Reports were emitted this tick.
    Reporting,
}

impl fmt::Display for AggregatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggregatorState::Idle => "idle",
            AggregatorState::Confirming => "confirming",
            AggregatorState::Reporting => "reporting",
        })
    }
}

#[derive(Copy, Clone, Debug)]
struct ClassTracker {
    ticks: u8,
    state: AggregatorState,
}

impl ClassTracker {
    const IDLE: ClassTracker = ClassTracker {
        ticks: 0,
        state: AggregatorState::Idle,
    };
}

impl Default for ClassTracker {
    fn default() -> Self {
        Self::IDLE
    }
}

/// Drains the fault counters and escalates confirmed faults.
#[derive(Debug, Default)]
pub struct FaultAggregator {
    trackers: [ClassTracker; 2],
}

impl FaultAggregator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            trackers: [ClassTracker::IDLE; 2],
        }
    }

    /// Phase of one class as of the last tick.
    #[must_use]
    pub fn state(&self, class: FaultClass) -> AggregatorState {
        self.trackers[class.index()].state
    }

    /// One aggregator period. Both classes are serviced every call.
    pub fn tick<P, S>(&mut self, counters: &FaultCounters, platform: &P, sink: &S)
    where
        P: GpioAccess + SelLogger + Launcher + ?Sized,
        S: EventSink + ?Sized,
    {
        for class in FaultClass::ALL {
            self.tick_class(class, counters.get(class), platform, sink);
        }
    }

    fn tick_class<P, S>(&mut self, class: FaultClass, counter: &FaultCounter, platform: &P, sink: &S)
    where
        P: GpioAccess + SelLogger + Launcher + ?Sized,
        S: EventSink + ?Sized,
    {
        let tracker = &mut self.trackers[class.index()];
        let pending = counter.pending();
        if pending == 0 {
            tracker.state = AggregatorState::Idle;
            return;
        }

        tracker.ticks = tracker.ticks.saturating_add(1);
        if tracker.ticks < CONFIRM_TICKS {
            tracker.state = AggregatorState::Confirming;
            return;
        }
        tracker.state = AggregatorState::Reporting;

        if pending == 1 {
            let kind = match platform.read_line(class.status_line()) {
                Ok(level) => FaultKind::from_status(level),
                Err(err) => {
                    warn!("{} status read failed: {err}", class.label());
                    FaultKind::Ierr
                }
            };
            report(kind, class, platform, sink);
            counter.take_one();
            tracker.ticks = 0;

            if let Err(err) = platform.write_line(FAULT_LED, PinLevel::Low) {
                warn!("failed to light fault LED: {err}");
            }
            platform.spawn_detached(DetachedCommand::CrashDump);
        } else {
            let extra = counter.drain_to_one();
            for _ in 0..extra {
                report(FaultKind::Mcerr, class, platform, sink);
            }
            tracker.ticks = CONFIRM_TICKS - 1;
        }
    }
}

fn report<P, S>(kind: FaultKind, class: FaultClass, platform: &P, sink: &S)
where
    P: SelLogger + ?Sized,
    S: EventSink + ?Sized,
{
    sink.emit(GpioEvent::FaultAsserted { kind, class });

    let mut sel = heapless::String::<24>::new();
    let _ = fmt::write(
        &mut sel,
        format_args!("CPU {}/{}", kind.label(), class.label()),
    );
    if let Err(err) = platform.add_critical_sel(&sel) {
        warn!("failed to add SEL entry '{sel}': {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_to_one_keeps_a_single_pending_fault() {
        let counter = FaultCounter::new();
        for _ in 0..4 {
            counter.record();
        }
        assert_eq!(counter.drain_to_one(), 3);
        assert_eq!(counter.pending(), 1);
        assert_eq!(counter.drain_to_one(), 0);
        assert!(counter.take_one());
        assert!(!counter.take_one());
        assert_eq!(counter.pending(), 0);
    }

    #[test]
    fn low_status_line_decodes_as_ierr() {
        assert_eq!(FaultKind::from_status(PinLevel::Low), FaultKind::Ierr);
        assert_eq!(FaultKind::from_status(PinLevel::High), FaultKind::Mcerr);
    }
}
