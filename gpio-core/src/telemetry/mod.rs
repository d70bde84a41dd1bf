//! Event catalog and the bounded history kept by the daemon.
//!
//! Handlers never format log lines themselves. They emit a typed
//! [`GpioEvent`] through an [`EventSink`]; the daemon renders it through the
//! `log` facade and keeps the most recent entries in an [`EventHistory`] so a
//! crash or a debug dump can show what led up to it.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::cpld::RailFault;
use crate::faults::{FaultClass, FaultKind};
use crate::pins::{PinLevel, PinMonitor, SlotId};
use crate::platform::PowerState;

/// Monotonic identifier assigned to recorded events.
pub type EventId = u32;

/// How loudly an event should be reported.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Severity {
    Critical,
    Info,
}

/// Structured events produced by the monitors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GpioEvent {
    /// A watched line changed level.
    PinChanged {
        line: &'static str,
        desc: &'static str,
        level: PinLevel,
    },
    /// A CATERR or MSMI assertion was classified.
    FaultAsserted { kind: FaultKind, class: FaultClass },
    /// The CPLD reported a power rail failure.
    RailFailure(RailFault),
    /// The sled fan latch moved.
    SledLatch { pulled_out: bool },
    /// A server slot was removed while the sled was out.
    SlotRemoved { slot: SlotId, with_12v_on: bool },
    /// A server slot was inserted while the sled was out.
    SlotInserted(SlotId),
    /// The persisted last power state was rewritten.
    LastPowerState(PowerState),
}

impl GpioEvent {
    /// Builds a level change event from a pin entry's cached value.
    #[must_use]
    pub const fn pin_changed(pin: &PinMonitor) -> Self {
        GpioEvent::PinChanged {
            line: pin.line,
            desc: pin.desc,
            level: pin.value,
        }
    }

    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            GpioEvent::LastPowerState(_) => Severity::Info,
            _ => Severity::Critical,
        }
    }
}

impl fmt::Display for GpioEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpioEvent::PinChanged { line, desc, level } => {
                write!(f, "{}: {line} - {desc}", level.assertion_label())
            }
            GpioEvent::FaultAsserted { kind, class } => {
                write!(f, "ASSERT: {}/{}", kind.label(), class.label())
            }
            GpioEvent::RailFailure(fault) => write!(f, "{fault}"),
            GpioEvent::SledLatch { pulled_out: true } => f.write_str("SLED is pulled out"),
            GpioEvent::SledLatch { pulled_out: false } => f.write_str("SLED is pulled in"),
            GpioEvent::SlotRemoved {
                slot,
                with_12v_on: true,
            } => write!(f, "{slot} Removal Without 12V-OFF"),
            GpioEvent::SlotRemoved {
                slot,
                with_12v_on: false,
            } => write!(f, "{slot} Removal"),
            GpioEvent::SlotInserted(slot) => write!(f, "{slot} Insertion"),
            GpioEvent::LastPowerState(state) => {
                write!(f, "last pwr state updated to {}", state.as_str())
            }
        }
    }
}

/// Destination for structured events. Shared by every monitor thread.
pub trait EventSink {
    fn emit(&self, event: GpioEvent);
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn emit(&self, event: GpioEvent) {
        (**self).emit(event);
    }
}

/// Total number of events retained in memory.
pub const EVENT_HISTORY_CAPACITY: usize = 64;

/// Event stored in the history ring.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EventRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: GpioEvent,
}

/// Records events into a fixed-size ring, dropping the oldest first.
pub struct EventHistory<TInstant, const CAPACITY: usize = EVENT_HISTORY_CAPACITY>
where
    TInstant: Copy,
{
    ring: HistoryBuf<EventRecord<TInstant>, CAPACITY>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> EventHistory<TInstant, CAPACITY>
where
    TInstant: Copy,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    pub fn record(&mut self, event: GpioEvent, timestamp: TInstant) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(EventRecord {
            id,
            timestamp,
            event,
        });
        id
    }

    /// Returns an iterator over the recorded events in chronological order.
    #[must_use]
    pub fn oldest_first(&self) -> OldestOrdered<'_, EventRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&EventRecord<TInstant>> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<TInstant, const CAPACITY: usize> Default for EventHistory<TInstant, CAPACITY>
where
    TInstant: Copy,
{
    fn default() -> Self {
        Self::new()
    }
}
