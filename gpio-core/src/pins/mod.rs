//! Pin monitor entries and the static tables consumed by the poller.
//!
//! A [`PinMonitor`] describes one physical signal: the ASPEED line name, the
//! edge that should wake the poller, the last observed level, and the policy
//! (filter plus action) applied when the edge fires. The tables in
//! [`mainboard`] and [`sled`] are copied into a mutable buffer at start-up;
//! the poller is the only writer of the `value` field afterwards.

use core::fmt;
use core::time::Duration;

use crate::faults::FaultClass;

pub mod mainboard;
pub mod sled;

pub use mainboard::MAINBOARD_PINS;
pub use sled::SLED_PINS;

/// Number of lines in one ASPEED GPIO bank.
pub const LINES_PER_BANK: u32 = 8;

/// Edge that wakes the poller for a given line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

impl Edge {
    /// Value written to the sysfs `edge` attribute.
    #[must_use]
    pub const fn sysfs_name(self) -> &'static str {
        match self {
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        }
    }
}

/// Logical level observed on a line.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum PinLevel {
    #[default]
    Low,
    High,
}

impl PinLevel {
    /// Converts a sysfs `0`/`1` reading into a level. Any non-zero value is high.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        if raw == 0 { PinLevel::Low } else { PinLevel::High }
    }

    #[must_use]
    pub const fn as_raw(self) -> u8 {
        match self {
            PinLevel::Low => 0,
            PinLevel::High => 1,
        }
    }

    #[must_use]
    pub const fn is_high(self) -> bool {
        matches!(self, PinLevel::High)
    }

    #[must_use]
    pub const fn is_low(self) -> bool {
        matches!(self, PinLevel::Low)
    }

    /// Monitored signals are active low, so a low level reads as an assertion.
    #[must_use]
    pub const fn assertion_label(self) -> &'static str {
        match self {
            PinLevel::Low => "ASSERT",
            PinLevel::High => "DEASSERT",
        }
    }
}

impl fmt::Display for PinLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PinLevel::Low => "0",
            PinLevel::High => "1",
        })
    }
}

/// Translates an ASPEED line name (`GPIOB6`, `GPIOAA1`) into its controller
/// offset. Banks `A..Z` are 0..25 and two-letter banks continue at 26.
#[must_use]
pub fn line_offset(name: &str) -> Option<u32> {
    let rest = name.strip_prefix("GPIO")?.as_bytes();
    let (bank, bit) = match rest {
        [bank @ b'A'..=b'Z', bit @ b'0'..=b'7'] => (u32::from(bank - b'A'), *bit),
        [b'A'..=b'Z', second @ b'A'..=b'Z', bit @ b'0'..=b'7'] => {
            (26 + u32::from(second - b'A'), *bit)
        }
        _ => return None,
    };
    Some(bank * LINES_PER_BANK + u32::from(bit - b'0'))
}

/// CPU socket referenced by per-socket signals.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Cpu {
    Cpu0,
    Cpu1,
}

impl Cpu {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Cpu::Cpu0 => "CPU0",
            Cpu::Cpu1 => "CPU1",
        }
    }
}

/// Server slot on a multi-node sled (1-based).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct SlotId(u8);

impl SlotId {
    pub const SLOT1: SlotId = SlotId(1);
    pub const SLOT2: SlotId = SlotId(2);
    pub const SLOT3: SlotId = SlotId(3);
    pub const SLOT4: SlotId = SlotId(4);

    /// Highest slot number on the sled.
    pub const MAX: u8 = 4;

    #[must_use]
    pub const fn new(slot: u8) -> Option<Self> {
        if slot >= 1 && slot <= Self::MAX {
            Some(SlotId(slot))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Zero-based index for per-slot arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    /// The slot sharing 12V with this one in a paired configuration.
    #[must_use]
    pub const fn pair(self) -> SlotId {
        match self.0 {
            1 => SlotId(2),
            2 => SlotId(1),
            3 => SlotId(4),
            _ => SlotId(3),
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot{}", self.0)
    }
}

/// Condition that must hold before an edge is reported.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventFilter {
    /// Report every edge.
    Always,
    /// Report only while the server is on and has been on for `settle_secs`.
    PoweredOn { settle_secs: i64 },
    /// Report only while platform reset is released, the server is on, and
    /// reset was released at least `settle_secs` ago.
    OutOfReset { settle_secs: i64 },
}

impl EventFilter {
    pub const POWERED_ON: EventFilter = EventFilter::PoweredOn { settle_secs: 0 };
    pub const OUT_OF_RESET: EventFilter = EventFilter::OutOfReset { settle_secs: 0 };
}

/// Work performed once an edge passes its filter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgeAction {
    /// Log the transition.
    Log,
    /// Log the transition after a delay, off the poll thread.
    LogDelayed(Duration),
    /// Power-good: restart the power-on timer, reset the debug card on loss.
    PowerGood,
    /// POST card presence: reset the debug card when it is removed.
    PostCardPresence,
    /// CPU thermal trip latch: log and add a critical SEL entry.
    ThermalTripLatch(Cpu),
    /// CPU PROCHOT: log and add a critical SEL entry annotated with its cause.
    Prochot(Cpu),
    /// CATERR/MSMI: count the assertion for the fault aggregator.
    Fault(FaultClass),
    /// Platform reset: restart the since-reset timer and log.
    PlatformReset,
    /// Sled fan latch: sled pulled out or pushed in.
    SledLatch,
    /// Slot ejector latch opened.
    EjectorLatch(SlotId),
    /// One of the two redundant presence pins of a slot.
    SlotPresence(SlotId),
}

/// One physical signal watched by the poller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PinMonitor {
    pub line: &'static str,
    pub desc: &'static str,
    pub edge: Edge,
    pub value: PinLevel,
    pub filter: EventFilter,
    pub action: EdgeAction,
}

impl PinMonitor {
    pub const fn new(
        line: &'static str,
        desc: &'static str,
        edge: Edge,
        filter: EventFilter,
        action: EdgeAction,
    ) -> Self {
        Self {
            line,
            desc,
            edge,
            value: PinLevel::Low,
            filter,
            action,
        }
    }

    /// Shorthand for an unfiltered entry that only logs.
    #[must_use]
    pub const fn logged(line: &'static str, desc: &'static str) -> Self {
        Self::new(line, desc, Edge::Both, EventFilter::Always, EdgeAction::Log)
    }

    /// Shorthand for an entry logged only while the server is powered.
    #[must_use]
    pub const fn powered(line: &'static str, desc: &'static str, settle_secs: i64) -> Self {
        Self::new(
            line,
            desc,
            Edge::Both,
            EventFilter::PoweredOn { settle_secs },
            EdgeAction::Log,
        )
    }

    /// Controller offset of the line, if the name is well formed.
    #[must_use]
    pub fn offset(&self) -> Option<u32> {
        line_offset(self.line)
    }
}

impl fmt::Display for PinMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} - {}",
            self.value.assertion_label(),
            self.line,
            self.desc
        )
    }
}

/// Callback surface invoked by the poller, on its own thread, for each edge.
///
/// Implementations must return promptly: later edges queue behind this call.
pub trait EdgeHandler {
    fn on_edge(&mut self, pin: &PinMonitor);
}

/// Finds the entry for `line` in a table.
#[must_use]
pub fn find<'t>(table: &'t [PinMonitor], line: &str) -> Option<&'t PinMonitor> {
    table.iter().find(|entry| entry.line == line)
}

/// Finds the mutable entry for `line` in a table.
#[must_use]
pub fn find_mut<'t>(table: &'t mut [PinMonitor], line: &str) -> Option<&'t mut PinMonitor> {
    table.iter_mut().find(|entry| entry.line == line)
}
