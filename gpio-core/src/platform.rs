//! Hardware and host services consumed by the event handlers.
//!
//! Each trait is a narrow seam: the daemon implements them over sysfs, the
//! key/value directory and `std::process`, while tests implement them over
//! in-memory mocks. All methods take `&self` because the poll thread, the
//! timer thread and the fault aggregator share one platform instance.

use core::fmt;
use core::time::Duration;

use crate::pins::{PinLevel, SlotId};
use crate::telemetry::GpioEvent;

/// Failure reported by a platform service.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PalError {
    /// The underlying device could not be read or written.
    Io,
    /// The named line or key is unknown to this platform.
    NotFound,
    /// The request is not supported by this platform.
    NotSupported,
    /// A caller-supplied buffer was too small for the stored value.
    BufferTooSmall,
}

impl fmt::Display for PalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PalError::Io => "device I/O failed",
            PalError::NotFound => "no such line or key",
            PalError::NotSupported => "operation not supported",
            PalError::BufferTooSmall => "value does not fit in buffer",
        })
    }
}

/// Server power as reported by the power controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PowerState {
    Off,
    On,
}

impl PowerState {
    #[must_use]
    pub const fn is_on(self) -> bool {
        matches!(self, PowerState::On)
    }

    /// String persisted as the last power state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PowerState::Off => "off",
            PowerState::On => "on",
        }
    }
}

/// Requested change of server power.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PowerCommand {
    On,
    Off,
    Cycle,
    Reset,
    GracefulShutdown,
}

/// Result of a power request that did not fail.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PowerOutcome {
    /// The button plan ran.
    Applied,
    /// The server was already in the requested state.
    NoChange,
}

pub trait PowerControl {
    fn server_power(&self, fru: u8) -> Result<PowerState, PalError>;

    fn set_server_power(&self, fru: u8, command: PowerCommand) -> Result<PowerOutcome, PalError>;
}

/// Raw line access by ASPEED line name.
pub trait GpioAccess {
    fn read_line(&self, line: &str) -> Result<PinLevel, PalError>;

    fn write_line(&self, line: &str, level: PinLevel) -> Result<(), PalError>;
}

/// Critical entries shown on the front-panel debug card.
pub trait SelLogger {
    fn add_critical_sel(&self, message: &str) -> Result<(), PalError>;
}

/// Persistent string store keyed by name.
pub trait KeyValueStore {
    /// Copies the value for `key` into `buf` and returns its length.
    fn get_value(&self, key: &str, buf: &mut [u8]) -> Result<usize, PalError>;

    fn set_value(&self, key: &str, value: &str) -> Result<(), PalError>;
}

/// Per-slot power rails and presence on the sled.
pub trait SlotControl {
    fn is_slot_present(&self, slot: SlotId) -> Result<bool, PalError>;

    fn is_slot_12v_on(&self, slot: SlotId) -> Result<bool, PalError>;

    /// Drives the slot's 12V enable output low.
    fn disable_slot_12v(&self, slot: SlotId) -> Result<(), PalError>;

    /// Turns off 12V on the paired slot when the slots run as a pair.
    fn pair_12v_off(&self, slot: SlotId) -> Result<(), PalError>;
}

/// Marker files other services watch.
pub trait Markers {
    fn touch_reset_marker(&self) -> Result<(), PalError>;

    fn mark_slot_reinit(&self, slot: SlotId) -> Result<(), PalError>;

    fn record_slot_type(&self, slot: SlotId) -> Result<(), PalError>;

    fn clear_reinit_pid(&self, slot: SlotId) -> Result<(), PalError>;
}

/// External command launched without waiting for it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DetachedCommand {
    CrashDump,
    StopFanControl,
    RestartFanControl,
    /// Re-run fan setup, then start fan control.
    ResumeFanControl,
    /// Stop fan control, then force every fan to full speed.
    FanFailsafe,
    DebugCardReset,
    Slot12vOn(SlotId),
}

/// Fire-and-forget work that must not block the calling thread.
pub trait Launcher {
    /// Starts `command` and drops the handle. Failures are not reported.
    fn spawn_detached(&self, command: DetachedCommand);

    /// Emits `event` once `delay` has passed.
    fn emit_later(&self, delay: Duration, event: GpioEvent);
}

/// Everything the mainboard and sled handlers need.
pub trait Platform:
    PowerControl + GpioAccess + SelLogger + KeyValueStore + SlotControl + Markers + Launcher
{
}

impl<T> Platform for T where
    T: PowerControl + GpioAccess + SelLogger + KeyValueStore + SlotControl + Markers + Launcher
{
}
