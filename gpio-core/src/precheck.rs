//! One-shot pass run before the poller attaches.
//!
//! Seeds the cached level of a few entries from hardware and catches faults
//! that were asserted before the daemon started, since no edge will arrive
//! for those.

use log::warn;

use crate::faults::FaultCounters;
use crate::pins::mainboard::{CPU_CATERR, CPU_MSMI, CPU0_SOCKET_OCCUPIED, CPU1_SOCKET_OCCUPIED};
use crate::pins::{EdgeAction, PinLevel, PinMonitor, find_mut};
use crate::platform::{GpioAccess, PowerControl, PowerState};
use crate::telemetry::{EventSink, GpioEvent};

/// When a pre-check entry counts as active.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PrecheckTrigger {
    /// Always log the current level.
    DontCare,
    /// Active when the server is in `power` and the line reads `level`.
    When { power: PowerState, level: PinLevel },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PrecheckEntry {
    pub line: &'static str,
    pub trigger: PrecheckTrigger,
}

const FAULT_ACTIVE: PrecheckTrigger = PrecheckTrigger::When {
    power: PowerState::On,
    level: PinLevel::Low,
};

pub const MAINBOARD_PRECHECK: [PrecheckEntry; 4] = [
    PrecheckEntry {
        line: CPU0_SOCKET_OCCUPIED,
        trigger: PrecheckTrigger::DontCare,
    },
    PrecheckEntry {
        line: CPU1_SOCKET_OCCUPIED,
        trigger: PrecheckTrigger::DontCare,
    },
    PrecheckEntry {
        line: CPU_CATERR,
        trigger: FAULT_ACTIVE,
    },
    PrecheckEntry {
        line: CPU_MSMI,
        trigger: FAULT_ACTIVE,
    },
];

/// Runs `checks` against `table`, updating cached levels in place.
pub fn run_precheck<P, S>(
    checks: &[PrecheckEntry],
    table: &mut [PinMonitor],
    platform: &P,
    fru: u8,
    faults: &FaultCounters,
    sink: &S,
) where
    P: GpioAccess + PowerControl + ?Sized,
    S: EventSink + ?Sized,
{
    for check in checks {
        let Some(pin) = find_mut(table, check.line) else {
            continue;
        };
        let level = match platform.read_line(check.line) {
            Ok(level) => level,
            Err(err) => {
                warn!("pre-check of {} failed: {err}", check.line);
                continue;
            }
        };
        pin.value = level;

        match check.trigger {
            PrecheckTrigger::DontCare => sink.emit(GpioEvent::pin_changed(pin)),
            PrecheckTrigger::When {
                power,
                level: active,
            } => {
                let current = platform.server_power(fru).unwrap_or_else(|err| {
                    warn!("server power read failed: {err}");
                    PowerState::Off
                });
                if current != power || level != active {
                    continue;
                }
                match pin.action {
                    EdgeAction::Fault(class) => faults.record(class),
                    _ => sink.emit(GpioEvent::pin_changed(pin)),
                }
            }
        }
    }
}
