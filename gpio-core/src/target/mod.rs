//! Debug-probe target control.
//!
//! [`TargetMonitor`] holds the per-FRU event configuration and runs one
//! iteration of the pin-service loop. It owns no thread and no lock; the
//! daemon wraps it in a mutex and calls [`TargetMonitor::poll_once`] every
//! [`WORKER_PERIOD`].
//!
//! Output pins (power and reset buttons, PREQ, power debug) are written with
//! [`write_pin`], which does not touch the monitor state.

use core::fmt;
use core::time::Duration;

use log::{debug, error};

use crate::platform::{PalError, PowerCommand, PowerControl, PowerState};
use crate::power::Delay;

/// Period of the worker loop.
pub const WORKER_PERIOD: Duration = Duration::from_millis(5);
/// Settle time before PREQ is re-pulsed after a reset break.
pub const RESET_BREAK_SETTLE: Duration = Duration::from_millis(10);
pub const JTAG_CLOCK_CYCLE_MICROSEC: u64 = 1;
/// Pin id that selects the PRDY event latch in a probe-register read.
pub const PRDY_EVENT_DETECTED: u8 = 0;

/// Timeout of a PRDY wait: one JTAG clock period times `2^log2_timeout`.
#[must_use]
pub const fn prdy_timeout(log2_timeout: u8) -> Duration {
    let shift = if log2_timeout > 63 { 63 } else { log2_timeout };
    Duration::from_micros(JTAG_CLOCK_CYCLE_MICROSEC.saturating_mul(1 << shift))
}

/// Logical pins addressed by the probe protocol.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Pin {
    PowerGood,
    Preq,
    ResetButton,
    PowerButton,
    EarlyBootStall,
    SysPowerOk,
    Prdy,
    TckMuxSelect,
    PreqMuxSelect,
    XdpPresent,
    MicroBreak,
}

impl Pin {
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Pin::PowerGood,
            1 => Pin::Preq,
            2 => Pin::ResetButton,
            3 => Pin::PowerButton,
            4 => Pin::EarlyBootStall,
            5 => Pin::SysPowerOk,
            6 => Pin::Prdy,
            7 => Pin::TckMuxSelect,
            8 => Pin::PreqMuxSelect,
            9 => Pin::XdpPresent,
            10 => Pin::MicroBreak,
            _ => return None,
        })
    }
}

/// Register bank selected by a read.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReadType {
    /// Probe status, currently only the PRDY event latch.
    Probe,
    /// Live pin levels.
    Pin,
}

/// Event configuration option toggled by [`TargetMonitor::write_event_config`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WriteConfig {
    BreakAll,
    ResetBreak,
    ReportPrdy,
    ReportPltRst,
    ReportMbp,
}

impl WriteConfig {
    pub const fn from_raw(raw: u8) -> Result<Self, TargetError> {
        Ok(match raw {
            0 => WriteConfig::BreakAll,
            1 => WriteConfig::ResetBreak,
            2 => WriteConfig::ReportPrdy,
            3 => WriteConfig::ReportPltRst,
            4 => WriteConfig::ReportMbp,
            other => return Err(TargetError::InvalidEventConfig(other)),
        })
    }

    const fn label(self) -> &'static str {
        match self {
            WriteConfig::BreakAll => "BREAK_ALL",
            WriteConfig::ResetBreak => "RESET_BREAK",
            WriteConfig::ReportPrdy => "REPORT_PRDY",
            WriteConfig::ReportPltRst => "REPORT_PLTRST",
            WriteConfig::ReportMbp => "REPORT_MBP",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct EventConfig {
    pub break_all: bool,
    pub reset_break: bool,
    pub report_prdy: bool,
    pub report_pltrst: bool,
    pub report_mbp: bool,
}

impl EventConfig {
    pub const CLEARED: Self = Self {
        break_all: false,
        reset_break: false,
        report_prdy: false,
        report_pltrst: false,
        report_mbp: false,
    };

    const fn reset_break_armed(&self) -> bool {
        self.break_all && self.reset_break
    }
}

/// Pin event pushed to the probe protocol layer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinEventCode {
    PrdyEvent,
    PlatformResetDeassert,
    PlatformResetAssert,
    PowerFail,
    PowerRestore,
}

impl PinEventCode {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            PinEventCode::PrdyEvent => 1,
            PinEventCode::PlatformResetDeassert => 2,
            PinEventCode::PlatformResetAssert => 3,
            PinEventCode::PowerFail => 4,
            PinEventCode::PowerRestore => 5,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TargetEvent {
    Pin(PinEventCode),
    /// A probe is attached to the debug port; the BMC must release its pins.
    XdpPresent,
}

/// Returned by a [`TargetEventHandler`] that could not accept an event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EventRejected;

impl fmt::Display for EventRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("event rejected by handler")
    }
}

/// Receiver of target events. Called with the monitor lock held.
pub trait TargetEventHandler {
    fn on_event(&self, event: TargetEvent) -> Result<(), EventRejected>;
}

impl<F> TargetEventHandler for F
where
    F: Fn(TargetEvent) -> Result<(), EventRejected>,
{
    fn on_event(&self, event: TargetEvent) -> Result<(), EventRejected> {
        self(event)
    }
}

/// Lifecycle of a target control handle.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum HandleState {
    #[default]
    Uninitialized,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandleState::Uninitialized => "uninitialized",
            HandleState::Running => "running",
            HandleState::Stopping => "stopping",
            HandleState::Stopped => "stopped",
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TargetError {
    /// A probe owns the debug port.
    ProbeAttached,
    Pins(PalError),
    UnsupportedPin(u8),
    InvalidEventConfig(u8),
    /// The handle is not in a state that allows the request.
    NotRunning,
}

impl From<PalError> for TargetError {
    fn from(err: PalError) -> Self {
        TargetError::Pins(err)
    }
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::ProbeAttached => f.write_str("debug probe is attached"),
            TargetError::Pins(err) => write!(f, "target pin access failed: {err}"),
            TargetError::UnsupportedPin(pin) => write!(f, "unsupported pin 0x{pin:02x}"),
            TargetError::InvalidEventConfig(cfg) => write!(f, "invalid event config {cfg}"),
            TargetError::NotRunning => f.write_str("target handle is not running"),
        }
    }
}

/// Event latches and levels of the debug-port pins.
///
/// `*_event` reads report whether the line has changed since the previous
/// call and clear the latch.
pub trait TargetPins {
    /// Puts every debug-port pin in its idle configuration.
    fn initialize(&self, fru: u8) -> Result<(), PalError>;

    fn platform_reset_event(&self, fru: u8) -> Result<bool, PalError>;

    fn platform_reset_asserted(&self, fru: u8) -> Result<bool, PalError>;

    fn prdy_event(&self, fru: u8) -> Result<bool, PalError>;

    /// Raw PRDY level. The line asserts low.
    fn prdy_level(&self, fru: u8) -> Result<bool, PalError>;

    fn preq_assert(&self, fru: u8, assert: bool) -> Result<(), PalError>;

    /// Raw PREQ level. The line asserts low.
    fn preq_level(&self, fru: u8) -> Result<bool, PalError>;

    fn power_debug_assert(&self, fru: u8, assert: bool) -> Result<(), PalError>;

    fn power_debug_asserted(&self, fru: u8) -> Result<bool, PalError>;

    fn xdp_present_event(&self, fru: u8) -> Result<bool, PalError>;

    /// `true` while the BMC owns the debug port, `false` once a probe is attached.
    /// Called before [`TargetPins::initialize`] as well as after it.
    fn xdp_present_asserted(&self, fru: u8) -> Result<bool, PalError>;
}

/// Result of one worker iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WorkerStep {
    Continue,
    /// The probe took the debug port; the worker must stop.
    Exit,
}

/// Per-FRU state serviced by the worker loop.
#[derive(Debug)]
pub struct TargetMonitor {
    fru: u8,
    config: EventConfig,
    last_power: PowerState,
}

impl TargetMonitor {
    #[must_use]
    pub const fn new(fru: u8) -> Self {
        Self {
            fru,
            config: EventConfig::CLEARED,
            last_power: PowerState::On,
        }
    }

    #[must_use]
    pub const fn fru(&self) -> u8 {
        self.fru
    }

    #[must_use]
    pub const fn config(&self) -> EventConfig {
        self.config
    }

    /// Clears the configuration, verifies no probe is attached and sets up
    /// the pins.
    ///
    /// The probe check runs before [`TargetPins::initialize`], so
    /// [`TargetPins::xdp_present_asserted`] must work on pins that have not
    /// been initialized yet.
    pub fn start<P, H>(&mut self, pins: &P, handler: &H) -> Result<(), TargetError>
    where
        P: TargetPins + ?Sized,
        H: TargetEventHandler + ?Sized,
    {
        self.config = EventConfig::CLEARED;
        self.check_probe(pins, handler)?;
        pins.initialize(self.fru).map_err(|err| {
            error!("failed to initialize target pins: {err}");
            TargetError::Pins(err)
        })
    }

    /// Reports [`TargetEvent::XdpPresent`] and fails if a probe is attached.
    pub fn check_probe<P, H>(&self, pins: &P, handler: &H) -> Result<(), TargetError>
    where
        P: TargetPins + ?Sized,
        H: TargetEventHandler + ?Sized,
    {
        let owned = pins.xdp_present_asserted(self.fru).map_err(|err| {
            error!("XDP_PRESENT read failed: {err}");
            TargetError::Pins(err)
        })?;
        if owned {
            return Ok(());
        }
        if let Err(err) = handler.on_event(TargetEvent::XdpPresent) {
            error!("failed to send XDP present event: {err}");
        }
        Err(TargetError::ProbeAttached)
    }

    /// Takes the power baseline the first iteration compares against.
    pub fn prime<W>(&mut self, power: &W)
    where
        W: PowerControl + ?Sized,
    {
        self.last_power = power.server_power(self.fru).unwrap_or_else(|err| {
            error!("failed to get server power: {err}");
            PowerState::Off
        });
    }

    /// One pass over power, platform reset, PRDY and finally probe presence.
    pub fn poll_once<P, W, H, D>(&mut self, pins: &P, power: &W, handler: &H, delay: &D) -> WorkerStep
    where
        P: TargetPins + ?Sized,
        W: PowerControl + ?Sized,
        H: TargetEventHandler + ?Sized,
        D: Delay + ?Sized,
    {
        self.service_power(power, handler);
        self.service_platform_reset(pins, handler, delay);
        self.service_prdy(pins, handler);

        // Last: a probe attach invalidates every other pin.
        match pins.xdp_present_event(self.fru) {
            Err(err) => error!("XDP_PRESENT event read failed: {err}"),
            Ok(false) => {}
            Ok(true) => {
                debug!("XDP present state change detected");
                if self.check_probe(pins, handler).is_err() {
                    return WorkerStep::Exit;
                }
            }
        }
        WorkerStep::Continue
    }

    fn notify<H>(handler: &H, code: PinEventCode)
    where
        H: TargetEventHandler + ?Sized,
    {
        if let Err(err) = handler.on_event(TargetEvent::Pin(code)) {
            debug!("{code:?} not delivered: {err}");
        }
    }

    fn service_power<W, H>(&mut self, power: &W, handler: &H)
    where
        W: PowerControl + ?Sized,
        H: TargetEventHandler + ?Sized,
    {
        let Ok(current) = power.server_power(self.fru) else {
            return;
        };
        if current == self.last_power {
            return;
        }
        self.last_power = current;
        if current.is_on() {
            debug!("power restored");
            Self::notify(handler, PinEventCode::PowerRestore);
        } else {
            debug!("power fail");
            Self::notify(handler, PinEventCode::PowerFail);
        }
    }

    fn service_platform_reset<P, H, D>(&mut self, pins: &P, handler: &H, delay: &D)
    where
        P: TargetPins + ?Sized,
        H: TargetEventHandler + ?Sized,
        D: Delay + ?Sized,
    {
        match pins.platform_reset_event(self.fru) {
            Err(err) => {
                error!("PLTRST event read failed: {err}");
                return;
            }
            Ok(false) => return,
            Ok(true) => {}
        }
        let asserted = match pins.platform_reset_asserted(self.fru) {
            Ok(asserted) => asserted,
            Err(err) => {
                error!("PLTRST read failed: {err}");
                return;
            }
        };

        if asserted {
            debug!("platform reset asserted");
            Self::notify(handler, PinEventCode::PlatformResetAssert);
            if self.config.reset_break_armed() {
                debug!("reset break on PLTRST assert, asserting PREQ");
                self.drive_preq(pins, true);
            }
        } else {
            debug!("platform reset deasserted");
            Self::notify(handler, PinEventCode::PlatformResetDeassert);
            if self.config.reset_break_armed() {
                delay.delay(RESET_BREAK_SETTLE);
                if let Ok(true) = pins.prdy_event(self.fru) {
                    debug!("stale PRDY event cleared");
                }
                self.drive_preq(pins, false);
                self.drive_preq(pins, true);
                self.drive_preq(pins, false);
            }
        }
    }

    fn service_prdy<P, H>(&mut self, pins: &P, handler: &H)
    where
        P: TargetPins + ?Sized,
        H: TargetEventHandler + ?Sized,
    {
        match pins.prdy_event(self.fru) {
            Err(err) => error!("PRDY event read failed: {err}"),
            Ok(false) => {}
            Ok(true) => {
                debug!("PRDY asserted event detected");
                if !self.config.report_prdy {
                    return;
                }
                Self::notify(handler, PinEventCode::PrdyEvent);
                if self.config.break_all {
                    debug!("break all on PRDY, asserting PREQ");
                    self.drive_preq(pins, true);
                }
            }
        }
    }

    fn drive_preq<P>(&self, pins: &P, assert: bool)
    where
        P: TargetPins + ?Sized,
    {
        if let Err(err) = pins.preq_assert(self.fru, assert) {
            error!("failed to drive PREQ: {err}");
        }
    }

    /// Toggles one configuration flag. Changing `ReportPrdy` first consumes
    /// any pending PRDY event so it is not delivered after the change.
    pub fn write_event_config<P>(
        &mut self,
        pins: &P,
        option: WriteConfig,
        enable: bool,
    ) -> Result<(), TargetError>
    where
        P: TargetPins + ?Sized,
    {
        debug!(
            "{} {}",
            option.label(),
            if enable { "enabled" } else { "disabled" }
        );
        let flag = match option {
            WriteConfig::BreakAll => &mut self.config.break_all,
            WriteConfig::ResetBreak => &mut self.config.reset_break,
            WriteConfig::ReportPltRst => &mut self.config.report_pltrst,
            WriteConfig::ReportMbp => &mut self.config.report_mbp,
            WriteConfig::ReportPrdy => {
                if self.config.report_prdy != enable && pins.prdy_event(self.fru)? {
                    debug!("cleared outstanding PRDY event");
                }
                &mut self.config.report_prdy
            }
        };
        *flag = enable;
        Ok(())
    }

    /// Returns and clears the PRDY event latch.
    pub fn read_probe<P>(&self, pins: &P, pin: u8) -> Result<bool, TargetError>
    where
        P: TargetPins + ?Sized,
    {
        if pin != PRDY_EVENT_DETECTED {
            error!("unknown probe status pin 0x{pin:02x}");
            return Ok(false);
        }
        let triggered = pins.prdy_event(self.fru)?;
        if triggered {
            debug!("PRDY event detected, cleared");
        }
        Ok(triggered)
    }
}

/// Reads the current level of a logical pin.
///
/// Pins the platform cannot observe read as deasserted.
pub fn read_pin<P, W>(pins: &P, power: &W, fru: u8, raw: u8) -> Result<bool, TargetError>
where
    P: TargetPins + ?Sized,
    W: PowerControl + ?Sized,
{
    let asserted = match Pin::from_raw(raw) {
        Some(Pin::PowerGood | Pin::PowerButton) => power.server_power(fru)?.is_on(),
        Some(Pin::Preq) => !pins.preq_level(fru)?,
        Some(Pin::Prdy) => !pins.prdy_level(fru)?,
        Some(Pin::EarlyBootStall) => pins.power_debug_asserted(fru)?,
        Some(Pin::ResetButton | Pin::MicroBreak) => {
            debug!("pin read 0x{raw:02x} not supported");
            false
        }
        _ => return Err(TargetError::UnsupportedPin(raw)),
    };
    debug!("pin read 0x{raw:02x}: {asserted}");
    Ok(asserted)
}

/// Drives a logical output pin.
pub fn write_pin<P, W>(pins: &P, power: &W, fru: u8, raw: u8, assert: bool) -> Result<(), TargetError>
where
    P: TargetPins + ?Sized,
    W: PowerControl + ?Sized,
{
    debug!(
        "pin write 0x{raw:02x}: {}",
        if assert { "assert" } else { "deassert" }
    );
    match Pin::from_raw(raw) {
        Some(Pin::EarlyBootStall) => pins.power_debug_assert(fru, assert)?,
        Some(Pin::Preq) => pins.preq_assert(fru, assert)?,
        Some(Pin::PowerButton) => {
            let command = if assert {
                PowerCommand::On
            } else {
                PowerCommand::Off
            };
            power.set_server_power(fru, command)?;
        }
        // A reset has no deasserted state.
        Some(Pin::ResetButton) => {
            if assert {
                power.set_server_power(fru, PowerCommand::Reset)?;
            }
        }
        _ => return Err(TargetError::UnsupportedPin(raw)),
    }
    Ok(())
}
