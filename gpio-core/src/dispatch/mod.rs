//! Per-edge handlers invoked on the poll thread.
//!
//! [`EventDispatcher`] is the [`EdgeHandler`] handed to the poller. For every
//! edge it applies the entry's [`EventFilter`] and then its [`EdgeAction`].
//! Slow work never happens here: fault pins only bump a counter, delayed
//! logs and external commands are handed to the [`Launcher`].
//!
//! [`Launcher`]: crate::platform::Launcher

use core::fmt::Write;

use log::{debug, warn};

use crate::faults::FaultCounters;
use crate::pins::mainboard::{PLATFORM_RESET, PROCHOT_CAUSES};
use crate::pins::sled::SLED_LATCH;
use crate::pins::{Cpu, EdgeAction, EdgeHandler, EventFilter, PinLevel, PinMonitor, SlotId};
use crate::platform::{DetachedCommand, Platform};
use crate::telemetry::{EventSink, GpioEvent};
use crate::timers::TimerSource;

pub mod presence;

pub use presence::PresenceLatch;

/// Routes edges from the poller to their handlers.
pub struct EventDispatcher<'a, P: ?Sized, T: ?Sized, S: ?Sized> {
    platform: &'a P,
    timers: &'a T,
    faults: &'a FaultCounters,
    sink: &'a S,
    fru: u8,
    presence: [PresenceLatch; SlotId::MAX as usize],
}

impl<'a, P, T, S> EventDispatcher<'a, P, T, S>
where
    P: Platform + ?Sized,
    T: TimerSource + ?Sized,
    S: EventSink + ?Sized,
{
    pub fn new(
        platform: &'a P,
        timers: &'a T,
        faults: &'a FaultCounters,
        sink: &'a S,
        fru: u8,
    ) -> Self {
        Self {
            platform,
            timers,
            faults,
            sink,
            fru,
            presence: [PresenceLatch::Idle; SlotId::MAX as usize],
        }
    }

    #[must_use]
    pub fn presence_latch(&self, slot: SlotId) -> PresenceLatch {
        self.presence[slot.index()]
    }

    /// Power read used by the gated filters. A failed read counts as off.
    fn powered(&self) -> bool {
        match self.platform.server_power(self.fru) {
            Ok(state) => state.is_on(),
            Err(err) => {
                warn!("server power read failed: {err}");
                false
            }
        }
    }

    fn passes(&self, filter: EventFilter) -> bool {
        match filter {
            EventFilter::Always => true,
            EventFilter::PoweredOn { settle_secs } => {
                if !self.powered() {
                    return false;
                }
                settle_secs == 0 || self.timers.snapshot().power_on >= settle_secs
            }
            EventFilter::OutOfReset { settle_secs } => {
                // Read the line itself: the cached table entry may lag the edge
                // currently being handled.
                match self.platform.read_line(PLATFORM_RESET) {
                    Ok(PinLevel::High) => {}
                    Ok(PinLevel::Low) => return false,
                    Err(err) => {
                        debug!("platform reset read failed: {err}");
                        return false;
                    }
                }
                if !self.powered() {
                    return false;
                }
                settle_secs == 0 || self.timers.snapshot().since_reset >= settle_secs
            }
        }
    }

    fn log_change(&self, pin: &PinMonitor) {
        self.sink.emit(GpioEvent::pin_changed(pin));
    }

    fn add_sel(&self, message: &str) {
        if let Err(err) = self.platform.add_critical_sel(message) {
            warn!("failed to add SEL entry '{message}': {err}");
        }
    }

    fn thermal_trip(&self, cpu: Cpu, level: PinLevel) {
        let mut sel = heapless::String::<48>::new();
        let _ = write!(sel, "{} thermtrip {}", cpu.label(), level.assertion_label());
        self.add_sel(&sel);
    }

    fn prochot(&self, cpu: Cpu, level: PinLevel) {
        let mut sel = heapless::String::<48>::new();
        let _ = write!(sel, "{} FPH", cpu.label());
        if level.is_high() {
            let _ = sel.push_str(" DEASSERT");
        } else {
            let _ = sel.push_str(" by");
            for (line, cause) in PROCHOT_CAUSES {
                if matches!(self.platform.read_line(line), Ok(PinLevel::Low)) {
                    let _ = write!(sel, " {cause}");
                }
            }
        }
        self.add_sel(&sel);
    }

    fn sled_out(&self) -> bool {
        match self.platform.read_line(SLED_LATCH) {
            Ok(level) => level.is_high(),
            Err(err) => {
                warn!("sled latch read failed: {err}");
                false
            }
        }
    }

    fn slot_presence(&mut self, pin: &PinMonitor, slot: SlotId) {
        if self.presence[slot.index()].absorb_pair() {
            return;
        }
        // Hot service is only possible with the sled pulled out.
        if !self.sled_out() {
            return;
        }
        self.presence[slot.index()].arm();

        if pin.value.is_high() {
            presence::handle_removal(self.platform, self.sink, slot);
        } else {
            presence::handle_insertion(self.platform, self.sink, slot);
        }
    }
}

impl<P, T, S> EdgeHandler for EventDispatcher<'_, P, T, S>
where
    P: Platform + ?Sized,
    T: TimerSource + ?Sized,
    S: EventSink + ?Sized,
{
    fn on_edge(&mut self, pin: &PinMonitor) {
        if !self.passes(pin.filter) {
            return;
        }

        match pin.action {
            EdgeAction::Log => self.log_change(pin),
            EdgeAction::LogDelayed(delay) => {
                self.platform.emit_later(delay, GpioEvent::pin_changed(pin));
            }
            EdgeAction::PowerGood => {
                self.timers.reset_power_on();
                self.log_change(pin);
                if pin.value.is_low() {
                    self.platform.spawn_detached(DetachedCommand::DebugCardReset);
                }
            }
            EdgeAction::PostCardPresence => {
                self.log_change(pin);
                if pin.value.is_high() {
                    self.platform.spawn_detached(DetachedCommand::DebugCardReset);
                }
            }
            EdgeAction::ThermalTripLatch(cpu) => {
                self.log_change(pin);
                self.thermal_trip(cpu, pin.value);
            }
            EdgeAction::Prochot(cpu) => {
                self.log_change(pin);
                self.prochot(cpu, pin.value);
            }
            EdgeAction::Fault(class) => self.faults.record(class),
            EdgeAction::PlatformReset => {
                self.timers.reset_since_reset();
                if let Err(err) = self.platform.touch_reset_marker() {
                    warn!("failed to touch reset marker: {err}");
                }
                self.log_change(pin);
            }
            EdgeAction::SledLatch => {
                let pulled_out = pin.value.is_high();
                self.sink.emit(GpioEvent::SledLatch { pulled_out });
                self.platform.spawn_detached(if pulled_out {
                    DetachedCommand::FanFailsafe
                } else {
                    DetachedCommand::ResumeFanControl
                });
            }
            EdgeAction::EjectorLatch(_) => {
                if pin.value.is_high() && self.sled_out() {
                    self.log_change(pin);
                }
            }
            EdgeAction::SlotPresence(slot) => self.slot_presence(pin, slot),
        }
    }
}
