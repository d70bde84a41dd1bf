#![allow(dead_code)]

use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::collections::BTreeMap;

use gpio_core::cpld::{BusError, CpldBus};
use gpio_core::pins::{PinLevel, SlotId};
use gpio_core::platform::{
    DetachedCommand, GpioAccess, KeyValueStore, Launcher, Markers, PalError, PowerCommand,
    PowerControl, PowerOutcome, PowerState, SelLogger, SlotControl,
};
use gpio_core::power::Delay;
use gpio_core::target::TargetPins;
use gpio_core::telemetry::{EventSink, GpioEvent};

/// In-memory platform. Lines that were never set read as `NotFound`.
pub struct MockPlatform {
    pub power: Cell<PowerState>,
    pub lines: RefCell<BTreeMap<&'static str, PinLevel>>,
    pub line_writes: RefCell<Vec<(String, PinLevel)>>,
    pub power_commands: RefCell<Vec<PowerCommand>>,
    pub sel: RefCell<Vec<String>>,
    pub kv: RefCell<BTreeMap<String, String>>,
    pub present: [Cell<bool>; 4],
    pub slot_12v: [Cell<bool>; 4],
    pub disabled_12v: RefCell<Vec<SlotId>>,
    pub pair_off: RefCell<Vec<SlotId>>,
    pub markers: RefCell<Vec<String>>,
    pub spawned: RefCell<Vec<DetachedCommand>>,
    pub delayed: RefCell<Vec<(Duration, GpioEvent)>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            power: Cell::new(PowerState::On),
            lines: RefCell::new(BTreeMap::new()),
            line_writes: RefCell::new(Vec::new()),
            power_commands: RefCell::new(Vec::new()),
            sel: RefCell::new(Vec::new()),
            kv: RefCell::new(BTreeMap::new()),
            present: Default::default(),
            slot_12v: Default::default(),
            disabled_12v: RefCell::new(Vec::new()),
            pair_off: RefCell::new(Vec::new()),
            markers: RefCell::new(Vec::new()),
            spawned: RefCell::new(Vec::new()),
            delayed: RefCell::new(Vec::new()),
        }
    }

    pub fn set_line(&self, line: &'static str, level: PinLevel) {
        self.lines.borrow_mut().insert(line, level);
    }

    pub fn spawned(&self) -> Vec<DetachedCommand> {
        self.spawned.borrow().clone()
    }
}

impl PowerControl for MockPlatform {
    fn server_power(&self, _fru: u8) -> Result<PowerState, PalError> {
        Ok(self.power.get())
    }

    fn set_server_power(&self, _fru: u8, command: PowerCommand) -> Result<PowerOutcome, PalError> {
        self.power_commands.borrow_mut().push(command);
        Ok(PowerOutcome::Applied)
    }
}

impl GpioAccess for MockPlatform {
    fn read_line(&self, line: &str) -> Result<PinLevel, PalError> {
        self.lines
            .borrow()
            .get(line)
            .copied()
            .ok_or(PalError::NotFound)
    }

    fn write_line(&self, line: &str, level: PinLevel) -> Result<(), PalError> {
        self.line_writes.borrow_mut().push((line.to_owned(), level));
        Ok(())
    }
}

impl SelLogger for MockPlatform {
    fn add_critical_sel(&self, message: &str) -> Result<(), PalError> {
        self.sel.borrow_mut().push(message.to_owned());
        Ok(())
    }
}

impl KeyValueStore for MockPlatform {
    fn get_value(&self, key: &str, buf: &mut [u8]) -> Result<usize, PalError> {
        let kv = self.kv.borrow();
        let value = kv.get(key).ok_or(PalError::NotFound)?;
        let dst = buf
            .get_mut(..value.len())
            .ok_or(PalError::BufferTooSmall)?;
        dst.copy_from_slice(value.as_bytes());
        Ok(value.len())
    }

    fn set_value(&self, key: &str, value: &str) -> Result<(), PalError> {
        self.kv.borrow_mut().insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

impl SlotControl for MockPlatform {
    fn is_slot_present(&self, slot: SlotId) -> Result<bool, PalError> {
        Ok(self.present[slot.index()].get())
    }

    fn is_slot_12v_on(&self, slot: SlotId) -> Result<bool, PalError> {
        Ok(self.slot_12v[slot.index()].get())
    }

    fn disable_slot_12v(&self, slot: SlotId) -> Result<(), PalError> {
        self.slot_12v[slot.index()].set(false);
        self.disabled_12v.borrow_mut().push(slot);
        Ok(())
    }

    fn pair_12v_off(&self, slot: SlotId) -> Result<(), PalError> {
        self.pair_off.borrow_mut().push(slot);
        Ok(())
    }
}

impl Markers for MockPlatform {
    fn touch_reset_marker(&self) -> Result<(), PalError> {
        self.markers.borrow_mut().push("reset".to_owned());
        Ok(())
    }

    fn mark_slot_reinit(&self, slot: SlotId) -> Result<(), PalError> {
        self.markers.borrow_mut().push(format!("reinit {slot}"));
        Ok(())
    }

    fn record_slot_type(&self, slot: SlotId) -> Result<(), PalError> {
        self.markers.borrow_mut().push(format!("type {slot}"));
        Ok(())
    }

    fn clear_reinit_pid(&self, slot: SlotId) -> Result<(), PalError> {
        self.markers.borrow_mut().push(format!("pid {slot}"));
        Ok(())
    }
}

impl Launcher for MockPlatform {
    fn spawn_detached(&self, command: DetachedCommand) {
        self.spawned.borrow_mut().push(command);
    }

    fn emit_later(&self, delay: Duration, event: GpioEvent) {
        self.delayed.borrow_mut().push((delay, event));
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: RefCell<Vec<GpioEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<GpioEvent> {
        self.events.borrow().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: GpioEvent) {
        self.events.borrow_mut().push(event);
    }
}

/// Debug-port pins. Event latches clear when read.
pub struct MockTargetPins {
    pub pltrst_event: Cell<bool>,
    pub pltrst_asserted: Cell<bool>,
    pub prdy_event: Cell<bool>,
    pub prdy_level: Cell<bool>,
    pub preq_level: Cell<bool>,
    pub preq_writes: RefCell<Vec<bool>>,
    pub power_debug: Cell<bool>,
    pub xdp_event: Cell<bool>,
    pub xdp_owned: Cell<bool>,
    pub initialized: Cell<u32>,
    pub reads: Cell<u32>,
}

impl MockTargetPins {
    pub fn new() -> Self {
        Self {
            pltrst_event: Cell::new(false),
            pltrst_asserted: Cell::new(false),
            prdy_event: Cell::new(false),
            prdy_level: Cell::new(true),
            preq_level: Cell::new(true),
            preq_writes: RefCell::new(Vec::new()),
            power_debug: Cell::new(false),
            xdp_event: Cell::new(false),
            xdp_owned: Cell::new(true),
            initialized: Cell::new(0),
            reads: Cell::new(0),
        }
    }

    fn count(&self) {
        self.reads.set(self.reads.get() + 1);
    }
}

impl TargetPins for MockTargetPins {
    fn initialize(&self, _fru: u8) -> Result<(), PalError> {
        self.initialized.set(self.initialized.get() + 1);
        Ok(())
    }

    fn platform_reset_event(&self, _fru: u8) -> Result<bool, PalError> {
        self.count();
        Ok(self.pltrst_event.replace(false))
    }

    fn platform_reset_asserted(&self, _fru: u8) -> Result<bool, PalError> {
        self.count();
        Ok(self.pltrst_asserted.get())
    }

    fn prdy_event(&self, _fru: u8) -> Result<bool, PalError> {
        self.count();
        Ok(self.prdy_event.replace(false))
    }

    fn prdy_level(&self, _fru: u8) -> Result<bool, PalError> {
        self.count();
        Ok(self.prdy_level.get())
    }

    fn preq_assert(&self, _fru: u8, assert: bool) -> Result<(), PalError> {
        self.preq_writes.borrow_mut().push(assert);
        Ok(())
    }

    fn preq_level(&self, _fru: u8) -> Result<bool, PalError> {
        self.count();
        Ok(self.preq_level.get())
    }

    fn power_debug_assert(&self, _fru: u8, assert: bool) -> Result<(), PalError> {
        self.power_debug.set(assert);
        Ok(())
    }

    fn power_debug_asserted(&self, _fru: u8) -> Result<bool, PalError> {
        self.count();
        Ok(self.power_debug.get())
    }

    fn xdp_present_event(&self, _fru: u8) -> Result<bool, PalError> {
        self.count();
        Ok(self.xdp_event.replace(false))
    }

    fn xdp_present_asserted(&self, _fru: u8) -> Result<bool, PalError> {
        self.count();
        Ok(self.xdp_owned.get())
    }
}

#[derive(Default)]
pub struct RecordingDelay {
    pub waits: RefCell<Vec<Duration>>,
}

impl Delay for RecordingDelay {
    fn delay(&self, duration: Duration) {
        self.waits.borrow_mut().push(duration);
    }
}

/// CPLD with fixed register contents. Missing registers fail the transfer.
pub struct MockCpld {
    pub registers: BTreeMap<u8, u8>,
}

impl MockCpld {
    pub fn healthy() -> Self {
        let mut registers = BTreeMap::new();
        for (register, value) in gpio_core::cpld::STATUS_EXPECTED
            .into_iter()
            .chain(gpio_core::cpld::DATA_EXPECTED)
        {
            registers.insert(register, value);
        }
        Self { registers }
    }
}

impl CpldBus for MockCpld {
    fn read_register(&mut self, register: u8) -> Result<u8, BusError> {
        self.registers
            .get(&register)
            .copied()
            .ok_or(BusError::Transfer)
    }
}
