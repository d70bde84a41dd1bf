mod common;

use core::cell::RefCell;
use std::time::{Duration, Instant};

use common::{MockPlatform, RecordingSink};
use gpio_core::dispatch::{EventDispatcher, PresenceLatch};
use gpio_core::faults::{FaultClass, FaultCounters};
use gpio_core::pins::mainboard::{
    CPU_CATERR, PCH_THERMTRIP, PLATFORM_RESET, POWER_GOOD, UV_DETECT, UV_LOG_DELAY,
};
use gpio_core::pins::sled::SLED_LATCH;
use gpio_core::pins::{
    EdgeHandler, MAINBOARD_PINS, PinLevel, PinMonitor, SLED_PINS, SlotId, find,
};
use gpio_core::platform::{DetachedCommand, PowerState};
use gpio_core::precheck::{MAINBOARD_PRECHECK, run_precheck};
use gpio_core::telemetry::GpioEvent;
use gpio_core::timers::{ElapsedTimers, TimerSource};

const FRU: u8 = 1;

fn edge(table: &[PinMonitor], line: &str, level: PinLevel) -> PinMonitor {
    let mut pin = *find(table, line).expect("line in table");
    pin.value = level;
    pin
}

fn timers_after(secs: u32, state: PowerState) -> RefCell<ElapsedTimers> {
    let timers = RefCell::new(ElapsedTimers::new());
    for _ in 0..secs {
        timers.tick(state);
    }
    timers
}

#[test]
fn pch_thermtrip_is_logged_once_reset_has_settled() {
    let platform = MockPlatform::new();
    platform.set_line(PLATFORM_RESET, PinLevel::High);
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(12, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    let pin = edge(&MAINBOARD_PINS, PCH_THERMTRIP, PinLevel::Low);
    dispatcher.on_edge(&pin);

    assert_eq!(sink.events(), vec![GpioEvent::pin_changed(&pin)]);
}

#[test]
fn pch_thermtrip_is_suppressed_while_reset_is_settling() {
    let platform = MockPlatform::new();
    platform.set_line(PLATFORM_RESET, PinLevel::High);
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(5, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    dispatcher.on_edge(&edge(&MAINBOARD_PINS, PCH_THERMTRIP, PinLevel::Low));

    assert!(sink.events().is_empty());
}

#[test]
fn pch_thermtrip_reads_platform_reset_from_hardware() {
    let platform = MockPlatform::new();
    platform.set_line(PLATFORM_RESET, PinLevel::Low);
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(30, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    dispatcher.on_edge(&edge(&MAINBOARD_PINS, PCH_THERMTRIP, PinLevel::Low));

    assert!(sink.events().is_empty(), "reset still asserted");
}

#[test]
fn throttle_is_ignored_while_powered_off_and_during_settle() {
    let platform = MockPlatform::new();
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(3, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);
    let throttle = edge(&MAINBOARD_PINS, "GPIOS0", PinLevel::Low);

    dispatcher.on_edge(&throttle);
    assert!(sink.events().is_empty(), "3 s after power-on is too early");

    timers.tick(PowerState::On);
    timers.tick(PowerState::On);
    dispatcher.on_edge(&throttle);
    assert_eq!(sink.events().len(), 1);

    platform.power.set(PowerState::Off);
    dispatcher.on_edge(&throttle);
    assert_eq!(sink.events().len(), 1, "no report while powered off");
}

#[test]
fn caterr_edge_only_counts() {
    let platform = MockPlatform::new();
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(10, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    let pin = edge(&MAINBOARD_PINS, CPU_CATERR, PinLevel::Low);
    dispatcher.on_edge(&pin);
    dispatcher.on_edge(&pin);

    assert_eq!(faults.get(FaultClass::Caterr).pending(), 2);
    assert!(sink.events().is_empty());
    assert!(platform.sel.borrow().is_empty());
}

#[test]
fn under_voltage_is_logged_late() {
    let platform = MockPlatform::new();
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(0, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    let pin = edge(&MAINBOARD_PINS, UV_DETECT, PinLevel::Low);
    dispatcher.on_edge(&pin);

    assert!(sink.events().is_empty());
    assert_eq!(
        platform.delayed.borrow().as_slice(),
        &[(UV_LOG_DELAY, GpioEvent::pin_changed(&pin))]
    );
}

#[test]
fn power_good_drop_resets_timer_and_debug_card() {
    let platform = MockPlatform::new();
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(30, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    dispatcher.on_edge(&edge(&MAINBOARD_PINS, POWER_GOOD, PinLevel::Low));

    assert_eq!(timers.snapshot().power_on, 0);
    assert_eq!(timers.snapshot().since_reset, 30);
    assert_eq!(platform.spawned(), vec![DetachedCommand::DebugCardReset]);
}

#[test]
fn platform_reset_edge_restarts_reset_timer() {
    let platform = MockPlatform::new();
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(30, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    dispatcher.on_edge(&edge(&MAINBOARD_PINS, PLATFORM_RESET, PinLevel::High));

    assert_eq!(timers.snapshot().since_reset, 0);
    assert_eq!(platform.markers.borrow().as_slice(), &["reset"]);
    assert_eq!(sink.events().len(), 1);
}

#[test]
fn prochot_assert_names_its_causes() {
    let platform = MockPlatform::new();
    platform.set_line(UV_DETECT, PinLevel::Low);
    platform.set_line("GPIOL1", PinLevel::High);
    platform.set_line("GPIOL2", PinLevel::Low);
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(10, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    dispatcher.on_edge(&edge(&MAINBOARD_PINS, "GPIOE6", PinLevel::Low));
    dispatcher.on_edge(&edge(&MAINBOARD_PINS, "GPIOE6", PinLevel::High));

    assert_eq!(
        platform.sel.borrow().as_slice(),
        &["CPU0 FPH by UV timer exp", "CPU0 FPH DEASSERT"]
    );
}

#[test]
fn thermtrip_latch_adds_sel_entry() {
    let platform = MockPlatform::new();
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(0, PowerState::Off);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    dispatcher.on_edge(&edge(&MAINBOARD_PINS, "GPIOM5", PinLevel::Low));

    assert_eq!(platform.sel.borrow().as_slice(), &["CPU1 thermtrip ASSERT"]);
}

#[test]
fn hot_removal_drops_12v_once_for_both_presence_pins() {
    let platform = MockPlatform::new();
    platform.set_line(SLED_LATCH, PinLevel::High);
    platform.present[SlotId::SLOT1.index()].set(false);
    platform.slot_12v[SlotId::SLOT1.index()].set(true);
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(60, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    dispatcher.on_edge(&edge(&SLED_PINS, "GPIOZ0", PinLevel::High));
    assert_eq!(
        dispatcher.presence_latch(SlotId::SLOT1),
        PresenceLatch::AwaitingPair
    );
    dispatcher.on_edge(&edge(&SLED_PINS, "GPIOAA0", PinLevel::High));
    assert_eq!(dispatcher.presence_latch(SlotId::SLOT1), PresenceLatch::Idle);

    assert_eq!(platform.disabled_12v.borrow().as_slice(), &[SlotId::SLOT1]);
    assert_eq!(platform.pair_off.borrow().as_slice(), &[SlotId::SLOT1]);
    assert_eq!(
        sink.events(),
        vec![GpioEvent::SlotRemoved {
            slot: SlotId::SLOT1,
            with_12v_on: true,
        }]
    );
    let kv = platform.kv.borrow();
    assert_eq!(kv.get("pwr_server1_last_state").map(String::as_str), Some("on"));
    assert_eq!(kv.get("slot1_boot_order").map(String::as_str), Some("0000000"));
}

#[test]
fn presence_noise_does_not_run_removal() {
    let platform = MockPlatform::new();
    platform.set_line(SLED_LATCH, PinLevel::High);
    platform.present[SlotId::SLOT2.index()].set(true);
    platform.slot_12v[SlotId::SLOT2.index()].set(true);
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(0, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    dispatcher.on_edge(&edge(&SLED_PINS, "GPIOZ1", PinLevel::High));

    assert!(platform.disabled_12v.borrow().is_empty());
    assert!(sink.events().is_empty());
}

#[test]
fn presence_edges_are_ignored_with_sled_in() {
    let platform = MockPlatform::new();
    platform.set_line(SLED_LATCH, PinLevel::Low);
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(0, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    dispatcher.on_edge(&edge(&SLED_PINS, "GPIOZ3", PinLevel::High));

    assert_eq!(dispatcher.presence_latch(SlotId::SLOT4), PresenceLatch::Idle);
    assert!(sink.events().is_empty());
}

#[test]
fn insertion_powers_slot_12v() {
    let platform = MockPlatform::new();
    platform.set_line(SLED_LATCH, PinLevel::High);
    platform.present[SlotId::SLOT3.index()].set(true);
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(0, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    dispatcher.on_edge(&edge(&SLED_PINS, "GPIOAA2", PinLevel::Low));
    dispatcher.on_edge(&edge(&SLED_PINS, "GPIOZ2", PinLevel::Low));

    assert_eq!(sink.events(), vec![GpioEvent::SlotInserted(SlotId::SLOT3)]);
    assert_eq!(
        platform.spawned(),
        vec![DetachedCommand::Slot12vOn(SlotId::SLOT3)]
    );
}

#[test]
fn sled_latch_switches_fans_to_failsafe_and_back() {
    let platform = MockPlatform::new();
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(0, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    dispatcher.on_edge(&edge(&SLED_PINS, SLED_LATCH, PinLevel::High));
    dispatcher.on_edge(&edge(&SLED_PINS, SLED_LATCH, PinLevel::Low));

    assert_eq!(
        platform.spawned(),
        vec![DetachedCommand::FanFailsafe, DetachedCommand::ResumeFanControl]
    );
    assert_eq!(
        sink.events(),
        vec![
            GpioEvent::SledLatch { pulled_out: true },
            GpioEvent::SledLatch { pulled_out: false },
        ]
    );
}

#[test]
fn handlers_return_promptly() {
    let platform = MockPlatform::new();
    platform.set_line(PLATFORM_RESET, PinLevel::High);
    platform.set_line(SLED_LATCH, PinLevel::High);
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let timers = timers_after(60, PowerState::On);
    let mut dispatcher = EventDispatcher::new(&platform, &timers, &faults, &sink, FRU);

    for pin in MAINBOARD_PINS.iter().chain(SLED_PINS.iter()) {
        for level in [PinLevel::Low, PinLevel::High] {
            let mut fired = *pin;
            fired.value = level;
            let started = Instant::now();
            dispatcher.on_edge(&fired);
            assert!(
                started.elapsed() < Duration::from_millis(50),
                "{} handler blocked",
                pin.line
            );
        }
    }
}

#[test]
fn precheck_seeds_levels_and_catches_early_faults() {
    let platform = MockPlatform::new();
    platform.set_line("GPIOG3", PinLevel::Low);
    platform.set_line("GPIOAA0", PinLevel::High);
    platform.set_line(CPU_CATERR, PinLevel::Low);
    platform.set_line("GPION3", PinLevel::High);
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let mut table = MAINBOARD_PINS;

    run_precheck(&MAINBOARD_PRECHECK, &mut table, &platform, FRU, &faults, &sink);

    assert_eq!(faults.get(FaultClass::Caterr).pending(), 1);
    assert_eq!(faults.get(FaultClass::Msmi).pending(), 0);
    assert_eq!(
        find(&table, "GPIOAA0").map(|pin| pin.value),
        Some(PinLevel::High)
    );
    assert_eq!(sink.events().len(), 2, "socket occupancy is always logged");
}

#[test]
fn precheck_ignores_faults_while_powered_off() {
    let platform = MockPlatform::new();
    platform.power.set(PowerState::Off);
    platform.set_line(CPU_CATERR, PinLevel::Low);
    let sink = RecordingSink::default();
    let faults = FaultCounters::new();
    let mut table = MAINBOARD_PINS;

    run_precheck(&MAINBOARD_PRECHECK, &mut table, &platform, FRU, &faults, &sink);

    assert_eq!(faults.get(FaultClass::Caterr).pending(), 0);
    assert_eq!(
        find(&table, CPU_CATERR).map(|pin| pin.value),
        Some(PinLevel::Low)
    );
}
