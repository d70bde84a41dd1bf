//! Signals watched on the four-slot sled.

use super::{Edge, EdgeAction, EventFilter, PinMonitor, SlotId};

/// High while the sled is pulled out of the chassis.
pub const SLED_LATCH: &str = "GPIOH5";

const fn latch(line: &'static str, desc: &'static str, action: EdgeAction) -> PinMonitor {
    PinMonitor::new(line, desc, Edge::Both, EventFilter::Always, action)
}

pub const SLED_PINS: [PinMonitor; 13] = [
    latch(SLED_LATCH, "GPIO_FAN_LATCH_DETECT", EdgeAction::SledLatch),
    latch(
        "GPIOP0",
        "GPIO_SLOT1_EJECTOR_LATCH_DETECT_N",
        EdgeAction::EjectorLatch(SlotId::SLOT1),
    ),
    latch(
        "GPIOP1",
        "GPIO_SLOT2_EJECTOR_LATCH_DETECT_N",
        EdgeAction::EjectorLatch(SlotId::SLOT2),
    ),
    latch(
        "GPIOP2",
        "GPIO_SLOT3_EJECTOR_LATCH_DETECT_N",
        EdgeAction::EjectorLatch(SlotId::SLOT3),
    ),
    latch(
        "GPIOP3",
        "GPIO_SLOT4_EJECTOR_LATCH_DETECT_N",
        EdgeAction::EjectorLatch(SlotId::SLOT4),
    ),
    latch("GPIOZ0", "GPIO_SLOT1_PRSNT_B_N", EdgeAction::SlotPresence(SlotId::SLOT1)),
    latch("GPIOZ1", "GPIO_SLOT2_PRSNT_B_N", EdgeAction::SlotPresence(SlotId::SLOT2)),
    latch("GPIOZ2", "GPIO_SLOT3_PRSNT_B_N", EdgeAction::SlotPresence(SlotId::SLOT3)),
    latch("GPIOZ3", "GPIO_SLOT4_PRSNT_B_N", EdgeAction::SlotPresence(SlotId::SLOT4)),
    latch("GPIOAA0", "GPIO_SLOT1_PRSNT_N", EdgeAction::SlotPresence(SlotId::SLOT1)),
    latch("GPIOAA1", "GPIO_SLOT2_PRSNT_N", EdgeAction::SlotPresence(SlotId::SLOT2)),
    latch("GPIOAA2", "GPIO_SLOT3_PRSNT_N", EdgeAction::SlotPresence(SlotId::SLOT3)),
    latch("GPIOAA3", "GPIO_SLOT4_PRSNT_N", EdgeAction::SlotPresence(SlotId::SLOT4)),
];
