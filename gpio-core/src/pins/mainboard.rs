//! Signals watched on the single-node mainboard.

use core::time::Duration;

use super::{Cpu, Edge, EdgeAction, EventFilter, PinMonitor};
use crate::faults::FaultClass;

pub const POWER_GOOD: &str = "GPIOB6";
pub const CPU_CATERR: &str = "GPIOG1";
pub const PCH_THERMTRIP: &str = "GPIOG2";
pub const UV_DETECT: &str = "GPIOL0";
pub const OC_DETECT: &str = "GPIOL1";
pub const HSC_TIMER_EXP: &str = "GPIOL2";
pub const CPU_MSMI: &str = "GPION3";
pub const POST_CARD_PRESENT: &str = "GPIOQ6";
pub const PLATFORM_RESET: &str = "GPIOR5";
pub const PMBUS_ALERT: &str = "GPIOAA1";
pub const CPU0_SOCKET_OCCUPIED: &str = "GPIOG3";
pub const CPU1_SOCKET_OCCUPIED: &str = "GPIOAA0";

/// Power button output driven by the power plans.
pub const POWER_BUTTON_OUT: &str = "GPIOE3";
/// Reset button output driven by the power plans.
pub const RESET_BUTTON_OUT: &str = "GPIOE1";
/// Fault indicator, active low.
pub const FAULT_LED: &str = "GPIOU5";
/// Host sleep state S4 indication, low while the host is off.
pub const SLP_S4: &str = "GPIOY1";

/// Seconds the throttle signal is ignored after power-on.
pub const THROTTLE_SETTLE_SECS: i64 = 5;
/// Seconds CPU error and PROCHOT signals are ignored after power-on.
pub const CPU_ERROR_SETTLE_SECS: i64 = 3;
/// Seconds the PCH thermal trip is ignored after platform reset is released.
pub const PCH_THERMTRIP_SETTLE_SECS: i64 = 10;
/// Under-voltage detect bounces during normal transients; log it late.
pub const UV_LOG_DELAY: Duration = Duration::from_millis(20);

const FAULT_FILTER: EventFilter = EventFilter::PoweredOn {
    settle_secs: CPU_ERROR_SETTLE_SECS,
};

pub const MAINBOARD_PINS: [PinMonitor; 39] = [
    PinMonitor::new(
        POWER_GOOD,
        "PWRGD_SYS_PWROK",
        Edge::Both,
        EventFilter::Always,
        EdgeAction::PowerGood,
    ),
    PinMonitor::powered("GPIOB7", "IRQ_PVDDQ_GHJ_VRHOT_LVT3_N", 0),
    PinMonitor::powered("GPIOD6", "FM_CPU_ERR0_LVT3_BMC_N", CPU_ERROR_SETTLE_SECS),
    PinMonitor::powered("GPIOD7", "FM_CPU_ERR1_LVT3_BMC_N", CPU_ERROR_SETTLE_SECS),
    PinMonitor::logged("GPIOE0", "RST_SYSTEM_BTN_N"),
    PinMonitor::logged("GPIOE2", "FM_PWR_BTN_N"),
    PinMonitor::logged("GPIOE4", "FP_NMI_BTN_N"),
    PinMonitor::new(
        "GPIOE6",
        "FM_CPU0_PROCHOT_LVT3_BMC_N",
        Edge::Both,
        FAULT_FILTER,
        EdgeAction::Prochot(Cpu::Cpu0),
    ),
    PinMonitor::new(
        "GPIOE7",
        "FM_CPU1_PROCHOT_LVT3_BMC_N",
        Edge::Both,
        FAULT_FILTER,
        EdgeAction::Prochot(Cpu::Cpu1),
    ),
    PinMonitor::powered("GPIOF0", "IRQ_PVDDQ_ABC_VRHOT_LVT3_N", 0),
    PinMonitor::powered("GPIOF2", "IRQ_PVCCIN_CPU0_VRHOT_LVC3_N", 0),
    PinMonitor::powered("GPIOF3", "IRQ_PVCCIN_CPU1_VRHOT_LVC3_N", 0),
    PinMonitor::powered("GPIOF4", "IRQ_PVDDQ_KLM_VRHOT_LVT3_N", 0),
    PinMonitor::powered("GPIOG0", "FM_CPU_ERR2_LVT3_N", CPU_ERROR_SETTLE_SECS),
    PinMonitor::new(
        CPU_CATERR,
        "FM_CPU_CATERR_LVT3_N",
        Edge::Falling,
        FAULT_FILTER,
        EdgeAction::Fault(FaultClass::Caterr),
    ),
    PinMonitor::new(
        PCH_THERMTRIP,
        "FM_PCH_BMC_THERMTRIP_N",
        Edge::Both,
        EventFilter::OutOfReset {
            settle_secs: PCH_THERMTRIP_SETTLE_SECS,
        },
        EdgeAction::Log,
    ),
    PinMonitor::powered(CPU0_SOCKET_OCCUPIED, "FM_CPU0_SKTOCC_LVT3_N", 0),
    PinMonitor::new(
        "GPIOI0",
        "FM_CPU0_FIVR_FAULT_LVT3_N",
        Edge::Both,
        EventFilter::OUT_OF_RESET,
        EdgeAction::Log,
    ),
    PinMonitor::new(
        "GPIOI1",
        "FM_CPU1_FIVR_FAULT_LVT3_N",
        Edge::Both,
        EventFilter::OUT_OF_RESET,
        EdgeAction::Log,
    ),
    PinMonitor::new(
        UV_DETECT,
        "IRQ_UV_DETECT_N",
        Edge::Both,
        EventFilter::Always,
        EdgeAction::LogDelayed(UV_LOG_DELAY),
    ),
    PinMonitor::logged(OC_DETECT, "IRQ_OC_DETECT_N"),
    PinMonitor::logged(HSC_TIMER_EXP, "FM_HSC_TIMER_EXP_N"),
    PinMonitor::powered("GPIOL4", "FM_MEM_THERM_EVENT_PCH_N", 0),
    PinMonitor::powered("GPIOM0", "FM_CPU0_RC_ERROR_N", 0),
    PinMonitor::powered("GPIOM1", "FM_CPU1_RC_ERROR_N", 0),
    PinMonitor::new(
        "GPIOM4",
        "FM_CPU0_THERMTRIP_LATCH_LVT3_N",
        Edge::Both,
        EventFilter::Always,
        EdgeAction::ThermalTripLatch(Cpu::Cpu0),
    ),
    PinMonitor::new(
        "GPIOM5",
        "FM_CPU1_THERMTRIP_LATCH_LVT3_N",
        Edge::Both,
        EventFilter::Always,
        EdgeAction::ThermalTripLatch(Cpu::Cpu1),
    ),
    PinMonitor::new(
        CPU_MSMI,
        "FM_CPU_MSMI_LVT3_N",
        Edge::Falling,
        FAULT_FILTER,
        EdgeAction::Fault(FaultClass::Msmi),
    ),
    PinMonitor::new(
        POST_CARD_PRESENT,
        "FM_POST_CARD_PRES_BMC_N",
        Edge::Both,
        EventFilter::Always,
        EdgeAction::PostCardPresence,
    ),
    PinMonitor::new(
        PLATFORM_RESET,
        "RST_BMC_PLTRST_BUF_N",
        Edge::Both,
        EventFilter::Always,
        EdgeAction::PlatformReset,
    ),
    PinMonitor::powered("GPIOS0", "FM_THROTTLE_N", THROTTLE_SETTLE_SECS),
    PinMonitor::powered("GPIOX4", "H_CPU0_MEMABC_MEMHOT_LVT3_BMC_N", 0),
    PinMonitor::powered("GPIOX5", "H_CPU0_MEMDEF_MEMHOT_LVT3_BMC_N", 0),
    PinMonitor::powered("GPIOX6", "H_CPU1_MEMGHJ_MEMHOT_LVT3_BMC_N", 0),
    PinMonitor::powered("GPIOX7", "H_CPU1_MEMKLM_MEMHOT_LVT3_BMC_N", 0),
    PinMonitor::powered("GPIOZ2", "IRQ_PVDDQ_DEF_VRHOT_LVT3_N", 0),
    PinMonitor::powered(CPU1_SOCKET_OCCUPIED, "FM_CPU1_SKTOCC_LVT3_N", 0),
    PinMonitor::logged(PMBUS_ALERT, "IRQ_SML1_PMBUS_ALERT_N"),
    PinMonitor::logged("GPIOAB0", "IRQ_HSC_FAULT_N"),
];

/// Lines read to annotate a PROCHOT assertion, with the cause each one names.
pub const PROCHOT_CAUSES: [(&str, &str); 4] = [
    (UV_DETECT, "UV"),
    (OC_DETECT, "OC"),
    (HSC_TIMER_EXP, "timer exp"),
    (PMBUS_ALERT, "PMBus alert"),
];
