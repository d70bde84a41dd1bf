//! Timed button-press plans behind server power control.
//!
//! Power requests are executed as a short list of steps over the power and
//! reset button outputs, mirroring a person pressing the front panel. Fan
//! control is stopped before a power-down and brought back afterwards.

use core::time::Duration;

use heapless::Vec;

use crate::pins::PinLevel;
use crate::pins::mainboard::{POWER_BUTTON_OUT, RESET_BUTTON_OUT};
use crate::platform::{
    DetachedCommand, GpioAccess, Launcher, PalError, PowerCommand, PowerOutcome, PowerState,
};

/// Longest plan (cycle) plus headroom.
pub const MAX_PLAN_STEPS: usize = 10;

/// Press that turns a powered-off server on.
pub const POWER_ON_PRESS: Duration = Duration::from_secs(1);
/// Hold that forces a powered-on server off.
pub const POWER_OFF_PRESS: Duration = Duration::from_secs(6);
/// Short press that asks the OS to shut down.
pub const GRACEFUL_PRESS: Duration = Duration::from_secs(1);
/// Reset button pulse width.
pub const RESET_PULSE: Duration = Duration::from_secs(1);
/// Time allowed for the host to come up before fan control restarts.
pub const POWER_ON_SETTLE: Duration = Duration::from_secs(2);
/// Idle time before the button is pressed for a power-down.
pub const PRE_PRESS_IDLE: Duration = Duration::from_secs(1);
/// Off time between the two halves of a power cycle.
pub const CYCLE_OFF_TIME: Duration = Duration::from_secs(10);

/// Front-panel outputs driven by the plans.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Button {
    Power,
    Reset,
}

impl Button {
    #[must_use]
    pub const fn line(self) -> &'static str {
        match self {
            Button::Power => POWER_BUTTON_OUT,
            Button::Reset => RESET_BUTTON_OUT,
        }
    }
}

/// One step of a plan.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PlanStep {
    /// Drive `button` to `level` and keep it there for `hold_for`.
    Drive {
        button: Button,
        level: PinLevel,
        hold_for: Duration,
    },
    /// Start an external command without waiting for it.
    Launch(DetachedCommand),
}

impl PlanStep {
    #[must_use]
    pub const fn drive(button: Button, level: PinLevel, hold_for: Duration) -> Self {
        PlanStep::Drive {
            button,
            level,
            hold_for,
        }
    }
}

/// Ordered steps for one power request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PowerPlan {
    steps: Vec<PlanStep, MAX_PLAN_STEPS>,
}

impl PowerPlan {
    #[must_use]
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Sum of every hold in the plan.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.steps
            .iter()
            .map(|step| match step {
                PlanStep::Drive { hold_for, .. } => *hold_for,
                PlanStep::Launch(_) => Duration::ZERO,
            })
            .sum()
    }

    fn extend(&mut self, steps: &[PlanStep]) {
        for step in steps {
            // Plans are built from the fixed tables below and always fit.
            let _ = self.steps.push(*step);
        }
    }
}

const POWER_ON_STEPS: [PlanStep; 4] = [
    PlanStep::drive(Button::Power, PinLevel::High, Duration::ZERO),
    PlanStep::drive(Button::Power, PinLevel::Low, POWER_ON_PRESS),
    PlanStep::drive(Button::Power, PinLevel::High, POWER_ON_SETTLE),
    PlanStep::Launch(DetachedCommand::RestartFanControl),
];

const fn power_off_steps(press: Duration, then_idle: Duration) -> [PlanStep; 4] {
    [
        PlanStep::Launch(DetachedCommand::StopFanControl),
        PlanStep::drive(Button::Power, PinLevel::High, PRE_PRESS_IDLE),
        PlanStep::drive(Button::Power, PinLevel::Low, press),
        PlanStep::drive(Button::Power, PinLevel::High, then_idle),
    ]
}

const RESET_STEPS: [PlanStep; 5] = [
    PlanStep::Launch(DetachedCommand::StopFanControl),
    PlanStep::drive(Button::Reset, PinLevel::High, RESET_PULSE),
    PlanStep::drive(Button::Reset, PinLevel::Low, RESET_PULSE),
    PlanStep::drive(Button::Reset, PinLevel::High, Duration::ZERO),
    PlanStep::Launch(DetachedCommand::ResumeFanControl),
];

/// Builds the plan for `command` given the current power state.
///
/// Returns `None` when the server is already in the requested state.
#[must_use]
pub fn plan_for(current: PowerState, command: PowerCommand) -> Option<PowerPlan> {
    let mut plan = PowerPlan::default();
    match (command, current) {
        (PowerCommand::On, PowerState::On)
        | (PowerCommand::Off | PowerCommand::GracefulShutdown, PowerState::Off) => return None,
        (
            PowerCommand::On | PowerCommand::Cycle | PowerCommand::Reset,
            PowerState::Off,
        ) => plan.extend(&POWER_ON_STEPS),
        (PowerCommand::Off, PowerState::On) => {
            plan.extend(&power_off_steps(POWER_OFF_PRESS, Duration::ZERO));
        }
        (PowerCommand::GracefulShutdown, PowerState::On) => {
            plan.extend(&power_off_steps(GRACEFUL_PRESS, Duration::ZERO));
        }
        (PowerCommand::Cycle, PowerState::On) => {
            plan.extend(&power_off_steps(POWER_OFF_PRESS, CYCLE_OFF_TIME));
            plan.extend(&POWER_ON_STEPS);
        }
        (PowerCommand::Reset, PowerState::On) => plan.extend(&RESET_STEPS),
    }
    Some(plan)
}

/// Blocking delay used while a plan holds a button.
pub trait Delay {
    fn delay(&self, duration: Duration);
}

/// Executes `plan`, stopping at the first output that cannot be driven.
pub fn run_plan<P, D>(plan: &PowerPlan, platform: &P, delay: &D) -> Result<(), PalError>
where
    P: GpioAccess + Launcher + ?Sized,
    D: Delay + ?Sized,
{
    for step in plan.steps() {
        match *step {
            PlanStep::Drive {
                button,
                level,
                hold_for,
            } => {
                platform.write_line(button.line(), level)?;
                if !hold_for.is_zero() {
                    delay.delay(hold_for);
                }
            }
            PlanStep::Launch(command) => platform.spawn_detached(command),
        }
    }
    Ok(())
}

/// Plans and runs `command` against the current power state.
pub fn apply_power_command<P, D>(
    platform: &P,
    delay: &D,
    current: PowerState,
    command: PowerCommand,
) -> Result<PowerOutcome, PalError>
where
    P: GpioAccess + Launcher + ?Sized,
    D: Delay + ?Sized,
{
    match plan_for(current, command) {
        None => Ok(PowerOutcome::NoChange),
        Some(plan) => {
            run_plan(&plan, platform, delay)?;
            Ok(PowerOutcome::Applied)
        }
    }
}
