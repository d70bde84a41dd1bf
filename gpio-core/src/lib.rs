#![no_std]

//! Shared logic for the BMC GPIO event monitors.
//!
//! Every policy decision (which edges are reported, when faults escalate, how
//! the debug-probe pins are serviced) lives here behind small hardware traits
//! so the daemon can drive it with sysfs while tests drive it with mocks.

pub mod cpld;
pub mod dispatch;
pub mod faults;
pub mod pins;
pub mod platform;
pub mod power;
pub mod precheck;
pub mod target;
pub mod telemetry;
pub mod timers;
