//! Debug-port pins over sysfs.
//!
//! Event latches are value files armed for an edge. A latch reads as
//! triggered when a zero-timeout poll finds an edge pending; re-reading the
//! file acknowledges it.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use gpio_core::pins::{Edge, PinLevel};
use gpio_core::platform::PalError;
use gpio_core::target::TargetPins;
use log::debug;

use crate::config::TargetConfig;
use crate::error::GpioError;
use crate::poller::edge_pending;
use crate::sysfs::{self, Direction, SysfsGpio};

struct EdgeLatch {
    file: File,
    path: PathBuf,
}

impl EdgeLatch {
    fn open(gpio: &SysfsGpio, line: &str, edge: Edge) -> Result<Self, GpioError> {
        gpio.export(line)?;
        gpio.set_direction(line, Direction::In)?;
        gpio.set_edge(line, edge)?;
        let mut latch = Self {
            file: gpio.open_value(line)?,
            path: gpio.value_path(line)?,
        };
        // Consume whatever fired before the latch was armed.
        latch.acknowledge()?;
        Ok(latch)
    }

    fn acknowledge(&mut self) -> Result<PinLevel, GpioError> {
        sysfs::reread(&mut self.file, &self.path)
    }

    fn take(&mut self) -> Result<bool, GpioError> {
        if !edge_pending(&self.file)? {
            return Ok(false);
        }
        self.acknowledge()?;
        Ok(true)
    }
}

#[derive(Default)]
struct Latches {
    platform_reset: Option<EdgeLatch>,
    prdy: Option<EdgeLatch>,
    xdp_present: Option<EdgeLatch>,
}

/// Target pins for a single FRU.
pub struct SysfsTargetPins {
    gpio: SysfsGpio,
    lines: TargetConfig,
    latches: Mutex<Latches>,
}

impl SysfsTargetPins {
    #[must_use]
    pub fn new(gpio: SysfsGpio, lines: TargetConfig) -> Self {
        Self {
            gpio,
            lines,
            latches: Mutex::new(Latches::default()),
        }
    }

    fn latches(&self) -> MutexGuard<'_, Latches> {
        self.latches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take<F>(&self, select: F) -> Result<bool, PalError>
    where
        F: FnOnce(&mut Latches) -> &mut Option<EdgeLatch>,
    {
        let mut latches = self.latches();
        let latch = select(&mut *latches).as_mut().ok_or(PalError::NotSupported)?;
        Ok(latch.take()?)
    }

    fn level(&self, line: &str) -> Result<PinLevel, PalError> {
        Ok(self.gpio.read(line)?)
    }

    fn drive_active_low(&self, line: &str, assert: bool) -> Result<(), PalError> {
        let level = if assert { PinLevel::Low } else { PinLevel::High };
        Ok(self.gpio.write(line, level)?)
    }
}

impl TargetPins for SysfsTargetPins {
    fn initialize(&self, fru: u8) -> Result<(), PalError> {
        debug!("initializing target pins for FRU {fru}");
        for line in [&self.lines.preq, &self.lines.power_debug] {
            self.gpio.export(line)?;
            self.gpio.set_direction(line, Direction::OutHigh)?;
        }
        let latches = Latches {
            platform_reset: Some(EdgeLatch::open(
                &self.gpio,
                &self.lines.platform_reset,
                Edge::Both,
            )?),
            prdy: Some(EdgeLatch::open(&self.gpio, &self.lines.prdy, Edge::Falling)?),
            xdp_present: Some(EdgeLatch::open(
                &self.gpio,
                &self.lines.xdp_present,
                Edge::Both,
            )?),
        };
        *self.latches() = latches;
        Ok(())
    }

    fn platform_reset_event(&self, _fru: u8) -> Result<bool, PalError> {
        self.take(|latches| &mut latches.platform_reset)
    }

    fn platform_reset_asserted(&self, _fru: u8) -> Result<bool, PalError> {
        Ok(self.level(&self.lines.platform_reset)?.is_low())
    }

    fn prdy_event(&self, _fru: u8) -> Result<bool, PalError> {
        self.take(|latches| &mut latches.prdy)
    }

    fn prdy_level(&self, _fru: u8) -> Result<bool, PalError> {
        Ok(self.level(&self.lines.prdy)?.is_high())
    }

    fn preq_assert(&self, _fru: u8, assert: bool) -> Result<(), PalError> {
        self.drive_active_low(&self.lines.preq, assert)
    }

    fn preq_level(&self, _fru: u8) -> Result<bool, PalError> {
        Ok(self.level(&self.lines.preq)?.is_high())
    }

    fn power_debug_assert(&self, _fru: u8, assert: bool) -> Result<(), PalError> {
        self.drive_active_low(&self.lines.power_debug, assert)
    }

    fn power_debug_asserted(&self, _fru: u8) -> Result<bool, PalError> {
        Ok(self.level(&self.lines.power_debug)?.is_low())
    }

    fn xdp_present_event(&self, _fru: u8) -> Result<bool, PalError> {
        self.take(|latches| &mut latches.xdp_present)
    }

    fn xdp_present_asserted(&self, _fru: u8) -> Result<bool, PalError> {
        // Read before `initialize` on start-up, so the line may not be exported yet.
        self.gpio.export(&self.lines.xdp_present)?;
        Ok(self.level(&self.lines.xdp_present)?.is_high())
    }
}
