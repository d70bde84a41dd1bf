//! Linux implementation of the platform services.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use gpio_core::pins::mainboard::{FAULT_LED, POWER_BUTTON_OUT, POWER_GOOD, RESET_BUTTON_OUT};
use gpio_core::pins::{EdgeAction, PinLevel, PinMonitor, SLED_PINS, SlotId};
use gpio_core::platform::{
    DetachedCommand, GpioAccess, KeyValueStore, Launcher, Markers, PalError, PowerCommand,
    PowerControl, PowerOutcome, PowerState, SelLogger, SlotControl,
};
use gpio_core::power::{Delay, apply_power_command};
use gpio_core::telemetry::GpioEvent;
use log::{error, warn};

use crate::config::{Config, PathsConfig, SledConfig};
use crate::error::GpioError;
use crate::events::LogSink;
use crate::launcher::ProcessLauncher;
use crate::sysfs::{Direction, SysfsGpio};

/// Type code recorded for an empty slot.
pub const SLOT_TYPE_EMPTY: u8 = 3;

/// Sleeps the calling thread.
#[derive(Copy, Clone, Debug, Default)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Key/value store with one file per key.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> Result<PathBuf, PalError> {
        if key.is_empty() || key.contains(['/', '\0']) || key.starts_with('.') {
            return Err(PalError::NotFound);
        }
        Ok(self.dir.join(key))
    }
}

impl KeyValueStore for FileStore {
    fn get_value(&self, key: &str, buf: &mut [u8]) -> Result<usize, PalError> {
        let value = fs::read(self.path(key)?).map_err(|err| io_to_pal(&err))?;
        let dst = buf.get_mut(..value.len()).ok_or(PalError::BufferTooSmall)?;
        dst.copy_from_slice(&value);
        Ok(value.len())
    }

    fn set_value(&self, key: &str, value: &str) -> Result<(), PalError> {
        let path = self.path(key)?;
        fs::create_dir_all(&self.dir).map_err(|err| io_to_pal(&err))?;
        fs::write(path, value).map_err(|err| io_to_pal(&err))
    }
}

fn io_to_pal(err: &io::Error) -> PalError {
    if err.kind() == ErrorKind::NotFound {
        PalError::NotFound
    } else {
        PalError::Io
    }
}

fn touch(path: &Path) -> Result<(), PalError> {
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .map(drop)
        .map_err(|err| {
            warn!("{}: {err}", path.display());
            io_to_pal(&err)
        })
}

/// Presence lines of `slot`, both active low.
#[must_use]
pub fn presence_lines(slot: SlotId) -> impl Iterator<Item = &'static str> {
    let table: &'static [PinMonitor] = &SLED_PINS;
    table
        .iter()
        .filter(move |pin| pin.action == EdgeAction::SlotPresence(slot))
        .map(|pin| pin.line)
}

/// Services backed by sysfs GPIO, files and child processes.
pub struct LinuxPlatform {
    gpio: SysfsGpio,
    store: FileStore,
    paths: PathsConfig,
    sled: SledConfig,
    launcher: ProcessLauncher,
    sink: Arc<LogSink>,
    power_lock: Mutex<()>,
}

impl LinuxPlatform {
    #[must_use]
    pub fn new(config: &Config, sink: Arc<LogSink>) -> Self {
        Self {
            gpio: SysfsGpio::new(&config.gpio.sysfs_root, config.gpio.chip_base),
            store: FileStore::new(&config.paths.kv_store),
            paths: config.paths.clone(),
            sled: config.sled.clone(),
            launcher: ProcessLauncher::new(config.commands.clone()),
            sink,
            power_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn gpio(&self) -> &SysfsGpio {
        &self.gpio
    }

    /// Exports the mainboard outputs, parked inactive (high).
    pub fn prepare_outputs(&self) -> Result<(), GpioError> {
        for line in [POWER_BUTTON_OUT, RESET_BUTTON_OUT, FAULT_LED] {
            self.gpio.export(line)?;
            self.gpio.set_direction(line, Direction::OutHigh)?;
        }
        Ok(())
    }

    fn slot_12v_line(&self, slot: SlotId) -> Result<&str, PalError> {
        self.sled
            .slot_12v_lines
            .get(slot.index())
            .map(String::as_str)
            .ok_or(PalError::NotFound)
    }
}

impl PowerControl for LinuxPlatform {
    fn server_power(&self, _fru: u8) -> Result<PowerState, PalError> {
        Ok(match self.gpio.read(POWER_GOOD)? {
            PinLevel::High => PowerState::On,
            PinLevel::Low => PowerState::Off,
        })
    }

    fn set_server_power(&self, fru: u8, command: PowerCommand) -> Result<PowerOutcome, PalError> {
        let _guard = self.power_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.server_power(fru)?;
        apply_power_command(self, &ThreadDelay, current, command)
    }
}

impl GpioAccess for LinuxPlatform {
    fn read_line(&self, line: &str) -> Result<PinLevel, PalError> {
        Ok(self.gpio.read(line)?)
    }

    fn write_line(&self, line: &str, level: PinLevel) -> Result<(), PalError> {
        Ok(self.gpio.write(line, level)?)
    }
}

impl SelLogger for LinuxPlatform {
    fn add_critical_sel(&self, message: &str) -> Result<(), PalError> {
        error!(target: "sel", "{message}");
        Ok(())
    }
}

impl KeyValueStore for LinuxPlatform {
    fn get_value(&self, key: &str, buf: &mut [u8]) -> Result<usize, PalError> {
        self.store.get_value(key, buf)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<(), PalError> {
        self.store.set_value(key, value)
    }
}

impl SlotControl for LinuxPlatform {
    fn is_slot_present(&self, slot: SlotId) -> Result<bool, PalError> {
        for line in presence_lines(slot) {
            if self.gpio.read(line)?.is_high() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn is_slot_12v_on(&self, slot: SlotId) -> Result<bool, PalError> {
        Ok(self.gpio.read(self.slot_12v_line(slot)?)?.is_high())
    }

    fn disable_slot_12v(&self, slot: SlotId) -> Result<(), PalError> {
        Ok(self.gpio.write(self.slot_12v_line(slot)?, PinLevel::Low)?)
    }

    fn pair_12v_off(&self, slot: SlotId) -> Result<(), PalError> {
        if !self.sled.paired {
            return Ok(());
        }
        self.disable_slot_12v(slot.pair())
    }
}

impl Markers for LinuxPlatform {
    fn touch_reset_marker(&self) -> Result<(), PalError> {
        touch(&self.paths.platform_reset_marker)
    }

    fn mark_slot_reinit(&self, slot: SlotId) -> Result<(), PalError> {
        touch(&self.paths.slot_reinit(slot))
    }

    fn record_slot_type(&self, slot: SlotId) -> Result<(), PalError> {
        let slot_type = if self.is_slot_present(slot)? {
            self.sled
                .slot_types
                .get(slot.index())
                .copied()
                .unwrap_or(SLOT_TYPE_EMPTY)
        } else {
            SLOT_TYPE_EMPTY
        };
        let path = self.paths.slot_record(slot);
        fs::write(&path, slot_type.to_string()).map_err(|err| {
            warn!("{}: {err}", path.display());
            io_to_pal(&err)
        })
    }

    fn clear_reinit_pid(&self, slot: SlotId) -> Result<(), PalError> {
        match fs::remove_file(self.paths.slot_reinit_pid(slot)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_to_pal(&err)),
        }
    }
}

impl Launcher for LinuxPlatform {
    fn spawn_detached(&self, command: DetachedCommand) {
        self.launcher.spawn(command);
    }

    fn emit_later(&self, delay: Duration, event: GpioEvent) {
        ProcessLauncher::emit_later(&self.sink, delay, event);
    }
}

