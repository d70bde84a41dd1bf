//! Blocking multi-line edge wait.
//!
//! The kernel signals an armed edge on a sysfs value file as `POLLPRI`.
//! Each wake-up re-reads the fired lines, stores the level in the table entry
//! and calls the handler for that entry before waiting again, so handlers
//! run one at a time on the calling thread.

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::time::Duration;

use gpio_core::pins::{EdgeHandler, PinLevel, PinMonitor};
use log::{debug, warn};

use crate::error::GpioError;
use crate::sysfs::{self, Direction, SysfsGpio};

struct WatchedLine {
    file: File,
    path: PathBuf,
}

pub struct GpioPoller {
    lines: Vec<WatchedLine>,
}

impl GpioPoller {
    /// Exports every line of `table` as an input armed for its edge and
    /// seeds each entry's cached level.
    pub fn open(gpio: &SysfsGpio, table: &mut [PinMonitor]) -> Result<Self, GpioError> {
        let mut lines = Vec::with_capacity(table.len());
        for pin in table.iter_mut() {
            gpio.export(pin.line)?;
            gpio.set_direction(pin.line, Direction::In)?;
            gpio.set_edge(pin.line, pin.edge)?;
            let path = gpio.value_path(pin.line)?;
            let mut file = gpio.open_value(pin.line)?;
            pin.value = sysfs::reread(&mut file, &path)?;
            debug!("watching {} ({}) = {}", pin.line, pin.desc, pin.value);
            lines.push(WatchedLine { file, path });
        }
        Ok(Self { lines })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Re-reads line `index` into its table entry.
    pub fn refresh(&mut self, table: &mut [PinMonitor], index: usize) -> Result<PinLevel, GpioError> {
        let line = self
            .lines
            .get_mut(index)
            .ok_or_else(|| GpioError::Poll(io::Error::from(io::ErrorKind::InvalidInput)))?;
        let level = sysfs::reread(&mut line.file, &line.path)?;
        if let Some(pin) = table.get_mut(index) {
            pin.value = level;
        }
        Ok(level)
    }

    /// Waits up to `timeout` (forever when `None`) and dispatches every line
    /// that fired. Returns the number of edges delivered.
    pub fn poll_once<H>(
        &mut self,
        table: &mut [PinMonitor],
        handler: &mut H,
        timeout: Option<Duration>,
    ) -> Result<usize, GpioError>
    where
        H: EdgeHandler + ?Sized,
    {
        let mut fds: Vec<libc::pollfd> = self
            .lines
            .iter()
            .map(|line| libc::pollfd {
                fd: line.file.as_raw_fd(),
                events: libc::POLLPRI | libc::POLLERR,
                revents: 0,
            })
            .collect();
        let timeout_ms = timeout.map_or(-1, |timeout| {
            i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX)
        });
        let nfds = libc::nfds_t::try_from(fds.len())
            .map_err(|_| GpioError::Poll(io::Error::from(io::ErrorKind::InvalidInput)))?;

        // SAFETY: `fds` is a live, correctly sized array of pollfd.
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), nfds, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(GpioError::Poll(err));
        }

        let fired: Vec<usize> = fds
            .iter()
            .enumerate()
            .filter(|(_, fd)| fd.revents != 0)
            .map(|(index, _)| index)
            .collect();
        Ok(self.dispatch(table, handler, &fired))
    }

    /// Re-reads each fired line and hands its entry to `handler`, in the
    /// order given. Returns the number of edges delivered.
    pub fn dispatch<H>(&mut self, table: &mut [PinMonitor], handler: &mut H, fired: &[usize]) -> usize
    where
        H: EdgeHandler + ?Sized,
    {
        let mut delivered = 0;
        for &index in fired {
            match self.refresh(table, index) {
                Ok(_) => {
                    if let Some(pin) = table.get(index) {
                        handler.on_edge(pin);
                        delivered += 1;
                    }
                }
                Err(err) => warn!("{err}"),
            }
        }
        delivered
    }

    /// Dispatches edges until polling fails.
    pub fn run<H>(&mut self, table: &mut [PinMonitor], handler: &mut H) -> Result<(), GpioError>
    where
        H: EdgeHandler + ?Sized,
    {
        loop {
            self.poll_once(table, handler, None)?;
        }
    }
}

/// Checks without blocking whether an armed edge is pending on `file`.
pub(crate) fn edge_pending(file: &File) -> Result<bool, GpioError> {
    let mut fd = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLPRI | libc::POLLERR,
        revents: 0,
    };
    // SAFETY: one live pollfd, zero timeout.
    let ready = unsafe { libc::poll(&raw mut fd, 1, 0) };
    if ready < 0 {
        return Err(GpioError::Poll(io::Error::last_os_error()));
    }
    Ok(fd.revents != 0)
}
