//! CPLD register access over Linux i2c-dev.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use gpio_core::cpld::{BusError, CpldBus};
use log::debug;

use crate::error::GpioError;

/// `I2C_SLAVE` from `linux/i2c-dev.h`.
const I2C_SLAVE: u64 = 0x0703;

pub struct I2cCpld {
    file: File,
}

impl I2cCpld {
    /// Opens `/dev/i2c-<bus>` and binds it to `address`.
    pub fn open(bus: u8, address: u16) -> Result<Self, GpioError> {
        let path = PathBuf::from(format!("/dev/i2c-{bus}"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| GpioError::io(&path, err))?;

        // SAFETY: the fd is open for the lifetime of `file` and I2C_SLAVE
        // takes the address by value.
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                I2C_SLAVE as _,
                libc::c_ulong::from(address),
            )
        };
        if rc < 0 {
            return Err(GpioError::io(path, io::Error::last_os_error()));
        }
        debug!("CPLD at {bus}-{address:04x}");
        Ok(Self { file })
    }
}

impl CpldBus for I2cCpld {
    fn read_register(&mut self, register: u8) -> Result<u8, BusError> {
        let mut value = [0_u8; 1];
        self.file
            .write_all(&[register])
            .and_then(|()| self.file.read_exact(&mut value))
            .map_err(|err| {
                debug!("CPLD register {register} read failed: {err}");
                BusError::Transfer
            })?;
        Ok(value[0])
    }
}
