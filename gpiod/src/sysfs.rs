//! Legacy sysfs GPIO interface (`/sys/class/gpio`).

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use gpio_core::pins::{Edge, PinLevel, line_offset};
use log::debug;

use crate::error::GpioError;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    In,
    Out,
    /// Output that starts driven high.
    OutHigh,
}

impl Direction {
    const fn sysfs_name(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
            Direction::OutHigh => "high",
        }
    }
}

/// Lines of one GPIO controller addressed by ASPEED name.
#[derive(Clone, Debug)]
pub struct SysfsGpio {
    root: PathBuf,
    chip_base: u32,
}

impl SysfsGpio {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, chip_base: u32) -> Self {
        Self {
            root: root.into(),
            chip_base,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Kernel GPIO number of `line`.
    pub fn number(&self, line: &str) -> Result<u32, GpioError> {
        line_offset(line)
            .map(|offset| self.chip_base + offset)
            .ok_or_else(|| GpioError::InvalidLine(line.to_owned()))
    }

    fn line_dir(&self, line: &str) -> Result<PathBuf, GpioError> {
        Ok(self.root.join(format!("gpio{}", self.number(line)?)))
    }

    pub fn value_path(&self, line: &str) -> Result<PathBuf, GpioError> {
        Ok(self.line_dir(line)?.join("value"))
    }

    /// Exports `line` unless it is already exported.
    pub fn export(&self, line: &str) -> Result<(), GpioError> {
        let dir = self.line_dir(line)?;
        if dir.exists() {
            return Ok(());
        }
        debug!("exporting {line}");
        write_attr(&self.root.join("export"), &self.number(line)?.to_string())
    }

    pub fn set_direction(&self, line: &str, direction: Direction) -> Result<(), GpioError> {
        write_attr(&self.line_dir(line)?.join("direction"), direction.sysfs_name())
    }

    pub fn set_edge(&self, line: &str, edge: Edge) -> Result<(), GpioError> {
        write_attr(&self.line_dir(line)?.join("edge"), edge.sysfs_name())
    }

    pub fn read(&self, line: &str) -> Result<PinLevel, GpioError> {
        let path = self.value_path(line)?;
        let text = fs::read_to_string(&path).map_err(|err| GpioError::io(&path, err))?;
        parse_level(&path, &text)
    }

    pub fn write(&self, line: &str, level: PinLevel) -> Result<(), GpioError> {
        let value = if level.is_high() { "1" } else { "0" };
        write_attr(&self.value_path(line)?, value)
    }

    /// Opens the value file for edge polling.
    pub fn open_value(&self, line: &str) -> Result<File, GpioError> {
        let path = self.value_path(line)?;
        File::open(&path).map_err(|err| GpioError::io(path, err))
    }
}

fn write_attr(path: &Path, value: &str) -> Result<(), GpioError> {
    use std::io::Write;

    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|err| GpioError::io(path, err))?;
    file.write_all(value.as_bytes())
        .map_err(|err| GpioError::io(path, err))
}

pub(crate) fn parse_level(path: &Path, text: &str) -> Result<PinLevel, GpioError> {
    match text.trim() {
        "0" => Ok(PinLevel::Low),
        "1" => Ok(PinLevel::High),
        other => Err(GpioError::BadValue {
            path: path.to_path_buf(),
            value: other.to_owned(),
        }),
    }
}

/// Re-reads an open value file from the start. This also acknowledges a
/// pending edge notification on it.
pub(crate) fn reread<R>(file: &mut R, path: &Path) -> Result<PinLevel, GpioError>
where
    R: Read + Seek,
{
    let mut buf = String::with_capacity(4);
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_string(&mut buf))
        .map_err(|err| GpioError::io(path, err))?;
    parse_level(path, &buf)
}
