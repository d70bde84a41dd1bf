use std::io;
use std::path::PathBuf;

use gpio_core::platform::PalError;
use gpio_core::target::TargetError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("'{0}' is not a GPIO line name")]
    InvalidLine(String),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}: unexpected value {value:?}")]
    BadValue { path: PathBuf, value: String },
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),
}

impl GpioError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        GpioError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<GpioError> for PalError {
    fn from(err: GpioError) -> Self {
        match err {
            GpioError::InvalidLine(_) => PalError::NotFound,
            GpioError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound => {
                PalError::NotFound
            }
            GpioError::Io { .. } | GpioError::BadValue { .. } | GpioError::Poll(_) => PalError::Io,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("another instance is running ({0})")]
    AlreadyRunning(PathBuf),
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gpio(#[from] GpioError),
    #[error("target control: {0}")]
    Target(TargetError),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

impl From<TargetError> for DaemonError {
    fn from(err: TargetError) -> Self {
        DaemonError::Target(err)
    }
}
