//! Linux daemon around `gpio-core`: sysfs GPIO, threads, configuration.

pub mod config;
pub mod error;
pub mod events;
pub mod i2c;
pub mod launcher;
pub mod lock;
pub mod platform;
pub mod poller;
pub mod runtime;
pub mod sysfs;
pub mod target;

pub use config::{Config, Profile};
pub use error::{ConfigError, DaemonError, GpioError};
