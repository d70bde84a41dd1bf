//! Daemon configuration.
//!
//! Every field has a default matching the shipping platforms, so the daemon
//! runs without a file. A TOML file passed with `--config` overrides any
//! subset of it, and command-line flags override the file.

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use gpio_core::pins::{SlotId, line_offset};
use serde::Deserialize;

use crate::error::ConfigError;

/// Placeholder replaced with the slot number in slot-scoped paths and commands.
pub const SLOT_PLACEHOLDER: &str = "{slot}";

/// Which pin table the daemon watches.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Single-node mainboard: power, fault and thermal signals.
    #[default]
    Mainboard,
    /// Four-slot sled: fan latch, ejectors and slot presence.
    Sled,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub profile: Profile,
    pub fru: u8,
    pub gpio: GpioConfig,
    pub paths: PathsConfig,
    pub commands: CommandsConfig,
    pub cpld: CpldConfig,
    pub sled: SledConfig,
    pub target: TargetConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            fru: 1,
            gpio: GpioConfig::default(),
            paths: PathsConfig::default(),
            commands: CommandsConfig::default(),
            cpld: CpldConfig::default(),
            sled: SledConfig::default(),
            target: TargetConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GpioConfig {
    pub sysfs_root: PathBuf,
    /// Number of the first line of the GPIO controller.
    pub chip_base: u32,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/class/gpio"),
            chip_base: 0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub pid_file: PathBuf,
    /// Directory holding one file per persisted key.
    pub kv_store: PathBuf,
    pub platform_reset_marker: PathBuf,
    pub slot_reinit: String,
    pub slot_record: String,
    pub slot_reinit_pid: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pid_file: PathBuf::from("/var/run/gpiod.lock"),
            kv_store: PathBuf::from("/mnt/data/kv_store"),
            platform_reset_marker: PathBuf::from("/tmp/rst_touch"),
            slot_reinit: "/tmp/slot{slot}_reinit".to_owned(),
            slot_record: "/tmp/slot{slot}.rc".to_owned(),
            slot_reinit_pid: "/tmp/slot{slot}_reinit.pid".to_owned(),
        }
    }
}

impl PathsConfig {
    #[must_use]
    pub fn slot_reinit(&self, slot: SlotId) -> PathBuf {
        PathBuf::from(for_slot(&self.slot_reinit, slot))
    }

    #[must_use]
    pub fn slot_record(&self, slot: SlotId) -> PathBuf {
        PathBuf::from(for_slot(&self.slot_record, slot))
    }

    #[must_use]
    pub fn slot_reinit_pid(&self, slot: SlotId) -> PathBuf {
        PathBuf::from(for_slot(&self.slot_reinit_pid, slot))
    }
}

/// External commands as argv vectors. An empty vector disables the command.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CommandsConfig {
    pub crash_dump: Vec<String>,
    pub stop_fan_control: Vec<String>,
    pub start_fan_control: Vec<String>,
    pub restart_fan_control: Vec<String>,
    pub setup_fan: Vec<String>,
    pub fan_full_speed: Vec<String>,
    pub debug_card_reset: Vec<String>,
    /// `{slot}` is replaced with the slot number.
    pub slot_12v_on: Vec<String>,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_owned()).collect()
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            crash_dump: argv(&["/usr/local/bin/autodump.sh"]),
            stop_fan_control: argv(&["/usr/bin/sv", "stop", "fscd"]),
            start_fan_control: argv(&["/usr/bin/sv", "start", "fscd"]),
            restart_fan_control: argv(&["/usr/bin/sv", "restart", "fscd"]),
            setup_fan: argv(&["/etc/init.d/setup-fan.sh"]),
            fan_full_speed: argv(&["/usr/local/bin/fan-util", "--set", "100"]),
            debug_card_reset: Vec::new(),
            slot_12v_on: argv(&["/usr/local/bin/power-util", "slot{slot}", "12V-on"]),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CpldConfig {
    pub enabled: bool,
    /// i2c-dev bus number.
    pub bus: u8,
    /// 7-bit device address.
    pub address: u16,
    pub poll_interval_ms: u64,
}

impl Default for CpldConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bus: gpio_core::cpld::CPLD_BUS,
            address: gpio_core::cpld::CPLD_ADDRESS,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SledConfig {
    /// 12V enable output per slot, slot 1 first.
    pub slot_12v_lines: Vec<String>,
    /// Slots run in pairs (1+2, 3+4) that share 12V.
    pub paired: bool,
    /// Type code recorded for each present slot, slot 1 first.
    pub slot_types: Vec<u8>,
}

impl Default for SledConfig {
    fn default() -> Self {
        Self {
            slot_12v_lines: argv(&["GPIOO4", "GPIOO5", "GPIOO6", "GPIOO7"]),
            paired: false,
            slot_types: vec![0; usize::from(SlotId::MAX)],
        }
    }
}

/// Debug-port lines serviced by the target control handle.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    pub enabled: bool,
    pub platform_reset: String,
    pub prdy: String,
    pub preq: String,
    pub power_debug: String,
    pub xdp_present: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            platform_reset: "GPIOR5".to_owned(),
            prdy: "GPIOP5".to_owned(),
            preq: "GPIOP4".to_owned(),
            power_debug: "GPIOP6".to_owned(),
            xdp_present: "GPIOAB1".to_owned(),
        }
    }
}

impl TargetConfig {
    fn lines(&self) -> [&str; 5] {
        [
            self.platform_reset.as_str(),
            self.prdy.as_str(),
            self.preq.as_str(),
            self.power_debug.as_str(),
            self.xdp_present.as_str(),
        ]
    }
}

/// Substitutes the slot number into a `{slot}` template.
#[must_use]
pub fn for_slot(template: &str, slot: SlotId) -> String {
    template.replace(SLOT_PLACEHOLDER, &slot.get().to_string())
}

impl Config {
    /// Loads `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            None => Self::default(),
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::parse(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let slots = usize::from(SlotId::MAX);
        if self.sled.slot_12v_lines.len() != slots {
            return Err(ConfigError::Invalid(format!(
                "sled.slot_12v_lines needs {slots} entries"
            )));
        }
        if self.sled.slot_types.len() != slots {
            return Err(ConfigError::Invalid(format!(
                "sled.slot_types needs {slots} entries"
            )));
        }
        let lines = self
            .sled
            .slot_12v_lines
            .iter()
            .map(String::as_str)
            .chain(self.target.lines());
        for line in lines {
            if line_offset(line).is_none() {
                return Err(ConfigError::Invalid(format!("'{line}' is not a GPIO line")));
            }
        }
        if self.cpld.address > 0x7f {
            return Err(ConfigError::Invalid(format!(
                "cpld.address 0x{:x} is not a 7-bit address",
                self.cpld.address
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").expect("empty config parses");
        assert_eq!(config, Config::default());
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::parse(
            r#"
            profile = "sled"

            [cpld]
            enabled = false

            [target]
            enabled = true
            prdy = "GPIOB0"
            "#,
        )
        .expect("config parses");

        assert_eq!(config.profile, Profile::Sled);
        assert!(!config.cpld.enabled);
        assert_eq!(config.cpld.bus, 6);
        assert!(config.target.enabled);
        assert_eq!(config.target.prdy, "GPIOB0");
        assert_eq!(config.target.preq, "GPIOP4");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::parse("[gpio]\nchip = 3\n").is_err());
    }

    #[test]
    fn bad_line_names_fail_validation() {
        let mut config = Config::default();
        config.target.xdp_present = "PIN7".to_owned();
        let err = config.validate().expect_err("invalid line");
        assert!(err.to_string().contains("PIN7"), "{err}");
    }

    #[test]
    fn slot_templates_expand() {
        let paths = PathsConfig::default();
        assert_eq!(
            paths.slot_reinit(SlotId::SLOT3),
            PathBuf::from("/tmp/slot3_reinit")
        );
        assert_eq!(for_slot("slot{slot}", SlotId::SLOT2), "slot2");
    }
}
