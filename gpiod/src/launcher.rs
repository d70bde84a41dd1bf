//! Fire-and-forget external commands and delayed events.

use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gpio_core::platform::DetachedCommand;
use gpio_core::telemetry::{EventSink, GpioEvent};
use log::{debug, warn};

use crate::config::{CommandsConfig, for_slot};

/// Resolves a [`DetachedCommand`] into the argv lists to run, in order.
#[must_use]
pub fn command_lines(commands: &CommandsConfig, command: DetachedCommand) -> Vec<Vec<String>> {
    let lines: Vec<Vec<String>> = match command {
        DetachedCommand::CrashDump => vec![commands.crash_dump.clone()],
        DetachedCommand::StopFanControl => vec![commands.stop_fan_control.clone()],
        DetachedCommand::RestartFanControl => vec![commands.restart_fan_control.clone()],
        DetachedCommand::ResumeFanControl => vec![
            commands.setup_fan.clone(),
            commands.start_fan_control.clone(),
        ],
        DetachedCommand::FanFailsafe => vec![
            commands.stop_fan_control.clone(),
            commands.fan_full_speed.clone(),
        ],
        DetachedCommand::DebugCardReset => vec![commands.debug_card_reset.clone()],
        DetachedCommand::Slot12vOn(slot) => vec![
            commands
                .slot_12v_on
                .iter()
                .map(|arg| for_slot(arg, slot))
                .collect(),
        ],
    };
    lines.into_iter().filter(|argv| !argv.is_empty()).collect()
}

fn run(argv: &[String]) {
    let Some((program, args)) = argv.split_first() else {
        return;
    };
    debug!("running {}", argv.join(" "));
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("{program} exited with {status}"),
        Err(err) => warn!("failed to run {program}: {err}"),
    }
}

/// Runs commands on short-lived background threads.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    commands: CommandsConfig,
}

impl ProcessLauncher {
    #[must_use]
    pub fn new(commands: CommandsConfig) -> Self {
        Self { commands }
    }

    /// Starts the argv lists for `command` one after another off the
    /// calling thread.
    pub fn spawn(&self, command: DetachedCommand) {
        let lines = command_lines(&self.commands, command);
        if lines.is_empty() {
            debug!("{command:?} has no command configured");
            return;
        }
        let spawned = thread::Builder::new()
            .name("gpiod-launch".into())
            .spawn(move || {
                for argv in &lines {
                    run(argv);
                }
            });
        if let Err(err) = spawned {
            warn!("failed to start {command:?}: {err}");
        }
    }

    /// Emits `event` into `sink` once `delay` has elapsed.
    pub fn emit_later<S>(sink: &Arc<S>, delay: Duration, event: GpioEvent)
    where
        S: EventSink + Send + Sync + 'static,
    {
        let sink = Arc::clone(sink);
        let spawned = thread::Builder::new()
            .name("gpiod-delayed".into())
            .spawn(move || {
                thread::sleep(delay);
                sink.emit(event);
            });
        if let Err(err) = spawned {
            warn!("failed to schedule delayed event: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpio_core::pins::SlotId;

    #[test]
    fn failsafe_stops_fan_control_before_full_speed() {
        let lines = command_lines(&CommandsConfig::default(), DetachedCommand::FanFailsafe);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], ["/usr/bin/sv", "stop", "fscd"]);
        assert_eq!(lines[1], ["/usr/local/bin/fan-util", "--set", "100"]);
    }

    #[test]
    fn slot_commands_name_the_slot() {
        let lines = command_lines(
            &CommandsConfig::default(),
            DetachedCommand::Slot12vOn(SlotId::SLOT4),
        );
        assert_eq!(lines, vec![vec![
            "/usr/local/bin/power-util".to_owned(),
            "slot4".to_owned(),
            "12V-on".to_owned(),
        ]]);
    }

    #[test]
    fn unconfigured_commands_are_skipped() {
        let lines = command_lines(&CommandsConfig::default(), DetachedCommand::DebugCardReset);
        assert!(lines.is_empty());
    }
}
