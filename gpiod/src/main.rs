use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use gpio_core::dispatch::EventDispatcher;
use gpio_core::faults::FaultCounters;
use gpio_core::pins::{MAINBOARD_PINS, PinMonitor, SLED_PINS};
use gpio_core::precheck::{MAINBOARD_PRECHECK, run_precheck};
use gpio_core::target::{EventRejected, TargetEvent};
use log::{LevelFilter, error, info, warn};

use gpiod::config::{Config, Profile};
use gpiod::events::LogSink;
use gpiod::i2c::I2cCpld;
use gpiod::lock::PidLock;
use gpiod::platform::LinuxPlatform;
use gpiod::poller::GpioPoller;
use gpiod::runtime::{self, SharedTimers, Task};
use gpiod::target::{SysfsTargetPins, TargetControlHandle};

/// BMC GPIO event monitor.
#[derive(Debug, Parser)]
#[command(version, about = "Watches BMC GPIO lines and reacts to hardware events")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pin table to watch; overrides the configuration file.
    #[arg(long, value_enum)]
    profile: Option<Profile>,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,

    /// Skip the single-instance lock.
    #[arg(long, default_value_t = false)]
    no_pid_lock: bool,
}

fn init_logging(level: LevelFilter) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn pin_table(profile: Profile) -> Vec<PinMonitor> {
    match profile {
        Profile::Mainboard => MAINBOARD_PINS.to_vec(),
        Profile::Sled => SLED_PINS.to_vec(),
    }
}

fn spawn_in<'scope, F>(
    scope: &'scope thread::Scope<'scope, '_>,
    name: &'static str,
    body: F,
) -> Result<()>
where
    F: FnOnce() + Send + 'scope,
{
    thread::Builder::new()
        .name(name.into())
        .spawn_scoped(scope, body)
        .with_context(|| format!("starting {name} thread"))?;
    Ok(())
}

fn log_target_event(event: TargetEvent) -> Result<(), EventRejected> {
    info!("target event: {event:?}");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(profile) = cli.profile {
        config.profile = profile;
    }

    let _lock = if cli.no_pid_lock {
        None
    } else {
        Some(PidLock::acquire(&config.paths.pid_file)?)
    };

    info!("monitoring {:?} lines for FRU {}", config.profile, config.fru);

    let sink = Arc::new(LogSink::new());
    let platform = Arc::new(LinuxPlatform::new(&config, Arc::clone(&sink)));
    let timers = SharedTimers::new();
    let faults = FaultCounters::new();
    let stop = AtomicBool::new(false);
    let fru = config.fru;
    let mainboard = config.profile == Profile::Mainboard;

    let mut table = pin_table(config.profile);
    let mut poller =
        GpioPoller::open(platform.gpio(), &mut table).context("arming GPIO lines")?;

    if mainboard {
        platform
            .prepare_outputs()
            .context("configuring button and LED outputs")?;
        run_precheck(
            &MAINBOARD_PRECHECK,
            &mut table,
            &*platform,
            fru,
            &faults,
            &*sink,
        );
    }

    let mut target = if config.target.enabled {
        let pins = SysfsTargetPins::new(platform.gpio().clone(), config.target.clone());
        let mut handle = TargetControlHandle::new(fru, pins, Arc::clone(&platform), log_target_event);
        match handle.initialize() {
            Ok(()) => Some(handle),
            Err(err) => {
                warn!("target control unavailable: {err}");
                None
            }
        }
    } else {
        None
    };

    let platform = &*platform;
    let sink = &*sink;
    let (timers, faults, stop) = (&timers, &faults, &stop);

    let result = thread::scope(|scope| {
        let mut serve = || -> Result<()> {
            for &task in Task::for_profile(config.profile) {
                match task {
                    Task::Timers => spawn_in(scope, task.name(), move || {
                        runtime::run_timers(platform, fru, timers, sink, stop);
                    })?,
                    Task::Faults => spawn_in(scope, task.name(), move || {
                        runtime::run_faults(faults, platform, sink, stop);
                    })?,
                    Task::Cpld if config.cpld.enabled => {
                        match I2cCpld::open(config.cpld.bus, config.cpld.address) {
                            Ok(mut bus) => {
                                let period = Duration::from_millis(config.cpld.poll_interval_ms);
                                spawn_in(scope, task.name(), move || {
                                    runtime::run_cpld(&mut bus, platform, sink, period, stop);
                                })?;
                            }
                            Err(err) => warn!("CPLD monitor disabled: {err}"),
                        }
                    }
                    Task::Cpld => info!("CPLD monitor disabled by configuration"),
                }
            }

            let mut dispatcher = EventDispatcher::new(platform, timers, faults, sink, fru);
            poller
                .run(&mut table, &mut dispatcher)
                .context("polling GPIO lines")
        };
        let outcome = serve();
        stop.store(true, Ordering::Release);
        outcome
    });

    if let Some(handle) = target.as_mut() {
        if let Err(err) = handle.deinitialize() {
            error!("target control shutdown failed: {err}");
        }
    }
    result
}
