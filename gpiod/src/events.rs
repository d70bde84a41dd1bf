//! Event sink that renders through `log` and keeps a short history.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use gpio_core::telemetry::{EventHistory, EventRecord, EventSink, GpioEvent, Severity};
use log::{error, info};

#[derive(Default)]
pub struct LogSink {
    history: Mutex<EventHistory<Instant>>,
}

impl LogSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<EventRecord<Instant>> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .oldest_first()
            .copied()
            .collect()
    }
}

impl EventSink for LogSink {
    fn emit(&self, event: GpioEvent) {
        match event.severity() {
            Severity::Critical => error!("{event}"),
            Severity::Info => info!("{event}"),
        }
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(event, Instant::now());
    }
}
