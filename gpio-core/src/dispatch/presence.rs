//! Slot hot-service handling on the sled.
//!
//! Every slot has two redundant presence pins that fire for the same physical
//! event. The first edge arms a per-slot [`PresenceLatch`] and runs the
//! removal or insertion sequence; the pair's edge finds the latch armed,
//! disarms it, and does nothing else.

use core::fmt::Write;

use log::{debug, error, warn};

use crate::pins::SlotId;
use crate::platform::{DetachedCommand, Platform};
use crate::telemetry::{EventSink, GpioEvent};

/// Duplicate suppression for one slot's presence pin pair.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PresenceLatch {
    #[default]
    Idle,
    /// One pin of the pair has been handled; the other is still expected.
    AwaitingPair,
}

impl PresenceLatch {
    /// Consumes the pair's duplicate edge. Returns `true` if this edge must
    /// be ignored.
    pub fn absorb_pair(&mut self) -> bool {
        match self {
            PresenceLatch::AwaitingPair => {
                *self = PresenceLatch::Idle;
                true
            }
            PresenceLatch::Idle => false,
        }
    }

    pub fn arm(&mut self) {
        *self = PresenceLatch::AwaitingPair;
    }
}

/// Slot-scoped keys restored to their defaults when a slot is pulled.
/// Each key is `prefix`, the slot number, then `suffix`.
pub const SLOT_KEY_DEFAULTS: [(&str, &str, &str); 8] = [
    ("pwr_server", "_last_state", "on"),
    ("sysfw_ver_slot", "", "0"),
    ("identify_slot", "", "off"),
    ("slot", "_por_cfg", "lps"),
    ("slot", "_sensor_health", "1"),
    ("slot", "_sel_error", "1"),
    ("slot", "_boot_order", "0000000"),
    ("slot", "_cpu_ppin", "0"),
];

/// Formats the key for `slot` from a [`SLOT_KEY_DEFAULTS`] entry.
#[must_use]
pub fn slot_key(prefix: &str, slot: SlotId, suffix: &str) -> heapless::String<32> {
    let mut key = heapless::String::new();
    // Longest key is 24 bytes.
    let _ = write!(key, "{prefix}{}{suffix}", slot.get());
    key
}

/// Sequence run on the first presence edge of a removal.
pub fn handle_removal<P, S>(platform: &P, sink: &S, slot: SlotId)
where
    P: Platform + ?Sized,
    S: EventSink + ?Sized,
{
    match platform.is_slot_present(slot) {
        Err(err) => {
            error!("{slot} presence read failed: {err}");
            return;
        }
        Ok(true) => {
            debug!("{slot} noise interrupt (low to high)");
            return;
        }
        Ok(false) => {}
    }

    let with_12v_on = match platform.is_slot_12v_on(slot) {
        Ok(on) => on,
        Err(err) => {
            error!("{slot} 12V state read failed: {err}");
            return;
        }
    };
    sink.emit(GpioEvent::SlotRemoved { slot, with_12v_on });

    if with_12v_on {
        if let Err(err) = platform.disable_slot_12v(slot) {
            error!("{slot} failed to drop 12V enable: {err}");
            return;
        }
        if let Err(err) = platform.pair_12v_off(slot) {
            warn!("{slot} pair 12V off failed: {err}");
        }
    }

    for (prefix, suffix, default) in SLOT_KEY_DEFAULTS {
        let key = slot_key(prefix, slot, suffix);
        if let Err(err) = platform.set_value(&key, default) {
            warn!("failed to reset {key}: {err}");
        }
    }

    if let Err(err) = platform.mark_slot_reinit(slot) {
        warn!("{slot} reinit marker failed: {err}");
    }
    if let Err(err) = platform.record_slot_type(slot) {
        warn!("{slot} slot type record failed: {err}");
    }
}

/// Sequence run on the first presence edge of an insertion.
pub fn handle_insertion<P, S>(platform: &P, sink: &S, slot: SlotId)
where
    P: Platform + ?Sized,
    S: EventSink + ?Sized,
{
    match platform.is_slot_present(slot) {
        Err(err) => {
            error!("{slot} presence read failed: {err}");
            return;
        }
        Ok(false) => {
            debug!("{slot} noise interrupt (high to low)");
            return;
        }
        Ok(true) => {}
    }

    sink.emit(GpioEvent::SlotInserted(slot));

    if let Err(err) = platform.mark_slot_reinit(slot) {
        warn!("{slot} reinit marker failed: {err}");
    }
    if let Err(err) = platform.record_slot_type(slot) {
        warn!("{slot} slot type record failed: {err}");
    }
    if let Err(err) = platform.clear_reinit_pid(slot) {
        warn!("{slot} reinit pid cleanup failed: {err}");
    }

    // The card may have been yanked again while the markers were written.
    match platform.is_slot_present(slot) {
        Ok(true) => {}
        Ok(false) => return,
        Err(err) => {
            error!("{slot} presence read failed: {err}");
            return;
        }
    }

    match platform.is_slot_12v_on(slot) {
        Ok(true) => {}
        Ok(false) => platform.spawn_detached(DetachedCommand::Slot12vOn(slot)),
        Err(err) => error!("{slot} 12V state read failed: {err}"),
    }
}
