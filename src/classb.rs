//! # Class-B Slot Calculator (§4.6)
//!
//! Beacon-aligned ping-slot offset and next-slot time per DevAddr and
//! `ping_nb`, matching `ttn/loraserver`'s `classb` package's pure-function
//! shape: no state, everything derived from `(beacon_time, dev_addr,
//! ping_nb)`.

use std::time::Duration;

use crate::constants::{
    BEACON_PERIOD_SECS, BEACON_RESERVED_MILLIS, PING_PERIOD_BASE, PING_SLOT_LEN_MILLIS,
};
use crate::crypto::class_b_ping_offset_block;
use crate::session::types::DevAddr;

/// Computes the ping-slot offset within a beacon period, in units of
/// `ping_period` slots, per §4.6: AES-128(zero-key, block)[0..2] mod
/// `ping_period`.
pub fn ping_offset(beacon_time_secs: u64, dev_addr: DevAddr, ping_nb: u32) -> u32 {
    let ping_period = PING_PERIOD_BASE / ping_nb.max(1);
    let block = class_b_ping_offset_block(beacon_time_secs as u32, dev_addr);
    let raw = u16::from_le_bytes([block[0], block[1]]) as u32;
    raw % ping_period
}

/// Start-of-beacon time (GPS-epoch seconds) containing the given instant.
pub fn beacon_start(time_since_gps_epoch: Duration) -> u64 {
    let secs = time_since_gps_epoch.as_secs();
    secs - (secs % BEACON_PERIOD_SECS)
}

/// All ping-slot times (as GPS-epoch `Duration`s) within the single beacon
/// period starting at `beacon_time_secs`, for the given `(dev_addr,
/// ping_nb)`. §8 invariant 6: deterministic, `|set| == ping_nb`.
pub fn ping_slots_in_beacon(
    beacon_time_secs: u64,
    dev_addr: DevAddr,
    ping_nb: u32,
) -> Vec<Duration> {
    let ping_period = PING_PERIOD_BASE / ping_nb.max(1);
    let offset = ping_offset(beacon_time_secs, dev_addr, ping_nb);

    let base = beacon_time_secs * 1000 + BEACON_RESERVED_MILLIS;
    (0..ping_nb)
        .map(|n| {
            let slot_millis = base + ((offset + n * ping_period) as u64) * PING_SLOT_LEN_MILLIS;
            Duration::from_millis(slot_millis)
        })
        .collect()
}

/// Walks forward beacon by beacon until the first ping slot strictly after
/// `after` is found (§4.6, `GetNextPingSlotAfter`).
pub fn next_ping_slot_after(
    after: Duration,
    dev_addr: DevAddr,
    ping_nb: u32,
) -> Duration {
    let mut beacon = beacon_start(after);
    loop {
        let slots = ping_slots_in_beacon(beacon, dev_addr, ping_nb);
        if let Some(slot) = slots.into_iter().find(|s| *s > after) {
            return slot;
        }
        beacon += BEACON_PERIOD_SECS;
    }
}
