//! # Injectable Clock
//!
//! Design Note 9(c) requires wall-clock reads (Class-C downlink lock,
//! Class-B timeout stamping) to be injectable so the scheduler and
//! Class-B slot calculator are deterministic under test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// GPS epoch (1980-01-06T00:00:00Z) expressed as a Unix timestamp.
pub const GPS_EPOCH_UNIX_SECS: u64 = 315_964_800;

/// Source of "now", injected into the scheduler and Class-B calculator.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;

    /// Duration since the GPS epoch for the clock's current time.
    fn time_since_gps_epoch(&self) -> Duration {
        let unix = self
            .now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        unix.saturating_sub(Duration::from_secs(GPS_EPOCH_UNIX_SECS))
    }
}

/// Converts an arbitrary `SystemTime` (e.g. a session's `last_downlink_tx`)
/// to duration-since-GPS-epoch, the same basis [`Clock::time_since_gps_epoch`]
/// uses for "now".
pub fn gps_epoch_duration(t: SystemTime) -> Duration {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .saturating_sub(Duration::from_secs(GPS_EPOCH_UNIX_SECS))
}

/// Real wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that returns a fixed, mutable instant — for deterministic tests.
#[derive(Debug)]
pub struct FixedClock {
    unix_secs: AtomicU64,
}

impl FixedClock {
    pub fn new(unix_secs: u64) -> Self {
        Self {
            unix_secs: AtomicU64::new(unix_secs),
        }
    }

    pub fn set(&self, unix_secs: u64) {
        self.unix_secs.store(unix_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.unix_secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.unix_secs.load(Ordering::SeqCst))
    }
}
