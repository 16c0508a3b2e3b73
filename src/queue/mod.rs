//! # Device Queue (§3, §4.4 step 4)
//!
//! Ordered per-device downlink queue with at-most-one in-flight confirmed
//! item (invariant 3).

pub mod store;

pub use store::{InMemoryQueueStore, QueueStore};

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::session::types::DevEui;

/// One application-server-enqueued downlink awaiting transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceQueueItem {
    pub id: u64,
    pub dev_eui: DevEui,
    pub f_port: u8,
    pub frm_payload: Vec<u8>,
    /// Assigned at enqueue time from the session's current down-FCnt.
    pub f_cnt: u32,
    pub confirmed: bool,
    pub is_pending: bool,
    #[serde(with = "opt_system_time_secs")]
    pub timeout_after: Option<SystemTime>,
    /// Class-B only: GPS-epoch seconds at which this item must be emitted.
    pub emit_at_time_since_gps_epoch: Option<u64>,
    pub retry_count: u32,
}

mod opt_system_time_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &Option<SystemTime>, s: S) -> Result<S::Ok, S::Error> {
        let secs = t.map(|t| {
            t.duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_secs()
        });
        secs.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<SystemTime>, D::Error> {
        let secs: Option<u64> = Option::deserialize(d)?;
        Ok(secs.map(|s| UNIX_EPOCH + Duration::from_secs(s)))
    }
}

impl DeviceQueueItem {
    pub fn new(dev_eui: DevEui, f_port: u8, frm_payload: Vec<u8>, confirmed: bool, f_cnt: u32) -> Self {
        Self {
            id: 0,
            dev_eui,
            f_port,
            frm_payload,
            f_cnt,
            confirmed,
            is_pending: false,
            timeout_after: None,
            emit_at_time_since_gps_epoch: None,
            retry_count: 0,
        }
    }
}
