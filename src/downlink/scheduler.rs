//! # Downlink Scheduler (§4.5)
//!
//! Chooses the transmission timestamp for a built downlink candidate and
//! enforces per-class pacing (Class-C downlink lock, Class-B slot
//! progression). Timing is computed from an injected [`Clock`]
//! (Design Note 9(c)), never read from `SystemTime::now()` directly.

use std::time::{Duration, SystemTime};

use crate::classb;
use crate::clock::{gps_epoch_duration, Clock};
use crate::config::NetworkServerConfig;
use crate::constants::{CLASS_B_SCHEDULE_MARGIN_SECS, DEFAULT_RX1_DELAY_MICROS, RX2_DELAY_OFFSET_SECS};
use crate::downlink::builder::{BuiltDownlink, DeviceClass, RxWindow};
use crate::error::NsError;
use crate::session::types::{DevAddr, DeviceSession};

#[derive(Debug, Clone, Copy)]
pub struct ScheduledTx {
    pub timestamp_micros: Option<u64>,
    pub time_since_gps_epoch: Option<Duration>,
}

/// Class A: timestamps are relative to the uplink's own gateway-clock
/// receive timestamp (§4.5).
pub fn schedule_class_a(
    built: &BuiltDownlink,
    uplink_rx_timestamp_micros: u64,
    rx_delay_secs: u8,
) -> ScheduledTx {
    let rx1_delay_micros = if rx_delay_secs == 0 {
        DEFAULT_RX1_DELAY_MICROS
    } else {
        rx_delay_secs as u64 * 1_000_000
    };
    let offset = match built.window {
        RxWindow::Rx1 => rx1_delay_micros,
        RxWindow::Rx2 => rx1_delay_micros + RX2_DELAY_OFFSET_SECS * 1_000_000,
    };
    ScheduledTx {
        timestamp_micros: Some(uplink_rx_timestamp_micros + offset),
        time_since_gps_epoch: None,
    }
}

/// Class C: transmit immediately, enforcing `DownlinkLockDuration` since the
/// last downlink to this device (§4.5).
pub fn schedule_class_c(
    session: &DeviceSession,
    clock: &dyn Clock,
    config: &NetworkServerConfig,
) -> Result<ScheduledTx, NsError> {
    if let Some(last) = session.last_downlink_tx {
        let lock = Duration::from_secs(config.scheduler.class_c.downlink_lock_duration_secs);
        let elapsed = clock
            .now()
            .duration_since(last)
            .unwrap_or(Duration::ZERO);
        if elapsed < lock {
            return Err(NsError::GatewayTransportTimeout(
                "class-C downlink lock still held".into(),
            ));
        }
    }
    Ok(ScheduledTx {
        timestamp_micros: None,
        time_since_gps_epoch: None,
    })
}

/// Class B: assigns the next ping slot at or after `now + schedule_margin`,
/// advancing past any previously scheduled slot for this device so
/// successive queue items do not collide (§4.5).
pub fn schedule_class_b(
    dev_addr: DevAddr,
    ping_nb: u8,
    clock: &dyn Clock,
    schedule_margin: Duration,
    previous_slot: Option<Duration>,
) -> Duration {
    let earliest = clock.time_since_gps_epoch() + schedule_margin;
    let after = previous_slot.map(|p| p.max(earliest)).unwrap_or(earliest);
    classb::next_ping_slot_after(after, dev_addr, ping_nb as u32)
}

/// Convenience dispatcher used by the pipeline once it knows the device's
/// class for this transmission opportunity. Class A schedules off the
/// triggering uplink's gateway-clock timestamp; Class B assigns the next
/// free ping slot past `session.last_downlink_tx` (GPS-epoch basis); Class C
/// transmits immediately subject to the downlink lock.
pub fn schedule(
    built: &BuiltDownlink,
    session: &DeviceSession,
    class: DeviceClass,
    clock: &dyn Clock,
    config: &NetworkServerConfig,
    uplink_rx_timestamp_micros: Option<u64>,
) -> Result<ScheduledTx, NsError> {
    match class {
        DeviceClass::A => {
            let ts = uplink_rx_timestamp_micros.ok_or_else(|| {
                NsError::GatewayTransportTimeout("class-A downlink has no uplink RX timestamp to schedule from".into())
            })?;
            Ok(schedule_class_a(built, ts, session.rx_delay_secs))
        }
        DeviceClass::B => {
            let margin = Duration::from_secs(CLASS_B_SCHEDULE_MARGIN_SECS);
            let previous_slot = session.last_downlink_tx.map(gps_epoch_duration);
            let slot = schedule_class_b(session.dev_addr, session.ping_slot_nb, clock, margin, previous_slot);
            Ok(ScheduledTx {
                timestamp_micros: None,
                time_since_gps_epoch: Some(slot),
            })
        }
        DeviceClass::C => schedule_class_c(session, clock, config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::clock::GPS_EPOCH_UNIX_SECS;
    use crate::downlink::builder::RxWindow;
    use crate::session::types::{
        AesKey, DevAddr, DevEui, JoinEui, MacVersion,
    };
    use std::collections::{BTreeMap, BTreeSet, VecDeque};
    use std::time::UNIX_EPOCH;

    fn built(window: RxWindow) -> BuiltDownlink {
        BuiltDownlink {
            phy_payload: vec![],
            f_cnt: 5,
            confirmed: true,
            queue_item_id: None,
            window,
            frequency_hz: 868_100_000,
            dr: 0,
            }
    }

    fn test_session() -> DeviceSession {
        DeviceSession {
            dev_eui: DevEui::from_bytes([1; 8]),
            join_eui: JoinEui::from_bytes([0; 8]),
            dev_addr: DevAddr::from_bytes([0x04, 0x03, 0x02, 0x01]),
            mac_version: MacVersion::Lorawan1_0,
            f_nwk_s_int_key: AesKey::from_bytes([0x01; 16]),
            s_nwk_s_int_key: AesKey::from_bytes([0x01; 16]),
            nwk_s_enc_key: AesKey::from_bytes([0x01; 16]),
            app_s_key_envelope: None,
            f_cnt_up: 0,
            n_f_cnt_down: 0,
            a_f_cnt_down: 0,
            conf_f_cnt: None,
            skip_fcnt_validation: false,
            enabled_uplink_channels: BTreeSet::from([0, 1, 2]),
            extra_uplink_channels: BTreeMap::new(),
            dr: 0,
            tx_power_index: 0,
            nb_trans: 1,
            rx1_dr_offset: 0,
            rx2_dr: 0,
            rx2_frequency_hz: 869_525_000,
            rx_delay_secs: 1,
            max_supported_dr: 5,
            min_supported_tx_power_index: 0,
            max_supported_tx_power_index: 5,
            beacon_locked: true,
            ping_slot_nb: 1,
            ping_slot_dr: 0,
            ping_slot_frequency_hz: 869_525_000,
            rejoin_request_enabled: false,
            rejoin_request_max_count_n: 0,
            rejoin_request_max_time_n: 0,
            last_dev_status_requested: None,
            last_downlink_tx: None,
            uplink_gateway_history: Vec::new(),
            uplink_history: VecDeque::new(),
            version: 0,
        }
    }

    #[test]
    fn s2_rx1_timestamp_is_uplink_plus_one_second() {
        let built = built(RxWindow::Rx1);
        let scheduled = schedule_class_a(&built, 1_000_000, 1);
        assert_eq!(scheduled.timestamp_micros, Some(2_000_000));
    }

    #[test]
    fn rx2_timestamp_is_one_second_after_rx1() {
        let rx1 = schedule_class_a(&built(RxWindow::Rx1), 1_000_000, 1);
        let rx2 = schedule_class_a(&built(RxWindow::Rx2), 1_000_000, 1);
        assert_eq!(
            rx2.timestamp_micros.unwrap() - rx1.timestamp_micros.unwrap(),
            1_000_000
        );
    }

    #[test]
    fn class_a_dispatch_uses_uplink_timestamp() {
        let session = test_session();
        let clock = FixedClock::new(GPS_EPOCH_UNIX_SECS + 1_000);
        let config = NetworkServerConfig::default();
        let scheduled = schedule(
            &built(RxWindow::Rx1),
            &session,
            DeviceClass::A,
            &clock,
            &config,
            Some(1_000_000),
        )
        .unwrap();
        assert_eq!(scheduled.timestamp_micros, Some(2_000_000));
        assert!(scheduled.time_since_gps_epoch.is_none());
    }

    #[test]
    fn class_b_dispatch_ignores_uplink_timestamp_and_uses_ping_slot() {
        let session = test_session();
        let clock = FixedClock::new(GPS_EPOCH_UNIX_SECS + 1_000);
        let config = NetworkServerConfig::default();
        let scheduled = schedule(
            &built(RxWindow::Rx2),
            &session,
            DeviceClass::B,
            &clock,
            &config,
            Some(1_000_000),
        )
        .unwrap();
        assert!(scheduled.timestamp_micros.is_none());
        let slot = scheduled.time_since_gps_epoch.unwrap();
        assert!(slot >= Duration::from_secs(1_000) + Duration::from_secs(CLASS_B_SCHEDULE_MARGIN_SECS));
    }

    #[test]
    fn class_b_dispatch_advances_past_previous_slot() {
        let mut session = test_session();
        let clock = FixedClock::new(GPS_EPOCH_UNIX_SECS + 1_000);
        let config = NetworkServerConfig::default();
        let first = schedule(&built(RxWindow::Rx2), &session, DeviceClass::B, &clock, &config, None).unwrap();
        let first_slot = first.time_since_gps_epoch.unwrap();
        session.last_downlink_tx = Some(UNIX_EPOCH + first_slot + Duration::from_secs(GPS_EPOCH_UNIX_SECS));

        let second = schedule(&built(RxWindow::Rx2), &session, DeviceClass::B, &clock, &config, None).unwrap();
        let second_slot = second.time_since_gps_epoch.unwrap();
        assert!(second_slot > first_slot);
    }
}
