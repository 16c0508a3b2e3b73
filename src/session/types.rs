//! Core identifiers and the `DeviceSession` data model (§3).

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::constants::{DEVADDR_LEN, EUI_LEN, KEY_LEN};

macro_rules! fixed_bytes_id {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for b in self.0.iter() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    };
}

fixed_bytes_id!(DevEui, EUI_LEN);
fixed_bytes_id!(JoinEui, EUI_LEN);
fixed_bytes_id!(DevAddr, DEVADDR_LEN);

/// A 16-byte AES session key. Zeroed on drop via `zeroize` since these are
/// cryptographic material, matching the teacher crate's handling of keys.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, zeroize::Zeroize)]
pub struct AesKey(pub [u8; KEY_LEN]);

impl AesKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AesKey(****)")
    }
}

/// LoRaWAN MAC version. Represented as an enum (rather than the original's
/// version string) so an unsupported version is a compile-time impossible
/// state at every call site that already has a `DeviceSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacVersion {
    Lorawan1_0,
    Lorawan1_1,
}

impl MacVersion {
    pub fn is_1_1_or_later(self) -> bool {
        matches!(self, MacVersion::Lorawan1_1)
    }
}

/// A device-configured extra uplink channel (§3, `ExtraUplinkChannels`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub frequency_hz: u32,
    pub min_dr: u8,
    pub max_dr: u8,
}

/// One entry of the gateway ranking used for downlink-gateway selection
/// (§4.4: "prefers the gateway with the best SNR").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GatewayQuality {
    pub gateway_id: [u8; 8],
    pub snr: f32,
    pub rssi: i32,
    #[serde(with = "system_time_secs")]
    pub last_seen: SystemTime,
}

/// One ADR uplink history sample (§4.2 step 4: "Append (SNR_max, DR, FCnt,
/// gateway_count) to UplinkHistory ring").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UplinkHistorySample {
    pub snr_max: f32,
    pub dr: u8,
    pub f_cnt: u32,
    pub gateway_count: u32,
}

/// Bound on the ADR uplink-history ring (§3 supplement: bounded `VecDeque`).
pub const UPLINK_HISTORY_CAPACITY: usize = 20;

mod system_time_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let secs = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        secs.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

/// Authoritative per-device MAC-layer session state (§3).
///
/// Lifetime: created by an out-of-scope join handler, mutated only by the
/// uplink pipeline, destroyed on rejoin or explicit device removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSession {
    pub dev_eui: DevEui,
    pub join_eui: JoinEui,
    pub dev_addr: DevAddr,
    pub mac_version: MacVersion,

    pub f_nwk_s_int_key: AesKey,
    pub s_nwk_s_int_key: AesKey,
    pub nwk_s_enc_key: AesKey,
    /// Opaque envelope forwarded to the application server; this crate never
    /// inspects it (the app-layer AppSKey is not this server's concern).
    pub app_s_key_envelope: Option<Vec<u8>>,

    pub f_cnt_up: u32,
    pub n_f_cnt_down: u32,
    pub a_f_cnt_down: u32,
    /// FCnt of the most recent confirmed downlink awaiting ACK.
    pub conf_f_cnt: Option<u32>,

    pub skip_fcnt_validation: bool,

    pub enabled_uplink_channels: BTreeSet<usize>,
    pub extra_uplink_channels: BTreeMap<usize, ChannelConfig>,

    pub dr: u8,
    pub tx_power_index: u8,
    pub nb_trans: u8,
    pub rx1_dr_offset: u8,
    pub rx2_dr: u8,
    pub rx2_frequency_hz: u32,
    pub rx_delay_secs: u8,

    pub max_supported_dr: u8,
    pub min_supported_tx_power_index: u8,
    pub max_supported_tx_power_index: u8,

    pub beacon_locked: bool,
    pub ping_slot_nb: u8,
    pub ping_slot_dr: u8,
    pub ping_slot_frequency_hz: u32,

    pub rejoin_request_enabled: bool,
    pub rejoin_request_max_count_n: u8,
    pub rejoin_request_max_time_n: u8,

    #[serde(with = "opt_system_time_secs")]
    pub last_dev_status_requested: Option<SystemTime>,
    #[serde(with = "opt_system_time_secs")]
    pub last_downlink_tx: Option<SystemTime>,

    /// Ranked by SNR descending for downlink-gateway selection.
    pub uplink_gateway_history: Vec<GatewayQuality>,
    pub uplink_history: VecDeque<UplinkHistorySample>,

    /// Optimistic-concurrency version, bumped on every successful `save`.
    pub version: u64,
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

impl DeviceSession {
    /// Records one ADR uplink-history sample, evicting the oldest entry once
    /// the ring exceeds its bounded capacity.
    pub fn push_uplink_history(&mut self, sample: UplinkHistorySample) {
        if self.uplink_history.len() >= UPLINK_HISTORY_CAPACITY {
            self.uplink_history.pop_front();
        }
        self.uplink_history.push_back(sample);
    }

    /// Current down-FCnt for the given FPort, per §4.4 step 5: FPort=0 always
    /// advances `NFCntDown`; otherwise 1.0.x uses `NFCntDown` for everything
    /// while 1.1.x splits into `NFCntDown`/`AFCntDown`.
    pub fn current_down_fcnt(&self, fport: u8) -> u32 {
        if self.mac_version == MacVersion::Lorawan1_0 || fport == 0 {
            self.n_f_cnt_down
        } else {
            self.a_f_cnt_down
        }
    }

    /// Advances the appropriate down-FCnt counter and returns the FCnt that
    /// was just consumed (invariant 2: "never reused after transmission").
    pub fn advance_down_fcnt(&mut self, fport: u8) -> u32 {
        if self.mac_version == MacVersion::Lorawan1_0 || fport == 0 {
            let fcnt = self.n_f_cnt_down;
            self.n_f_cnt_down += 1;
            fcnt
        } else {
            let fcnt = self.a_f_cnt_down;
            self.a_f_cnt_down += 1;
            fcnt
        }
    }

    /// Best (highest) SNR seen by any gateway in the most recent uplink.
    pub fn best_recent_snr(&self) -> Option<f32> {
        self.uplink_history.back().map(|s| s.snr_max)
    }
}

