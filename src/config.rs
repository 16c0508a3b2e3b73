//! # Network-Server Configuration
//!
//! A serde-deserializable configuration tree injected explicitly at
//! pipeline construction (Design Note 9: "Global configuration... injected
//! explicitly... not read from process-wide mutable state"). Loading this
//! from a file or environment is the surrounding binary's concern; this
//! crate only defines the shape and sane defaults.

use serde::{Deserialize, Serialize};

/// RX-window preference for Class-A downlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RxWindowPreference {
    /// Prefer RX1, fall back to RX2 if RX1 cannot be built.
    PreferRx1,
    /// RX1 only.
    Rx1Only,
    /// RX2 only.
    Rx2Only,
}

impl Default for RxWindowPreference {
    fn default() -> Self {
        RxWindowPreference::PreferRx1
    }
}

/// Network-wide MAC-layer settings (maps to loraserver's `NetworkSettings`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub rx_window: RxWindowPreference,
    pub rx1_delay_secs: u8,
    pub rx1_dr_offset: u8,
    pub rx2_dr: u8,
    pub rx2_frequency_hz: u32,
    /// -1 means "use the band's default downlink TX power".
    pub downlink_tx_power_dbm: i32,
    pub disable_adr: bool,
    pub disable_mac_commands: bool,
    pub relaxed_fcnt: bool,
    pub class_b: ClassBSettings,
    pub rejoin_request: RejoinSettings,
    /// RN2483 firmware 1.0.3 erratum: device nacks LinkADRReq TXPower=0
    /// instead of operating at max power and acking. See DESIGN.md.
    pub rn2483_txpower0_workaround: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            rx_window: RxWindowPreference::default(),
            rx1_delay_secs: 1,
            rx1_dr_offset: 0,
            rx2_dr: 0,
            rx2_frequency_hz: 869_525_000,
            downlink_tx_power_dbm: -1,
            disable_adr: false,
            disable_mac_commands: false,
            relaxed_fcnt: false,
            class_b: ClassBSettings::default(),
            rejoin_request: RejoinSettings::default(),
            rn2483_txpower0_workaround: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassBSettings {
    pub ping_slot_dr: u8,
    pub ping_slot_frequency_hz: u32,
}

impl Default for ClassBSettings {
    fn default() -> Self {
        Self {
            ping_slot_dr: 0,
            ping_slot_frequency_hz: 869_525_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejoinSettings {
    pub enabled: bool,
    pub max_count_n: u8,
    pub max_time_n: u8,
}

impl Default for RejoinSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_count_n: 0,
            max_time_n: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassCSettings {
    pub downlink_lock_duration_secs: u64,
    pub default_timeout_secs: u64,
}

impl Default for ClassCSettings {
    fn default() -> Self {
        Self {
            downlink_lock_duration_secs: 2,
            default_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub class_c: ClassCSettings,
    pub class_b_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            class_c: ClassCSettings::default(),
            class_b_timeout_secs: 20,
        }
    }
}

/// Device-status request cadence, expressed as requests/day (0 disables it).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DevStatusSettings {
    pub req_freq_per_day: u32,
}

impl Default for DevStatusSettings {
    fn default() -> Self {
        Self { req_freq_per_day: 0 }
    }
}

/// Root configuration tree for one network-server pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkServerConfig {
    pub network_settings: NetworkSettings,
    pub scheduler: SchedulerSettings,
    pub dev_status: DevStatusSettings,
}

impl Default for NetworkServerConfig {
    fn default() -> Self {
        Self {
            network_settings: NetworkSettings::default(),
            scheduler: SchedulerSettings::default(),
            dev_status: DevStatusSettings::default(),
        }
    }
}
