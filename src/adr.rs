//! # ADR Controller (§4.7)
//!
//! Computes target DR / TX-power index / NbTrans from a device's recent
//! uplink history and emits a `LinkADRReq` when a parameter actually needs
//! to change. Grounded on the teacher crate's gateway-side
//! `wmbus::radio::lora::adr::AdrController` for the margin/hysteresis
//! shape, reworked from a single-ended SF/RSSI controller into the
//! network-server-side DR/TXPower/NbTrans controller §4.7 specifies.

use crate::band::Band;
use crate::mac::commands::{Cid, MacCommand};
use crate::session::types::DeviceSession;

/// Installation margin added on top of the band's demodulation floor
/// before picking a target DR (standard LoRaWAN ADR algorithm constant).
pub const DEFAULT_INSTALLATION_MARGIN_DB: f32 = 10.0;

/// Packet-loss rate below which NbTrans is allowed to step down.
const NB_TRANS_DECREASE_THRESHOLD: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdrTarget {
    pub dr: u8,
    pub tx_power_index: u8,
    pub nb_trans: u8,
}

/// Runs one ADR evaluation pass. Returns `None` if the device's ADR bit is
/// not set, or nothing actually needs to change.
pub fn evaluate(
    session: &DeviceSession,
    band: &dyn Band,
    adr_bit_set: bool,
    margin_db: f32,
) -> Option<AdrTarget> {
    if !adr_bit_set || session.uplink_history.is_empty() {
        return None;
    }

    let best_snr = session
        .uplink_history
        .iter()
        .map(|s| s.snr_max)
        .fold(f32::NEG_INFINITY, f32::max);

    let target_dr = highest_dr_with_margin(band, best_snr, margin_db, session.max_supported_dr);
    let target_tx_power = highest_power_index_with_margin(
        band,
        best_snr,
        margin_db,
        target_dr,
        session.max_supported_tx_power_index,
    );
    let target_nb_trans = target_nb_trans(session);

    if target_dr == session.dr
        && target_tx_power == session.tx_power_index
        && target_nb_trans == session.nb_trans
    {
        return None;
    }

    Some(AdrTarget {
        dr: target_dr,
        tx_power_index: target_tx_power,
        nb_trans: target_nb_trans,
    })
}

/// Highest DR whose demodulation floor still leaves non-negative margin at
/// `best_snr`, capped at the band max and the device's learned max.
fn highest_dr_with_margin(band: &dyn Band, best_snr: f32, margin_db: f32, max_supported_dr: u8) -> u8 {
    let ceiling = band.max_dr().min(max_supported_dr);
    let mut target = 0u8;
    for dr in 0..=ceiling {
        let required = band.required_snr_db(dr) + margin_db;
        if best_snr >= required {
            target = dr;
        }
    }
    target
}

/// Highest (lowest-power) TX-power index such that every recorded sample
/// would still have non-negative margin at the target DR.
fn highest_power_index_with_margin(
    band: &dyn Band,
    best_snr: f32,
    margin_db: f32,
    target_dr: u8,
    max_supported_tx_power_index: u8,
) -> u8 {
    let required = band.required_snr_db(target_dr) + margin_db;
    let headroom_db = best_snr - required;
    // Every power-index step is worth ~2-3 dB on typical SX127x/SX126x
    // tables; EU868's table in 2 dB steps, so one index per 2 dB headroom.
    let steps_down = (headroom_db / 2.0).floor().max(0.0) as u8;
    steps_down.min(max_supported_tx_power_index).min(band.max_tx_power_index())
}

/// Steps NbTrans down when recent packet loss is low, per §4.7.
fn target_nb_trans(session: &DeviceSession) -> u8 {
    if session.uplink_history.len() < 2 {
        return session.nb_trans;
    }
    let loss_rate = estimate_loss_rate(session);
    if loss_rate < NB_TRANS_DECREASE_THRESHOLD && session.nb_trans > 1 {
        session.nb_trans - 1
    } else {
        session.nb_trans
    }
}

/// Rough loss-rate estimate from FCnt gaps across the uplink-history ring.
fn estimate_loss_rate(session: &DeviceSession) -> f32 {
    let samples: Vec<u32> = session.uplink_history.iter().map(|s| s.f_cnt).collect();
    if samples.len() < 2 {
        return 0.0;
    }
    let span = samples.last().unwrap().saturating_sub(samples[0]) as f32 + 1.0;
    let received = samples.len() as f32;
    (1.0 - received / span).max(0.0)
}

/// Builds the `LinkADRReq` for a target, enabling the session's current
/// channel set at the new parameters (§4.7).
pub fn build_link_adr_req(session: &DeviceSession, target: AdrTarget) -> MacCommand {
    let mut ch_mask: u16 = 0;
    for &ch in &session.enabled_uplink_channels {
        if ch < 16 {
            ch_mask |= 1 << ch;
        }
    }
    let dr_tx_power = (target.dr << 4) | (target.tx_power_index & 0x0f);
    let redundancy = target.nb_trans & 0x0f; // ChMaskCntl=0
    let payload = vec![
        dr_tx_power,
        (ch_mask & 0xff) as u8,
        (ch_mask >> 8) as u8,
        redundancy,
    ];
    MacCommand::new(Cid::LinkAdr, payload)
}
