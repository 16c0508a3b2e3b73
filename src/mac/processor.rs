//! # MAC Processor (§4.3)
//!
//! One handler per CID: consumes a received Ans (and its matched pending
//! Req, if any), mutates the session, and optionally emits a follow-up
//! Req/Ans or an external notification. Handlers are idempotent: a second
//! Ans for a CID with nothing left pending is a protocol warning, not a
//! state mutation.

use crate::band::Band;
use crate::mac::commands::{Cid, MacCommand, MacCommandBlock};
use crate::session::types::DeviceSession;

/// A notification a handler wants forwarded to the application server or
/// network controller, kept data-only so the processor has no transport
/// dependency (§6 traits are wired up by the pipeline, not here).
#[derive(Debug, Clone, PartialEq)]
pub enum MacNotification {
    DevStatus { battery: u8, margin_db: i8 },
    LinkCheckAnswered { margin_db: u8, gw_count: u8 },
    Proprietary { cid: u8, payload: Vec<u8> },
}

/// Outcome of handling one received Ans/Req against its pending Req.
#[derive(Debug, Default)]
pub struct HandlerOutcome {
    pub notifications: Vec<MacNotification>,
    /// Protocol warning, e.g. an Ans with no matching pending Req.
    pub warning: Option<String>,
}

/// `LinkADRAns` (§4.3): commits DR/TXPower/NbTrans/channel-mask only when
/// every ack bit is set; otherwise narrows `MaxSupportedDR` /
/// `Min/MaxSupportedTXPowerIndex` per the specific nack, preserving the
/// erratum workaround behind a config flag.
pub fn handle_link_adr_ans(
    session: &mut DeviceSession,
    ans_payload: &[u8],
    pending: Option<&MacCommandBlock>,
    rn2483_txpower0_workaround: bool,
) -> HandlerOutcome {
    let mut outcome = HandlerOutcome::default();
    let Some(status) = ans_payload.first().copied() else {
        outcome.warning = Some("LinkADRAns missing status byte".into());
        return outcome;
    };
    let Some(pending) = pending else {
        outcome.warning = Some("LinkADRAns with no matching pending LinkADRReq".into());
        return outcome;
    };
    let Some(req) = pending.commands.first() else {
        outcome.warning = Some("pending LinkADRReq block is empty".into());
        return outcome;
    };
    if req.payload.len() < 4 {
        outcome.warning = Some("pending LinkADRReq payload too short".into());
        return outcome;
    }

    let ch_mask_ack = status & 0x01 != 0;
    let dr_ack = status & 0x02 != 0;
    let power_ack = status & 0x04 != 0;

    let requested_dr = (req.payload[0] >> 4) & 0x0f;
    let requested_tx_power = req.payload[0] & 0x0f;
    let ch_mask = u16::from_le_bytes([req.payload[1], req.payload[2]]);
    let requested_nb_trans = req.payload[3] & 0x0f;

    if ch_mask_ack && dr_ack && power_ack {
        session.dr = requested_dr;
        session.tx_power_index = requested_tx_power;
        session.nb_trans = requested_nb_trans.max(1);
        session.enabled_uplink_channels = (0..16)
            .filter(|i| ch_mask & (1 << i) != 0)
            .collect();
        return outcome;
    }

    if !power_ack {
        if requested_tx_power == 0 && rn2483_txpower0_workaround {
            session.min_supported_tx_power_index = session.min_supported_tx_power_index.max(1);
        } else if requested_tx_power > 0 {
            session.max_supported_tx_power_index = requested_tx_power.saturating_sub(1);
        }
    }
    if !dr_ack && requested_dr > 0 {
        session.max_supported_dr = requested_dr.saturating_sub(1);
    }
    // Channel-mask nack: roll back nothing, leave the old channel set intact.
    outcome
}

/// `LinkCheckReq` answered inline: margin = best uplink SNR minus the
/// demodulation floor for the uplink DR, clamped >= 0 (§4.3).
pub fn handle_link_check_req(session: &DeviceSession, band: &dyn Band, gw_count: u8) -> MacCommand {
    let snr = session.best_recent_snr().unwrap_or(band.required_snr_db(session.dr));
    let floor = band.required_snr_db(session.dr);
    let margin = (snr - floor).max(0.0).round() as u8;
    MacCommand::new(Cid::LinkCheck, vec![margin, gw_count])
}

/// `DevStatusAns` (§4.3): forwarded to the application server when the
/// service profile opts in; decoding is mechanical (battery, margin).
pub fn handle_dev_status_ans(ans_payload: &[u8]) -> Option<MacNotification> {
    if ans_payload.len() < 2 {
        return None;
    }
    let battery = ans_payload[0];
    // Margin is a 6-bit two's complement value, range -32..31.
    let raw = ans_payload[1] & 0x3f;
    let margin_db = if raw & 0x20 != 0 {
        (raw as i8) - 64
    } else {
        raw as i8
    };
    Some(MacNotification::DevStatus { battery, margin_db })
}

/// Commits pending RX-parameter/channel/ping-slot/rejoin settings only when
/// every ack bit in the Ans is positive; discards the pending block
/// otherwise so the old parameters stand (§4.3, the four `*SetupAns` /
/// `*ChannelAns` handlers share this all-or-nothing commit rule).
pub fn all_acks_set(status_byte: u8, ack_bits: u8) -> bool {
    let mask = (1u8 << ack_bits) - 1;
    status_byte & mask == mask
}

/// `RXParamSetupAns` (§4.3): commits `RX1DROffset`/`RX2DR`/`RX2Frequency`
/// from the pending `RXParamSetupReq` only when channel, RX2-DR, and
/// RX1DROffset acks are all set.
pub fn handle_rx_param_setup_ans(
    session: &mut DeviceSession,
    ans_payload: &[u8],
    pending: Option<&MacCommandBlock>,
) -> HandlerOutcome {
    let mut outcome = HandlerOutcome::default();
    let Some(status) = ans_payload.first().copied() else {
        outcome.warning = Some("RXParamSetupAns missing status byte".into());
        return outcome;
    };
    let Some(req) = pending.and_then(|p| p.commands.first()) else {
        outcome.warning = Some("RXParamSetupAns with no matching pending RXParamSetupReq".into());
        return outcome;
    };
    if req.payload.len() < 4 {
        outcome.warning = Some("pending RXParamSetupReq payload too short".into());
        return outcome;
    }
    if all_acks_set(status, 3) {
        session.rx1_dr_offset = (req.payload[0] >> 4) & 0x07;
        session.rx2_dr = req.payload[0] & 0x0f;
        session.rx2_frequency_hz =
            u32::from_le_bytes([req.payload[1], req.payload[2], req.payload[3], 0]) * 100;
    }
    outcome
}

/// `RXTimingSetupAns` (§4.3): commits `RXDelay` from the pending
/// `RXTimingSetupReq`. The device has no way to nack this command, so the
/// Ans carries no status byte; receiving it at all is the ack.
pub fn handle_rx_timing_setup_ans(
    session: &mut DeviceSession,
    pending: Option<&MacCommandBlock>,
) -> HandlerOutcome {
    let mut outcome = HandlerOutcome::default();
    let Some(req) = pending.and_then(|p| p.commands.first()) else {
        outcome.warning = Some("RXTimingSetupAns with no matching pending RXTimingSetupReq".into());
        return outcome;
    };
    let Some(&delay_field) = req.payload.first() else {
        outcome.warning = Some("pending RXTimingSetupReq payload empty".into());
        return outcome;
    };
    session.rx_delay_secs = (delay_field & 0x0f).max(1);
    outcome
}

/// `NewChannelAns` (§4.3): commits the requested extra channel's frequency
/// and DR range, and enables it in the session's channel set, only when
/// both the channel-frequency and data-rate-range acks are set.
pub fn handle_new_channel_ans(
    session: &mut DeviceSession,
    ans_payload: &[u8],
    pending: Option<&MacCommandBlock>,
) -> HandlerOutcome {
    let mut outcome = HandlerOutcome::default();
    let Some(status) = ans_payload.first().copied() else {
        outcome.warning = Some("NewChannelAns missing status byte".into());
        return outcome;
    };
    let Some(req) = pending.and_then(|p| p.commands.first()) else {
        outcome.warning = Some("NewChannelAns with no matching pending NewChannelReq".into());
        return outcome;
    };
    if req.payload.len() < 5 {
        outcome.warning = Some("pending NewChannelReq payload too short".into());
        return outcome;
    }
    if all_acks_set(status, 2) {
        let ch_index = req.payload[0] as usize;
        let frequency_hz =
            u32::from_le_bytes([req.payload[1], req.payload[2], req.payload[3], 0]) * 100;
        let min_dr = req.payload[4] & 0x0f;
        let max_dr = (req.payload[4] >> 4) & 0x0f;
        session.extra_uplink_channels.insert(
            ch_index,
            crate::session::types::ChannelConfig {
                frequency_hz,
                min_dr,
                max_dr,
            },
        );
        session.enabled_uplink_channels.insert(ch_index);
    }
    outcome
}

/// `PingSlotChannelAns` (§4.3): commits the Class-B ping-slot
/// frequency/DR only when both the DR and channel-frequency acks are set.
pub fn handle_ping_slot_channel_ans(
    session: &mut DeviceSession,
    ans_payload: &[u8],
    pending: Option<&MacCommandBlock>,
) -> HandlerOutcome {
    let mut outcome = HandlerOutcome::default();
    let Some(status) = ans_payload.first().copied() else {
        outcome.warning = Some("PingSlotChannelAns missing status byte".into());
        return outcome;
    };
    let Some(req) = pending.and_then(|p| p.commands.first()) else {
        outcome.warning = Some("PingSlotChannelAns with no matching pending PingSlotChannelReq".into());
        return outcome;
    };
    if req.payload.len() < 4 {
        outcome.warning = Some("pending PingSlotChannelReq payload too short".into());
        return outcome;
    }
    if all_acks_set(status, 2) {
        session.ping_slot_frequency_hz =
            u32::from_le_bytes([req.payload[0], req.payload[1], req.payload[2], 0]) * 100;
        session.ping_slot_dr = req.payload[3] & 0x0f;
    }
    outcome
}

/// `RejoinParamSetupAns` (§4.3): commits `MaxTimeN`/`MaxCountN` from the
/// pending `RejoinParamSetupReq` only when the time ack is set (the device
/// cannot nack `MaxCountN`).
pub fn handle_rejoin_param_setup_ans(
    session: &mut DeviceSession,
    ans_payload: &[u8],
    pending: Option<&MacCommandBlock>,
) -> HandlerOutcome {
    let mut outcome = HandlerOutcome::default();
    let Some(status) = ans_payload.first().copied() else {
        outcome.warning = Some("RejoinParamSetupAns missing status byte".into());
        return outcome;
    };
    let Some(req) = pending.and_then(|p| p.commands.first()) else {
        outcome.warning = Some("RejoinParamSetupAns with no matching pending RejoinParamSetupReq".into());
        return outcome;
    };
    let Some(&field) = req.payload.first() else {
        outcome.warning = Some("pending RejoinParamSetupReq payload empty".into());
        return outcome;
    };
    if status & 0x01 != 0 {
        session.rejoin_request_enabled = true;
        session.rejoin_request_max_time_n = (field >> 4) & 0x0f;
        session.rejoin_request_max_count_n = field & 0x0f;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::Eu868Band;
    use crate::session::types::{AesKey, DevAddr, DevEui, JoinEui, MacVersion, UplinkHistorySample};
    use std::collections::{BTreeMap, BTreeSet, VecDeque};

    fn base_session() -> DeviceSession {
        DeviceSession {
            dev_eui: DevEui::from_bytes([1; 8]),
            join_eui: JoinEui::from_bytes([0; 8]),
            dev_addr: DevAddr::from_bytes([1, 2, 3, 4]),
            mac_version: MacVersion::Lorawan1_0,
            f_nwk_s_int_key: AesKey::from_bytes([0; 16]),
            s_nwk_s_int_key: AesKey::from_bytes([0; 16]),
            nwk_s_enc_key: AesKey::from_bytes([0; 16]),
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
            max_supported_tx_power_index: 7,
            beacon_locked: false,
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
    fn link_adr_ans_commits_on_full_ack() {
        let mut session = base_session();
        let req = MacCommand::new(Cid::LinkAdr, vec![0x54, 0x07, 0x00, 0x01]);
        let pending = MacCommandBlock {
            cid: Cid::LinkAdr,
            commands: vec![req],
            external: false,
        };
        handle_link_adr_ans(&mut session, &[0x07], Some(&pending), true);
        assert_eq!(session.dr, 5);
        assert_eq!(session.tx_power_index, 4);
        assert_eq!(session.enabled_uplink_channels, BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn link_adr_ans_power_nack_at_zero_raises_min_tx_power() {
        let mut session = base_session();
        let req = MacCommand::new(Cid::LinkAdr, vec![0x50, 0x07, 0x00, 0x01]);
        let pending = MacCommandBlock {
            cid: Cid::LinkAdr,
            commands: vec![req],
            external: false,
        };
        handle_link_adr_ans(&mut session, &[0x03], Some(&pending), true);
        assert_eq!(session.min_supported_tx_power_index, 1);
        assert_eq!(session.dr, 0); // unchanged, not committed
    }

    #[test]
    fn link_check_margin_is_clamped_non_negative() {
        let mut session = base_session();
        session.dr = 0;
        session.push_uplink_history(UplinkHistorySample {
            snr_max: -25.0,
            dr: 0,
            f_cnt: 1,
            gateway_count: 1,
        });
        let ans = handle_link_check_req(&session, &Eu868Band, 2);
        assert_eq!(ans.payload[0], 0);
        assert_eq!(ans.payload[1], 2);
    }

    #[test]
    fn dev_status_ans_decodes_negative_margin() {
        let notif = handle_dev_status_ans(&[200, 0b0011_1110]).unwrap();
        match notif {
            MacNotification::DevStatus { battery, margin_db } => {
                assert_eq!(battery, 200);
                assert_eq!(margin_db, -2);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rx_param_setup_ans_commits_only_on_full_ack() {
        let freq_bytes = [0x00u8, 0x12, 0x7a]; // raw 8_000_000 -> 800_000_000 Hz
        let mut session = base_session();
        let req = MacCommand::new(
            Cid::RxParamSetup,
            vec![0x31, freq_bytes[0], freq_bytes[1], freq_bytes[2]],
        );
        let pending = MacCommandBlock {
            cid: Cid::RxParamSetup,
            commands: vec![req.clone()],
            external: false,
        };
        handle_rx_param_setup_ans(&mut session, &[0b0000_0111], Some(&pending));
        assert_eq!(session.rx1_dr_offset, 3);
        assert_eq!(session.rx2_dr, 1);
        assert_eq!(session.rx2_frequency_hz, 800_000_000);

        let mut session2 = base_session();
        handle_rx_param_setup_ans(&mut session2, &[0b0000_0011], Some(&pending));
        assert_eq!(session2.rx2_dr, 0); // not committed: RX1DROffset ack missing
    }

    #[test]
    fn rx_timing_setup_ans_always_commits() {
        let mut session = base_session();
        let req = MacCommand::new(Cid::RxTimingSetup, vec![3]);
        let pending = MacCommandBlock {
            cid: Cid::RxTimingSetup,
            commands: vec![req],
            external: false,
        };
        handle_rx_timing_setup_ans(&mut session, Some(&pending));
        assert_eq!(session.rx_delay_secs, 3);
    }

    #[test]
    fn new_channel_ans_requires_both_acks() {
        let freq_bytes = [0x00u8, 0x12, 0x7a]; // raw 8_000_000 -> 800_000_000 Hz
        let mut session = base_session();
        let req = MacCommand::new(
            Cid::NewChannel,
            vec![3, freq_bytes[0], freq_bytes[1], freq_bytes[2], 0x53],
        );
        let pending = MacCommandBlock {
            cid: Cid::NewChannel,
            commands: vec![req.clone()],
            external: false,
        };
        handle_new_channel_ans(&mut session, &[0b11], Some(&pending));
        assert!(session.enabled_uplink_channels.contains(&3));
        assert_eq!(session.extra_uplink_channels[&3].frequency_hz, 800_000_000);

        let mut session2 = base_session();
        handle_new_channel_ans(&mut session2, &[0b01], Some(&pending));
        assert!(!session2.enabled_uplink_channels.contains(&3));
    }

    #[test]
    fn ping_slot_channel_ans_requires_both_acks() {
        let freq_bytes = [0x00u8, 0x12, 0x7a]; // raw 8_000_000 -> 800_000_000 Hz
        let mut session = base_session();
        let req = MacCommand::new(
            Cid::PingSlotChannel,
            vec![freq_bytes[0], freq_bytes[1], freq_bytes[2], 2],
        );
        let pending = MacCommandBlock {
            cid: Cid::PingSlotChannel,
            commands: vec![req],
            external: false,
        };
        handle_ping_slot_channel_ans(&mut session, &[0b11], Some(&pending));
        assert_eq!(session.ping_slot_frequency_hz, 800_000_000);
        assert_eq!(session.ping_slot_dr, 2);
    }

    #[test]
    fn rejoin_param_setup_ans_commits_on_time_ack() {
        let mut session = base_session();
        let req = MacCommand::new(Cid::RejoinParamSetup, vec![0x53]);
        let pending = MacCommandBlock {
            cid: Cid::RejoinParamSetup,
            commands: vec![req],
            external: false,
        };
        handle_rejoin_param_setup_ans(&mut session, &[0x01], Some(&pending));
        assert!(session.rejoin_request_enabled);
        assert_eq!(session.rejoin_request_max_time_n, 5);
        assert_eq!(session.rejoin_request_max_count_n, 3);
    }
}
