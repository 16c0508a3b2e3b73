use lorawan_ns::crypto;
use lorawan_ns::phy;
use lorawan_ns::session::types::{
    AesKey, DevAddr, DevEui, DeviceSession, JoinEui, MacVersion,
};
use lorawan_ns::transport::{GatewayRxMetadata, GatewayUplinkFrame, UplinkTxMetadata};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub fn fresh_session(dev_addr: DevAddr, f_cnt_up: u32) -> DeviceSession {
    DeviceSession {
        dev_eui: DevEui::from_bytes([0xAA; 8]),
        join_eui: JoinEui::from_bytes([0; 8]),
        dev_addr,
        mac_version: MacVersion::Lorawan1_0,
        f_nwk_s_int_key: AesKey::from_bytes([0x2b; 16]),
        s_nwk_s_int_key: AesKey::from_bytes([0x2b; 16]),
        nwk_s_enc_key: AesKey::from_bytes([0x2b; 16]),
        app_s_key_envelope: None,
        f_cnt_up,
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

/// Builds a signed uplink PHY frame, optionally carrying FOpts bytes
/// (plaintext, as for a LoRaWAN 1.0.x session) and/or an FPort/payload.
#[allow(clippy::too_many_arguments)]
pub fn build_uplink_frame(
    session: &DeviceSession,
    wire_f_cnt: u16,
    confirmed: bool,
    ack: bool,
    f_opts: &[u8],
    f_port_and_payload: Option<(u8, Vec<u8>)>,
    rssi: i32,
    snr: f32,
) -> GatewayUplinkFrame {
    let mtype_bits: u8 = if confirmed { 0b100 } else { 0b010 };
    let mut msg = vec![mtype_bits << 5];
    let mut addr = *session.dev_addr.as_bytes();
    addr.reverse();
    msg.extend_from_slice(&addr);

    let mut f_ctrl = (f_opts.len() as u8) & 0x0f;
    if ack {
        f_ctrl |= 0x20;
    }
    msg.push(f_ctrl);
    msg.extend_from_slice(&wire_f_cnt.to_le_bytes());
    msg.extend_from_slice(f_opts);

    if let Some((port, payload)) = &f_port_and_payload {
        msg.push(*port);
        msg.extend_from_slice(payload);
    }

    // Tests keep FCnt well under 2^16, so the wire counter is the full counter.
    let full_fcnt = wire_f_cnt as u32;
    let mic = crypto::compute_uplink_mic_1_0(&session.f_nwk_s_int_key, session.dev_addr, full_fcnt, &msg);
    let full = phy::append_mic(msg, mic);

    GatewayUplinkFrame::new(
        full,
        UplinkTxMetadata {
            frequency_hz: 868_100_000,
            dr: 0,
        },
        vec![GatewayRxMetadata {
            gateway_id: [7; 8],
            rssi,
            snr,
            rx_timestamp_micros: 1_000_000,
        }],
    )
}
