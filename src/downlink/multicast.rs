//! # Multicast Downlink (SPEC_FULL §4.8)
//!
//! A narrow slice of the Downlink Builder for multicast groups: no
//! per-device queue, no MAC-command allocation, no ACK tracking — a
//! multicast frame is always unconfirmed and carries no MAC commands.
//! Grounded on `internal/downlink/multicast/multicast.go` of the original
//! implementation.

use crate::band::Band;
use crate::crypto::{self, Direction};
use crate::error::NsError;
use crate::phy::{self, DownlinkFields};
use crate::session::types::{AesKey, DevAddr};

/// A multicast group's fixed downlink parameters. Membership/storage is the
/// out-of-scope persistence layer's concern; this module only builds and
/// dispatches one already-resolved queue item.
#[derive(Debug, Clone, Copy)]
pub struct MulticastGroup {
    pub dev_addr: DevAddr,
    pub mc_nwk_s_key: AesKey,
    pub dr: u8,
    pub frequency_hz: u32,
}

#[derive(Debug, Clone)]
pub struct MulticastQueueItem {
    pub f_cnt: u32,
    pub f_port: u8,
    pub frm_payload: Vec<u8>,
}

/// Builds one multicast PHYPayload. `ConfFCnt=0` always, per the original:
/// multicast frames are never confirmed.
pub fn build_multicast_downlink(
    group: &MulticastGroup,
    item: &MulticastQueueItem,
    band: &dyn Band,
) -> Result<Vec<u8>, NsError> {
    let max_payload = band.max_payload_size(group.dr);
    if item.frm_payload.len() > max_payload {
        return Err(NsError::QueueItemTooLarge {
            len: item.frm_payload.len(),
            max: max_payload,
        });
    }

    let mut frm_payload = item.frm_payload.clone();
    crypto::crypt_payload(
        &group.mc_nwk_s_key,
        Direction::Down,
        group.dev_addr,
        item.f_cnt,
        &mut frm_payload,
    );

    let fields = DownlinkFields {
        confirmed: false,
        dev_addr: group.dev_addr,
        adr: false,
        ack: false,
        f_pending: false,
        f_cnt: item.f_cnt,
        f_opts: Vec::new(),
        f_port: Some(item.f_port),
        frm_payload,
    };
    let msg = phy::marshal_downlink_without_mic(&fields);
    let mic = crypto::compute_downlink_mic(
        &group.mc_nwk_s_key,
        group.dev_addr,
        item.f_cnt,
        0,
        false,
        &msg,
    );
    Ok(phy::append_mic(msg, mic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::Eu868Band;

    #[test]
    fn multicast_frame_never_carries_mac_commands() {
        let group = MulticastGroup {
            dev_addr: DevAddr::from_bytes([0xff, 0xff, 0xff, 0x01]),
            mc_nwk_s_key: AesKey::from_bytes([0x22; 16]),
            dr: 0,
            frequency_hz: 869_525_000,
        };
        let item = MulticastQueueItem {
            f_cnt: 0,
            f_port: 10,
            frm_payload: vec![1, 2, 3],
        };
        let phy_payload = build_multicast_downlink(&group, &item, &Eu868Band).unwrap();
        let f_ctrl = phy_payload[5];
        assert_eq!(f_ctrl & 0x0f, 0); // no FOpts
    }

    #[test]
    fn multicast_rejects_oversized_payload() {
        let group = MulticastGroup {
            dev_addr: DevAddr::from_bytes([0xff, 0xff, 0xff, 0x01]),
            mc_nwk_s_key: AesKey::from_bytes([0x22; 16]),
            dr: 0,
            frequency_hz: 869_525_000,
        };
        let item = MulticastQueueItem {
            f_cnt: 0,
            f_port: 10,
            frm_payload: vec![0u8; 100],
        };
        assert!(build_multicast_downlink(&group, &item, &Eu868Band).is_err());
    }
}
