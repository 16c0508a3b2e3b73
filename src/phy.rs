//! # LoRaWAN PHYPayload Codec
//!
//! Bit-exact marshalling/parsing of the LoRaWAN PHY payload (MHDR, FHDR,
//! FPort, FRMPayload, MIC) for both directions, independent of the session
//! and MAC-command layers that interpret the decoded fields (§6, "Wire
//! formats... bit-exact").

use crate::error::NsError;
use crate::session::types::DevAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    RejoinRequest,
    Proprietary,
}

impl MType {
    fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0b000 => MType::JoinRequest,
            0b001 => MType::JoinAccept,
            0b010 => MType::UnconfirmedDataUp,
            0b011 => MType::UnconfirmedDataDown,
            0b100 => MType::ConfirmedDataUp,
            0b101 => MType::ConfirmedDataDown,
            0b110 => MType::RejoinRequest,
            0b111 => MType::Proprietary,
            _ => return None,
        })
    }

    fn to_bits(self) -> u8 {
        match self {
            MType::JoinRequest => 0b000,
            MType::JoinAccept => 0b001,
            MType::UnconfirmedDataUp => 0b010,
            MType::UnconfirmedDataDown => 0b011,
            MType::ConfirmedDataUp => 0b100,
            MType::ConfirmedDataDown => 0b101,
            MType::RejoinRequest => 0b110,
            MType::Proprietary => 0b111,
        }
    }

    pub fn is_confirmed_up(self) -> bool {
        matches!(self, MType::ConfirmedDataUp)
    }

    pub fn is_data_up(self) -> bool {
        matches!(self, MType::UnconfirmedDataUp | MType::ConfirmedDataUp)
    }
}

/// A data uplink PHY frame, decoded up to (but not including) MIC
/// verification and FOpts/FRMPayload decryption — those require session
/// key material the codec layer does not have.
#[derive(Debug, Clone)]
pub struct ParsedUplink {
    pub mtype: MType,
    pub dev_addr: DevAddr,
    pub adr: bool,
    pub adr_ack_req: bool,
    pub ack: bool,
    pub class_b: bool,
    pub wire_f_cnt: u16,
    /// Still encrypted (1.1+) or plaintext (1.0.x) MAC-command bytes from FHDR.
    pub f_opts: Vec<u8>,
    pub f_port: Option<u8>,
    /// Still encrypted FRMPayload.
    pub frm_payload: Vec<u8>,
    pub mic: [u8; 4],
    /// The full message (MHDR..FRMPayload) with MIC excluded, as MIC'd.
    pub mic_msg: Vec<u8>,
}

pub fn parse_uplink(bytes: &[u8]) -> Result<ParsedUplink, NsError> {
    if bytes.len() < 1 + 7 + 4 {
        return Err(NsError::PhyCodec("uplink frame too short".into()));
    }
    let mhdr = bytes[0];
    let mtype_bits = (mhdr >> 5) & 0b111;
    let mtype = MType::from_bits(mtype_bits)
        .ok_or_else(|| NsError::PhyCodec(format!("invalid mtype bits {mtype_bits:#05b}")))?;
    if !mtype.is_data_up() {
        return Err(NsError::PhyCodec("not a data-up frame".into()));
    }

    let mut dev_addr_bytes = [0u8; 4];
    dev_addr_bytes.copy_from_slice(&bytes[1..5]);
    dev_addr_bytes.reverse(); // wire order is little-endian
    let dev_addr = DevAddr::from_bytes(dev_addr_bytes);

    let f_ctrl = bytes[5];
    let adr = f_ctrl & 0x80 != 0;
    let adr_ack_req = f_ctrl & 0x40 != 0;
    let ack = f_ctrl & 0x20 != 0;
    let class_b = f_ctrl & 0x10 != 0;
    let f_opts_len = (f_ctrl & 0x0f) as usize;

    let wire_f_cnt = u16::from_le_bytes([bytes[6], bytes[7]]);

    let mut cursor = 8;
    if bytes.len() < cursor + f_opts_len {
        return Err(NsError::PhyCodec("f_opts truncated".into()));
    }
    let f_opts = bytes[cursor..cursor + f_opts_len].to_vec();
    cursor += f_opts_len;

    if bytes.len() < cursor + 4 {
        return Err(NsError::PhyCodec("frame too short for MIC".into()));
    }
    let mic_msg = bytes[..bytes.len() - 4].to_vec();
    let mut mic = [0u8; 4];
    mic.copy_from_slice(&bytes[bytes.len() - 4..]);

    let (f_port, frm_payload) = if cursor == bytes.len() - 4 {
        (None, Vec::new())
    } else {
        let f_port = bytes[cursor];
        let frm_payload = bytes[cursor + 1..bytes.len() - 4].to_vec();
        (Some(f_port), frm_payload)
    };

    Ok(ParsedUplink {
        mtype,
        dev_addr,
        adr,
        adr_ack_req,
        ack,
        class_b,
        wire_f_cnt,
        f_opts,
        f_port,
        frm_payload,
        mic,
        mic_msg,
    })
}

/// Inputs needed to build a downlink PHYPayload minus its MIC (computed by
/// the caller, which holds the session keys the codec does not).
#[derive(Debug, Clone)]
pub struct DownlinkFields {
    pub confirmed: bool,
    pub dev_addr: DevAddr,
    pub adr: bool,
    pub ack: bool,
    pub f_pending: bool,
    pub f_cnt: u32,
    pub f_opts: Vec<u8>,
    pub f_port: Option<u8>,
    pub frm_payload: Vec<u8>,
}

/// Serializes everything but the trailing MIC; callers append the 4-byte
/// MIC computed with the session's `SNwkSIntKey` (§4.4 step 6).
pub fn marshal_downlink_without_mic(fields: &DownlinkFields) -> Vec<u8> {
    let mtype = if fields.confirmed {
        MType::ConfirmedDataDown
    } else {
        MType::UnconfirmedDataDown
    };
    let mut out = Vec::with_capacity(13 + fields.f_opts.len() + fields.frm_payload.len());
    out.push((mtype.to_bits() << 5) | 0x00);

    let mut addr_bytes = *fields.dev_addr.as_bytes();
    addr_bytes.reverse();
    out.extend_from_slice(&addr_bytes);

    let mut f_ctrl = 0u8;
    if fields.adr {
        f_ctrl |= 0x80;
    }
    if fields.f_pending {
        f_ctrl |= 0x10;
    }
    if fields.ack {
        f_ctrl |= 0x20;
    }
    f_ctrl |= (fields.f_opts.len() as u8) & 0x0f;
    out.push(f_ctrl);

    out.extend_from_slice(&(fields.f_cnt as u16).to_le_bytes());
    out.extend_from_slice(&fields.f_opts);

    if let Some(port) = fields.f_port {
        out.push(port);
        out.extend_from_slice(&fields.frm_payload);
    }

    out
}

pub fn append_mic(mut msg: Vec<u8>, mic: [u8; 4]) -> Vec<u8> {
    msg.extend_from_slice(&mic);
    msg
}

/// Resolves a 16-bit wire frame counter against a 32-bit anchor, returning
/// every candidate full value worth trying a MIC against: the forward-window
/// continuation, and (when relaxed) an explicit counter reset to 0 plus one
/// rollover ahead (§4.2 step 3).
pub fn full_fcnt_candidates(anchor: u32, wire: u16, relaxed: bool) -> Vec<u32> {
    let mut candidates = Vec::new();
    let anchor_hi = anchor & 0xffff_0000;
    let anchor_lo = (anchor & 0xffff) as u16;

    let mut base = anchor_hi | wire as u32;
    if wire < anchor_lo {
        base = base.wrapping_add(0x1_0000);
    }
    candidates.push(base);

    if relaxed {
        candidates.push(wire as u32);
        candidates.push(wire as u32 + 0x1_0000);
    }
    candidates
}
