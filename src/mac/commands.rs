//! # MAC-Command Codec
//!
//! A tagged-variant `MacCommand` with a `Cid`, replacing the original's
//! dynamic CID dispatch (Design Note 9: "Dynamic MAC-command dispatch
//! becomes a tagged-variant `MACCommand { Cid, Payload }`").

use serde::{Deserialize, Serialize};

/// MAC-command identifier. Named CIDs cover every handler in §4.3; `0x80..`
/// is reserved for proprietary extensions forwarded to the network
/// controller untouched (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cid {
    LinkCheck,
    LinkAdr,
    DutyCycle,
    RxParamSetup,
    DevStatus,
    NewChannel,
    RxTimingSetup,
    TxParamSetup,
    DlChannel,
    RekeyInd,
    AdrParamSetup,
    DeviceTime,
    RejoinParamSetup,
    PingSlotInfo,
    PingSlotChannel,
    BeaconFreq,
    Proprietary(u8),
}

impl Cid {
    pub fn wire_value(self, uplink: bool) -> u8 {
        match self {
            Cid::LinkCheck => 0x02,
            Cid::LinkAdr => 0x03,
            Cid::DutyCycle => 0x04,
            Cid::RxParamSetup => 0x05,
            Cid::DevStatus => 0x06,
            Cid::NewChannel => 0x07,
            Cid::RxTimingSetup => 0x08,
            Cid::TxParamSetup => 0x09,
            Cid::DlChannel => 0x0a,
            Cid::RekeyInd => {
                if uplink {
                    0x0b
                } else {
                    0x0b
                }
            }
            Cid::AdrParamSetup => 0x0c,
            Cid::DeviceTime => 0x0d,
            Cid::RejoinParamSetup => 0x0f,
            Cid::PingSlotInfo => 0x10,
            Cid::PingSlotChannel => 0x11,
            Cid::BeaconFreq => 0x13,
            Cid::Proprietary(v) => v,
        }
    }

    pub fn from_wire(value: u8) -> Cid {
        match value {
            0x02 => Cid::LinkCheck,
            0x03 => Cid::LinkAdr,
            0x04 => Cid::DutyCycle,
            0x05 => Cid::RxParamSetup,
            0x06 => Cid::DevStatus,
            0x07 => Cid::NewChannel,
            0x08 => Cid::RxTimingSetup,
            0x09 => Cid::TxParamSetup,
            0x0a => Cid::DlChannel,
            0x0b => Cid::RekeyInd,
            0x0c => Cid::AdrParamSetup,
            0x0d => Cid::DeviceTime,
            0x10 => Cid::PingSlotInfo,
            0x0f => Cid::RejoinParamSetup,
            0x11 => Cid::PingSlotChannel,
            0x13 => Cid::BeaconFreq,
            other => Cid::Proprietary(other),
        }
    }

    pub fn is_proprietary(self) -> bool {
        matches!(self, Cid::Proprietary(v) if v >= 0x80)
    }
}

/// One decoded MAC command, either a network Req or a device Ans, tagged by
/// CID with its raw payload bytes (beyond the CID byte itself).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacCommand {
    pub cid: Cid,
    pub payload: Vec<u8>,
}

impl MacCommand {
    pub fn new(cid: Cid, payload: Vec<u8>) -> Self {
        Self { cid, payload }
    }

    pub fn wire_len(&self, uplink: bool) -> usize {
        let _ = uplink;
        1 + self.payload.len()
    }

    pub fn encode(&self, uplink: bool, out: &mut Vec<u8>) {
        out.push(self.cid.wire_value(uplink));
        out.extend_from_slice(&self.payload);
    }
}

/// A block of one or more commands sharing one CID, with enough metadata
/// for the pending-command store to distinguish externally injected
/// commands from those the MAC processor generates itself (§3
/// `MACCommandBlock`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacCommandBlock {
    pub cid: Cid,
    pub commands: Vec<MacCommand>,
    pub external: bool,
}

/// Per-CID fixed payload lengths for uplink Ans commands, used to split a
/// decoded FOpts/FRMPayload byte stream into individual commands.
pub fn uplink_payload_len(cid: Cid) -> usize {
    match cid {
        Cid::LinkCheck => 0,
        Cid::LinkAdr => 1,
        Cid::DutyCycle => 0,
        Cid::RxParamSetup => 1,
        Cid::DevStatus => 2,
        Cid::NewChannel => 1,
        Cid::RxTimingSetup => 0,
        Cid::TxParamSetup => 0,
        Cid::DlChannel => 1,
        Cid::RekeyInd => 1,
        Cid::AdrParamSetup => 0,
        Cid::DeviceTime => 5,
        Cid::RejoinParamSetup => 1,
        Cid::PingSlotInfo => 0,
        Cid::PingSlotChannel => 1,
        Cid::BeaconFreq => 1,
        Cid::Proprietary(_) => 0,
    }
}

/// Decodes a contiguous MAC-command byte stream (FOpts or FPort=0
/// FRMPayload, already decrypted) into individual commands, all assumed to
/// be device→network Ans/Req uplink commands.
pub fn decode_uplink_commands(bytes: &[u8]) -> Vec<MacCommand> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let cid = Cid::from_wire(bytes[i]);
        i += 1;
        let len = if cid.is_proprietary() {
            bytes.len() - i
        } else {
            uplink_payload_len(cid)
        };
        let end = (i + len).min(bytes.len());
        out.push(MacCommand::new(cid, bytes[i..end].to_vec()));
        i = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_uplink_commands_splits_link_check_and_dev_status() {
        let bytes = [0x02, 0x06, 0x64, 0x0a];
        let cmds = decode_uplink_commands(&bytes);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].cid, Cid::LinkCheck);
        assert_eq!(cmds[1].cid, Cid::DevStatus);
        assert_eq!(cmds[1].payload, vec![0x64, 0x0a]);
    }

    #[test]
    fn cid_round_trips_through_wire_value() {
        for cid in [Cid::LinkCheck, Cid::LinkAdr, Cid::DevStatus, Cid::NewChannel] {
            let wire = cid.wire_value(false);
            assert_eq!(Cid::from_wire(wire), cid);
        }
    }
}
