//! # LoRaWAN MIC and Payload Cryptography
//!
//! AES-CMAC message integrity codes and the AES-CTR-like keystream used for
//! FRMPayload (FPort=0) and FOpts (1.1+) encryption, per the LoRaWAN MAC
//! specification. Grounded on the teacher crate's `wmbus::crypto` module for
//! key handling shape, adapted from wM-Bus's CBC/CTR framing to LoRaWAN's
//! block-counter keystream and AES-CMAC MIC construction.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};

use crate::session::types::{AesKey, DevAddr};

/// `DevAddr` is stored MSB-first internally (`DevAddr::as_bytes()`,
/// `Display`), but every AES block LoRaWAN defines (the keystream A-block,
/// the MIC B0/B1 blocks, the Class-B ping-offset block) carries it
/// little-endian — the same byte order it has on the wire. Every block
/// builder in this module must reverse it at this boundary.
fn dev_addr_le(dev_addr: DevAddr) -> [u8; 4] {
    let mut bytes = *dev_addr.as_bytes();
    bytes.reverse();
    bytes
}

/// Direction byte used in the keystream/MIC block construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up = 0,
    Down = 1,
}

/// Encrypts or decrypts FRMPayload (FPort=0) or FOpts (1.1+) in place.
///
/// LoRaWAN's payload "encryption" is a symmetric keystream XOR, so encrypt
/// and decrypt are the same operation. `f_cnt` is the full 32-bit frame
/// counter for the direction in question.
pub fn crypt_payload(
    key: &AesKey,
    dir: Direction,
    dev_addr: DevAddr,
    f_cnt: u32,
    data: &mut [u8],
) {
    let cipher = Aes128::new(GenericArray::from_slice(&key.0));
    let block_count = (data.len() + 15) / 16;

    for i in 0..block_count {
        let mut a_block = [0u8; 16];
        a_block[0] = 0x01;
        a_block[5] = dir as u8;
        a_block[6..10].copy_from_slice(&dev_addr_le(dev_addr));
        a_block[10..14].copy_from_slice(&f_cnt.to_le_bytes());
        a_block[15] = (i + 1) as u8;

        let mut s_block = GenericArray::clone_from_slice(&a_block);
        cipher.encrypt_block(&mut s_block);

        let start = i * 16;
        let end = (start + 16).min(data.len());
        for (b, k) in data[start..end].iter_mut().zip(s_block.iter()) {
            *b ^= k;
        }
    }
}

/// Computes the 4-byte uplink MIC.
///
/// For 1.0.x, `cmac(NwkSKey, B0 | msg)[0..4]` where B0 carries `ConfFCnt=0`
/// implicitly (folded into the message). For 1.1+, the MIC is a two-stage
/// CMAC binding the MIC to the uplink's channel/DR (invariant: "binds
/// identification to cryptographic validity") via `cmac(SNwkSIntKey, B1 |
/// msg)` truncated and XORed in front of `cmac(FNwkSIntKey, B0 | msg)`.
pub fn compute_uplink_mic_1_0(
    f_nwk_s_int_key: &AesKey,
    dev_addr: DevAddr,
    f_cnt: u32,
    msg: &[u8],
) -> [u8; 4] {
    let b0 = mic_block_b0(dev_addr, f_cnt, Direction::Up, msg.len());
    cmac_truncated(&f_nwk_s_int_key.0, &[&b0, msg])
}

#[allow(clippy::too_many_arguments)]
pub fn compute_uplink_mic_1_1(
    f_nwk_s_int_key: &AesKey,
    s_nwk_s_int_key: &AesKey,
    dev_addr: DevAddr,
    f_cnt: u32,
    conf_f_cnt: u16,
    tx_dr: u8,
    tx_ch: u8,
    msg: &[u8],
) -> [u8; 4] {
    let b1 = mic_block_b1(dev_addr, f_cnt, conf_f_cnt, tx_dr, tx_ch, msg.len());
    let cmac_s = cmac_full(&s_nwk_s_int_key.0, &[&b1, msg]);

    let b0 = mic_block_b0(dev_addr, f_cnt, Direction::Up, msg.len());
    let cmac_f = cmac_full(&f_nwk_s_int_key.0, &[&b0, msg]);

    let mut mic = [0u8; 4];
    mic[0..2].copy_from_slice(&cmac_s[0..2]);
    mic[2..4].copy_from_slice(&cmac_f[0..2]);
    mic
}

/// Computes the 4-byte downlink MIC.
///
/// 1.0.x: `cmac(SNwkSIntKey, B0 | msg)[0..4]`. 1.1+ additionally folds in
/// `ConfFCnt` of the most recently received confirmed uplink when the
/// downlink itself is a reply to a confirmed uplink (per §4.4 step 6).
pub fn compute_downlink_mic(
    s_nwk_s_int_key: &AesKey,
    dev_addr: DevAddr,
    f_cnt: u32,
    conf_f_cnt: u16,
    is_1_1_or_later: bool,
    msg: &[u8],
) -> [u8; 4] {
    let conf_fcnt_field = if is_1_1_or_later { conf_f_cnt } else { 0 };
    let b0 = mic_block_b0_down(dev_addr, f_cnt, conf_fcnt_field, msg.len());
    cmac_truncated(&s_nwk_s_int_key.0, &[&b0, msg])
}

fn mic_block_b0(dev_addr: DevAddr, f_cnt: u32, dir: Direction, msg_len: usize) -> [u8; 16] {
    let mut b0 = [0u8; 16];
    b0[0] = 0x49;
    b0[5] = dir as u8;
    b0[6..10].copy_from_slice(&dev_addr_le(dev_addr));
    b0[10..14].copy_from_slice(&f_cnt.to_le_bytes());
    b0[15] = msg_len as u8;
    b0
}

fn mic_block_b0_down(dev_addr: DevAddr, f_cnt: u32, conf_f_cnt: u16, msg_len: usize) -> [u8; 16] {
    let mut b0 = [0u8; 16];
    b0[0] = 0x49;
    b0[1..3].copy_from_slice(&conf_f_cnt.to_le_bytes());
    b0[5] = Direction::Down as u8;
    b0[6..10].copy_from_slice(&dev_addr_le(dev_addr));
    b0[10..14].copy_from_slice(&f_cnt.to_le_bytes());
    b0[15] = msg_len as u8;
    b0
}

fn mic_block_b1(
    dev_addr: DevAddr,
    f_cnt: u32,
    conf_f_cnt: u16,
    tx_dr: u8,
    tx_ch: u8,
    msg_len: usize,
) -> [u8; 16] {
    let mut b1 = [0u8; 16];
    b1[0] = 0x49;
    b1[1..3].copy_from_slice(&conf_f_cnt.to_le_bytes());
    b1[3] = tx_dr;
    b1[4] = tx_ch;
    b1[5] = Direction::Up as u8;
    b1[6..10].copy_from_slice(&dev_addr_le(dev_addr));
    b1[10..14].copy_from_slice(&f_cnt.to_le_bytes());
    b1[15] = msg_len as u8;
    b1
}

fn cmac_full(key: &[u8; 16], parts: &[&[u8]]) -> [u8; 16] {
    let mut mac = Cmac::<Aes128>::new(GenericArray::from_slice(key));
    for part in parts {
        mac.update(part);
    }
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; 16];
    out.copy_from_slice(&tag);
    out
}

fn cmac_truncated(key: &[u8; 16], parts: &[&[u8]]) -> [u8; 4] {
    let full = cmac_full(key, parts);
    let mut out = [0u8; 4];
    out.copy_from_slice(&full[0..4]);
    out
}

/// Class-B ping-offset AES block: encrypts `[beacon_time_LE(4) | devaddr_LE(4)
/// | 0x00 * 8]` with the all-zero key, per §4.6.
pub fn class_b_ping_offset_block(beacon_time_secs: u32, dev_addr: DevAddr) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[0..4].copy_from_slice(&beacon_time_secs.to_le_bytes());
    block[4..8].copy_from_slice(&dev_addr_le(dev_addr));

    let key = [0u8; 16];
    let cipher = Aes128::new(GenericArray::from_slice(&key));
    let mut out = GenericArray::clone_from_slice(&block);
    cipher.encrypt_block(&mut out);

    let mut result = [0u8; 16];
    result.copy_from_slice(&out);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypt_payload_is_involutive() {
        let key = AesKey::from_bytes([0x2b; 16]);
        let dev_addr = DevAddr::from_bytes([0x04, 0x03, 0x02, 0x01]);
        let original = vec![1u8, 2, 3, 4, 5, 6, 7, 8, 9];
        let mut buf = original.clone();

        crypt_payload(&key, Direction::Up, dev_addr, 10, &mut buf);
        assert_ne!(buf, original);
        crypt_payload(&key, Direction::Up, dev_addr, 10, &mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn uplink_mic_1_0_is_deterministic() {
        let key = AesKey::from_bytes([0x00; 16]);
        let dev_addr = DevAddr::from_bytes([0x04, 0x03, 0x02, 0x01]);
        let msg = [0x40, 0x04, 0x03, 0x02, 0x01, 0x00, 0x0a, 0x00, 0x01, 0x02];
        let mic_a = compute_uplink_mic_1_0(&key, dev_addr, 10, &msg);
        let mic_b = compute_uplink_mic_1_0(&key, dev_addr, 10, &msg);
        assert_eq!(mic_a, mic_b);

        let mic_other_fcnt = compute_uplink_mic_1_0(&key, dev_addr, 11, &msg);
        assert_ne!(mic_a, mic_other_fcnt);
    }

    #[test]
    fn class_b_ping_offset_is_deterministic() {
        let dev_addr = DevAddr::from_bytes([0x04, 0x03, 0x02, 0x01]);
        let block_a = class_b_ping_offset_block(128, dev_addr);
        let block_b = class_b_ping_offset_block(128, dev_addr);
        assert_eq!(block_a, block_b);

        let offset = u16::from_le_bytes([block_a[0], block_a[1]]);
        let ping_period = 4096 / 1u32;
        assert!((offset as u32 % ping_period) < ping_period);
    }
}
