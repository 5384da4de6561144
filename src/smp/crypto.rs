//! Cryptographic toolbox for LE legacy pairing
//!
//! Implements the security functions *e*, *c1* and *s1* (Bluetooth Core v5.0, Vol 3, Part H,
//! section 2.2). All values use the numeric convention of the specification, most significant
//! octet first. Frames on the wire are little-endian; use [`u128::from_le_bytes`] on them (see
//! [`frame_value`]) before handing them to these functions.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};

/// Security function *e*: AES-128 encryption of one block
pub fn e(key: u128, plain_text: u128) -> u128 {
    let key_bytes = key.to_be_bytes();
    let cipher = Aes128::new(GenericArray::from_slice(&key_bytes));

    let mut block = plain_text.to_be_bytes();
    cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));

    u128::from_be_bytes(block)
}

/// Confirm value generation function *c1*
///
/// `pres` and `preq` are the 7-octet pairing response/request frames (opcode included),
/// `ia`/`ra` the 48-bit initiator/responder addresses and `iat`/`rat` whether each address is
/// random.
#[allow(clippy::too_many_arguments)]
pub fn c1(tk: u128, r: u128, pres: u128, preq: u128, iat: bool, ia: u64, rat: bool, ra: u64) -> u128 {
    let p1 = c1_p1(pres, preq, iat, rat);
    let p2 = c1_p2(ia, ra);

    e(tk, e(tk, r ^ p1) ^ p2)
}

/// p1 = pres || preq || rat' || iat'
fn c1_p1(pres: u128, preq: u128, iat: bool, rat: bool) -> u128 {
    const FRAME_MASK: u128 = 0xFF_FFFF_FFFF_FFFF;

    let iat_p = u128::from(iat);
    let rat_p = u128::from(rat) << 8;
    let preq_p = (preq & FRAME_MASK) << 16;
    let pres_p = (pres & FRAME_MASK) << 72;

    pres_p | preq_p | rat_p | iat_p
}

/// p2 = padding || ia || ra
fn c1_p2(ia: u64, ra: u64) -> u128 {
    const ADDRESS_MASK: u64 = 0xFFFF_FFFF_FFFF;

    (u128::from(ia & ADDRESS_MASK) << 48) | u128::from(ra & ADDRESS_MASK)
}

/// Short term key generation function *s1*
///
/// r' = r1[63:0] || r2[63:0]. During legacy pairing `r1` is the responder's random and `r2`
/// the initiator's.
pub fn s1(tk: u128, r1: u128, r2: u128) -> u128 {
    const LOW_HALF: u128 = 0xFFFF_FFFF_FFFF_FFFF;

    e(tk, ((r1 & LOW_HALF) << 64) | (r2 & LOW_HALF))
}

/// Mask a key down to the negotiated encryption key size (in octets)
pub fn mask_key(key: u128, key_size: u8) -> u128 {
    if key_size >= 16 {
        key
    } else {
        key & ((1u128 << (u32::from(key_size) * 8)) - 1)
    }
}

/// Numeric value of a little-endian frame or key field
pub fn frame_value(bytes: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    let len = bytes.len().min(16);
    buf[..len].copy_from_slice(&bytes[..len]);
    u128::from_le_bytes(buf)
}
