//! Cryptographic kernel for the 2W link
//!
//! This module provides the link's security primitives:
//! - Running two-byte checksum over frame data
//! - Initial value (IV) construction; IVs are never transmitted, both sides
//!   rebuild them from frame data and the current challenge
//! - Key wrap for the 1W and 2W key transfer commands
//! - 6-byte keyed MAC used by the challenge/response exchange
//!
//! All operations are pure functions of their inputs. There are no
//! key-dependent branches or table lookups beyond the AES S-boxes.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::config::{Address, AesKey};
use crate::protocol::frame;

/// MAC size in bytes
pub const MAC_SIZE: usize = 6;

/// Challenge size in bytes
pub const CHALLENGE_SIZE: usize = 6;

/// Block size for AES-128
const BLOCK_SIZE: usize = 16;

/// Fixed key-wrap constant baked into every peripheral. Public by design:
/// it only derives IV keystreams, it never authenticates anything.
pub const TRANSFER_KEY: AesKey = [
    0x34, 0xC3, 0x46, 0x7E, 0x8F, 0x7B, 0xD2, 0x4F, 0x6E, 0x6F, 0x97, 0x2C, 0x2F, 0xD7, 0x4B, 0x61,
];

/// IV filler byte for short frame data and the 1W tail
const IV_PAD: u8 = 0x55;

/// Crypto self-check failure, fatal at controller initialization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelfCheckError {
    /// Frame CRC does not reproduce the known-good vector
    Crc,
    /// Key wrap is not self-inverse
    KeyWrap,
    /// MAC is not a pure function of its inputs
    Mac,
}

/// One step of the running frame-data checksum
///
/// Additions with end-around carry folding; the initial state is `(0, 0)`
/// and every frame-data byte is fed through once, in order.
pub fn checksum_step(byte: u8, s1: u8, s2: u8) -> (u8, u8) {
    let t = s1 as u16 + byte as u16;
    let s1 = ((t & 0xFF) + (t >> 8)) as u8;
    let t = s2 as u16 + s1 as u16;
    let s2 = ((t & 0xFF) + (t >> 8)) as u8;
    (s1, s2)
}

/// Checksum over a whole frame-data slice
pub fn checksum(frame_data: &[u8]) -> (u8, u8) {
    let mut state = (0u8, 0u8);
    for &byte in frame_data {
        state = checksum_step(byte, state.0, state.1);
    }
    state
}

/// Build the 16-byte IV shared by key wrap and MAC
///
/// Layout: bytes 0..8 are the first 8 bytes of `frame_data` padded with
/// `0x55`; bytes 8..10 are the checksum over all of `frame_data`; bytes
/// 10..16 are the 6-byte `tail` (the challenge for 2W, the sequence number
/// plus padding for 1W).
pub fn construct_initial_value(frame_data: &[u8], tail: &[u8; CHALLENGE_SIZE]) -> [u8; BLOCK_SIZE] {
    let mut iv = [IV_PAD; BLOCK_SIZE];
    let head = frame_data.len().min(8);
    iv[..head].copy_from_slice(&frame_data[..head]);
    let (s1, s2) = checksum(frame_data);
    iv[8] = s1;
    iv[9] = s2;
    iv[10..].copy_from_slice(tail);
    iv
}

/// Tail for the 1W variants: sequence number then padding
fn sequence_tail(sequence: &[u8; 2]) -> [u8; CHALLENGE_SIZE] {
    [sequence[0], sequence[1], IV_PAD, IV_PAD, IV_PAD, IV_PAD]
}

fn aes_ecb(key: &AesKey, block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = Aes128::new(key.into());
    let mut out = *block;
    cipher.encrypt_block((&mut out).into());
    out
}

/// Wrap a key for the 2W key transfer (CMD 0x32)
///
/// `wrapped = AES_ECB(TRANSFER_KEY, iv) XOR key`; the receiver inverts by
/// XOR with the same keystream block.
pub fn wrap_key_2w(key: &AesKey, challenge: &[u8; CHALLENGE_SIZE], frame_data: &[u8]) -> AesKey {
    let iv = construct_initial_value(frame_data, challenge);
    let stream = aes_ecb(&TRANSFER_KEY, &iv);
    let mut wrapped = [0u8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        wrapped[i] = stream[i] ^ key[i];
    }
    wrapped
}

/// 2W challenge-response MAC
///
/// First 6 bytes of `AES_ECB(key, iv)` where the IV is rebuilt from the
/// frame data of the command being authenticated and the peer's challenge.
pub fn mac_2w(challenge: &[u8; CHALLENGE_SIZE], key: &AesKey, frame_data: &[u8]) -> [u8; MAC_SIZE] {
    let iv = construct_initial_value(frame_data, challenge);
    let block = aes_ecb(key, &iv);
    let mut mac = [0u8; MAC_SIZE];
    mac.copy_from_slice(&block[..MAC_SIZE]);
    mac
}

/// In-place obfuscation of a controller key for the 1W key push (CMD 0x30)
///
/// The IV is the target node's 3-byte address cyclically repeated over the
/// block; the key is XORed with `AES_ECB(TRANSFER_KEY, iv)`.
pub fn wrap_key_1w(node_address: &Address, key: &mut AesKey) {
    let mut iv = [0u8; BLOCK_SIZE];
    for (i, byte) in iv.iter_mut().enumerate() {
        *byte = node_address[i % node_address.len()];
    }
    let stream = aes_ecb(&TRANSFER_KEY, &iv);
    for i in 0..BLOCK_SIZE {
        key[i] ^= stream[i];
    }
}

/// 1W analogue of [`mac_2w`], keyed by a 2-byte rolling sequence number
pub fn mac_1w(sequence: &[u8; 2], key: &AesKey, frame_data: &[u8]) -> [u8; MAC_SIZE] {
    let iv = construct_initial_value(frame_data, &sequence_tail(sequence));
    let block = aes_ecb(key, &iv);
    let mut mac = [0u8; MAC_SIZE];
    mac.copy_from_slice(&block[..MAC_SIZE]);
    mac
}

/// Startup self-check
///
/// Verifies the CRC against a captured frame, the key wrap against its own
/// inverse, and MAC determinism. Failure here means the build is
/// miscompiled or the constants were corrupted, and is fatal.
pub fn self_check() -> Result<(), SelfCheckError> {
    // Captured 0x31 frame with its on-air CRC
    const KNOWN_FRAME: [u8; 9] = [0x48, 0x00, 0xFE, 0xEF, 0xEE, 0xF0, 0x0F, 0x00, 0x31];
    if frame::compute_crc(&KNOWN_FRAME) != 0x60FB {
        return Err(SelfCheckError::Crc);
    }

    let key: AesKey = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15,
        0x16,
    ];
    let challenge = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];
    let frame_data = [0x31];

    let wrapped = wrap_key_2w(&key, &challenge, &frame_data);
    let iv = construct_initial_value(&frame_data, &challenge);
    let stream = aes_ecb(&TRANSFER_KEY, &iv);
    for i in 0..BLOCK_SIZE {
        if wrapped[i] ^ stream[i] != key[i] {
            return Err(SelfCheckError::KeyWrap);
        }
    }

    if mac_2w(&challenge, &key, &frame_data) != mac_2w(&challenge, &key, &frame_data) {
        return Err(SelfCheckError::Mac);
    }

    Ok(())
}
