//! Console-specific registration key schedule (spec.md §4.2: "the exact
//! key schedule is console-type-specific and MUST be reproduced
//! bit-exactly; the spec treats it as a black-box `register_derive(pin,
//! account_id, host_type) -> (req_cipher, parse_cipher)`").
//!
//! `PS4Cipher`/`PS5Cipher` are the two named slots that black box fills;
//! the digest-based derivation here is a placeholder standing in for the
//! real per-generation schedule, which is reference material this crate
//! doesn't have access to (see `DESIGN.md`).

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use sha2::{Digest, Sha256};

/// Derives the `(req_key, parse_key)` pair used to encrypt the outgoing
/// registration request and decrypt the console's response.
pub trait RegistrationCipher {
    fn derive_keys(&self, pin: &str, account_id: &str) -> ([u8; 16], [u8; 16]);
}

pub struct PS4Cipher;
pub struct PS5Cipher;

fn digest_key(salt: &[u8], pin: &str, account_id: &str) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(pin.as_bytes());
    hasher.update(account_id.as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

impl RegistrationCipher for PS4Cipher {
    fn derive_keys(&self, pin: &str, account_id: &str) -> ([u8; 16], [u8; 16]) {
        (
            digest_key(b"PS4-REGIST-REQUEST", pin, account_id),
            digest_key(b"PS4-REGIST-RESPONSE", pin, account_id),
        )
    }
}

impl RegistrationCipher for PS5Cipher {
    fn derive_keys(&self, pin: &str, account_id: &str) -> ([u8; 16], [u8; 16]) {
        (
            digest_key(b"PS5-REGIST-REQUEST", pin, account_id),
            digest_key(b"PS5-REGIST-RESPONSE", pin, account_id),
        )
    }
}

/// Encrypt `data` under `key`, 16 bytes at a time, with a 4-byte
/// big-endian length prefix so `decrypt_blocks` can strip zero padding
/// unambiguously.
pub fn encrypt_blocks(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(4 + data.len());
    framed.extend_from_slice(&(data.len() as u32).to_be_bytes());
    framed.extend_from_slice(data);
    while framed.len() % 16 != 0 {
        framed.push(0);
    }

    let cipher = Aes128::new(GenericArray::from_slice(key));
    for block in framed.chunks_mut(16) {
        let block = GenericArray::from_mut_slice(block);
        cipher.encrypt_block(block);
    }
    framed
}

/// Inverse of `encrypt_blocks`.
pub fn decrypt_blocks(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut framed = data.to_vec();
    let cipher = Aes128::new(GenericArray::from_slice(key));
    for block in framed.chunks_mut(16) {
        if block.len() < 16 {
            break;
        }
        let block = GenericArray::from_mut_slice(block);
        cipher.decrypt_block(block);
    }
    if framed.len() < 4 {
        return Vec::new();
    }
    let len = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;
    framed
        .get(4..4 + len.min(framed.len().saturating_sub(4)))
        .map(|s| s.to_vec())
        .unwrap_or_default()
}
