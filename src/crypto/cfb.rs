//! AES-CFB payload keystream (spec.md §4.4: "payload is transformed with
//! AES-CFB using a key-stream at the current key_pos").
//!
//! CFB is a feedback mode, not a self-inverse keystream: the ciphertext
//! of block *n* feeds the keystream for block *n+1*, so encrypting and
//! decrypting are genuinely different operations once the payload spans
//! more than one AES block (the 28-byte FeedbackState record is two).
//! `Encryptor`/`Decryptor` therefore aren't interchangeable the way a
//! CTR/OFB keystream would be — `seal` always runs `Encryptor::encrypt`,
//! `open` always runs `Decryptor::decrypt`.

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use cfb_mode::{Decryptor, Encryptor};

/// Encrypt `buf` in place with AES-CFB for `key` / `nonce` (sender side).
pub fn encrypt(key: &[u8; 16], nonce: &[u8; 12], buf: &mut [u8]) {
    let mut iv = [0u8; 16];
    iv[..12].copy_from_slice(nonce);
    Encryptor::<Aes128>::new(key.into(), &iv.into()).encrypt(buf);
}

/// Decrypt `buf` in place with AES-CFB for `key` / `nonce` (receiver side).
pub fn decrypt(key: &[u8; 16], nonce: &[u8; 12], buf: &mut [u8]) {
    let mut iv = [0u8; 16];
    iv[..12].copy_from_slice(nonce);
    Decryptor::<Aes128>::new(key.into(), &iv.into()).decrypt(buf);
}
