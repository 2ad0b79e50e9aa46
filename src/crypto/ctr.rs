//! AES-CTR keystream used to XOR-encrypt the LaunchSpec JSON before it is
//! base64-encoded into the `BIG` message (spec.md §4.6: "XOR-encrypted
//! with a keystream from a separate session cipher seeded by
//! (handshake_key, session_nonce, counter=0)").

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher as _};
use ctr::Ctr64BE;

type Aes128Ctr = Ctr64BE<Aes128>;

/// XOR `buf` in place with the AES-CTR keystream seeded at counter=0 for
/// `handshake_key` / `session_nonce`.
pub fn apply_keystream(handshake_key: &[u8; 16], session_nonce: &[u8; 12], buf: &mut [u8]) {
    let mut iv = [0u8; 16];
    iv[..12].copy_from_slice(session_nonce);
    let mut cipher = Aes128Ctr::new(handshake_key.into(), &iv.into());
    cipher.apply_keystream(buf);
}
