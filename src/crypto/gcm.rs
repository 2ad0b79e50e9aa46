//! AES-128-GCM used in its two packet-envelope modes (spec.md §4.4): full
//! encrypt/tag for payload-encrypted packets, and GMAC-only where the tag
//! authenticates header+payload with no plaintext transform. Both modes
//! reduce to the same primitive here: a GCM tag computed over an empty
//! plaintext with the packet's header+ciphertext as associated data, which
//! is exactly what "GMAC" means in the glossary.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use subtle::ConstantTimeEq;

use crate::error::{CryptoError, Result};

/// Compute the 16-byte GMAC over `header || payload`, with `payload`
/// treated as the associated data (no separate ciphertext is produced:
/// the payload is already ciphertext-or-plaintext by the time it reaches
/// here, per whether the caller set `encrypt_payload`).
pub fn gmac(key: &[u8; 16], nonce: &[u8; 12], header: &[u8], payload: &[u8]) -> Result<[u8; 16]> {
    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce);

    let mut aad = Vec::with_capacity(header.len() + payload.len());
    aad.extend_from_slice(header);
    aad.extend_from_slice(payload);

    let mut empty = Vec::new();
    let tag = cipher
        .encrypt_in_place_detached(nonce, &aad, &mut empty)
        .map_err(|_| CryptoError::BadKey)?;
    let mut out = [0u8; 16];
    out.copy_from_slice(tag.as_slice());
    Ok(out)
}

pub fn tags_equal(a: &[u8; 16], b: &[u8; 16]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gmac_is_deterministic_and_position_sensitive() {
        let key = [7u8; 16];
        let nonce = [3u8; 12];
        let header = [1u8, 2, 3];
        let payload = b"some-ciphertext";
        let a = gmac(&key, &nonce, &header, payload).unwrap();
        let b = gmac(&key, &nonce, &header, payload).unwrap();
        assert!(tags_equal(&a, &b));

        let other_header = [1u8, 2, 4];
        let c = gmac(&key, &nonce, &other_header, payload).unwrap();
        assert!(!tags_equal(&a, &c));
    }
}
