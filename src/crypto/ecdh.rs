//! ECDH key exchange for the `BIG`/`BANG` handshake step (spec.md §2:
//! "ECDH (secp256r1 or curve mandated by console type)"). Generalizes the
//! teacher's swappable-authenticator shape (`StaticKeyAuthenticator`,
//! `Ed25519Authenticator` in `session/mod.rs`) into a swappable key
//! exchange, so a future console generation that mandates a different
//! curve only needs a new `KeyExchange` impl.

use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::rand_core::OsRng;
use p256::PublicKey;

use crate::error::{CryptoError, Result};

/// A Diffie-Hellman exchange producing a shared secret from a peer's
/// encoded public key.
pub trait KeyExchange {
    /// This side's public key, to be sent to the peer.
    fn public_key_bytes(&self) -> Vec<u8>;

    /// Complete the exchange against the peer's encoded public key,
    /// consuming `self` since the ephemeral secret must not be reused.
    fn shared_secret(self, peer_public_key: &[u8]) -> Result<Vec<u8>>;
}

/// secp256r1 (NIST P-256) ephemeral ECDH, the default curve for consoles
/// that don't mandate an alternate curve.
pub struct P256KeyExchange {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl P256KeyExchange {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }
}

impl KeyExchange for P256KeyExchange {
    fn public_key_bytes(&self) -> Vec<u8> {
        self.public.to_sec1_bytes().to_vec()
    }

    fn shared_secret(self, peer_public_key: &[u8]) -> Result<Vec<u8>> {
        let peer = PublicKey::from_sec1_bytes(peer_public_key).map_err(|_| CryptoError::BadKey)?;
        let shared = self.secret.diffie_hellman(&peer);
        Ok(shared.raw_secret_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree_on_shared_secret() {
        let a = P256KeyExchange::generate();
        let b = P256KeyExchange::generate();
        let a_pub = a.public_key_bytes();
        let b_pub = b.public_key_bytes();

        let secret_a = a.shared_secret(&b_pub).unwrap();
        let secret_b = b.shared_secret(&a_pub).unwrap();
        assert_eq!(secret_a, secret_b);
    }
}
