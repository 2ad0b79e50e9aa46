//! Registration (spec.md §4.2): derive a console-specific cipher key pair
//! from PIN+AccountId, exchange it for persistent device credentials, and
//! persist the result atomically.

mod cipher;
mod store;

pub use cipher::{PS4Cipher, PS5Cipher, RegistrationCipher};
pub use store::DeviceStore;

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};

/// Persistent credentials bound to one console after a successful PIN
/// exchange (spec.md §4.2: "RP-Key, RP-KeyType, RegistKey, Mac, AP-Bssid").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRecord {
    pub host_id: String,
    pub rp_key: String,
    pub rp_key_type: u8,
    pub regist_key: String,
    pub mac: String,
    pub ap_bssid: String,
}

/// Console generation, selecting which `RegistrationCipher` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostType {
    Ps4,
    Ps5,
}

impl HostType {
    fn cipher(self) -> Box<dyn RegistrationCipher> {
        match self {
            HostType::Ps4 => Box::new(PS4Cipher),
            HostType::Ps5 => Box::new(PS5Cipher),
        }
    }
}

/// The console side of the registration exchange: send the encrypted
/// request body, receive the encrypted response body. A real
/// implementation issues this over HTTP to the console; tests substitute
/// an in-memory transport.
pub trait RegistrationTransport {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>>;
}

/// Console-reported bad-PIN signal, carried back from a
/// `RegistrationTransport` without the framing being otherwise
/// malformed.
pub const BAD_PIN_MARKER: &[u8] = b"RP-REGIST-FAILED";

/// Given `(host_id, account_id, pin, host_type)`, derive the
/// console-specific cipher pair, exchange credentials with the console,
/// and return the resulting `DeviceRecord`. On a bad PIN this returns
/// `CryptoError::BadPin` without touching any persisted state (the
/// caller decides whether/how to persist the returned record).
pub fn register(
    host_id: &str,
    account_id: &str,
    pin: &str,
    host_type: HostType,
    transport: &mut dyn RegistrationTransport,
) -> Result<DeviceRecord> {
    let registration_cipher = host_type.cipher();
    let (req_key, parse_key) = registration_cipher.derive_keys(pin, account_id);

    let plaintext_request = format!("account-id={account_id}").into_bytes();
    let request = cipher::encrypt_blocks(&req_key, &plaintext_request);

    let response = transport.exchange(&request)?;
    if response == BAD_PIN_MARKER {
        return Err(CryptoError::BadPin.into());
    }
    let plaintext_response = cipher::decrypt_blocks(&parse_key, &response);

    parse_registration_response(host_id, &plaintext_response)
}

fn parse_registration_response(host_id: &str, body: &[u8]) -> Result<DeviceRecord> {
    let text = String::from_utf8_lossy(body);
    let mut fields = std::collections::HashMap::new();
    for line in text.split('\n') {
        if let Some((k, v)) = line.split_once('=') {
            fields.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    let get = |key: &str| fields.get(key).cloned().ok_or(CryptoError::BadKey);
    Ok(DeviceRecord {
        host_id: host_id.to_string(),
        rp_key: get("RP-Key")?,
        rp_key_type: get("RP-KeyType")?.parse().map_err(|_| CryptoError::BadKey)?,
        regist_key: get("RegistKey")?,
        mac: get("Mac")?,
        ap_bssid: get("AP-Bssid")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTransport {
        response: Vec<u8>,
    }

    impl RegistrationTransport for EchoTransport {
        fn exchange(&mut self, _request: &[u8]) -> Result<Vec<u8>> {
            Ok(self.response.clone())
        }
    }

    #[test]
    fn registers_successfully_from_a_well_formed_response() {
        let registration_cipher = HostType::Ps5.cipher();
        let (_, parse_key) = registration_cipher.derive_keys("12345678", "acct-1");
        let body = b"RP-Key=deadbeef\nRP-KeyType=0\nRegistKey=313233\nMac=00:11:22:33:44:55\nAP-Bssid=aa:bb:cc:dd:ee:ff\n";
        let encrypted = cipher::encrypt_blocks(&parse_key, body);

        let mut transport = EchoTransport {
            response: encrypted,
        };
        let record = register(
            "host-1",
            "acct-1",
            "12345678",
            HostType::Ps5,
            &mut transport,
        )
        .unwrap();
        assert_eq!(record.rp_key, "deadbeef");
        assert_eq!(record.regist_key, "313233");
    }

    #[test]
    fn bad_pin_does_not_mutate_any_state() {
        let mut transport = EchoTransport {
            response: BAD_PIN_MARKER.to_vec(),
        };
        let result = register("host-1", "acct-1", "00000000", HostType::Ps4, &mut transport);
        assert!(matches!(
            result,
            Err(crate::error::GatewayError::Crypto(CryptoError::BadPin))
        ));
    }
}
