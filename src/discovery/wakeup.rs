//! Wake-up credential encoding (spec.md §4.1: "encodes the RegistKey via a
//! double hex-decode + big-endian BigInteger stringification as
//! `user-credential`").

use crate::error::{CryptoError, Result};

/// Encode a stored `RegistKey` (itself a hex string) into the
/// `user-credential` value carried on a `WAKEUP` request: hex-decode it,
/// hex-decode the result again, then render those bytes as a big-endian
/// unsigned decimal string.
pub fn encode_user_credential(regist_key_hex: &str) -> Result<String> {
    let once = hex_decode(regist_key_hex)?;
    let ascii = std::str::from_utf8(&once).map_err(|_| CryptoError::BadKey)?;
    let twice = hex_decode(ascii)?;
    Ok(bytes_to_decimal(&twice))
}

fn hex_decode(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return Err(CryptoError::BadKey.into());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| CryptoError::BadKey.into()))
        .collect()
}

/// Render big-endian bytes as a base-10 string, matching Java/C#
/// `BigInteger(bytes).toString()` for a non-negative value.
fn bytes_to_decimal(bytes: &[u8]) -> String {
    let mut digits = bytes.to_vec();
    // strip leading zero bytes, they carry no magnitude
    while digits.len() > 1 && digits[0] == 0 {
        digits.remove(0);
    }
    if digits.iter().all(|&b| b == 0) {
        return "0".to_string();
    }

    let mut decimal = Vec::new();
    while !(digits.len() == 1 && digits[0] == 0) {
        let mut remainder: u32 = 0;
        let mut next = Vec::with_capacity(digits.len());
        for &byte in &digits {
            let acc = (remainder << 8) | byte as u32;
            next.push((acc / 10) as u8);
            remainder = acc % 10;
        }
        // drop leading zero bytes produced by this division step
        while next.len() > 1 && next[0] == 0 {
            next.remove(0);
        }
        decimal.push(b'0' + remainder as u8);
        digits = next;
    }
    decimal.reverse();
    String::from_utf8(decimal).expect("ascii digits")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_hex_decodes_and_stringifies() {
        // "313233" hex-decodes to ascii "123", which hex-decodes to a
        // single byte 0x23 == decimal 35.
        let out = encode_user_credential("313233").unwrap();
        assert_eq!(out, "35");
    }

    #[test]
    fn zero_renders_as_zero() {
        assert_eq!(bytes_to_decimal(&[0, 0]), "0");
    }

    #[test]
    fn matches_known_big_endian_value() {
        // 0x01 0x00 == 256
        assert_eq!(bytes_to_decimal(&[0x01, 0x00]), "256");
    }
}
