//! The fixed RP datagram header (spec.md §6.2): `channel:u8, flags:u8,
//! tsn:u32 big-endian, key_pos:u64 big-endian, gmac:16 bytes`. 30 bytes
//! total; payload follows immediately and runs to the end of the
//! datagram.

use crate::error::{Result, TransportError};

pub const HEADER_LEN: usize = 1 + 1 + 4 + 8 + 16;

pub const FLAG_DATA: u8 = 0b0000_0001;
pub const FLAG_ACK: u8 = 0b0000_0010;
pub const FLAG_RETRANSMIT: u8 = 0b0000_0100;

pub const CHANNEL_CONTROL: u8 = 1;
pub const CHANNEL_VIDEO: u8 = 2;
pub const CHANNEL_AUDIO: u8 = 3;
pub const CHANNEL_STREAMINFO_ACK: u8 = 9;
/// Feedback State packets reuse the RP datagram header with the channel
/// byte doubling as the message type spec.md §6.4 calls "STATE (6)".
pub const CHANNEL_FEEDBACK_STATE: u8 = 6;
/// Feedback History, spec.md §6.4's "HISTORY (7)".
pub const CHANNEL_FEEDBACK_HISTORY: u8 = 7;

/// One RP datagram's fixed prefix, gmac zeroed until `StreamCipher::seal`
/// fills it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub channel: u8,
    pub flags: u8,
    pub tsn: u32,
    pub key_pos: u64,
    pub gmac: [u8; 16],
}

impl PacketHeader {
    pub fn new(channel: u8, flags: u8, tsn: u32, key_pos: u64) -> Self {
        Self {
            channel,
            flags,
            tsn,
            key_pos,
            gmac: [0u8; 16],
        }
    }

    pub fn is_data(&self) -> bool {
        self.flags & FLAG_DATA != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & FLAG_ACK != 0
    }

    pub fn is_retransmit(&self) -> bool {
        self.flags & FLAG_RETRANSMIT != 0
    }

    /// Encode with `gmac` zeroed, the form the GMAC itself authenticates
    /// (spec.md §4.4: "GMAC field zeroed").
    pub fn encode_zeroed(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.channel;
        out[1] = self.flags;
        out[2..6].copy_from_slice(&self.tsn.to_be_bytes());
        out[6..14].copy_from_slice(&self.key_pos.to_be_bytes());
        out
    }

    /// Encode with the live `gmac`, ready to prepend to the wire payload.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = self.encode_zeroed();
        out[14..30].copy_from_slice(&self.gmac);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(TransportError::Io("datagram shorter than header".into()).into());
        }
        let tsn = u32::from_be_bytes(bytes[2..6].try_into().unwrap());
        let key_pos = u64::from_be_bytes(bytes[6..14].try_into().unwrap());
        let mut gmac = [0u8; 16];
        gmac.copy_from_slice(&bytes[14..30]);
        Ok(Self {
            channel: bytes[0],
            flags: bytes[1],
            tsn,
            key_pos,
            gmac,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let mut header = PacketHeader::new(CHANNEL_VIDEO, FLAG_DATA, 42, 1000);
        header.gmac = [7u8; 16];
        let encoded = header.encode();
        assert_eq!(encoded.len(), HEADER_LEN);
        let decoded = PacketHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn zeroed_encoding_clears_gmac_only() {
        let mut header = PacketHeader::new(CHANNEL_CONTROL, FLAG_DATA | FLAG_ACK, 1, 2);
        header.gmac = [9u8; 16];
        let zeroed = header.encode_zeroed();
        assert_eq!(&zeroed[14..30], &[0u8; 16]);
        assert_eq!(zeroed[0], CHANNEL_CONTROL);
        assert_eq!(zeroed[1], FLAG_DATA | FLAG_ACK);
    }

    #[test]
    fn flag_helpers_read_individual_bits() {
        let header = PacketHeader::new(CHANNEL_VIDEO, FLAG_DATA | FLAG_RETRANSMIT, 0, 0);
        assert!(header.is_data());
        assert!(header.is_retransmit());
        assert!(!header.is_ack());
    }

    #[test]
    fn rejects_short_buffers() {
        assert!(PacketHeader::decode(&[0u8; 10]).is_err());
    }
}
