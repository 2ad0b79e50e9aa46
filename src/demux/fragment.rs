//! Wire shape of one video/audio fragment (spec.md §4.7: fragments
//! identified by `(frame_index, fragment_index, total_fragments,
//! fec_count)`).

/// One fragment header plus its shard bytes, as handed to the frame
/// assembler after the transport layer has already decrypted/verified
/// the enclosing packet.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub frame_index: u32,
    pub fragment_index: u16,
    pub total_fragments: u16,
    pub fec_count: u16,
    /// `true` for an FEC (parity) shard, `false` for a data shard.
    pub is_fec: bool,
    pub bytes: Vec<u8>,
}

pub const FRAGMENT_HEADER_LEN: usize = 4 + 2 + 2 + 2 + 1;

impl Fragment {
    /// Decode the small fixed prefix this crate puts in front of every
    /// channel 2/3 packet payload: `frame_index:u32 BE,
    /// fragment_index:u16 BE, total_fragments:u16 BE, fec_count:u16 BE,
    /// is_fec:u8`, followed by the shard bytes.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() < FRAGMENT_HEADER_LEN {
            return None;
        }
        let frame_index = u32::from_be_bytes(payload[0..4].try_into().ok()?);
        let fragment_index = u16::from_be_bytes(payload[4..6].try_into().ok()?);
        let total_fragments = u16::from_be_bytes(payload[6..8].try_into().ok()?);
        let fec_count = u16::from_be_bytes(payload[8..10].try_into().ok()?);
        let is_fec = payload[10] != 0;
        Some(Self {
            frame_index,
            fragment_index,
            total_fragments,
            fec_count,
            is_fec,
            bytes: payload[FRAGMENT_HEADER_LEN..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAGMENT_HEADER_LEN + self.bytes.len());
        out.extend_from_slice(&self.frame_index.to_be_bytes());
        out.extend_from_slice(&self.fragment_index.to_be_bytes());
        out.extend_from_slice(&self.total_fragments.to_be_bytes());
        out.extend_from_slice(&self.fec_count.to_be_bytes());
        out.push(self.is_fec as u8);
        out.extend_from_slice(&self.bytes);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let frag = Fragment {
            frame_index: 7,
            fragment_index: 2,
            total_fragments: 10,
            fec_count: 2,
            is_fec: false,
            bytes: vec![1, 2, 3, 4],
        };
        let encoded = frag.encode();
        let decoded = Fragment::decode(&encoded).unwrap();
        assert_eq!(decoded.frame_index, 7);
        assert_eq!(decoded.bytes, vec![1, 2, 3, 4]);
        assert!(!decoded.is_fec);
    }
}
