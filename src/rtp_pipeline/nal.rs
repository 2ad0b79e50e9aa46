//! Annex-B NAL splitting and RTP fragmentation (spec.md §4.9): H.264
//! FU-A (RFC 6184 §5.8) and HEVC FU type 49 (RFC 7798 §4.4.3), plus the
//! single-packet fast path for NALs that already fit under the MTU.
//!
//! Reuses `demux::iter_annex_b_nals` rather than re-parsing start codes
//! a second time — the same Annex-B splitter the FEC/IDR-detection path
//! already relies on.

use crate::config::Codec;
use crate::demux::iter_annex_b_nals;

/// One RTP payload ready to hand to `RtpSink::send_rtp_raw`, with the
/// marker bit already resolved (spec.md §4.9: "Mark RTP M-bit on the
/// last fragment of the last NAL of a frame").
#[derive(Debug, Clone)]
pub struct RtpOutPacket {
    pub marker: bool,
    pub payload: Vec<u8>,
}

/// H.264 FU-A indicator/header type (RFC 6184).
const H264_FU_A: u8 = 28;
/// HEVC FU NAL unit type (RFC 7798 §4.4.3).
const HEVC_FU_TYPE: u8 = 49;

/// Split one reassembled Annex-B video unit into RTP payloads, applying
/// FU-A/FU fragmentation to any NAL larger than `mtu - 14` (spec.md
/// §4.9: "NAL larger than MTU−14 (MTU default 1200)").
pub fn packetize(codec: Codec, annex_b: &[u8], mtu: usize) -> Vec<RtpOutPacket> {
    let nals: Vec<&[u8]> = iter_annex_b_nals(annex_b).filter(|n| !n.is_empty()).collect();
    let max_single = mtu.saturating_sub(14);
    let mut out = Vec::new();
    let last_nal_idx = nals.len().saturating_sub(1);

    for (i, nal) in nals.iter().enumerate() {
        let is_last_nal = i == last_nal_idx;
        if nal.len() <= max_single {
            out.push(RtpOutPacket {
                marker: is_last_nal,
                payload: nal.to_vec(),
            });
            continue;
        }
        let fragments = match codec {
            Codec::Avc => fragment_h264(nal, max_single),
            Codec::Hevc => fragment_hevc(nal, max_single),
        };
        let last_frag_idx = fragments.len().saturating_sub(1);
        for (j, frag) in fragments.into_iter().enumerate() {
            out.push(RtpOutPacket {
                marker: is_last_nal && j == last_frag_idx,
                payload: frag,
            });
        }
    }
    out
}

/// RFC 6184 FU-A fragmentation. `nal` includes the original 1-byte NAL
/// header; `max_fragment_payload` bounds each fragment's NAL-payload
/// slice (the 2-byte FU indicator+header are added on top).
fn fragment_h264(nal: &[u8], max_fragment_payload: usize) -> Vec<Vec<u8>> {
    if nal.is_empty() || max_fragment_payload == 0 {
        return Vec::new();
    }
    let header = nal[0];
    let nal_type = header & 0x1F;
    let fu_indicator = (header & 0xE0) | H264_FU_A;
    let payload = &nal[1..];
    let total = payload.len();

    let mut fragments = Vec::new();
    let mut offset = 0;
    while offset < total {
        let end = (offset + max_fragment_payload).min(total);
        let chunk = &payload[offset..end];
        let mut fu_header = nal_type;
        if offset == 0 {
            fu_header |= 0x80; // S bit
        }
        if end == total {
            fu_header |= 0x40; // E bit
        }
        let mut frag = Vec::with_capacity(2 + chunk.len());
        frag.push(fu_indicator);
        frag.push(fu_header);
        frag.extend_from_slice(chunk);
        fragments.push(frag);
        offset = end;
    }
    fragments
}

/// RFC 7798 §4.4.3 FU fragmentation. `nal` includes the original 2-byte
/// HEVC NAL header.
fn fragment_hevc(nal: &[u8], max_fragment_payload: usize) -> Vec<Vec<u8>> {
    if nal.len() < 2 || max_fragment_payload == 0 {
        return Vec::new();
    }
    let header0 = nal[0];
    let header1 = nal[1];
    let nal_type = (header0 >> 1) & 0x3F;
    // PayloadHdr keeps the forbidden-zero bit and layer/TID bits, but
    // rewrites the type field to FU (49).
    let payload_hdr0 = (header0 & 0x81) | (HEVC_FU_TYPE << 1);
    let payload = &nal[2..];
    let total = payload.len();

    let mut fragments = Vec::new();
    let mut offset = 0;
    while offset < total {
        let end = (offset + max_fragment_payload).min(total);
        let chunk = &payload[offset..end];
        let mut fu_header = nal_type & 0x3F;
        if offset == 0 {
            fu_header |= 0x80; // S bit
        }
        if end == total {
            fu_header |= 0x40; // E bit
        }
        let mut frag = Vec::with_capacity(3 + chunk.len());
        frag.push(payload_hdr0);
        frag.push(header1);
        frag.push(fu_header);
        frag.extend_from_slice(chunk);
        fragments.push(frag);
        offset = end;
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annex_b_unit(nal: &[u8]) -> Vec<u8> {
        let mut out = vec![0, 0, 0, 1];
        out.extend_from_slice(nal);
        out
    }

    #[test]
    fn nal_at_exact_mtu_boundary_is_a_single_packet() {
        let mtu = 1200;
        let max_single = mtu - 14;
        let nal = vec![0x65u8; max_single]; // header byte + payload, sized to fit exactly
        let unit = annex_b_unit(&nal);
        let packets = packetize(Codec::Avc, &unit, mtu);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].marker);
    }

    #[test]
    fn nal_one_byte_over_boundary_fragments_into_two() {
        let mtu = 1200;
        let max_single = mtu - 14;
        let nal = vec![0x65u8; max_single + 1];
        let unit = annex_b_unit(&nal);
        let packets = packetize(Codec::Avc, &unit, mtu);
        assert_eq!(packets.len(), 2);
    }

    #[test]
    fn fu_a_sets_start_and_end_bits_exactly_once() {
        let mtu = 1200;
        let max_single = mtu - 14;
        let nal_type = 5u8; // IDR slice
        let header = 0x60 | nal_type;
        let mut nal = vec![header];
        nal.extend(vec![0xAAu8; max_single * 3]);
        let fragments = fragment_h264(&nal, max_single);
        assert!(fragments.len() >= 3);
        let start_count = fragments.iter().filter(|f| f[1] & 0x80 != 0).count();
        let end_count = fragments.iter().filter(|f| f[1] & 0x40 != 0).count();
        assert_eq!(start_count, 1);
        assert_eq!(end_count, 1);
        assert!(fragments[0][1] & 0x80 != 0);
        assert!(fragments.last().unwrap()[1] & 0x40 != 0);
    }

    #[test]
    fn hevc_fu_preserves_original_nal_type_in_fu_header() {
        let mtu = 1200;
        let max_single = mtu - 14;
        let nal_type = 19u8; // IDR_W_RADL
        let header0 = nal_type << 1;
        let header1 = 0x01;
        let mut nal = vec![header0, header1];
        nal.extend(vec![0xBBu8; max_single * 2]);
        let fragments = fragment_hevc(&nal, max_single);
        assert_eq!(fragments[0][0] >> 1 & 0x3F, HEVC_FU_TYPE);
        assert_eq!(fragments[0][2] & 0x3F, nal_type);
        assert!(fragments[0][2] & 0x80 != 0);
        assert!(fragments.last().unwrap()[2] & 0x40 != 0);
    }

    #[test]
    fn marker_bit_set_only_on_last_fragment_of_last_nal() {
        let mtu = 1200;
        let max_single = mtu - 14;
        let mut unit = annex_b_unit(&[0x67, 1, 2, 3]); // SPS, small, single packet
        unit.extend_from_slice(&[0, 0, 0, 1]);
        let mut big_nal = vec![0x65u8];
        big_nal.extend(vec![0xCCu8; max_single * 2]);
        unit.extend_from_slice(&big_nal);

        let packets = packetize(Codec::Avc, &unit, mtu);
        let marker_count = packets.iter().filter(|p| p.marker).count();
        assert_eq!(marker_count, 1);
        assert!(packets.last().unwrap().marker);
    }
}
