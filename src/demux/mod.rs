//! A/V demux & FEC (spec.md §4.7): per-frame fragment accumulation,
//! Reed-Solomon recovery, IDR detection, and corruption reporting.
//!
//! Modeled as a pure `FrameAssembler` that takes fragments and a wall
//! clock in, and gives back events out — the same "pure decision
//! function separate from the I/O loop" discipline the teacher applies
//! in `stream/adaptive.rs::decide_next_state`, so the channel worker
//! that owns the actual socket/timer plumbing (spec.md §5: "Demux
//! workers per channel ... deliver assembled units to receivers
//! synchronously in order") stays a thin wrapper around this.

mod fec;
mod fragment;
mod receiver;

pub use fec::{is_idr, iter_annex_b_nals};
pub use fragment::Fragment;
pub use receiver::{AvReceiver, StreamInfoHeader};

use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime};

use crate::config::Codec;

/// Maximum time a frame assembler waits for enough shards before giving
/// up (spec.md §4.7: "bounded wait (≤ 40 ms)").
pub const MAX_FRAME_WAIT: Duration = Duration::from_millis(40);

/// One fully assembled video unit, ready for receivers (spec.md §3).
#[derive(Debug, Clone)]
pub struct VideoUnit {
    pub frame_index: u32,
    pub idr: bool,
    pub codec: Codec,
    pub annex_b: Vec<u8>,
    pub captured_at: SystemTime,
}

/// One fully assembled audio unit.
#[derive(Debug, Clone)]
pub struct AudioUnit {
    pub frame_index: u32,
    pub bytes: Vec<u8>,
    pub captured_at: SystemTime,
}

/// What the video channel assembler emits for a given input.
#[derive(Debug, Clone)]
pub enum VideoDemuxEvent {
    Unit(VideoUnit),
    /// Unrecoverable frame; carries the byte-offset span of the gap in
    /// the reconstructed buffer the caller should report to the console
    /// (spec.md §4.7, §6.3: `CORRUPTFRAME` on channel 2).
    CorruptFrame { start: u32, end: u32 },
}

struct PendingFrame {
    total_fragments: u16,
    fec_count: u16,
    shard_len: usize,
    shards: Vec<Option<Vec<u8>>>,
    first_seen: Instant,
}

impl PendingFrame {
    fn new(frag: &Fragment) -> Self {
        Self {
            total_fragments: frag.total_fragments,
            fec_count: frag.fec_count,
            shard_len: frag.bytes.len(),
            shards: vec![None; frag.total_fragments as usize],
            first_seen: Instant::now(),
        }
    }

    fn data_shard_count(&self) -> usize {
        (self.total_fragments - self.fec_count) as usize
    }

    fn data_shards_present(&self) -> usize {
        self.shards[..self.data_shard_count()]
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    fn total_shards_present(&self) -> usize {
        self.shards.iter().filter(|s| s.is_some()).count()
    }

    fn insert(&mut self, frag: Fragment) {
        if let Some(slot) = self.shards.get_mut(frag.fragment_index as usize) {
            let mut bytes = frag.bytes;
            bytes.resize(self.shard_len, 0);
            *slot = Some(bytes);
        }
    }

    fn is_complete(&self) -> bool {
        self.data_shards_present() == self.data_shard_count()
    }

    fn can_reconstruct(&self) -> bool {
        let missing_data = self.data_shard_count() - self.data_shards_present();
        missing_data > 0
            && missing_data <= self.fec_count as usize
            && self.total_shards_present() >= self.data_shard_count()
    }

    fn assemble_data_shards(&self) -> Vec<Vec<u8>> {
        self.shards[..self.data_shard_count()]
            .iter()
            .map(|s| s.clone().unwrap_or_default())
            .collect()
    }

    fn reconstruct(&self) -> Option<Vec<Vec<u8>>> {
        fec::reconstruct(
            self.shards.clone(),
            self.data_shard_count(),
            self.fec_count as usize,
        )
    }
}

/// Per-channel frame reassembler. One instance per (session, channel).
pub struct FrameAssembler {
    codec: Codec,
    last_delivered: Option<u32>,
    pending: BTreeMap<u32, PendingFrame>,
}

impl FrameAssembler {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            last_delivered: None,
            pending: BTreeMap::new(),
        }
    }

    /// Feed one fragment in. May immediately complete a frame (returns
    /// an event); otherwise buffers and returns `None` until enough
    /// shards arrive or `expire_stale` gives up on it.
    pub fn insert_fragment(&mut self, frag: Fragment) -> Option<VideoDemuxEvent> {
        if let Some(last) = self.last_delivered {
            // Late fragment for an already-delivered frame: discarded
            // per spec.md §4.7's monotone frame_index invariant.
            if frag.frame_index <= last {
                return None;
            }
        }

        let frame_index = frag.frame_index;
        let entry = self
            .pending
            .entry(frame_index)
            .or_insert_with(|| PendingFrame::new(&frag));
        entry.insert(frag);

        if entry.is_complete() {
            let shards = entry.assemble_data_shards();
            self.pending.remove(&frame_index);
            return Some(self.deliver(frame_index, shards));
        }

        if entry.can_reconstruct() {
            if let Some(shards) = entry.reconstruct() {
                self.pending.remove(&frame_index);
                return Some(self.deliver(frame_index, shards));
            }
        }
        None
    }

    fn deliver(&mut self, frame_index: u32, shards: Vec<Vec<u8>>) -> VideoDemuxEvent {
        self.last_delivered = Some(frame_index);
        let annex_b: Vec<u8> = shards.into_iter().flatten().collect();
        let idr = fec::is_idr(self.codec, &annex_b);
        VideoDemuxEvent::Unit(VideoUnit {
            frame_index,
            idr,
            codec: self.codec,
            annex_b,
            captured_at: SystemTime::now(),
        })
    }

    /// Call periodically (or right before a blocking wait) to give up on
    /// frames that have been incomplete for longer than `MAX_FRAME_WAIT`
    /// (spec.md §4.7). Returns one `CorruptFrame` event per frame
    /// dropped, oldest first.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<VideoDemuxEvent> {
        let mut events = Vec::new();
        let stale: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, frame)| now.duration_since(frame.first_seen) > MAX_FRAME_WAIT)
            .map(|(&idx, _)| idx)
            .collect();
        for frame_index in stale {
            if let Some(frame) = self.pending.remove(&frame_index) {
                let present = frame.total_shards_present();
                let start = present.min(frame.shards.len()) as u32;
                events.push(VideoDemuxEvent::CorruptFrame {
                    start: frame_index.saturating_add(start),
                    end: frame_index.saturating_add(frame.shards.len() as u32),
                });
                self.last_delivered = Some(self.last_delivered.unwrap_or(0).max(frame_index));
            }
        }
        events
    }
}

/// Same accumulate-then-emit shape as `FrameAssembler`, without IDR
/// detection or corruption reporting — audio units have no keyframe
/// concept and §4.7's `CorruptFrame` reporting is specified for channel
/// 2 (video) only. An unrecoverable audio frame is simply dropped.
pub struct AudioAssembler {
    pending: BTreeMap<u32, PendingFrame>,
}

impl AudioAssembler {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
        }
    }

    pub fn insert_fragment(&mut self, frag: Fragment) -> Option<AudioUnit> {
        let frame_index = frag.frame_index;
        let entry = self
            .pending
            .entry(frame_index)
            .or_insert_with(|| PendingFrame::new(&frag));
        entry.insert(frag);

        let shards = if entry.is_complete() {
            Some(entry.assemble_data_shards())
        } else if entry.can_reconstruct() {
            entry.reconstruct()
        } else {
            None
        };

        shards.map(|shards| {
            self.pending.remove(&frame_index);
            AudioUnit {
                frame_index,
                bytes: shards.into_iter().flatten().collect(),
                captured_at: SystemTime::now(),
            }
        })
    }

    pub fn expire_stale(&mut self, now: Instant) {
        self.pending
            .retain(|_, frame| now.duration_since(frame.first_seen) <= MAX_FRAME_WAIT);
    }
}

impl Default for AudioAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(frame: u32, idx: u16, total: u16, fec: u16, bytes: Vec<u8>) -> Fragment {
        Fragment {
            frame_index: frame,
            fragment_index: idx,
            total_fragments: total,
            fec_count: fec,
            is_fec: idx >= total - fec,
            bytes,
        }
    }

    #[test]
    fn delivers_once_all_data_shards_present() {
        let mut asm = FrameAssembler::new(Codec::Avc);
        let idr_nal = vec![0, 0, 0, 1, 0x65, 1, 2, 3];
        for (i, chunk) in idr_nal.chunks(2).enumerate() {
            let event = asm.insert_fragment(frag(1, i as u16, 4, 0, chunk.to_vec()));
            if i < 3 {
                assert!(event.is_none());
            } else {
                match event.unwrap() {
                    VideoDemuxEvent::Unit(unit) => {
                        assert_eq!(unit.frame_index, 1);
                        assert!(unit.idr);
                    }
                    other => panic!("unexpected event: {other:?}"),
                }
            }
        }
    }

    #[test]
    fn monotone_frame_index_discards_late_fragments() {
        let mut asm = FrameAssembler::new(Codec::Avc);
        for i in 0..2u16 {
            asm.insert_fragment(frag(1, i, 2, 0, vec![1, 2]));
        }
        assert!(asm.insert_fragment(frag(0, 0, 1, 0, vec![9])).is_none());
    }

    #[test]
    fn expires_incomplete_frame_as_corrupt() {
        let mut asm = FrameAssembler::new(Codec::Avc);
        let t0 = Instant::now();
        asm.insert_fragment(frag(5, 0, 3, 0, vec![1, 2]));
        let events = asm.expire_stale(t0 + Duration::from_millis(41));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], VideoDemuxEvent::CorruptFrame { .. }));
    }
}
