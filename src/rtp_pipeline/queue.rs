//! The bounded video queue's enqueue/backpressure policy (spec.md §4.9),
//! kept as a pure decision type with no socket/channel ownership of its
//! own — the same "pure decision function separate from the I/O loop"
//! split `demux::FrameAssembler` and `feedback::FeedbackSender` already
//! use in this crate.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::Codec;

/// Channel capacity (spec.md §4.9: "capacity 40 frames ≈ 0.67s @ 60fps").
pub const CAPACITY: usize = 40;
/// Below this pending depth, normal frames are always accepted.
pub const DROP_FLOOR: usize = 35;
/// At or above this pending depth, normal frames are always dropped.
pub const DROP_CEIL: usize = 38;
/// An IDR enqueue clears normal entries older than this many newest ones.
pub const IDR_KEEP_NEWEST: usize = 5;
/// Queue depth above which backpressure kicks in.
pub const BACKPRESSURE_DEPTH: usize = 30;
/// Backpressure trims normal entries down to this many newest ones.
pub const BACKPRESSURE_TRIM_KEEP: usize = 10;
/// Minimum spacing between keyframe requests issued by backpressure.
pub const KEYFRAME_COOLDOWN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub frame_index: u32,
    pub idr: bool,
    pub codec: Codec,
    pub annex_b: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    Dropped,
}

/// Dual-queue-by-priority behavior collapsed onto a single FIFO ordered
/// by arrival (which is already frame-index order by the time frames
/// reach the RTP pipeline, per spec.md §5's channel-ordering guarantee):
/// "priority" here means IDR arrivals aggressively trim stale normal
/// entries rather than jumping the queue.
pub struct VideoQueue {
    entries: VecDeque<QueuedFrame>,
}

impl VideoQueue {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(CAPACITY),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enqueue one frame under the spec.md §4.9 admission policy.
    /// `sample` returns a fresh uniform value in `[0, 1)` for the
    /// probabilistic-drop band; callers pass `rand::random` in
    /// production and a deterministic stub in tests.
    pub fn enqueue(
        &mut self,
        frame: QueuedFrame,
        send_failure_rate: f64,
        sample: impl FnOnce() -> f64,
    ) -> EnqueueOutcome {
        if frame.idr {
            self.clear_normal_older_than_newest(IDR_KEEP_NEWEST);
            self.push_drop_oldest_if_full(frame);
            return EnqueueOutcome::Accepted;
        }

        let pending = self.entries.len();
        if pending >= DROP_CEIL || send_failure_rate > 0.5 {
            return EnqueueOutcome::Dropped;
        }
        if pending >= DROP_FLOOR {
            let span = (DROP_CEIL - DROP_FLOOR) as f64;
            let p = (pending - DROP_FLOOR) as f64 / span;
            if sample() < p {
                return EnqueueOutcome::Dropped;
            }
        }
        self.push_drop_oldest_if_full(frame);
        EnqueueOutcome::Accepted
    }

    fn push_drop_oldest_if_full(&mut self, frame: QueuedFrame) {
        if self.entries.len() >= CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(frame);
    }

    /// Keep only the newest `keep_n` normal (non-IDR) entries, dropping
    /// older normal entries in place; IDR entries are never touched by
    /// this trim (spec.md §4.9: "Enqueue of an IDR clears normal queue
    /// entries older than the newest 5" / backpressure's "newest 10").
    fn clear_normal_older_than_newest(&mut self, keep_n: usize) {
        let normal_count = self.entries.iter().filter(|e| !e.idr).count();
        if normal_count <= keep_n {
            return;
        }
        let mut seen_from_back = 0usize;
        let mut drop_at: Vec<bool> = vec![false; self.entries.len()];
        for (i, entry) in self.entries.iter().enumerate().rev() {
            if !entry.idr {
                if seen_from_back < keep_n {
                    seen_from_back += 1;
                } else {
                    drop_at[i] = true;
                }
            }
        }
        let mut idx = 0;
        self.entries.retain(|_| {
            let keep = !drop_at[idx];
            idx += 1;
            keep
        });
    }

    /// Whether backpressure (spec.md §4.9: "queue depth > 30 triggers a
    /// keyframe request with ≥ 2s cooldown") should fire right now, and
    /// trims the normal backlog if so. Returns `true` exactly when a
    /// keyframe request should be sent.
    pub fn poll_backpressure(&mut self, last_request: Option<Instant>, now: Instant) -> bool {
        if self.entries.len() <= BACKPRESSURE_DEPTH {
            return false;
        }
        self.clear_normal_older_than_newest(BACKPRESSURE_TRIM_KEEP);
        last_request.map_or(true, |t| now.duration_since(t) >= KEYFRAME_COOLDOWN)
    }

    pub fn dequeue(&mut self) -> Option<QueuedFrame> {
        self.entries.pop_front()
    }
}

impl Default for VideoQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(idx: u32, idr: bool) -> QueuedFrame {
        QueuedFrame {
            frame_index: idx,
            idr,
            codec: Codec::Avc,
            annex_b: vec![],
        }
    }

    #[test]
    fn accepts_below_drop_floor() {
        let mut q = VideoQueue::new();
        for i in 0..30 {
            assert_eq!(
                q.enqueue(frame(i, false), 0.0, || 0.99),
                EnqueueOutcome::Accepted
            );
        }
    }

    #[test]
    fn always_drops_at_or_above_ceiling() {
        let mut q = VideoQueue::new();
        for i in 0..DROP_CEIL as u32 {
            q.enqueue(frame(i, false), 0.0, || 0.0);
        }
        assert_eq!(
            q.enqueue(frame(999, false), 0.0, || 0.0),
            EnqueueOutcome::Dropped
        );
    }

    #[test]
    fn high_failure_rate_drops_normal_frames() {
        let mut q = VideoQueue::new();
        assert_eq!(
            q.enqueue(frame(1, false), 0.6, || 0.0),
            EnqueueOutcome::Dropped
        );
    }

    #[test]
    fn idr_clears_older_normal_entries_beyond_newest_five() {
        let mut q = VideoQueue::new();
        for i in 0..10u32 {
            q.enqueue(frame(i, false), 0.0, || 0.0);
        }
        q.enqueue(frame(100, true), 0.0, || 0.0);
        // 5 newest normal entries (indices 5..10) plus the IDR itself.
        assert_eq!(q.len(), IDR_KEEP_NEWEST + 1);
    }

    #[test]
    fn drop_oldest_when_full_at_capacity() {
        let mut q = VideoQueue::new();
        for i in 0..CAPACITY as u32 {
            // keep below the probabilistic band by staying at floor-1 entries;
            // push distinct frame_index values we can check survive.
            q.entries.push_back(frame(i, false));
        }
        q.push_drop_oldest_if_full(frame(9999, false));
        assert_eq!(q.len(), CAPACITY);
        assert_eq!(q.entries.front().unwrap().frame_index, 1);
        assert_eq!(q.entries.back().unwrap().frame_index, 9999);
    }

    #[test]
    fn backpressure_fires_once_then_respects_cooldown() {
        let mut q = VideoQueue::new();
        for i in 0..31u32 {
            q.entries.push_back(frame(i, false));
        }
        let t0 = Instant::now();
        assert!(q.poll_backpressure(None, t0));
        assert!(!q.poll_backpressure(Some(t0), t0 + Duration::from_millis(500)));
        assert!(q.poll_backpressure(Some(t0), t0 + Duration::from_secs(3)));
    }

    #[test]
    fn backpressure_trims_normals_to_newest_ten() {
        let mut q = VideoQueue::new();
        for i in 0..35u32 {
            q.entries.push_back(frame(i, false));
        }
        q.poll_backpressure(None, Instant::now());
        assert_eq!(q.len(), BACKPRESSURE_TRIM_KEEP);
    }
}
