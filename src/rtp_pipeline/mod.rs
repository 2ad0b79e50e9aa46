//! RTP video pipeline (spec.md §4.9): a bounded, backpressured producer
//! sitting between the A/V demux and an opaque WebRTC `RtpSink`. Owns its
//! own worker task and queue (spec.md §3: "the RTP pipeline inside a
//! receiver owns its worker task and bounded channel").
//!
//! The wire-format RTP header is hand-packed the same way
//! `transport::header::PacketHeader` packs the RP datagram header — fixed
//! width, big-endian, no external framing crate — rather than pulling in
//! a standalone `rtp` crate the retrieval pack never exercises directly
//! (see `DESIGN.md`). The bounded-channel/priority/backpressure policy has
//! no teacher counterpart and is modeled as the pure `VideoQueue` decision
//! type in `queue.rs`, mirroring `stream/adaptive.rs`'s split there.

mod nal;
mod queue;
mod timestamp;

pub use nal::{packetize, RtpOutPacket};
pub use queue::{EnqueueOutcome, QueuedFrame, VideoQueue};
pub use timestamp::TimestampManager;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time;
use tracing::{trace, warn};

use crate::config::Codec;

/// Default MTU assumed for fragmentation decisions (spec.md §4.9).
pub const DEFAULT_MTU: usize = 1200;
/// Default negotiated payload types (spec.md §4.9).
pub const PAYLOAD_TYPE_AVC: u8 = 96;
pub const PAYLOAD_TYPE_HEVC: u8 = 97;

/// A 12-byte RTP header (RFC 3550 §5.1), packed the same fixed-width way
/// `transport::header::PacketHeader` packs the RP datagram header.
/// `RtpSink` implementations are free to ignore this and build their own
/// (the real WebRTC/ICE library almost certainly does); it's exposed for
/// callers that want to hand a fully-formed packet to something lower
/// level, and exercised directly by this module's own tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub const LEN: usize = 12;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = 0x80; // version 2, no padding/extension, CC=0
        out[1] = (self.payload_type & 0x7F) | if self.marker { 0x80 } else { 0 };
        out[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        out
    }
}

/// The opaque "RTP sink with keyframe callback" spec.md §1 treats the
/// WebRTC/ICE library as. `send_frame` is the fast path for a NAL that
/// fits in one packet; `send_rtp_raw` is used for FU-A/FU fragments —
/// the adapter picks between them based on NAL size (spec.md §9).
/// Implementations return whether the send succeeded; the pipeline uses
/// the failure rate to drive both its enqueue drop policy and its
/// adaptive send timeout.
#[async_trait]
pub trait RtpSink: Send + Sync {
    async fn send_frame(&self, payload_type: u8, marker: bool, timestamp: u32, payload: &[u8]) -> bool;

    async fn send_rtp_raw(
        &self,
        payload_type: u8,
        marker: bool,
        timestamp: u32,
        sequence_number: u16,
        payload: &[u8],
    ) -> bool;
}

/// Rolling success/failure counters the adaptive send timeout and the
/// queue's failure-rate drop gate both read from.
#[derive(Default)]
struct SendStats {
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl SendStats {
    fn record(&self, ok: bool) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Failure rate over the lifetime of the stream; reset periodically
    /// by the caller so a single bad minute doesn't haunt a long session
    /// (the worker resets every 500 sends, see `run`).
    fn rate(&self) -> f64 {
        let attempts = self.attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return 0.0;
        }
        self.failures.load(Ordering::Relaxed) as f64 / attempts as f64
    }

    fn reset(&self) {
        self.attempts.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }
}

/// Adaptive send timeout/retry budget (spec.md §4.9).
fn timeout_budget(failure_rate: f64) -> (Duration, u32) {
    if failure_rate > 0.30 {
        (Duration::from_millis(200), 2)
    } else if failure_rate > 0.10 {
        (Duration::from_millis(150), 2)
    } else {
        (Duration::from_millis(100), 1)
    }
}

/// Handle shared between the producer (WebRTC adapter's `on_video_packet`)
/// and the single worker task that drains the queue and packetizes.
pub struct VideoPipeline {
    queue: Mutex<VideoQueue>,
    notify: Notify,
    sink: Arc<dyn RtpSink>,
    mtu: usize,
    keyframe_tx: mpsc::UnboundedSender<()>,
    last_keyframe_request: Mutex<Option<Instant>>,
    stats: SendStats,
    running: std::sync::atomic::AtomicBool,
}

impl VideoPipeline {
    /// Builds the pipeline plus the keyframe-request receiver the
    /// session/transport layer should forward into
    /// `RpStream::send_keyframe_request` (spec.md §9: one-way
    /// message-passing channel from receiver back to the transport,
    /// rather than a shared back-reference).
    pub fn new(sink: Arc<dyn RtpSink>, mtu: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (keyframe_tx, keyframe_rx) = mpsc::unbounded_channel();
        let pipeline = Arc::new(Self {
            queue: Mutex::new(VideoQueue::new()),
            notify: Notify::new(),
            sink,
            mtu,
            keyframe_tx,
            last_keyframe_request: Mutex::new(None),
            stats: SendStats::default(),
            running: std::sync::atomic::AtomicBool::new(true),
        });
        (pipeline, keyframe_rx)
    }

    /// Enqueue one assembled frame (producer side, non-blocking). Applies
    /// the spec.md §4.9 admission policy and, if the resulting depth
    /// trips backpressure, requests a keyframe (rate-limited).
    pub fn enqueue(&self, frame: QueuedFrame) {
        let outcome = {
            let mut queue = self.queue.lock();
            let rate = self.stats.rate();
            let outcome = queue.enqueue(frame, rate, || rand::random::<f64>());
            if outcome == EnqueueOutcome::Accepted {
                let now = Instant::now();
                let mut last = self.last_keyframe_request.lock();
                if queue.poll_backpressure(*last, now) {
                    *last = Some(now);
                    let _ = self.keyframe_tx.send(());
                }
            }
            outcome
        };
        if outcome == EnqueueOutcome::Dropped {
            trace!(target: "rp_gateway::rtp_pipeline", "dropped normal video frame under load");
        } else {
            self.notify.notify_one();
        }
    }

    fn batch_size(depth: usize) -> usize {
        if depth >= 20 {
            10
        } else if depth >= 10 {
            5
        } else {
            3
        }
    }

    /// Drive the single reader of the queue until `shutdown` is called
    /// (spec.md §5, role 5: "single reader of the RTP channel; batched
    /// drain"). Intended to run as its own task.
    pub async fn run(self: Arc<Self>, codec: Codec) {
        let mut timestamps = TimestampManager::new(0);
        let mut seq: u16 = 0;
        let payload_type = match codec {
            Codec::Avc => PAYLOAD_TYPE_AVC,
            Codec::Hevc => PAYLOAD_TYPE_HEVC,
        };

        while self.running.load(Ordering::SeqCst) {
            self.notify.notified().await;
            loop {
                let depth = self.queue.lock().len();
                if depth == 0 {
                    break;
                }
                let batch = Self::batch_size(depth);
                let mut drained = Vec::with_capacity(batch);
                {
                    let mut queue = self.queue.lock();
                    for _ in 0..batch {
                        match queue.dequeue() {
                            Some(frame) => drained.push(frame),
                            None => break,
                        }
                    }
                }
                if drained.is_empty() {
                    break;
                }
                for frame in drained {
                    let ts = timestamps.timestamp_for(Instant::now());
                    self.send_frame(payload_type, ts, &mut seq, frame.codec, &frame.annex_b)
                        .await;
                }
                if self.stats.attempts.load(Ordering::Relaxed) >= 500 {
                    self.stats.reset();
                }
            }
        }
    }

    async fn send_frame(&self, payload_type: u8, ts: u32, seq: &mut u16, codec: Codec, annex_b: &[u8]) {
        let packets = packetize(codec, annex_b, self.mtu);
        for packet in packets {
            let sequence_number = *seq;
            *seq = seq.wrapping_add(1);
            let rate = self.stats.rate();
            let (timeout_dur, retries) = timeout_budget(rate);
            let mut ok = false;
            for _ in 0..=retries {
                let attempt = time::timeout(
                    timeout_dur,
                    self.sink.send_rtp_raw(
                        payload_type,
                        packet.marker,
                        ts,
                        sequence_number,
                        &packet.payload,
                    ),
                )
                .await;
                if matches!(attempt, Ok(true)) {
                    ok = true;
                    break;
                }
            }
            self.stats.record(ok);
            if !ok {
                warn!(target: "rp_gateway::rtp_pipeline", sequence_number, "rtp send exhausted retry budget");
            }
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn depth(&self) -> usize {
        self.queue.lock().len()
    }
}
