//! Stream health snapshot (spec.md §3 "HealthSnapshot", §7: "exposes only
//! a coarse enum: `Ok | Warn | Frozen | Error(reason)`").
//!
//! Generalizes the teacher's `stream::recovery::RecoveryMonitor` +
//! `stream::network::NetworkConditions` pair: feed observed outcomes in,
//! get a coarse status out, with the same enter-on-high-water-mark /
//! clear-on-low-water-mark hysteresis the teacher uses for its
//! `RecoveryStarted`/`RecoveryComplete` transitions, collapsed here onto
//! a consecutive-failure counter instead of a loss-ratio float.

use crate::error::HealthStatus;

/// Consecutive delivery failures (GMAC reject, corrupt frame, retransmit
/// exhaustion) at or above this mark flips the snapshot to `Warn`.
const WARN_THRESHOLD: u32 = 3;

/// Consecutive failures at or above this mark flips to `Frozen` — the
/// stream is technically alive but producing nothing usable.
const FROZEN_THRESHOLD: u32 = 10;

/// A success clears back below `WARN_THRESHOLD` only once consecutive
/// failures have dropped to this low-water mark, so a single lucky frame
/// amid a bad run doesn't flap the status straight back to `Ok`.
const CLEAR_THRESHOLD: u32 = 1;

/// Per-kind received/lost counters (spec.md §3: "per-kind received/lost").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounters {
    pub received: u64,
    pub lost: u64,
}

impl KindCounters {
    fn record_received(&mut self) {
        self.received += 1;
    }

    fn record_lost(&mut self) {
        self.lost += 1;
    }
}

/// Rolling health counters for one `Stream`, plus the derived coarse
/// `HealthStatus`. Owned by the stream's maintenance task; updated
/// synchronously as video/audio units are delivered or declared corrupt
/// (spec.md §5: "health snapshot (atomic swap)" — callers are expected to
/// publish a cheap `Snapshot` copy rather than share this struct directly).
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    consecutive_failures: u32,
    recovered_frames: u64,
    frozen_frames: u64,
    video: KindCounters,
    audio: KindCounters,
    last_error: Option<String>,
}

/// An immutable point-in-time copy (spec.md §3's `HealthSnapshot`),
/// cheap to clone and hand to callers outside the stream's lock.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub recovered_frames: u64,
    pub frozen_frames: u64,
    pub video: KindCounters,
    pub audio: KindCounters,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A video unit reached receivers intact.
    pub fn record_video_delivered(&mut self) {
        self.video.record_received();
        self.clear_failure();
    }

    /// A video unit reached receivers only after FEC reconstruction
    /// (spec.md §4.7: "reconstruction is attempted ... emit unit to
    /// receivers" on success) — counts as delivered, but also tallies as
    /// a recovered frame for observability.
    pub fn record_video_recovered(&mut self) {
        self.video.record_received();
        self.recovered_frames += 1;
        self.clear_failure();
    }

    /// A video frame could not be reconstructed within the bounded wait
    /// (spec.md §4.7: `CorruptFrame`) — observable, not fatal on its own.
    pub fn record_video_corrupt(&mut self) {
        self.video.record_lost();
        self.frozen_frames += 1;
        self.record_failure();
    }

    pub fn record_audio_delivered(&mut self) {
        self.audio.record_received();
        self.clear_failure();
    }

    pub fn record_audio_lost(&mut self) {
        self.audio.record_lost();
        self.record_failure();
    }

    /// A stream-fatal error (spec.md §7: "GMAC invalid, unrecoverable
    /// cipher desync, socket closed") — jumps straight to `Error` and
    /// stays there until the tracker is replaced by a new stream.
    pub fn record_fatal(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
        self.consecutive_failures = FROZEN_THRESHOLD;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    fn clear_failure(&mut self) {
        if self.consecutive_failures <= CLEAR_THRESHOLD {
            self.consecutive_failures = 0;
            self.last_error = None;
        } else {
            self.consecutive_failures -= 1;
        }
    }

    fn status(&self) -> HealthStatus {
        if let Some(reason) = &self.last_error {
            if self.consecutive_failures >= FROZEN_THRESHOLD {
                return HealthStatus::Error(reason.clone());
            }
        }
        if self.consecutive_failures >= FROZEN_THRESHOLD {
            HealthStatus::Frozen
        } else if self.consecutive_failures >= WARN_THRESHOLD {
            HealthStatus::Warn
        } else {
            HealthStatus::Ok
        }
    }

    /// Take an immutable copy for publishing outside the stream's lock.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status(),
            consecutive_failures: self.consecutive_failures,
            recovered_frames: self.recovered_frames,
            frozen_frames: self.frozen_frames,
            video: self.video,
            audio: self.audio,
        }
    }
}
