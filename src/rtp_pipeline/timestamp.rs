//! 90 kHz RTP timestamp manager (spec.md §4.9): base timestamp advanced by
//! wall-clock elapsed time, plus a rolling FPS estimate used elsewhere for
//! diagnostics (health snapshot, adaptive backpressure tuning).

use std::collections::VecDeque;
use std::time::Instant;

/// RTP clock rate for H.264/HEVC video (spec.md §4.9).
pub const CLOCK_RATE: u32 = 90_000;

const FPS_WINDOW: usize = 30;
const FPS_ALPHA: f64 = 0.3;
const FPS_MIN: f64 = 15.0;
const FPS_MAX: f64 = 120.0;

/// Converts frame arrival instants into 90 kHz RTP timestamps. One
/// instance per video stream; not safe to share handles across the
/// stream's demux/RTP worker boundary, so it lives entirely inside the
/// single RTP pipeline worker task (spec.md §5: "single reader").
pub struct TimestampManager {
    base_ts: u32,
    base_instant: Option<Instant>,
    samples: VecDeque<Instant>,
    fps_estimate: f64,
}

impl TimestampManager {
    pub fn new(base_ts: u32) -> Self {
        Self {
            base_ts,
            base_instant: None,
            samples: VecDeque::with_capacity(FPS_WINDOW),
            fps_estimate: 30.0,
        }
    }

    /// RTP timestamp for a frame arriving at `now`. The base instant is
    /// pinned on the first call; every subsequent timestamp is
    /// `base_ts + floor(elapsed_seconds * 90000)`, taken modulo 2^32 by
    /// the `u32` cast (spec.md §4.9, §8: "wrap handled ... continuous
    /// monotonic RTP timestamps modulo 2^32").
    pub fn timestamp_for(&mut self, now: Instant) -> u32 {
        let base_instant = *self.base_instant.get_or_insert(now);
        let elapsed = now.saturating_duration_since(base_instant);
        let delta = (elapsed.as_secs_f64() * CLOCK_RATE as f64).floor() as u64;
        let ts = (self.base_ts as u64).wrapping_add(delta) as u32;
        if ts > u32::MAX - CLOCK_RATE {
            tracing::trace!(target: "rp_gateway::rtp_pipeline", ts, "timestamp nearing u32 wrap");
        }
        self.record_sample(now);
        ts
    }

    fn record_sample(&mut self, now: Instant) {
        self.samples.push_back(now);
        while self.samples.len() > FPS_WINDOW {
            self.samples.pop_front();
        }
        if self.samples.len() >= 2 {
            let span = self
                .samples
                .back()
                .unwrap()
                .saturating_duration_since(*self.samples.front().unwrap());
            let secs = span.as_secs_f64();
            if secs > 0.0 {
                let instantaneous = (self.samples.len() - 1) as f64 / secs;
                let bounded = instantaneous.clamp(FPS_MIN, FPS_MAX);
                self.fps_estimate = FPS_ALPHA * bounded + (1.0 - FPS_ALPHA) * self.fps_estimate;
            }
        }
    }

    /// Rolling 30-sample FPS estimate, smoothed with α=0.3 and bounded to
    /// `[15, 120]` (spec.md §4.9).
    pub fn fps_estimate(&self) -> f64 {
        self.fps_estimate.clamp(FPS_MIN, FPS_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn advances_by_elapsed_time_scaled_to_clock_rate() {
        let mut mgr = TimestampManager::new(0);
        let t0 = Instant::now();
        let first = mgr.timestamp_for(t0);
        assert_eq!(first, 0);
        let second = mgr.timestamp_for(t0 + Duration::from_millis(1000 / 60));
        // ~1/60s at 90kHz is 1500 ticks.
        assert!((1400..1600).contains(&second));
    }

    #[test]
    fn wraps_modulo_2_32() {
        let mut mgr = TimestampManager::new(u32::MAX - 1000);
        let t0 = Instant::now();
        mgr.timestamp_for(t0);
        // 1000 ticks at 90kHz is ~11.1ms; push well past the wrap point.
        let wrapped = mgr.timestamp_for(t0 + Duration::from_millis(20));
        assert!(wrapped < 1000);
    }

    #[test]
    fn fps_estimate_stays_within_bounds() {
        let mut mgr = TimestampManager::new(0);
        let t0 = Instant::now();
        for i in 0..40u32 {
            mgr.timestamp_for(t0 + Duration::from_millis(i as u64 * 1));
        }
        let fps = mgr.fps_estimate();
        assert!((FPS_MIN..=FPS_MAX).contains(&fps));
    }
}
