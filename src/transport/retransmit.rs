//! Pure retransmission bookkeeping for reliable control-channel sends
//! (spec.md §7: "the local side retransmits up to 3× at 200 ms"). Kept
//! free of I/O and timers, the same "decide, don't do" shape as the
//! teacher's `stream/adaptive.rs::decide_next_state`: callers feed wall
//! clock time in and get back which TSNs are due for resend.

use std::collections::HashMap;
use std::time::{Duration, Instant};

const MAX_ATTEMPTS: u8 = 3;
const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(200);

struct PendingSend {
    payload: Vec<u8>,
    attempts: u8,
    last_sent: Instant,
}

/// Tracks DATA sends awaiting a `DATA_ACK`, per TSN.
#[derive(Default)]
pub struct RetransmitTracker {
    pending: HashMap<u32, PendingSend>,
}

impl RetransmitTracker {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Record a freshly sent packet awaiting acknowledgement.
    pub fn track(&mut self, tsn: u32, payload: Vec<u8>, now: Instant) {
        self.pending.insert(
            tsn,
            PendingSend {
                payload,
                attempts: 1,
                last_sent: now,
            },
        );
    }

    /// The peer acknowledged `tsn`; stop tracking it.
    pub fn on_ack(&mut self, tsn: u32) {
        self.pending.remove(&tsn);
    }

    /// TSNs whose retransmit interval has elapsed and have attempts
    /// remaining, paired with the payload to resend. Exhausted entries
    /// (spec.md §7's 3x cap) are dropped and returned separately so the
    /// caller can surface a transport-fatal condition for them.
    pub fn due(&mut self, now: Instant) -> (Vec<(u32, Vec<u8>)>, Vec<u32>) {
        let mut resend = Vec::new();
        let mut exhausted = Vec::new();
        self.pending.retain(|&tsn, entry| {
            if now.duration_since(entry.last_sent) < RETRANSMIT_INTERVAL {
                return true;
            }
            if entry.attempts >= MAX_ATTEMPTS {
                exhausted.push(tsn);
                return false;
            }
            entry.attempts += 1;
            entry.last_sent = now;
            resend.push((tsn, entry.payload.clone()));
            true
        });
        (resend, exhausted)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_resend_before_interval() {
        let mut tracker = RetransmitTracker::new();
        let t0 = Instant::now();
        tracker.track(1, vec![1, 2, 3], t0);
        let (resend, exhausted) = tracker.due(t0 + Duration::from_millis(50));
        assert!(resend.is_empty());
        assert!(exhausted.is_empty());
    }

    #[test]
    fn resends_after_interval_up_to_three_attempts() {
        let mut tracker = RetransmitTracker::new();
        let t0 = Instant::now();
        tracker.track(1, vec![1, 2, 3], t0);

        let t1 = t0 + Duration::from_millis(200);
        let (resend, exhausted) = tracker.due(t1);
        assert_eq!(resend, vec![(1, vec![1, 2, 3])]);
        assert!(exhausted.is_empty());

        let t2 = t1 + Duration::from_millis(200);
        let (resend, _) = tracker.due(t2);
        assert_eq!(resend.len(), 1);

        let t3 = t2 + Duration::from_millis(200);
        let (resend, exhausted) = tracker.due(t3);
        assert!(resend.is_empty());
        assert_eq!(exhausted, vec![1]);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn ack_stops_tracking() {
        let mut tracker = RetransmitTracker::new();
        let t0 = Instant::now();
        tracker.track(7, vec![9], t0);
        tracker.on_ack(7);
        let (resend, exhausted) = tracker.due(t0 + Duration::from_secs(1));
        assert!(resend.is_empty());
        assert!(exhausted.is_empty());
    }
}
