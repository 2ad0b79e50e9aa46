//! Controller feedback sender (spec.md §4.8): a 200 ms state heartbeat
//! plus edge-triggered button/trigger history, each on an independent
//! 16-bit sequence space.
//!
//! Split the same way `demux::FrameAssembler` is: a pure decision type
//! (`FeedbackSender`) that the transport's feedback task drives on each
//! of its two wake sources ("state change" and "200 ms timer" per
//! spec.md §4.8), with no socket or clock ownership of its own — the
//! teacher's `stream/adaptive.rs::decide_next_state` split applied here
//! too.

mod controller_state;
mod history;

pub use controller_state::ControllerState;

use std::time::{Duration, Instant};

/// Heartbeat ceiling: a State record is always emitted at least this
/// often even with no change (spec.md §4.8: "every ≤ 200 ms").
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(200);

/// Rate-limit floor: State emissions are never closer together than
/// this even on rapid motion input (spec.md §4.8: "≥ 8 ms between
/// events").
pub const MIN_STATE_INTERVAL: Duration = Duration::from_millis(8);

/// One outbound feedback message, already sequenced and payload-packed.
/// The caller (transport) is responsible for wrapping it in a packet
/// (`PacketKind::FeedbackState` / `FeedbackHistory`) and sending it.
#[derive(Debug, Clone)]
pub enum FeedbackEvent {
    State { seq: u16, payload: [u8; 28] },
    History { seq: u16, payload: Vec<u8> },
}

pub struct FeedbackSender {
    current: ControllerState,
    last_sent_state: ControllerState,
    last_state_emit: Option<Instant>,
    state_seq: u16,
    history_seq: u16,
}

impl FeedbackSender {
    pub fn new() -> Self {
        Self {
            current: ControllerState::default(),
            last_sent_state: ControllerState::default(),
            last_state_emit: None,
            state_seq: 0,
            history_seq: 0,
        }
    }

    fn next_state_seq(&mut self) -> u16 {
        let seq = self.state_seq;
        self.state_seq = self.state_seq.wrapping_add(1);
        seq
    }

    fn next_history_seq(&mut self) -> u16 {
        let seq = self.history_seq;
        self.history_seq = self.history_seq.wrapping_add(1);
        seq
    }

    /// Wake source 1: the UI reported a new controller snapshot. Button
    /// and trigger edges are reported immediately, independent of the
    /// heartbeat clock (spec.md §4.8: "Feedback History ... only on
    /// button/trigger edges").
    pub fn on_state_changed(&mut self, new_state: ControllerState) -> Option<FeedbackEvent> {
        let edges = history::diff(
            self.current.buttons,
            new_state.buttons,
            self.current.l2,
            new_state.l2,
            self.current.r2,
            new_state.r2,
        );
        self.current = new_state;
        if edges.is_empty() {
            return None;
        }
        let seq = self.next_history_seq();
        Some(FeedbackEvent::History { seq, payload: edges })
    }

    /// Wake source 2: the 200 ms timer fired. Emits a State heartbeat
    /// if due, or earlier than that if the state has drifted from what
    /// was last sent and the 8 ms rate-limit floor has cleared.
    pub fn poll_heartbeat(&mut self, now: Instant) -> Option<FeedbackEvent> {
        let since_last = self.last_state_emit.map(|t| now.duration_since(t));
        let due_for_heartbeat = since_last.map_or(true, |d| d >= HEARTBEAT_INTERVAL);
        let drifted = !self.current.approx_eq(&self.last_sent_state);
        let rate_limit_cleared = since_last.map_or(true, |d| d >= MIN_STATE_INTERVAL);

        if due_for_heartbeat || (drifted && rate_limit_cleared) {
            self.last_state_emit = Some(now);
            self.last_sent_state = self.current.clone();
            let seq = self.next_state_seq();
            Some(FeedbackEvent::State {
                seq,
                payload: self.current.pack(),
            })
        } else {
            None
        }
    }
}

impl Default for FeedbackSender {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_fires_at_200ms_even_without_change() {
        let mut sender = FeedbackSender::new();
        let t0 = Instant::now();
        assert!(sender.poll_heartbeat(t0).is_some()); // first poll always due
        assert!(sender.poll_heartbeat(t0 + Duration::from_millis(50)).is_none());
        assert!(sender
            .poll_heartbeat(t0 + Duration::from_millis(200))
            .is_some());
    }

    #[test]
    fn rapid_motion_is_rate_limited_to_8ms() {
        let mut sender = FeedbackSender::new();
        let t0 = Instant::now();
        sender.poll_heartbeat(t0);
        let mut state = ControllerState::default();
        state.sticks[0] = 100;
        sender.on_state_changed(state.clone());
        assert!(sender.poll_heartbeat(t0 + Duration::from_millis(3)).is_none());
        state.sticks[0] = 200;
        sender.on_state_changed(state);
        assert!(sender.poll_heartbeat(t0 + Duration::from_millis(9)).is_some());
    }

    #[test]
    fn button_press_emits_history_independent_of_heartbeat_clock() {
        let mut sender = FeedbackSender::new();
        let mut state = ControllerState::default();
        state.buttons = 0x0001; // Cross
        let event = sender.on_state_changed(state).unwrap();
        match event {
            FeedbackEvent::History { payload, .. } => assert_eq!(payload, vec![0x80, 0x88, 0xff]),
            other => panic!("expected history event, got {other:?}"),
        }
    }

    #[test]
    fn state_and_history_sequence_numbers_are_independent() {
        let mut sender = FeedbackSender::new();
        let t0 = Instant::now();
        sender.poll_heartbeat(t0);
        sender.poll_heartbeat(t0 + HEARTBEAT_INTERVAL);
        let mut state = ControllerState::default();
        state.buttons = 0x0001;
        let event = sender.on_state_changed(state).unwrap();
        assert!(matches!(event, FeedbackEvent::History { seq: 0, .. }));
    }
}
