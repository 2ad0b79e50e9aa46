//! The `RemoteSession` lifecycle state machine (spec.md §4.3: "Created →
//! Connecting → Streaming → Stopping → Stopped"). Generalizes the
//! teacher's `SessionState` (`session/mod.rs`: `Init → Handshake →
//! Authenticated → Ready → Streaming → Closed/Failed`) to the shorter RP
//! lifecycle, keeping the same "pure transition guard, no I/O" shape.

use std::time::SystemTime;

use crate::error::{GatewayError, HandshakeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycle {
    Created,
    Connecting,
    Streaming,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub enum SessionState {
    Created { since: SystemTime },
    Connecting { since: SystemTime },
    Streaming { since: SystemTime },
    Stopping { since: SystemTime },
    Stopped { since: SystemTime },
    Failed { reason: String, since: SystemTime },
}

impl SessionState {
    pub fn new() -> Self {
        SessionState::Created {
            since: SystemTime::now(),
        }
    }

    pub fn lifecycle(&self) -> SessionLifecycle {
        match self {
            SessionState::Created { .. } => SessionLifecycle::Created,
            SessionState::Connecting { .. } => SessionLifecycle::Connecting,
            SessionState::Streaming { .. } => SessionLifecycle::Streaming,
            SessionState::Stopping { .. } => SessionLifecycle::Stopping,
            SessionState::Stopped { .. } | SessionState::Failed { .. } => SessionLifecycle::Stopped,
        }
    }

    /// Attempt to move to `to`. Only forward transitions in the
    /// Created → Connecting → Streaming → Stopping → Stopped order are
    /// allowed, plus Stopping/Stopped reachable from any non-terminal
    /// state (disconnect can happen at any point, spec.md §4.5's
    /// "Disconnect ... → transition to Stopping").
    pub fn transition(&self, to: SessionLifecycle) -> Result<Self> {
        let now = SystemTime::now();
        let current = self.lifecycle();
        let allowed = match (current, to) {
            (SessionLifecycle::Created, SessionLifecycle::Connecting) => true,
            (SessionLifecycle::Connecting, SessionLifecycle::Streaming) => true,
            (SessionLifecycle::Streaming, SessionLifecycle::Stopping) => true,
            (SessionLifecycle::Stopping, SessionLifecycle::Stopped) => true,
            (_, SessionLifecycle::Stopping) if current != SessionLifecycle::Stopped => true,
            _ => false,
        };
        if !allowed {
            return Err(GatewayError::Handshake(HandshakeError::BadState(format!(
                "{current:?} -> {to:?}"
            ))));
        }
        Ok(match to {
            SessionLifecycle::Created => SessionState::Created { since: now },
            SessionLifecycle::Connecting => SessionState::Connecting { since: now },
            SessionLifecycle::Streaming => SessionState::Streaming { since: now },
            SessionLifecycle::Stopping => SessionState::Stopping { since: now },
            SessionLifecycle::Stopped => SessionState::Stopped { since: now },
        })
    }

    /// Force a terminal `Failed` state (spec.md §7: HandshakeTimeout,
    /// CryptoFailure and similar fatal errors), bypassing the normal
    /// forward-only transition guard.
    pub fn fail(&self, reason: String) -> Self {
        SessionState::Failed {
            reason,
            since: SystemTime::now(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_in_order() {
        let s = SessionState::new();
        let s = s.transition(SessionLifecycle::Connecting).unwrap();
        let s = s.transition(SessionLifecycle::Streaming).unwrap();
        let s = s.transition(SessionLifecycle::Stopping).unwrap();
        let s = s.transition(SessionLifecycle::Stopped).unwrap();
        assert_eq!(s.lifecycle(), SessionLifecycle::Stopped);
    }

    #[test]
    fn cannot_skip_connecting() {
        let s = SessionState::new();
        assert!(s.transition(SessionLifecycle::Streaming).is_err());
    }

    #[test]
    fn disconnect_from_streaming_goes_to_stopping() {
        let s = SessionState::new();
        let s = s.transition(SessionLifecycle::Connecting).unwrap();
        let s = s.transition(SessionLifecycle::Streaming).unwrap();
        let s = s.transition(SessionLifecycle::Stopping).unwrap();
        assert_eq!(s.lifecycle(), SessionLifecycle::Stopping);
    }

    #[test]
    fn cannot_transition_out_of_stopped() {
        let s = SessionState::new();
        let s = s.transition(SessionLifecycle::Connecting).unwrap();
        let s = s.transition(SessionLifecycle::Streaming).unwrap();
        let s = s.transition(SessionLifecycle::Stopping).unwrap();
        let s = s.transition(SessionLifecycle::Stopped).unwrap();
        assert!(s.transition(SessionLifecycle::Connecting).is_err());
    }
}
