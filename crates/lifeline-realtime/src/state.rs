//! Connection state machine.

use std::fmt;

use lifeline_protocol::UserId;

// ---------------------------------------------------------------------------
// ConnectionPhase
// ---------------------------------------------------------------------------

/// Where the realtime channel is in its lifecycle.
///
/// One enum instead of separate "connected" and "authenticated" flags, so
/// the two can never disagree:
///
/// ```text
///                    ┌─────────────── explicit disconnect ──────────────┐
///                    ▼                                                  │
/// Disconnected ──→ Connecting ──→ Connected ⇄ Authenticated ────────────┤
///                    ▲   │            │            │                    │
///                    │   ▼            ▼            ▼                    │
///                    └─ Errored ◀─────┴────────────┘                    │
///                         └─────────────────────────────────────────────┘
/// ```
///
/// - **Disconnected**: initial, and after an explicit disconnect or a
///   closed connection.
/// - **Connecting**: a dial is in flight.
/// - **Connected**: the transport is open; the token (if any) has not been
///   acknowledged.
/// - **Authenticated**: the server acknowledged the token. Only reachable
///   from `Connected`.
/// - **Errored**: the last dial failed; a reconnect may be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
    Errored,
}

impl ConnectionPhase {
    /// Returns `true` if moving from `self` to `next` is in the transition
    /// table.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionPhase::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Errored, Connecting)
                | (Connecting, Connected)
                | (Connecting, Errored)
                | (Connecting, Disconnected)
                | (Connected, Authenticated)
                | (Connected, Errored)
                | (Connected, Disconnected)
                | (Authenticated, Connected)
                | (Authenticated, Errored)
                | (Authenticated, Disconnected)
                | (Errored, Disconnected)
        )
    }

    /// The transport is open (whether or not authenticated).
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }

    pub fn is_authenticated(self) -> bool {
        self == Self::Authenticated
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// The state owned by the connection actor. Written only through
/// [`advance`](Self::advance) and the attempt bookkeeping below.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// Consecutive failed dials since the last successful connect.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl ConnectionState {
    /// Moves to `next` if the table allows it. A move to the current phase
    /// is a no-op that reports success.
    pub fn advance(&mut self, next: ConnectionPhase) -> bool {
        if self.phase == next {
            return true;
        }
        if !self.phase.can_transition_to(next) {
            tracing::warn!(from = %self.phase, to = %next, "rejected connection phase transition");
            return false;
        }
        tracing::debug!(from = %self.phase, to = %next, "connection phase");
        self.phase = next;
        true
    }

    /// Records a failed dial and returns the new attempt count.
    pub fn record_failure(&mut self, error: impl Into<String>) -> u32 {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.attempts
    }

    /// Clears the failure bookkeeping after a successful connect.
    pub fn record_success(&mut self) {
        self.attempts = 0;
        self.last_error = None;
    }
}

/// A point-in-time view of the channel for callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub phase: ConnectionPhase,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// The endpoint of the open connection.
    pub endpoint: Option<String>,
    /// Identity the server acknowledged, while authenticated.
    pub user_id: Option<UserId>,
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticated_only_reachable_from_connected() {
        use ConnectionPhase::*;
        for from in [Disconnected, Connecting, Errored] {
            assert!(!from.can_transition_to(Authenticated), "{from} -> authenticated");
        }
        assert!(Connected.can_transition_to(Authenticated));
    }

    #[test]
    fn test_connecting_only_from_disconnected_or_errored() {
        use ConnectionPhase::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Errored.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Authenticated.can_transition_to(Connecting));
    }

    #[test]
    fn test_every_phase_but_disconnected_can_disconnect() {
        use ConnectionPhase::*;
        for from in [Connecting, Connected, Authenticated, Errored] {
            assert!(from.can_transition_to(Disconnected));
        }
    }

    #[test]
    fn test_advance_rejects_skipping_connected() {
        let mut state = ConnectionState::default();
        assert!(state.advance(ConnectionPhase::Connecting));

        assert!(!state.advance(ConnectionPhase::Authenticated));
        assert_eq!(state.phase, ConnectionPhase::Connecting);
    }

    #[test]
    fn test_advance_same_phase_is_noop() {
        let mut state = ConnectionState::default();
        assert!(state.advance(ConnectionPhase::Disconnected));
        assert_eq!(state.phase, ConnectionPhase::Disconnected);
    }

    #[test]
    fn test_record_failure_and_success() {
        let mut state = ConnectionState::default();
        assert_eq!(state.record_failure("refused"), 1);
        assert_eq!(state.record_failure("refused"), 2);
        assert_eq!(state.last_error.as_deref(), Some("refused"));

        state.record_success();

        assert_eq!(state.attempts, 0);
        assert_eq!(state.last_error, None);
    }

    #[test]
    fn test_phase_predicates() {
        assert!(ConnectionPhase::Authenticated.is_connected());
        assert!(ConnectionPhase::Connected.is_connected());
        assert!(!ConnectionPhase::Connected.is_authenticated());
        assert!(!ConnectionPhase::Errored.is_connected());
    }
}
