/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Session lifecycle states.
//!
//! Both protocols share one state enum; FIX sessions use the subset without
//! the negotiate phases. Transitions outside [`SessionState::can_become`]
//! indicate a logic error in the state machine driving the session.

use std::fmt;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    /// No connection and no pending connect.
    Disconnected = 0,
    /// TCP connect requested from the channel supplier.
    Connecting = 1,
    /// Negotiate sent, awaiting NegotiateResponse (iLink3 only).
    SentNegotiate = 2,
    /// NegotiateResponse received, Establish about to be sent (iLink3 only).
    Negotiated = 3,
    /// Establish or Logon sent, awaiting acknowledgement.
    SentEstablish = 4,
    /// Session layer is up; the library may own the session.
    Established = 5,
    /// Terminate or Logout sent, awaiting the peer's reply.
    Terminating = 6,
    /// Peer-initiated teardown observed; channel closing.
    Unbound = 7,
}

impl SessionState {
    /// Returns the state name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::SentNegotiate => "SENT_NEGOTIATE",
            Self::Negotiated => "NEGOTIATED",
            Self::SentEstablish => "SENT_ESTABLISH",
            Self::Established => "ESTABLISHED",
            Self::Terminating => "TERMINATING",
            Self::Unbound => "UNBOUND",
        }
    }

    /// Returns true while the library may observe the session.
    #[must_use]
    pub const fn is_library_visible(self) -> bool {
        matches!(self, Self::Established | Self::Terminating)
    }

    /// Returns true once the handshake completed on this connection.
    #[must_use]
    pub const fn is_post_handshake(self) -> bool {
        matches!(self, Self::Established | Self::Terminating | Self::Unbound)
    }

    /// Reconstructs a state from its wire code, for observables shared
    /// across threads as atomics.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::SentNegotiate,
            3 => Self::Negotiated,
            4 => Self::SentEstablish,
            5 => Self::Established,
            6 => Self::Terminating,
            7 => Self::Unbound,
            _ => return None,
        })
    }

    /// Returns true if `next` is a legal successor of this state.
    #[must_use]
    pub const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::SentNegotiate)
                | (Self::Connecting, Self::SentEstablish)
                | (Self::Connecting, Self::Disconnected)
                | (Self::SentNegotiate, Self::Negotiated)
                | (Self::SentNegotiate, Self::Disconnected)
                | (Self::Negotiated, Self::SentEstablish)
                | (Self::Negotiated, Self::Disconnected)
                | (Self::SentEstablish, Self::Established)
                | (Self::SentEstablish, Self::Terminating)
                | (Self::SentEstablish, Self::Disconnected)
                | (Self::Established, Self::Terminating)
                | (Self::Established, Self::Unbound)
                | (Self::Established, Self::Disconnected)
                | (Self::Terminating, Self::Unbound)
                | (Self::Terminating, Self::Disconnected)
                | (Self::Unbound, Self::Disconnected)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiator_happy_path() {
        let path = [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::SentNegotiate,
            SessionState::Negotiated,
            SessionState::SentEstablish,
            SessionState::Established,
            SessionState::Terminating,
            SessionState::Disconnected,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_become(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_reestablish_skips_negotiate() {
        assert!(SessionState::Connecting.can_become(SessionState::SentEstablish));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!SessionState::Disconnected.can_become(SessionState::Established));
        assert!(!SessionState::Established.can_become(SessionState::SentNegotiate));
        assert!(!SessionState::Unbound.can_become(SessionState::Established));
    }

    #[test]
    fn test_library_visibility() {
        assert!(SessionState::Established.is_library_visible());
        assert!(SessionState::Terminating.is_library_visible());
        assert!(!SessionState::SentEstablish.is_library_visible());
        assert!(!SessionState::Disconnected.is_library_visible());
    }
}
