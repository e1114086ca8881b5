//! Session lifecycle state machine.
//!
//! Tracks where the module stands between power-up and an active network
//! session: `Uninitialized → Configured → Joining → Joined`, with a terminal
//! `Error` state that is left only by re-writing the join credentials.
//!
//! The machine is pure logic with no I/O; the [`crate::driver::Mipot`] driver
//! is its sole mutator.

use std::fmt;

use crate::error::{Error, Result};

/// Unrecoverable module feedback that parked the session in `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFault {
    /// The network rejected the join request.
    JoinRejected,
    /// The module never reported a joined state within the join window.
    JoinTimeout,
    /// The module MAC layer reported an error.
    MacError,
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JoinRejected => write!(f, "join rejected"),
            Self::JoinTimeout => write!(f, "join timed out"),
            Self::MacError => write!(f, "MAC error"),
        }
    }
}

/// Module session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No join credentials written since the driver was created.
    #[default]
    Uninitialized,
    /// Join credentials written, not yet joined.
    Configured,
    /// Join command accepted, waiting for network activation.
    Joining,
    /// Network session active, uplinks allowed.
    Joined,
    /// Terminal until credentials are re-written.
    Error(SessionFault),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Configured => write!(f, "configured"),
            Self::Joining => write!(f, "joining"),
            Self::Joined => write!(f, "joined"),
            Self::Error(fault) => write!(f, "error ({fault})"),
        }
    }
}

/// State machine with named transitions and per-operation preconditions.
#[derive(Debug, Default)]
pub struct SessionTracker {
    state: SessionState,
}

impl SessionTracker {
    /// Creates a tracker in the `Uninitialized` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Transition for a successful credential write.
    ///
    /// Allowed from `Uninitialized`, `Configured` and `Error` (writing fresh
    /// credentials is the explicit recovery path). Rejected while a join is
    /// in flight or a session is active.
    pub fn configure(&mut self) -> Result<()> {
        match self.state {
            SessionState::Uninitialized | SessionState::Configured | SessionState::Error(_) => {
                self.state = SessionState::Configured;
                Ok(())
            }
            state => Err(Error::InvalidState {
                operation: "set_join_credentials",
                state,
            }),
        }
    }

    /// Transition for an accepted join command. Only legal from `Configured`.
    pub fn begin_join(&mut self) -> Result<()> {
        match self.state {
            SessionState::Configured => {
                self.state = SessionState::Joining;
                Ok(())
            }
            state => Err(Error::InvalidState {
                operation: "join",
                state,
            }),
        }
    }

    /// Transition for a confirmed network activation.
    pub fn complete_join(&mut self) {
        self.state = SessionState::Joined;
    }

    /// Drops back to `Configured` when the join command was rejected before
    /// the handshake started (no join attempt was actually made).
    pub fn abort_join(&mut self) {
        if self.state == SessionState::Joining {
            self.state = SessionState::Configured;
        }
    }

    /// Parks the session in the terminal `Error` state.
    pub fn fail(&mut self, fault: SessionFault) {
        self.state = SessionState::Error(fault);
    }

    /// Drops back to `Uninitialized`, e.g. after a module reset.
    pub fn reset(&mut self) {
        self.state = SessionState::Uninitialized;
    }

    /// Checks that an uplink is allowed right now.
    pub fn require_joined(&self, operation: &'static str) -> Result<()> {
        match self.state {
            SessionState::Joined => Ok(()),
            state => Err(Error::InvalidState { operation, state }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let tracker = SessionTracker::new();
        assert_eq!(tracker.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_happy_path() {
        let mut tracker = SessionTracker::new();
        tracker.configure().unwrap();
        assert_eq!(tracker.state(), SessionState::Configured);
        tracker.begin_join().unwrap();
        assert_eq!(tracker.state(), SessionState::Joining);
        tracker.complete_join();
        assert_eq!(tracker.state(), SessionState::Joined);
        tracker.require_joined("send_uplink").unwrap();
    }

    #[test]
    fn test_join_requires_configured() {
        let mut tracker = SessionTracker::new();
        let err = tracker.begin_join().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                operation: "join",
                state: SessionState::Uninitialized,
            }
        ));
    }

    #[test]
    fn test_uplink_requires_joined() {
        let mut tracker = SessionTracker::new();
        tracker.configure().unwrap();
        let err = tracker.require_joined("send_uplink").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                operation: "send_uplink",
                state: SessionState::Configured,
            }
        ));
    }

    #[test]
    fn test_configure_rejected_while_joining() {
        let mut tracker = SessionTracker::new();
        tracker.configure().unwrap();
        tracker.begin_join().unwrap();
        assert!(tracker.configure().is_err());
    }

    #[test]
    fn test_error_recovery_via_configure() {
        let mut tracker = SessionTracker::new();
        tracker.configure().unwrap();
        tracker.begin_join().unwrap();
        tracker.fail(SessionFault::JoinRejected);
        assert_eq!(
            tracker.state(),
            SessionState::Error(SessionFault::JoinRejected)
        );

        // Error is terminal for join and uplink...
        assert!(tracker.begin_join().is_err());
        assert!(tracker.require_joined("send_uplink").is_err());

        // ...until credentials are written again.
        tracker.configure().unwrap();
        assert_eq!(tracker.state(), SessionState::Configured);
    }

    #[test]
    fn test_abort_join_returns_to_configured() {
        let mut tracker = SessionTracker::new();
        tracker.configure().unwrap();
        tracker.begin_join().unwrap();
        tracker.abort_join();
        assert_eq!(tracker.state(), SessionState::Configured);

        // No effect outside Joining.
        tracker.abort_join();
        assert_eq!(tracker.state(), SessionState::Configured);
    }

    #[test]
    fn test_reset_from_any_state() {
        let mut tracker = SessionTracker::new();
        tracker.configure().unwrap();
        tracker.begin_join().unwrap();
        tracker.complete_join();
        tracker.reset();
        assert_eq!(tracker.state(), SessionState::Uninitialized);
    }
}
