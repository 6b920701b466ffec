//! Controller session state machine.
//!
//! ```text
//!               connect ok
//!  Disconnected ──────────────► Connected{streak}
//!       │  ▲                      │   │
//!       │  └─ lost after a poll ──┘   │ lost before any poll
//!       │ connect failed              ▼
//!       ▼                       Reconnecting{attempt = streak, delay}
//!  Reconnecting{attempt, delay} ──connect ok──► Connected{attempt + 1}
//!       │ ▲
//!       └─┘ connect failed (attempt + 1)
//!
//!  any ── stop ──► Stopped
//! ```
//!
//! `Disconnected` means "connect now"; `Reconnecting` means "wait `delay`,
//! then connect". A session that connects but is lost before its first
//! successful poll counts as a failed attempt, so a controller that accepts
//! connections and then drops them is still backed off.

use std::time::Duration;

use smartfactory_common::Backoff;

/// Where a controller session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// `streak` holds the failed attempts preceding this session until the
    /// first successful poll clears it.
    Connected { streak: Option<u32> },
    Reconnecting { attempt: u32, delay: Duration },
    Stopped,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectSucceeded,
    /// `auth` is set when the controller rejected the credentials.
    ConnectFailed { auth: bool },
    PollSucceeded,
    SessionLost,
    Stop,
}

impl SessionState {
    /// Compute the next state. Pure: no I/O, no clock.
    ///
    /// Reconnect delays follow `backoff` by attempt number, so consecutive
    /// failures never shorten the wait. A credential rejection jumps
    /// straight to the maximum delay.
    pub fn transition(self, event: SessionEvent, backoff: &Backoff) -> SessionState {
        use SessionEvent::*;
        use SessionState::*;

        let delay_for = |attempt: u32, auth: bool| {
            if auth {
                backoff.max_delay()
            } else {
                backoff.delay_for_attempt(attempt)
            }
        };

        match (self, event) {
            (Stopped, _) | (_, Stop) => Stopped,
            (Reconnecting { attempt, .. }, ConnectSucceeded) => Connected {
                streak: Some(attempt.saturating_add(1)),
            },
            (Connected { streak }, ConnectSucceeded) => Connected { streak },
            (Disconnected, ConnectSucceeded) => Connected { streak: Some(0) },
            (Reconnecting { attempt, delay }, ConnectFailed { auth }) => {
                let attempt = attempt.saturating_add(1);
                Reconnecting {
                    attempt,
                    delay: delay_for(attempt, auth).max(delay),
                }
            }
            (Disconnected | Connected { .. }, ConnectFailed { auth }) => Reconnecting {
                attempt: 0,
                delay: delay_for(0, auth),
            },
            (Connected { .. }, PollSucceeded) => Connected { streak: None },
            (Connected { streak: None }, SessionLost) => Disconnected,
            (Connected { streak: Some(attempt) }, SessionLost) => Reconnecting {
                attempt,
                delay: delay_for(attempt, false),
            },
            (state, PollSucceeded | SessionLost) => state,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, SessionState::Stopped)
    }
}
