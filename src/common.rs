//! Common types for the client: session states, outcomes and errors.

use core::fmt;

use crate::domain::LayoutError;

/// Lifecycle of a single hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Handlers are registered and the start verb has been sent.
    Playing,
    Closed,
    Errored,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Playing => "playing",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// How a session that did not fail came to an end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The hub closed the connection, optionally with a reason.
    Closed { reason: Option<String> },
    /// The caller requested a stop.
    Stopped,
}

/// Terminal session failures, returned from [`crate::Session::run`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The transport never came up.
    #[error("connection failed: {0:#}")]
    Connection(anyhow::Error),
    /// The transport failed after it was established.
    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),
    #[error("session already started (state: {0})")]
    AlreadyStarted(SessionState),
}

/// Per-event failures. The event is dropped and the session keeps playing.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed `{event}` payload: {reason}")]
    MalformedPayload { event: String, reason: String },
    #[error("bot failed on `{event}`: {error:#}")]
    Bot { event: String, error: anyhow::Error },
    #[error("invalid step: {0}")]
    InvalidStep(#[from] LayoutError),
}
