use std::fmt;
use std::sync::Arc;

use crate::error::Error;

/// Why a (re)initialization of the connection was triggered.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReinitReason {
    /// First connection attempt after [`super::ConnectionManager::start`]
    Startup,
    /// The transport reported an error
    RemoteError {
        /// Rendered transport error
        detail: String,
    },
    /// The remote end closed the connection
    RemoteClosed,
    /// Nothing was received for longer than the heartbeat interval
    InactivityTimeout,
    /// Requested through [`super::ConnectionManager::reinit`]
    ManualReinit {
        /// Caller supplied description
        detail: String,
    },
    /// A previous attempt failed before a transport could be opened
    SetupFailed {
        /// Rendered setup error
        detail: String,
    },
}

impl fmt::Display for ReinitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup => write!(f, "start init"),
            Self::RemoteError { detail } => write!(f, "socket error: {detail}"),
            Self::RemoteClosed => write!(f, "socket closed"),
            Self::InactivityTimeout => write!(f, "reinit inactive ws"),
            Self::ManualReinit { detail } => write!(f, "manual reinit: {detail}"),
            Self::SetupFailed { detail } => write!(f, "setup failed: {detail}"),
        }
    }
}

/// Lifecycle notifications and decoded messages published by a
/// [`super::ConnectionManager`].
///
/// Events are delivered through a broadcast channel, so every subscriber sees every event
/// published after it subscribed.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Event<M> {
    /// A reinitialization cycle has begun
    ReinitStarted(ReinitReason),
    /// A new transport is being opened
    Connecting {
        /// Destination of this attempt
        address: String,
    },
    /// The transport opened
    Connected,
    /// A decoded inbound message
    Message(M),
    /// A failure; the manager keeps running
    Error(Arc<Error>),
}

impl<M> Event<M> {
    /// Returns the decoded message, if this event carries one.
    #[must_use]
    pub fn into_message(self) -> Option<M> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }

    /// Returns the error, if this event reports one.
    #[must_use]
    pub fn as_error(&self) -> Option<&Error> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }
}
