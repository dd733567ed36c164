#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Kind};

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Neither a static address nor a resolver yielded a destination
    AddressRequired,
    /// The address resolver failed to produce a destination
    Resolver(String),
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Transport-level failure reported by a custom connector
    Transport(String),
    /// WebSocket connection was closed by the remote end
    ConnectionClosed,
    /// No open connection to write to
    NotConnected,
    /// The transport did not accept a frame in time
    WriteTimeout(Duration),
    /// Error parsing a WebSocket message
    MessageParse(serde_json::Error),
    /// A configured header name or value is not valid HTTP
    InvalidHeader(String),
    /// `start` was called on a manager that is already running
    AlreadyStarted,
    /// The connection task is gone and can no longer accept commands
    ManagerStopped,
    /// Subscription stream lagged and missed events
    Lagged {
        /// Number of events that were missed
        count: u64,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressRequired => write!(f, "address required"),
            Self::Resolver(reason) => write!(f, "Unable to resolve WebSocket address: {reason}"),
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::Transport(reason) => write!(f, "WebSocket transport error: {reason}"),
            Self::ConnectionClosed => write!(f, "socket closed"),
            Self::NotConnected => write!(f, "WebSocket is not connected"),
            Self::WriteTimeout(limit) => write!(f, "WebSocket write stalled for {limit:?}"),
            Self::MessageParse(e) => write!(f, "Failed to parse WebSocket message: {e}"),
            Self::InvalidHeader(header) => write!(f, "Invalid WebSocket header: {header}"),
            Self::AlreadyStarted => write!(f, "connection manager already started"),
            Self::ManagerStopped => write!(f, "connection manager is no longer running"),
            Self::Lagged { count } => write!(f, "Subscription lagged, missed {count} events"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MessageParse(e) => Some(e),
            _ => None,
        }
    }
}

impl WsError {
    /// The [`Kind`] this error is reported under unless the call site overrides it.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        match self {
            Self::AddressRequired => Kind::Configuration,
            Self::Resolver(_) | Self::InvalidHeader(_) => Kind::TransportSetup,
            Self::Connection(_) | Self::Transport(_) | Self::ConnectionClosed => Kind::Remote,
            Self::NotConnected | Self::WriteTimeout(_) => Kind::Send,
            Self::MessageParse(_) => Kind::Parse,
            Self::AlreadyStarted => Kind::Validation,
            Self::ManagerStopped | Self::Lagged { .. } => Kind::Internal,
        }
    }
}

// Integration with main Error type
impl From<WsError> for Error {
    fn from(e: WsError) -> Self {
        Error::with_source(e.kind(), e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        WsError::Connection(e).into()
    }
}
