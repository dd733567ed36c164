//! Self-healing WebSocket connection management.
//!
//! A [`ConnectionManager`] owns one logical connection and keeps it alive: it reconnects after
//! transport errors and remote closes, sends a periodic liveness probe, and forces a reconnect
//! when nothing has been received for longer than the heartbeat interval.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Public handle to the background task that owns the connection
//! - [`Connector`]: Opens transports; [`TungsteniteConnector`] is the default
//! - [`AddressResolver`]: Optional lookup of the destination before every attempt
//! - [`MessageParser`]: Trait for parsing incoming WebSocket frames
//!
//! # Example
//!
//! ```ignore
//! let config = Config::builder()
//!     .address("wss://stream.example.com/ws")
//!     .build();
//! let manager = ConnectionManager::<Value>::new(config, JsonParser::new())?;
//!
//! let messages = manager.messages();
//! manager.start()?;
//! ```

pub mod config;
pub mod connection;
mod dispatch;
pub mod error;
pub mod event;
pub mod heartbeat;
mod reconnect;
mod timer;
pub mod traits;
pub mod transport;
mod watchdog;

pub use config::{Config, ReconnectConfig, TransportOptions};
pub use connection::{ConnectionManager, LifecycleState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use event::{Event, ReinitReason};
pub use heartbeat::Ping;
pub use traits::*;
pub use transport::{Connection, Connector, Frame, PendingConnection, TungsteniteConnector};
