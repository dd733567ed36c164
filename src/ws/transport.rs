//! Transport abstraction and its `tokio-tungstenite` implementation.

use std::fmt;
use std::pin::Pin;

use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use futures::{FutureExt as _, Sink, SinkExt as _, StreamExt as _};
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};

use super::config::TransportOptions;
use super::error::WsError;
use crate::Result;
use crate::error::{Error, Kind};

/// A data frame exchanged over the transport.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        }
    }
}

/// Outbound half of an open transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = Error> + Send>>;

/// Inbound half of an open transport. The stream ending means the remote end closed.
pub type FrameStream = BoxStream<'static, Result<Frame>>;

/// An open transport, split into its two halves.
#[non_exhaustive]
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Connection {
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens transports for the connection manager.
///
/// `connect` must not block. Problems detectable up front (a malformed address, an invalid
/// header) are returned directly and count as setup failures; everything else surfaces through
/// the returned future, which the manager polls alongside its other work. Dropping the future or
/// the resulting [`Connection`] must release the underlying socket.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, address: &str, options: &TransportOptions) -> Result<PendingConnection>;
}

/// A transport that is still being opened.
pub type PendingConnection = BoxFuture<'static, Result<Connection>>;

/// [`Connector`] backed by `tokio-tungstenite`, with TLS via rustls and the native root store.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, address: &str, options: &TransportOptions) -> Result<PendingConnection> {
        let request = build_request(address, options)?;
        let disable_nagle = options.disable_nagle;

        Ok(async move {
            let (ws_stream, _) = connect_async_with_config(request, None, disable_nagle).await?;
            let (write, read) = ws_stream.split();

            let sink = write
                .sink_map_err(Error::from)
                .with(|frame: Frame| future::ready(Ok::<_, Error>(Message::from(frame))));

            let stream = read
                .take_while(|message| future::ready(!is_terminal(message)))
                .filter_map(|message| {
                    future::ready(match message {
                        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                        Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes.to_vec()))),
                        // Control frames are answered by tungstenite itself
                        Ok(_) => None,
                        Err(e) => Some(Err(Error::from(e))),
                    })
                });

            Ok(Connection::new(Box::pin(sink), stream.boxed()))
        }
        .boxed())
    }
}

fn build_request(
    address: &str,
    options: &TransportOptions,
) -> Result<tungstenite::handshake::client::Request> {
    let mut request = address
        .into_client_request()
        .map_err(|e| Error::from(e).with_kind(Kind::TransportSetup))?;

    for (name, value) in &options.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_e| WsError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_e| WsError::InvalidHeader(name.clone()))?;
        request.headers_mut().insert(header_name, header_value);
    }

    Ok(request)
}

/// Whether an inbound item marks the end of the connection rather than data or a failure.
fn is_terminal(message: &std::result::Result<Message, tungstenite::Error>) -> bool {
    matches!(
        message,
        Ok(Message::Close(_))
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)
    )
}
