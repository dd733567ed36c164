//! Collaborator traits consumed by the connection manager.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::WsError;
use crate::serde_helpers::deserialize_with_warnings;

/// Message parser trait for converting raw frame payloads to messages.
///
/// Text and binary frames are both handed to the parser as bytes.
///
/// # Example
///
/// ```ignore
/// pub struct LineParser;
///
/// impl MessageParser<String> for LineParser {
///     fn parse(&self, bytes: &[u8]) -> ws_wrapper::Result<Vec<String>> {
///         Ok(String::from_utf8_lossy(bytes).lines().map(str::to_owned).collect())
///     }
/// }
/// ```
pub trait MessageParser<M>: Send + Sync + 'static {
    /// Parse an inbound payload into messages.
    ///
    /// May return an empty vec, e.g. for keepalive frames that carry no message.
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<M>>;
}

/// Parses JSON frames into `M`, accepting either a single object or an array of them.
///
/// Empty or whitespace-only frames yield no messages.
#[non_exhaustive]
pub struct JsonParser<M = Value> {
    _phantom: PhantomData<fn() -> M>,
}

impl<M> JsonParser<M> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<M> Default for JsonParser<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for JsonParser<M> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<M: DeserializeOwned + 'static> MessageParser<M> for JsonParser<M> {
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<M>> {
        let trimmed = bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .map_or(&[][..], |start| &bytes[start..]);

        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let value: Value = serde_json::from_slice(trimmed).map_err(WsError::MessageParse)?;
        let messages = match value {
            Value::Array(items) => items
                .into_iter()
                .map(deserialize_with_warnings)
                .collect::<Result<Vec<M>, _>>(),
            other => deserialize_with_warnings(other).map(|message| vec![message]),
        };

        Ok(messages.map_err(WsError::MessageParse)?)
    }
}

/// Destination produced by an [`AddressResolver`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    /// WebSocket URL to connect to
    pub address: String,
    /// Opaque data kept by the manager and handed back on the next resolution
    pub context: Option<Value>,
}

impl ResolvedAddress {
    #[must_use]
    pub fn new<S: Into<String>>(address: S) -> Self {
        Self {
            address: address.into(),
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Supplies the destination for each connection attempt.
///
/// Useful when the URL carries short-lived credentials, or has to be negotiated with another
/// service before every connect.
///
/// # Example
///
/// ```ignore
/// struct TokenResolver { api: ApiClient }
///
/// #[async_trait]
/// impl AddressResolver for TokenResolver {
///     async fn resolve(&self, previous: Option<&Value>) -> ws_wrapper::Result<ResolvedAddress> {
///         let token = self.api.fresh_token(previous).await?;
///         Ok(ResolvedAddress::new(format!("wss://stream.example.com/?token={token}"))
///             .with_context(json!({ "token": token })))
///     }
/// }
/// ```
#[async_trait]
pub trait AddressResolver: Send + Sync + 'static {
    /// Resolve the next destination. `previous` is the context returned by the last successful
    /// resolution, if any.
    async fn resolve(&self, previous: Option<&Value>) -> crate::Result<ResolvedAddress>;
}
