//! Retry delay and destination bookkeeping between connection attempts.

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use serde_json::Value;

use super::config::Config;
use super::error::WsError;
use super::traits::AddressResolver;
use crate::Result;
use crate::error::Kind;

/// Where the next attempt connects to.
enum Destination {
    Static(String),
    Resolver(Arc<dyn AddressResolver>),
}

/// Decides how long to wait before the next attempt and supplies its destination.
///
/// Retries are unbounded. Without a backoff configuration every retry waits exactly
/// `reinit_delay`; with one, the wait is the larger of `reinit_delay` and the next backoff
/// value, and the backoff restarts once a connection opens.
pub(crate) struct ReconnectPolicy {
    destination: Destination,
    /// Context returned by the last successful resolution
    context: Option<Value>,
    reinit_delay: Duration,
    backoff: Option<ExponentialBackoff>,
}

impl ReconnectPolicy {
    pub(crate) fn new(config: &Config) -> Self {
        let destination = match &config.resolver {
            Some(resolver) => Destination::Resolver(Arc::clone(resolver)),
            None => Destination::Static(config.address.clone().unwrap_or_default()),
        };

        Self {
            destination,
            context: None,
            reinit_delay: config.reinit_delay,
            backoff: config.reconnect.clone().map(ExponentialBackoff::from),
        }
    }

    /// Whether an attempt can be made at all.
    pub(crate) fn has_destination(&self) -> bool {
        match &self.destination {
            Destination::Static(address) => !address.is_empty(),
            Destination::Resolver(_) => true,
        }
    }

    /// Replace the static destination. Takes precedence over a configured resolver.
    pub(crate) fn set_address(&mut self, address: String) {
        self.destination = Destination::Static(address);
        self.context = None;
    }

    /// Produce the address for the next attempt.
    ///
    /// Resolver failures are wrapped in [`WsError::Resolver`]; an empty address is
    /// [`WsError::AddressRequired`].
    pub(crate) async fn resolve(&mut self) -> Result<String> {
        let address = match &self.destination {
            Destination::Static(address) => address.clone(),
            Destination::Resolver(resolver) => {
                let resolved = resolver
                    .resolve(self.context.as_ref())
                    .await
                    .map_err(|e| match e.kind() {
                        Kind::Configuration => e,
                        _ => WsError::Resolver(e.to_string()).into(),
                    })?;
                if resolved.context.is_some() {
                    self.context = resolved.context;
                }
                resolved.address
            }
        };

        if address.is_empty() {
            return Err(WsError::AddressRequired.into());
        }

        Ok(address)
    }

    /// Delay before the next reinit after a failure.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let backoff = self
            .backoff
            .as_mut()
            .and_then(ExponentialBackoff::next_backoff)
            .unwrap_or_default();

        backoff.max(self.reinit_delay)
    }

    /// Called when a connection opens.
    pub(crate) fn reset(&mut self) {
        if let Some(backoff) = self.backoff.as_mut() {
            backoff.reset();
        }
    }
}
