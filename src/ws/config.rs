#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;
use url::Url;

use super::traits::AddressResolver;
use crate::Result;
use crate::error::Error;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_STALE_CHECK_INTERVAL_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_REINIT_DELAY_DURATION: Duration = Duration::from_secs(2);
const DEFAULT_BOOTSTRAP_DELAY_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(2);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for a [`super::ConnectionManager`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use ws_wrapper::ws::config::Config;
///
/// let config = Config::builder()
///     .address("wss://stream.example.com/ws")
///     .heartbeat_interval(Duration::from_secs(30))
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[non_exhaustive]
#[derive(Clone, Builder)]
pub struct Config {
    /// Static destination, used when no [`AddressResolver`] is set
    #[builder(into)]
    pub address: Option<String>,
    /// Asynchronous destination lookup, consulted before every connection attempt
    pub resolver: Option<Arc<dyn AddressResolver>>,
    /// Options applied to every transport the manager opens
    #[builder(default)]
    pub transport: TransportOptions,
    /// Interval between liveness probes. Also the silence threshold of the staleness watchdog
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub heartbeat_interval: Duration,
    /// How often the staleness watchdog compares the last inbound message against the threshold
    #[builder(default = DEFAULT_STALE_CHECK_INTERVAL_DURATION)]
    pub stale_check_interval: Duration,
    /// Delay between a transport error or close and the next reinit
    #[builder(default = DEFAULT_REINIT_DELAY_DURATION)]
    pub reinit_delay: Duration,
    /// Delay between `start` and the first connection attempt, so callers can finish
    /// subscribing to events
    #[builder(default = DEFAULT_BOOTSTRAP_DELAY_DURATION)]
    pub bootstrap_delay: Duration,
    /// Exponential backoff on top of `reinit_delay`. `None` retries at the fixed delay
    pub reconnect: Option<ReconnectConfig>,
    /// Whether a failure while resolving or opening a transport schedules another attempt
    #[builder(default = true)]
    pub retry_on_setup_failure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("address", &self.address)
            .field("resolver", &self.resolver.as_ref().map(|_| "<resolver>"))
            .field("transport", &self.transport)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("stale_check_interval", &self.stale_check_interval)
            .field("reinit_delay", &self.reinit_delay)
            .field("bootstrap_delay", &self.bootstrap_delay)
            .field("reconnect", &self.reconnect)
            .field("retry_on_setup_failure", &self.retry_on_setup_failure)
            .finish()
    }
}

impl Config {
    /// Check intervals and the static address.
    ///
    /// An absent address is not an error here: the manager reports it as a
    /// [`crate::error::Kind::Configuration`] event on every attempt until one is set.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(Error::validation("heartbeat_interval must be greater than zero"));
        }
        if self.stale_check_interval.is_zero() {
            return Err(Error::validation(
                "stale_check_interval must be greater than zero",
            ));
        }
        if let Some(address) = self.address.as_deref().filter(|a| !a.is_empty()) {
            Url::parse(address)?;
        }
        if let Some(reconnect) = &self.reconnect
            && reconnect.max_backoff < reconnect.initial_backoff
        {
            return Err(Error::validation(
                "max_backoff must not be smaller than initial_backoff",
            ));
        }

        Ok(())
    }
}

/// Options applied when opening a transport.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Builder)]
pub struct TransportOptions {
    /// Extra HTTP headers sent with the upgrade request
    #[builder(default)]
    pub headers: BTreeMap<String, String>,
    /// Disable Nagle's algorithm on the underlying TCP stream
    #[builder(default)]
    pub disable_nagle: bool,
}

/// Configuration for exponential reconnection backoff.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial backoff duration for first reconnection attempt
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_max_elapsed_time(None) // Retries never give up
            .build()
    }
}
