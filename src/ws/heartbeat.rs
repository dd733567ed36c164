//! Periodic liveness probe.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc::WeakUnboundedSender;

use super::connection::Command;
use super::timer::RecurringTimer;

/// Application-level probe sent on every heartbeat tick: `{"type":"ping","time":<unix ms>}`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ping {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Milliseconds since the Unix epoch
    pub time: i64,
}

impl Ping {
    #[must_use]
    pub fn now() -> Self {
        Self {
            kind: "ping",
            time: Utc::now().timestamp_millis(),
        }
    }
}

/// Asks the manager to send a [`Ping`] every `heartbeat_interval` for one connection attempt.
///
/// Failing pings are reported by the manager and never stop the timer.
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    _timer: RecurringTimer,
}

impl HeartbeatMonitor {
    pub(crate) fn spawn(
        interval: Duration,
        generation: u64,
        mailbox: WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            _timer: RecurringTimer::spawn(interval, mailbox, move || Command::Heartbeat {
                generation,
            }),
        }
    }
}
