//! Forces a reconnect when the link goes quiet.

use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::time::Instant;

use super::connection::Command;
use super::timer::RecurringTimer;

/// Asks the manager to check for staleness every `stale_check_interval` for one connection
/// attempt.
#[derive(Debug)]
pub(crate) struct StalenessWatchdog {
    _timer: RecurringTimer,
}

impl StalenessWatchdog {
    pub(crate) fn spawn(
        interval: Duration,
        generation: u64,
        mailbox: WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            _timer: RecurringTimer::spawn(interval, mailbox, move || Command::StaleCheck {
                generation,
            }),
        }
    }
}

/// A link is stale when a message was seen and more than `threshold` has passed since.
///
/// Nothing received yet means not stale: a fresh connection is not torn down before the
/// remote end had a chance to push anything.
pub(crate) fn is_stale(last_message: Option<Instant>, now: Instant, threshold: Duration) -> bool {
    last_message.is_some_and(|last| now.saturating_duration_since(last) > threshold)
}
