//! Recurring timers scoped to one connection attempt.

use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// A background task that posts a message into the manager's mailbox on every tick.
///
/// The first tick happens one `period` after the timer is spawned. The task stops when the
/// timer is dropped, or when the mailbox has no strong senders left.
#[derive(Debug)]
pub(crate) struct RecurringTimer {
    token: CancellationToken,
}

impl RecurringTimer {
    pub(crate) fn spawn<T, F>(period: Duration, mailbox: WeakUnboundedSender<T>, tick: F) -> Self
    where
        T: Send + 'static,
        F: Fn() -> T + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(sender) = mailbox.upgrade() else {
                            break;
                        };
                        if sender.send(tick()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { token }
    }
}

impl Drop for RecurringTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
