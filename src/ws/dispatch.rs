//! Inbound frame handling.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::Instant;

use super::event::Event;
use super::traits::MessageParser;
use super::transport::Frame;
use crate::error::Kind;

/// Decodes inbound frames and publishes the resulting messages.
pub(crate) struct MessageDispatcher<M, P> {
    parser: P,
    events: broadcast::Sender<Event<M>>,
}

impl<M, P> MessageDispatcher<M, P>
where
    M: Clone,
    P: MessageParser<M>,
{
    pub(crate) fn new(parser: P, events: broadcast::Sender<Event<M>>) -> Self {
        Self { parser, events }
    }

    /// Record the arrival, then decode and publish.
    ///
    /// Any frame counts as traffic for the staleness watchdog, even one that fails to decode.
    /// Decoding failures are published as [`Kind::Parse`] errors.
    pub(crate) fn handle(&self, frame: &Frame, last_message: &mut Option<Instant>) {
        *last_message = Some(Instant::now());

        match self.parser.parse(frame.as_bytes()) {
            Ok(messages) => {
                for message in messages {
                    if self.events.send(Event::Message(message)).is_err() {
                        #[cfg(feature = "tracing")]
                        tracing::trace!("No subscribers for decoded WebSocket message");
                    }
                }
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Failed to parse WebSocket message");
                _ = self
                    .events
                    .send(Event::Error(Arc::new(e.with_kind(Kind::Parse))));
            }
        }
    }
}
