#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Deeply nested uses in sub-modules are falsely flagged as being unused"
)]

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::channel::mpsc as futures_mpsc;
use futures::{FutureExt as _, Sink, SinkExt as _, StreamExt as _, future};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use ws_wrapper::Result;
use ws_wrapper::error::Error;
use ws_wrapper::ws::config::{Config, TransportOptions};
use ws_wrapper::ws::{
    Connection, ConnectionManager, Connector, Event, Frame, JsonParser, PendingConnection,
    WsError,
};

/// Upper bound for waiting on a single event. Time is paused in most tests, so this only
/// fails a test that would otherwise hang.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(3600);

pub const ADDRESS: &str = "ws://mock.local/ws";

/// How the next connection attempt behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Opens right away
    Open,
    /// Fails while connecting, like a refused handshake
    Fail,
    /// Never finishes connecting
    Hang,
    /// Rejected by `connect` before any I/O
    SetupError,
    /// Opens, but its sink never accepts a frame, like a peer that stopped reading
    Stall,
}

/// Sink whose send buffer is permanently full.
struct StalledSink;

impl Sink<Frame> for StalledSink {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _item: Frame) -> Result<()> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Default)]
struct Shared {
    script: Mutex<VecDeque<Behavior>>,
    addresses: Mutex<Vec<String>>,
    /// Inbound senders of every transport handed out so far
    transports: Mutex<Vec<futures_mpsc::UnboundedSender<Result<Frame>>>>,
    /// Attempts that started while an earlier transport was still held by the manager
    overlaps: AtomicUsize,
}

/// In-memory [`Connector`] driven by the test through a [`MockController`].
pub struct MockConnector {
    shared: Arc<Shared>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl Connector for MockConnector {
    fn connect(&self, address: &str, _options: &TransportOptions) -> Result<PendingConnection> {
        let mut transports = self.shared.transports.lock().unwrap();
        let live = transports.iter().filter(|tx| !tx.is_closed()).count();
        self.shared.overlaps.fetch_add(live, Ordering::SeqCst);

        let attempt = {
            let mut addresses = self.shared.addresses.lock().unwrap();
            addresses.push(address.to_owned());
            addresses.len()
        };
        let behavior = self
            .shared
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behavior::Open);

        if behavior == Behavior::SetupError {
            return Err(WsError::Transport(format!("cannot reach {address}")).into());
        }

        let (inbound_tx, inbound_rx) = futures_mpsc::unbounded();
        let (outbound_tx, outbound_rx) = futures_mpsc::unbounded::<Frame>();
        transports.push(inbound_tx.clone());

        let connection = if behavior == Behavior::Stall {
            Connection::new(Box::pin(StalledSink), inbound_rx.boxed())
        } else {
            let sink =
                outbound_tx.sink_map_err(|e| Error::from(WsError::Transport(e.to_string())));
            Connection::new(Box::pin(sink), inbound_rx.boxed())
        };

        _ = self.peers.send(MockPeer {
            address: address.to_owned(),
            attempt,
            inbound: inbound_tx,
            outbound: outbound_rx,
        });

        let pending: PendingConnection = match behavior {
            Behavior::Open | Behavior::Stall => future::ready(Ok(connection)).boxed(),
            Behavior::Fail => {
                drop(connection);
                future::ready(Err(WsError::Transport("handshake refused".to_owned()).into()))
                    .boxed()
            }
            Behavior::Hang => async move {
                let _connection = connection;
                future::pending::<Result<Connection>>().await
            }
            .boxed(),
            Behavior::SetupError => unreachable!(),
        };
        Ok(pending)
    }
}

/// Test side of the mock transport.
pub struct MockController {
    shared: Arc<Shared>,
    peers: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockController {
    /// Script the behavior of upcoming attempts. Unscripted attempts open.
    pub fn script<I: IntoIterator<Item = Behavior>>(&self, behaviors: I) {
        self.shared.script.lock().unwrap().extend(behaviors);
    }

    /// The remote end of the next attempt that got as far as creating a transport.
    pub async fn next_peer(&mut self) -> MockPeer {
        timeout(EVENT_TIMEOUT, self.peers.recv())
            .await
            .unwrap()
            .unwrap()
    }

    pub fn attempts(&self) -> usize {
        self.shared.addresses.lock().unwrap().len()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.shared.addresses.lock().unwrap().clone()
    }

    pub fn overlaps(&self) -> usize {
        self.shared.overlaps.load(Ordering::SeqCst)
    }
}

pub fn mock_connector() -> (MockConnector, MockController) {
    let shared = Arc::new(Shared::default());
    let (tx, rx) = mpsc::unbounded_channel();

    (
        MockConnector {
            shared: Arc::clone(&shared),
            peers: tx,
        },
        MockController { shared, peers: rx },
    )
}

/// Remote end of one mock transport.
pub struct MockPeer {
    pub address: String,
    /// 1-based number of the connection attempt
    pub attempt: usize,
    inbound: futures_mpsc::UnboundedSender<Result<Frame>>,
    outbound: futures_mpsc::UnboundedReceiver<Frame>,
}

impl MockPeer {
    pub fn send_text(&self, text: &str) {
        self.inbound
            .unbounded_send(Ok(Frame::Text(text.to_owned())))
            .unwrap();
    }

    pub fn fail(&self, detail: &str) {
        self.inbound
            .unbounded_send(Err(WsError::Transport(detail.to_owned()).into()))
            .unwrap();
    }

    pub fn close(&self) {
        self.inbound.close_channel();
    }

    /// Whether the manager has dropped this transport.
    pub fn is_released(&self) -> bool {
        self.inbound.is_closed()
    }

    /// Next frame the manager wrote, if any is buffered.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.outbound.next().now_or_never().flatten()
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        timeout(EVENT_TIMEOUT, self.outbound.next())
            .await
            .ok()
            .flatten()
    }
}

/// Config tuned for tests, with the documented timer defaults.
pub fn config() -> Config {
    Config::builder().address(ADDRESS).build()
}

pub fn manager(
    config: Config,
) -> (
    ConnectionManager<Value>,
    MockController,
    broadcast::Receiver<Event<Value>>,
) {
    let (connector, controller) = mock_connector();
    let manager = ConnectionManager::with_connector(config, JsonParser::new(), connector).unwrap();
    let events = manager.subscribe();

    (manager, controller, events)
}

pub async fn next_event(events: &mut broadcast::Receiver<Event<Value>>) -> Event<Value> {
    timeout(EVENT_TIMEOUT, events.recv()).await.unwrap().unwrap()
}

/// Skip events until one matches.
pub async fn wait_for<F>(
    events: &mut broadcast::Receiver<Event<Value>>,
    mut matches: F,
) -> Event<Value>
where
    F: FnMut(&Event<Value>) -> bool,
{
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

/// Everything published so far without waiting.
pub fn drain(events: &mut broadcast::Receiver<Event<Value>>) -> Vec<Event<Value>> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
