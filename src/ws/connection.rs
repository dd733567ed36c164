#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_stream::try_stream;
use futures::{SinkExt as _, Stream, StreamExt as _, future};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, Sleep, sleep, timeout};

use super::config::{Config, TransportOptions};
use super::dispatch::MessageDispatcher;
use super::error::WsError;
use super::event::{Event, ReinitReason};
use super::heartbeat::{HeartbeatMonitor, Ping};
use super::reconnect::ReconnectPolicy;
use super::traits::{JsonParser, MessageParser};
use super::transport::{
    Connection, Connector, Frame, FrameSink, PendingConnection, TungsteniteConnector,
};
use super::watchdog::{StalenessWatchdog, is_stale};
use crate::Result;
use crate::error::{Error, Kind};

/// Broadcast channel capacity for events.
const BROADCAST_CAPACITY: usize = 1024;

/// Lifecycle of the managed connection.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No connection attempt has been made yet
    Idle,
    /// A transport is being opened
    Connecting,
    /// The transport is open and both timers are running
    Open,
    /// The transport failed or closed and a delayed reinit is pending
    Closing,
    /// No automatic recovery is pending. Call [`ConnectionManager::reinit`] after fixing the cause
    Failed,
}

impl LifecycleState {
    /// Check if the connection is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Work items processed by the connection task, in arrival order.
#[derive(Debug)]
pub(crate) enum Command {
    Start,
    Reinit(ReinitReason),
    Send(Frame),
    Ping,
    SetAddress(String),
    Heartbeat { generation: u64 },
    StaleCheck { generation: u64 },
}

/// Manages a single logical WebSocket connection that heals itself.
///
/// The connection is owned by a background task. This handle only posts commands to it and
/// observes what it publishes, so it is cheap to clone and never blocks. Failures are never
/// returned from [`send`](Self::send), [`ping`](Self::ping) or [`reinit`](Self::reinit); they
/// are published as [`Event::Error`].
///
/// The task exits once every clone of the manager has been dropped.
///
/// # Type Parameters
///
/// - `M`: Decoded message type
/// - `P`: Parser type that implements [`MessageParser<M>`]
///
/// # Example
///
/// ```ignore
/// let config = Config::builder().address("wss://stream.example.com/ws").build();
/// let manager = ConnectionManager::<Value>::new(config, JsonParser::new())?;
///
/// let mut events = manager.subscribe();
/// manager.start()?;
///
/// while let Ok(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// ```
pub struct ConnectionManager<M, P = JsonParser<M>> {
    /// Mailbox of the connection task
    commands: UnboundedSender<Command>,
    /// Broadcast sender for lifecycle events and decoded messages
    events: broadcast::Sender<Event<M>>,
    /// Watch channel receiver for the lifecycle state
    state_rx: watch::Receiver<LifecycleState>,
    started: Arc<AtomicBool>,
    _phantom: PhantomData<fn() -> P>,
}

impl<M, P> Clone for ConnectionManager<M, P> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            events: self.events.clone(),
            state_rx: self.state_rx.clone(),
            started: Arc::clone(&self.started),
            _phantom: PhantomData,
        }
    }
}

impl<M, P> ConnectionManager<M, P>
where
    M: Clone + Send + 'static,
    P: MessageParser<M>,
{
    /// Create a manager that connects through [`TungsteniteConnector`].
    ///
    /// The connection task is spawned idle; nothing happens until [`start`](Self::start).
    pub fn new(config: Config, parser: P) -> Result<Self> {
        Self::with_connector(config, parser, TungsteniteConnector)
    }

    /// Create a manager that opens transports through `connector`.
    pub fn with_connector<C: Connector>(config: Config, parser: P, connector: C) -> Result<Self> {
        config.validate()?;

        let (commands, mailbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(LifecycleState::Idle);

        let actor = ConnectionActor {
            policy: ReconnectPolicy::new(&config),
            transport: config.transport.clone(),
            connector: Box::new(connector),
            dispatcher: MessageDispatcher::new(parser, events.clone()),
            events: events.clone(),
            state: state_tx,
            mailbox,
            weak_mailbox: commands.downgrade(),
            handle: None,
            generation: 0,
            last_message: None,
            heartbeat: None,
            watchdog: None,
            retry: None,
            bootstrap: None,
            config,
        };
        tokio::spawn(actor.run());

        Ok(Self {
            commands,
            events,
            state_rx,
            started: Arc::new(AtomicBool::new(false)),
            _phantom: PhantomData,
        })
    }

    /// Schedule the first connection attempt after the configured bootstrap delay.
    ///
    /// Subscribe before calling this to observe the first attempt. Calling `start` a second time
    /// is rejected with [`WsError::AlreadyStarted`].
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(WsError::AlreadyStarted.into());
        }

        self.commands
            .send(Command::Start)
            .map_err(|_e| WsError::ManagerStopped)?;
        Ok(())
    }

    /// Tear down the current connection and connect again right away.
    pub fn reinit<S: Into<String>>(&self, detail: S) {
        self.post(Command::Reinit(ReinitReason::ManualReinit {
            detail: detail.into(),
        }));
    }

    /// Serialize `message` to JSON and write it to the open transport.
    ///
    /// Nothing is queued: if no transport is open an [`Event::Error`] of kind [`Kind::Send`] is
    /// published and the message is dropped.
    pub fn send<R: Serialize>(&self, message: &R) {
        match serde_json::to_string(message) {
            Ok(json) => self.send_frame(Frame::Text(json)),
            Err(e) => self.publish_error(Error::from(e).with_kind(Kind::Send)),
        }
    }

    /// Write a raw frame to the open transport.
    pub fn send_frame(&self, frame: Frame) {
        self.post(Command::Send(frame));
    }

    /// Send a liveness probe, `{"type":"ping","time":<unix ms>}`.
    pub fn ping(&self) {
        self.post(Command::Ping);
    }

    /// Replace the static destination. Takes effect on the next reinit.
    pub fn set_address<S: Into<String>>(&self, address: S) {
        self.post(Command::SetAddress(address.into()));
    }

    /// Subscribe to lifecycle events and decoded messages.
    ///
    /// Each call returns a new independent receiver. Multiple subscribers can
    /// receive events concurrently without blocking each other.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event<M>> {
        self.events.subscribe()
    }

    /// Stream of decoded messages only, skipping lifecycle events.
    ///
    /// Yields [`WsError::Lagged`] when the consumer fell behind and messages were dropped.
    pub fn messages(&self) -> impl Stream<Item = Result<M>> + use<M, P> {
        let mut rx = self.events.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(Event::Message(message)) => yield message,
                    Ok(_) => {}
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Message stream lagged, missed {count} events");
                        Err(WsError::Lagged { count })?;
                    }
                    Err(RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    /// Get the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state_rx.borrow()
    }

    /// Subscribe to lifecycle state changes.
    ///
    /// Useful for re-sending subscriptions every time the connection opens again.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<LifecycleState> {
        self.state_rx.clone()
    }

    fn post(&self, command: Command) {
        if self.commands.send(command).is_err() {
            self.publish_error(WsError::ManagerStopped.into());
        }
    }

    fn publish_error(&self, error: Error) {
        _ = self.events.send(Event::Error(Arc::new(error)));
    }
}

/// Something that happened on the transport owned by a [`ConnectionHandle`].
enum TransportEvent {
    Opened,
    Frame(Frame),
    Failed(Error),
    Closed,
}

enum Link {
    Connecting(PendingConnection),
    Open(Connection),
    /// Reported its terminal event; never yields again
    Finished,
}

/// Exclusive owner of one transport attempt. Dropping it closes the transport.
struct ConnectionHandle {
    link: Link,
}

impl ConnectionHandle {
    fn new(pending: PendingConnection) -> Self {
        Self {
            link: Link::Connecting(pending),
        }
    }

    /// Next transport event. Cancel safe.
    ///
    /// After an error or a close this stays pending forever, so a handle reports at most one
    /// terminal event.
    async fn next_event(&mut self) -> TransportEvent {
        match &mut self.link {
            Link::Connecting(pending) => match pending.await {
                Ok(connection) => {
                    self.link = Link::Open(connection);
                    TransportEvent::Opened
                }
                Err(e) => {
                    self.link = Link::Finished;
                    TransportEvent::Failed(e)
                }
            },
            Link::Open(connection) => match connection.stream.next().await {
                Some(Ok(frame)) => TransportEvent::Frame(frame),
                Some(Err(e)) => {
                    self.link = Link::Finished;
                    TransportEvent::Failed(e)
                }
                None => {
                    self.link = Link::Finished;
                    TransportEvent::Closed
                }
            },
            Link::Finished => future::pending().await,
        }
    }

    fn sink(&mut self) -> Option<&mut FrameSink> {
        match &mut self.link {
            Link::Open(connection) => Some(&mut connection.sink),
            Link::Connecting(_) | Link::Finished => None,
        }
    }
}

/// A reinit waiting for the reconnect delay to pass.
struct PendingRetry {
    sleep: Pin<Box<Sleep>>,
    reason: ReinitReason,
}

/// Background task owning the connection, its timers and the lifecycle state.
struct ConnectionActor<M, P> {
    config: Config,
    policy: ReconnectPolicy,
    transport: TransportOptions,
    connector: Box<dyn Connector>,
    dispatcher: MessageDispatcher<M, P>,
    events: broadcast::Sender<Event<M>>,
    state: watch::Sender<LifecycleState>,
    mailbox: UnboundedReceiver<Command>,
    /// Handed to timers so they never keep the task alive
    weak_mailbox: WeakUnboundedSender<Command>,
    handle: Option<ConnectionHandle>,
    /// Incremented for every new handle; timer ticks from older attempts are ignored
    generation: u64,
    last_message: Option<Instant>,
    heartbeat: Option<HeartbeatMonitor>,
    watchdog: Option<StalenessWatchdog>,
    retry: Option<PendingRetry>,
    bootstrap: Option<Pin<Box<Sleep>>>,
}

impl<M, P> ConnectionActor<M, P>
where
    M: Clone + Send + 'static,
    P: MessageParser<M>,
{
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = next_transport_event(&mut self.handle) => self.handle_transport_event(event),
                () = retry_elapsed(&mut self.retry) => {
                    if let Some(retry) = self.retry.take() {
                        self.reinit(retry.reason).await;
                    }
                }
                () = bootstrap_elapsed(&mut self.bootstrap) => {
                    self.bootstrap = None;
                    self.reinit(ReinitReason::Startup).await;
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("All connection manager handles dropped, stopping connection task");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => {
                self.bootstrap = Some(Box::pin(sleep(self.config.bootstrap_delay)));
            }
            Command::Reinit(reason) => self.reinit(reason).await,
            Command::Send(frame) => {
                if let Err(e) = self.write(frame).await {
                    self.emit_error(e.with_kind(Kind::Send));
                }
            }
            Command::Ping => self.ping().await,
            Command::SetAddress(address) => self.policy.set_address(address),
            Command::Heartbeat { generation } => {
                if generation == self.generation && self.heartbeat.is_some() {
                    self.ping().await;
                }
            }
            Command::StaleCheck { generation } => {
                if generation == self.generation
                    && self.watchdog.is_some()
                    && is_stale(
                        self.last_message,
                        Instant::now(),
                        self.config.heartbeat_interval,
                    )
                {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        "No message received for over {:?}, reinitializing",
                        self.config.heartbeat_interval
                    );
                    self.reinit(ReinitReason::InactivityTimeout).await;
                }
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.handle_open(),
            TransportEvent::Frame(frame) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(?frame, "Received WebSocket frame");
                self.dispatcher.handle(&frame, &mut self.last_message);
            }
            TransportEvent::Failed(e) => self.handle_error(e),
            TransportEvent::Closed => self.handle_close(),
        }
    }

    /// Tear down whatever exists and start a new connection attempt.
    async fn reinit(&mut self, reason: ReinitReason) {
        self.last_message = None;

        if !self.policy.has_destination() {
            self.fail(WsError::AddressRequired.into());
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(%reason, "Reinitializing WebSocket connection");
        self.emit(Event::ReinitStarted(reason));

        self.teardown();
        self.set_state(LifecycleState::Connecting);

        let address = match self.policy.resolve().await {
            Ok(address) => address,
            Err(e) if e.kind() == Kind::Configuration => {
                self.fail(e);
                return;
            }
            Err(e) => {
                self.setup_failed(e);
                return;
            }
        };

        let pending = match self.connector.connect(&address, &self.transport) {
            Ok(pending) => pending,
            Err(e) => {
                self.setup_failed(e.with_kind(Kind::TransportSetup));
                return;
            }
        };

        self.generation = self.generation.wrapping_add(1);
        self.handle = Some(ConnectionHandle::new(pending));

        #[cfg(feature = "tracing")]
        tracing::debug!(%address, generation = self.generation, "Connecting to WebSocket");
        self.emit(Event::Connecting { address });

        self.heartbeat = Some(HeartbeatMonitor::spawn(
            self.config.heartbeat_interval,
            self.generation,
            self.weak_mailbox.clone(),
        ));
        self.watchdog = Some(StalenessWatchdog::spawn(
            self.config.stale_check_interval,
            self.generation,
            self.weak_mailbox.clone(),
        ));
    }

    fn handle_open(&mut self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(generation = self.generation, "WebSocket connection opened");

        self.policy.reset();
        self.set_state(LifecycleState::Open);
        self.emit(Event::Connected);
    }

    fn handle_error(&mut self, error: Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %error, "WebSocket connection failed");

        let detail = error.to_string();
        self.emit_error(error.with_kind(Kind::Remote));
        self.schedule_retry(ReinitReason::RemoteError { detail });
    }

    fn handle_close(&mut self) {
        #[cfg(feature = "tracing")]
        tracing::warn!("WebSocket connection closed by remote");

        self.emit_error(WsError::ConnectionClosed.into());
        self.schedule_retry(ReinitReason::RemoteClosed);
    }

    /// A transport could not be set up at all.
    fn setup_failed(&mut self, error: Error) {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %error, "Unable to set up WebSocket transport");

        if self.config.retry_on_setup_failure {
            let detail = error.to_string();
            self.emit_error(error);
            self.schedule_retry(ReinitReason::SetupFailed { detail });
        } else {
            self.fail(error);
        }
    }

    /// Give up until someone calls reinit.
    fn fail(&mut self, error: Error) {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %error, "WebSocket connection manager cannot connect");

        self.teardown();
        self.set_state(LifecycleState::Failed);
        self.emit_error(error);
    }

    fn schedule_retry(&mut self, reason: ReinitReason) {
        self.detach();

        let delay = self.policy.next_delay();
        #[cfg(feature = "tracing")]
        tracing::debug!(%reason, ?delay, "Scheduling WebSocket reinit");

        self.retry = Some(PendingRetry {
            sleep: Box::pin(sleep(delay)),
            reason,
        });
        self.set_state(LifecycleState::Closing);
    }

    /// Drop the current handle and its timers.
    fn detach(&mut self) {
        self.heartbeat = None;
        self.watchdog = None;
        self.handle = None;
    }

    /// Drop the current handle, its timers and anything waiting to reinit.
    fn teardown(&mut self) {
        self.detach();
        self.retry = None;
        self.bootstrap = None;
    }

    async fn ping(&mut self) {
        let result = match serde_json::to_string(&Ping::now()) {
            Ok(json) => self.write(Frame::Text(json)).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "Heartbeat failed");
            self.emit_error(e.with_kind(Kind::Heartbeat));
        }
    }

    /// Write one frame, waiting at most `heartbeat_interval` for the transport.
    ///
    /// A transport that cannot take the frame in time is recycled like a remote failure.
    async fn write(&mut self, frame: Frame) -> Result<()> {
        let limit = self.config.heartbeat_interval;
        let sink = self
            .handle
            .as_mut()
            .and_then(ConnectionHandle::sink)
            .ok_or(WsError::NotConnected)?;

        if let Ok(result) = timeout(limit, sink.send(frame)).await {
            return result;
        }

        let error = WsError::WriteTimeout(limit);
        #[cfg(feature = "tracing")]
        tracing::warn!(%error, "WebSocket transport stopped accepting frames");
        self.schedule_retry(ReinitReason::RemoteError {
            detail: error.to_string(),
        });

        Err(error.into())
    }

    fn set_state(&self, state: LifecycleState) {
        _ = self.state.send_replace(state);
    }

    fn emit(&self, event: Event<M>) {
        _ = self.events.send(event);
    }

    fn emit_error(&self, error: Error) {
        self.emit(Event::Error(Arc::new(error)));
    }
}

async fn next_transport_event(handle: &mut Option<ConnectionHandle>) -> TransportEvent {
    match handle {
        Some(handle) => handle.next_event().await,
        None => future::pending().await,
    }
}

async fn retry_elapsed(retry: &mut Option<PendingRetry>) {
    match retry {
        Some(retry) => retry.sleep.as_mut().await,
        None => future::pending().await,
    }
}

async fn bootstrap_elapsed(bootstrap: &mut Option<Pin<Box<Sleep>>>) {
    match bootstrap {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}
