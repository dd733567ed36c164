#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use ws_wrapper::error::Kind;
use ws_wrapper::ws::config::{Config, TransportOptions};
use ws_wrapper::ws::{ConnectionManager, Event, JsonParser, ReinitReason};

const WAIT: Duration = Duration::from_secs(5);

enum Control {
    Text(String),
    Close,
}

/// One client connection accepted by [`MockWsServer`].
struct ServerConnection {
    api_key: Option<String>,
    control: mpsc::UnboundedSender<Control>,
    received: mpsc::UnboundedReceiver<String>,
}

impl ServerConnection {
    fn send(&self, text: &str) {
        drop(self.control.send(Control::Text(text.to_owned())));
    }

    fn close(&self) {
        drop(self.control.send(Control::Close));
    }

    async fn recv(&mut self) -> Option<String> {
        timeout(WAIT, self.received.recv()).await.ok().flatten()
    }
}

/// Mock WebSocket server.
struct MockWsServer {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<ServerConnection>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (connection_tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let mut api_key = None;
                let callback = |request: &Request,
                                response: Response|
                 -> Result<Response, ErrorResponse> {
                    api_key = request
                        .headers()
                        .get("x-api-key")
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_owned);
                    Ok(response)
                };
                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let (control_tx, mut control_rx) = mpsc::unbounded_channel();
                let (received_tx, received) = mpsc::unbounded_channel();
                drop(connection_tx.send(ServerConnection {
                    api_key,
                    control: control_tx,
                    received,
                }));

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(received_tx.send(text.to_string()));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            control = control_rx.recv() => {
                                match control {
                                    Some(Control::Text(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Some(Control::Close) | None => {
                                        drop(write.send(Message::Close(None)).await);
                                        break;
                                    }
                                }
                            }
                        }
                    }
                });
            }
        });

        Self { addr, connections }
    }

    fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    async fn next_connection(&mut self) -> ServerConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .unwrap()
            .unwrap()
    }
}

async fn wait_for<F>(
    events: &mut broadcast::Receiver<Event<Value>>,
    mut matches: F,
) -> Event<Value>
where
    F: FnMut(&Event<Value>) -> bool,
{
    loop {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if matches(&event) {
            return event;
        }
    }
}

fn config(address: String) -> Config {
    Config::builder()
        .address(address)
        .bootstrap_delay(Duration::from_millis(10))
        .reinit_delay(Duration::from_millis(100))
        .transport(
            TransportOptions::builder()
                .headers(BTreeMap::from([(
                    "x-api-key".to_owned(),
                    "secret".to_owned(),
                )]))
                .disable_nagle(true)
                .build(),
        )
        .build()
}

#[tokio::test]
async fn exchanges_messages_and_reconnects_after_close() {
    let mut server = MockWsServer::start().await;
    let manager =
        ConnectionManager::<Value>::new(config(server.ws_url("/ws")), JsonParser::new()).unwrap();
    let mut events = manager.subscribe();
    let mut messages = Box::pin(manager.messages());

    manager.start().unwrap();
    let mut first = server.next_connection().await;
    assert_eq!(first.api_key.as_deref(), Some("secret"));
    wait_for(&mut events, |e| matches!(e, Event::Connected)).await;

    first.send(r#"{"channel":"trades","price":"0.52"}"#);
    let message = timeout(WAIT, messages.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(message, json!({ "channel": "trades", "price": "0.52" }));

    manager.send(&json!({ "op": "subscribe", "channel": "trades" }));
    let sent: Value = serde_json::from_str(&first.recv().await.unwrap()).unwrap();
    assert_eq!(sent["op"], "subscribe");

    first.close();
    let event = wait_for(&mut events, |e| matches!(e, Event::ReinitStarted(_))).await;
    assert!(matches!(event, Event::ReinitStarted(ReinitReason::RemoteClosed)));

    let second = server.next_connection().await;
    wait_for(&mut events, |e| matches!(e, Event::Connected)).await;
    assert!(manager.state().is_open());

    second.send(r#"{"channel":"trades","price":"0.53"}"#);
    let message = timeout(WAIT, messages.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(message["price"], "0.53");
}

#[tokio::test]
async fn refused_connection_is_retried() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let manager =
        ConnectionManager::<Value>::new(config(format!("ws://{addr}/ws")), JsonParser::new())
            .unwrap();
    let mut events = manager.subscribe();
    manager.start().unwrap();

    let event = wait_for(&mut events, |e| e.as_error().is_some()).await;
    assert_eq!(event.as_error().unwrap().kind(), Kind::Remote);

    let event = wait_for(&mut events, |e| matches!(e, Event::ReinitStarted(_))).await;
    assert!(matches!(
        event,
        Event::ReinitStarted(ReinitReason::RemoteError { .. })
    ));
}
