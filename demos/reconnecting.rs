//! Keeps a connection to a public echo server alive and prints everything that happens.
//!
//! Every few seconds the demo sends a message, and halfway through it forces a reinit to show
//! the reconnect cycle.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=debug cargo run --example reconnecting --features tracing -- wss://echo.websocket.org
//! ```

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, timeout};
use tracing::{info, warn};
use ws_wrapper::ws::config::Config;
use ws_wrapper::ws::{ConnectionManager, Event, JsonParser};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://echo.websocket.org".to_owned());

    let config = Config::builder()
        .address(address)
        .heartbeat_interval(Duration::from_secs(20))
        .build();
    let manager = ConnectionManager::<Value>::new(config, JsonParser::new())?;
    let mut events = manager.subscribe();
    manager.start()?;

    let sender = manager.clone();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(5));
        for n in 0_u32..12 {
            ticker.tick().await;
            if n == 6 {
                sender.reinit("demo");
            }
            sender.send(&json!({ "op": "echo", "n": n }));
        }
    });

    while let Ok(received) = timeout(Duration::from_secs(70), events.recv()).await {
        match received {
            Ok(Event::ReinitStarted(reason)) => info!(%reason, "reinit started"),
            Ok(Event::Connecting { address }) => info!(%address, "connecting"),
            Ok(Event::Connected) => info!(state = ?manager.state(), "connected"),
            Ok(Event::Message(message)) => info!(%message, "message"),
            Ok(Event::Error(e)) => warn!(kind = ?e.kind(), error = %e, "error"),
            Ok(_) => {}
            Err(RecvError::Lagged(count)) => warn!(count, "lagged"),
            Err(RecvError::Closed) => break,
        }
    }

    Ok(())
}
