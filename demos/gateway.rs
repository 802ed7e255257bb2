//! Connects to a gateway, prints every dispatch for a while, then shuts down.
//!
//! Run with tracing enabled:
//! ```sh
//! GATEWAY_URL=wss://gateway.example/?v=10 GATEWAY_TOKEN=... RUST_LOG=info,gateway_client=debug \
//!     cargo run --example gateway --features ws,tracing
//! ```
//!
//! `GATEWAY_SECONDS` controls how long the demo stays connected (default 60).

use std::time::Duration;

use gateway_client::config::Config;
use gateway_client::endpoint::Endpoint;
use gateway_client::gateway::{Delegate, GatewayConnection};
use gateway_client::protocol::{Envelope, Identify, Intents};
use gateway_client::transport::TungsteniteTransport;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

struct Printer;

impl Delegate for Printer {
    fn on_connection_established(&self) {
        info!("connection established");
    }

    fn on_connection_closed(&self) {
        warn!("connection closed");
    }

    fn on_connection_failed(&self) {
        warn!("connection attempt failed, retrying");
    }

    fn on_message(&self, envelope: Envelope) {
        info!(
            op = u16::from(envelope.op),
            event = envelope.t.as_deref().unwrap_or("-"),
            seq = ?envelope.s,
            "received"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let url = std::env::var("GATEWAY_URL")?;
    let token = std::env::var("GATEWAY_TOKEN")?;
    let seconds = std::env::var("GATEWAY_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);

    let endpoint = Endpoint::parse(&url)?;
    let identify = Identify::new(token).with_intents(Intents::GUILDS | Intents::GUILD_MESSAGES);
    let config = Config::builder().identify(identify).build();

    let gateway = GatewayConnection::new(endpoint, TungsteniteTransport::new(), Printer, config);
    gateway.connect();

    let mut phases = gateway.phase_receiver();
    let watcher = tokio::spawn(async move {
        while phases.changed().await.is_ok() {
            let phase = *phases.borrow_and_update();
            info!(%phase, "phase changed");
        }
    });

    tokio::time::sleep(Duration::from_secs(seconds)).await;

    info!(
        session_id = ?gateway.session_id(),
        last_ack = ?gateway.last_ack(),
        "shutting down"
    );
    gateway.dispose().await;
    watcher.abort();

    Ok(())
}
