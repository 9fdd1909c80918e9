//! `parking-manager`: allocate slots from the terminal.
//!
//! Connects to the broker (exits if it cannot), then reads commands from
//! stdin. Every accepted `park` / `leave` has been confirmed by the broker
//! before it is reported.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parking_broker::mqtt::MqttTransport;
use parking_broker::{BrokerClient, SessionState, Transport};
use parking_core::{Allocator, EventPublisher};
use parking_service::cli::BrokerArgs;
use parking_service::console::{Console, HELP, describe_session};
use parking_service::init_logging;
use tokio::io::BufReader;

#[derive(Debug, Parser)]
#[command(
    name = "parking-manager",
    about = "Allocate parking slots and publish occupancy changes"
)]
struct Cli {
    #[command(flatten)]
    broker: BrokerArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info");
    let cli = Cli::parse();

    let config = cli.broker.load_config().context("failed to load config")?;
    let catalog = Arc::new(config.slot_catalog()?);

    let transport: Arc<dyn Transport> = Arc::new(MqttTransport::new());
    let session = BrokerClient::connect(transport, config.broker.clone())
        .await
        .with_context(|| {
            format!(
                "failed to connect to MQTT broker at {}",
                config.broker.endpoint()
            )
        })?;
    tokio::spawn(report_session(session.clone()));

    let publisher: Arc<dyn EventPublisher> = Arc::new(session.clone());
    let allocator = Arc::new(Allocator::new(catalog, publisher));
    let console = Console::new(allocator).with_session(session.clone());

    println!("{HELP}");
    tokio::select! {
        served = console.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => {
            served.context("console I/O failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    session.disconnect().await;
    Ok(())
}

/// Tell the operator when the broker session drops or comes back.
async fn report_session(session: BrokerClient) {
    let mut state = session.watch_state();
    let mut was_connected = session.is_connected();
    while state.changed().await.is_ok() {
        let current = state.borrow_and_update().clone();
        match current {
            SessionState::Connected if !was_connected => {
                eprintln!("Reconnected to MQTT broker.");
                was_connected = true;
            }
            SessionState::Reconnecting { .. } if was_connected => {
                eprintln!("Disconnected from MQTT broker, attempting to reconnect...");
                was_connected = false;
            }
            SessionState::Closed => break,
            other => tracing::debug!(state = %describe_session(&other), "session state"),
        }
    }
}
