//! `parking-display`: live status board.
//!
//! Starts even when the broker is down and keeps reconnecting in the
//! background. The board is reprinted whenever the mirror or the session
//! state changes.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parking_broker::mqtt::MqttTransport;
use parking_broker::{BrokerClient, Transport};
use parking_core::DisplayListener;
use parking_service::board;
use parking_service::cli::BrokerArgs;
use parking_service::init_logging;

#[derive(Debug, Parser)]
#[command(name = "parking-display", about = "Show live parking slot occupancy")]
struct Cli {
    #[command(flatten)]
    broker: BrokerArgs,

    /// Do not clear the terminal between boards.
    #[arg(long = "no-clear")]
    no_clear: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("warn");
    let cli = Cli::parse();

    let config = cli.broker.load_config().context("failed to load config")?;
    let catalog = config.slot_catalog()?;

    let transport: Arc<dyn Transport> = Arc::new(MqttTransport::new());
    let session = BrokerClient::start(transport, config.broker.clone());
    let listener = DisplayListener::attach(&session)
        .await
        .context("failed to subscribe to occupancy updates")?;
    tracing::info!(endpoint = %config.broker.endpoint(), "display started");

    let mut mirror = listener.watch();
    let mut state = session.watch_state();
    loop {
        let board = board::render(&catalog, &mirror.borrow_and_update(), &state.borrow_and_update());
        if !cli.no_clear {
            print!("\x1b[2J\x1b[H");
        }
        println!("Parking Status Display\n\n{board}");

        tokio::select! {
            changed = mirror.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.disconnect().await;
    Ok(())
}
