#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Scripted manager console sessions against the in-process broker.

use std::sync::Arc;
use std::time::Duration;

use parking_broker::memory::MemoryBroker;
use parking_broker::{BrokerClient, ConnectOptions};
use parking_core::{Allocator, DisplayListener, EventPublisher, SlotCatalog};
use parking_service::board;
use parking_service::console::{Command, Console, Reply};
use pretty_assertions::assert_eq;

async fn connect(broker: &MemoryBroker, client_id: &str) -> BrokerClient {
    let options = ConnectOptions {
        client_id: Some(client_id.to_string()),
        publish_timeout_ms: 500,
        ..ConnectOptions::default()
    };
    BrokerClient::connect(Arc::new(broker.clone()), options)
        .await
        .unwrap()
}

async fn console(broker: &MemoryBroker) -> Console {
    let session = connect(broker, "manager").await;
    let publisher: Arc<dyn EventPublisher> = Arc::new(session.clone());
    let allocator = Arc::new(Allocator::new(Arc::new(SlotCatalog::standard()), publisher));
    Console::new(allocator).with_session(session)
}

async fn run_script(console: &Console, script: &str) -> String {
    let mut output = Vec::new();
    console.run(script.as_bytes(), &mut output).await.unwrap();
    String::from_utf8(output).unwrap()
}

#[tokio::test]
async fn park_and_leave_round_trip() {
    let broker = MemoryBroker::new();
    let console = console(&broker).await;

    let transcript = run_script(
        &console,
        "park car\npark car\nleave car 15\nleave car 15\nleave electric 16\npark truck\n",
    )
    .await;

    assert_eq!(
        transcript.lines().collect::<Vec<_>>(),
        vec![
            "Your parking spot is: 15 on floor1",
            "Your parking spot is: 16 on floor1",
            "Slot 15 on floor1 is now free.",
            "This slot is not currently occupied!",
            "This slot is not available for your vehicle type!",
            "Unknown vehicle type: truck",
        ]
    );
    let topics: Vec<String> = broker.published().into_iter().map(|m| m.topic).collect();
    assert_eq!(
        topics,
        vec![
            "parking/floor1/slot15",
            "parking/floor1/slot16",
            "parking/floor1/slot15",
        ]
    );
}

#[tokio::test]
async fn full_category_is_reported() {
    let broker = MemoryBroker::new();
    let console = console(&broker).await;

    let transcript = run_script(&console, &"park motorcycle\n".repeat(5)).await;

    assert_eq!(
        transcript.lines().last(),
        Some("No free slots available for motorcycle!")
    );
}

#[tokio::test]
async fn quit_stops_reading() {
    let broker = MemoryBroker::new();
    let console = console(&broker).await;

    let transcript = run_script(&console, "help\n\nquit\npark car\n").await;

    assert!(transcript.starts_with("commands:"));
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn rejected_publish_is_shown_and_not_committed() {
    let broker = MemoryBroker::new();
    let console = console(&broker).await;
    broker.reject_next_publishes(1);

    let Reply::Text(first) = console.execute(Command::parse("park car").unwrap().unwrap()).await
    else {
        panic!("expected text");
    };
    let Reply::Text(status) = console.execute(Command::Status).await else {
        panic!("expected text");
    };

    assert!(first.starts_with("Failed to publish to topic parking/floor1/slot15"));
    assert!(status.contains("car: 10 free, 0 occupied of 10"));
    assert!(status.ends_with("broker: connected"));
}

#[tokio::test]
async fn slots_lists_occupancy() {
    let broker = MemoryBroker::new();
    let console = console(&broker).await;

    let transcript = run_script(&console, "park electric\nslots electric\n").await;

    assert_eq!(
        transcript.lines().skip(1).collect::<Vec<_>>(),
        vec![
            "electric slots:",
            "  floor1: 10 (occupied), 11, 12",
            "  floor2: 20, 21, 22",
        ]
    );
}

#[tokio::test]
async fn display_board_follows_console() {
    let broker = MemoryBroker::new();
    let display_session = connect(&broker, "display").await;
    let listener = DisplayListener::attach(&display_session).await.unwrap();
    let console = console(&broker).await;

    run_script(&console, "park car\npark electric\n").await;

    let mut mirror = listener.watch();
    tokio::time::timeout(
        Duration::from_secs(2),
        mirror.wait_for(|m| m.occupied().len() == 2),
    )
    .await
    .unwrap()
    .unwrap();
    let board = board::render(
        &SlotCatalog::standard(),
        &listener.snapshot(),
        &display_session.state(),
    );

    assert!(board.contains("  Slot 15: Occupied\n"));
    assert!(board.contains("  Slot 10: Occupied\n"));
    assert!(board.contains("  Slot 16: Available\n"));
    assert!(!board.contains("[broker"));
}
