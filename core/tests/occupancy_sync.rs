#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Allocator and display listeners talking through the in-process broker.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_broker::memory::MemoryBroker;
use parking_broker::{BrokerClient, ConnectOptions, ReconnectPolicy, SessionState};
use parking_core::{
    AllocationError, Allocator, DisplayListener, DisplayMirror, EventPublisher, FloorId,
    ReleaseError, SlotCatalog, SlotId, VehicleCategory,
};
use pretty_assertions::assert_eq;

const WAIT: Duration = Duration::from_secs(2);

fn options(client_id: &str) -> ConnectOptions {
    ConnectOptions {
        client_id: Some(client_id.to_string()),
        connect_timeout_ms: 200,
        publish_timeout_ms: 500,
        reconnect: ReconnectPolicy {
            initial_delay_ms: 10,
            max_delay_ms: 40,
            factor: 2.0,
            jitter: false,
        },
        ..ConnectOptions::default()
    }
}

async fn client(broker: &MemoryBroker, client_id: &str) -> BrokerClient {
    BrokerClient::connect(Arc::new(broker.clone()), options(client_id))
        .await
        .expect("connect")
}

async fn manager(broker: &MemoryBroker) -> Allocator {
    let publisher: Arc<dyn EventPublisher> = Arc::new(client(broker, "manager").await);
    Allocator::new(Arc::new(SlotCatalog::standard()), publisher)
}

fn slots(ids: &[&str]) -> BTreeSet<SlotId> {
    ids.iter().copied().map(SlotId::from).collect()
}

async fn wait_for_mirror(listener: &DisplayListener, expected: &BTreeSet<SlotId>) {
    let mut rx = listener.watch();
    tokio::time::timeout(WAIT, rx.wait_for(|mirror: &DisplayMirror| mirror.occupied() == expected))
        .await
        .expect("mirror did not converge")
        .expect("listener dropped");
}

fn car() -> VehicleCategory {
    VehicleCategory::from("car")
}

#[tokio::test]
async fn listeners_converge_on_allocator_state() {
    let broker = MemoryBroker::new();
    let left_session = client(&broker, "display-left").await;
    let right_session = client(&broker, "display-right").await;
    let left = DisplayListener::attach(&left_session).await.unwrap();
    let right = DisplayListener::attach(&right_session).await.unwrap();
    let allocator = manager(&broker).await;

    let (first, floor) = allocator.occupy(&car()).await.unwrap();
    allocator.occupy(&car()).await.unwrap();
    allocator
        .occupy(&VehicleCategory::from("electric"))
        .await
        .unwrap();
    allocator.release(&car(), &first).await.unwrap();

    assert_eq!(floor, FloorId::from("floor1"));
    let expected = slots(&["10", "16"]);
    assert_eq!(allocator.occupied().await, expected.iter().cloned().collect::<Vec<_>>());
    wait_for_mirror(&left, &expected).await;
    wait_for_mirror(&right, &expected).await;
}

#[tokio::test]
async fn late_listener_only_sees_new_events() {
    let broker = MemoryBroker::new();
    let allocator = manager(&broker).await;
    allocator.occupy(&car()).await.unwrap();

    let session = client(&broker, "display").await;
    let late = DisplayListener::attach(&session).await.unwrap();
    assert!(late.snapshot().occupied().is_empty());

    allocator.occupy(&car()).await.unwrap();
    wait_for_mirror(&late, &slots(&["16"])).await;
}

#[tokio::test]
async fn rejected_publish_changes_nothing_anywhere() {
    let broker = MemoryBroker::new();
    let session = client(&broker, "display").await;
    let display = DisplayListener::attach(&session).await.unwrap();
    let allocator = manager(&broker).await;
    broker.reject_next_publishes(1);

    let result = allocator.occupy(&car()).await;

    assert!(matches!(result, Err(AllocationError::PublishFailed { .. })));
    assert!(allocator.occupied().await.is_empty());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(display.snapshot().applied(), 0);

    // The same slot is offered again once the broker accepts.
    let (slot, _) = allocator.occupy(&car()).await.unwrap();
    assert_eq!(slot, SlotId::from("15"));
}

#[tokio::test]
async fn concurrent_occupy_hands_out_distinct_slots() {
    let broker = MemoryBroker::new();
    let allocator = Arc::new(manager(&broker).await);

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let allocator = Arc::clone(&allocator);
        tasks.push(tokio::spawn(async move { allocator.occupy(&car()).await }));
    }
    let mut taken = BTreeSet::new();
    for task in tasks {
        let (slot, _) = task.await.unwrap().unwrap();
        assert!(taken.insert(slot), "slot handed out twice");
    }

    assert_eq!(taken.len(), 10);
    assert_eq!(
        allocator.occupy(&car()).await,
        Err(AllocationError::NoFreeSlot(car()))
    );
}

#[tokio::test]
async fn disconnected_allocator_fails_fast_and_recovers() {
    let broker = MemoryBroker::new();
    let session = client(&broker, "manager").await;
    let publisher: Arc<dyn EventPublisher> = Arc::new(session.clone());
    let allocator = Allocator::new(Arc::new(SlotCatalog::standard()), publisher);
    let (slot, _) = allocator.occupy(&car()).await.unwrap();

    broker.set_offline(true);
    broker.drop_sessions();
    let mut state = session.watch_state();
    tokio::time::timeout(
        WAIT,
        state.wait_for(|s| matches!(s, SessionState::Reconnecting { .. })),
    )
    .await
    .unwrap()
    .unwrap();

    let occupy = allocator.occupy(&car()).await.unwrap_err();
    assert!(occupy.is_not_connected());
    let release = allocator.release(&car(), &slot).await.unwrap_err();
    assert!(matches!(release, ReleaseError::PublishFailed { .. }));
    assert!(release.is_not_connected());
    assert_eq!(allocator.occupied().await, vec![slot.clone()]);

    broker.set_offline(false);
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == SessionState::Connected))
        .await
        .unwrap()
        .unwrap();
    allocator.release(&car(), &slot).await.unwrap();
    assert!(allocator.occupied().await.is_empty());
}
