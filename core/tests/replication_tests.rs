//! Two instances in one process, bridged by the in-memory broker.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use userbridge_core::broker::{BrokerError, BrokerMessage, ProtocolError};
use userbridge_core::bus::{EventBus, LocalEventBus};
use userbridge_core::config::ReplicationConfig;
use userbridge_core::environment::Clock;
use userbridge_core::replication::{InboundHandler, InboundReplicator, InboundReport, OutboundReplicator};
use userbridge_core::service::{AccountService, ReplicaApplier};
use userbridge_core::{AccountEvent, EventKind, EventPayload};
use userbridge_testing::helpers::{account, init_test_tracing};
use userbridge_testing::{InMemoryAccountStore, InMemoryBroker, RecordingListener, test_clock};

const SYSTEM: &str = "accounts";

struct Instance {
    store: Arc<InMemoryAccountStore>,
    recorder: Arc<RecordingListener>,
    service: AccountService,
    inbound: JoinSet<InboundReport>,
}

impl Instance {
    async fn start(application: &str, broker: &InMemoryBroker) -> Self {
        init_test_tracing();
        let config = ReplicationConfig::new(application, SYSTEM);
        let broker = Arc::new(broker.clone());
        let bus = Arc::new(LocalEventBus::new());
        let store = Arc::new(InMemoryAccountStore::new());
        let recorder = Arc::new(RecordingListener::new("recorder"));

        let (outbound, forwarder) = OutboundReplicator::new(config.clone(), broker.clone());
        bus.register(Arc::new(outbound));
        tokio::spawn(forwarder.run());

        let (applier, writer) = ReplicaApplier::new(application, store.clone());
        bus.register(Arc::new(applier));
        tokio::spawn(writer.run());

        bus.register(recorder.clone());

        let inbound = InboundReplicator::new(config, bus.clone(), broker)
            .start()
            .await
            .unwrap();

        let service = AccountService::new(store.clone(), bus, Arc::new(test_clock()), application);
        Self {
            store,
            recorder,
            service,
            inbound,
        }
    }
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn test_instances_converge_without_echo() {
    let broker = InMemoryBroker::new();
    let eu = Instance::start("accounts-eu", &broker).await;
    let us = Instance::start("accounts-us", &broker).await;

    let ada = eu.service.create(account("Ada")).await.unwrap();
    eventually("replica creation", || us.store.contains(ada.id)).await;

    eu.service.ban(ada.id).await.unwrap();
    eventually("replicated ban", || {
        us.store.get(ada.id).is_some_and(|a| a.banned_on.is_some())
    })
    .await;

    us.service.release(ada.id).await.unwrap();
    eventually("release back at origin", || {
        eu.store.get(ada.id).is_some_and(|a| a.banned_on.is_none())
    })
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        broker.published_topics(),
        vec!["accounts.activity", "accounts.arbitration", "accounts.arbitration"]
    );
    let expected = vec![EventKind::Created, EventKind::Banned, EventKind::Released];
    assert_eq!(eu.recorder.kinds(), expected);
    assert_eq!(us.recorder.kinds(), expected);
    assert!(us.recorder.events()[..2].iter().all(|e| e.application == "accounts-eu"));
    assert_eq!(eu.recorder.events()[2].application, "accounts-us");
}

#[tokio::test]
async fn test_broadcast_removal_reaches_peer() {
    let broker = InMemoryBroker::new();
    let eu = Instance::start("accounts-eu", &broker).await;
    let us = Instance::start("accounts-us", &broker).await;

    let ada = eu.service.create(account("Ada")).await.unwrap();
    eventually("replica creation", || us.store.contains(ada.id)).await;

    eu.service.remove(ada.id, true).await.unwrap();
    eventually("replica removal", || !us.store.contains(ada.id)).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!us.store.contains(ada.id));
    assert!(!eu.store.contains(ada.id));
}

#[tokio::test]
async fn test_malformed_messages_do_not_stop_replication() {
    let broker = InMemoryBroker::new();
    let mut us = Instance::start("accounts-us", &broker).await;
    let eu = Instance::start("accounts-eu", &broker).await;

    broker.inject(
        "accounts.activity",
        Err(ProtocolError::MissingHeader("type".to_string()).into()),
    );
    broker.inject("accounts.activity", Err(BrokerError::TransportError("flaky".to_string())));

    let ada = eu.service.create(account("Ada")).await.unwrap();
    eventually("replica creation", || us.store.contains(ada.id)).await;

    broker.close();
    let mut totals = InboundReport::default();
    while let Some(report) = us.inbound.join_next().await {
        let report = report.unwrap();
        totals.reposted += report.reposted;
        totals.rejected += report.rejected;
        totals.transport_errors += report.transport_errors;
    }
    assert_eq!(totals.reposted, 1);
    // Every kind on the activity topic saw both injected items
    let activity_kinds = EventKind::ALL
        .iter()
        .filter(|k| {
            userbridge_core::replication::select_category(k.categories())
                == userbridge_core::Category::Activity
        })
        .count();
    assert_eq!(totals.rejected, activity_kinds);
    assert_eq!(totals.transport_errors, activity_kinds);
}

#[test]
fn test_envelope_round_trip_through_inbound_decoder() {
    let config = ReplicationConfig::new("accounts-eu", SYSTEM);
    let bus = Arc::new(LocalEventBus::new());
    let recorder = Arc::new(RecordingListener::new("recorder"));
    bus.register(recorder.clone());
    let handler = InboundHandler::new(EventKind::Detained, &config, bus);

    let event = AccountEvent::new(
        "accounts-us",
        account("Ada"),
        EventPayload::Detained { days: 45 },
        test_clock().now(),
    );
    let message = BrokerMessage::encode(&event).unwrap();

    assert_eq!(message.decode(EventKind::Detained).unwrap(), event);
    handler.handle(&message).unwrap();
    assert_eq!(recorder.events(), vec![event]);
}
