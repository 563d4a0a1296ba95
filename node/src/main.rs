//! Userbridge replication node.
//!
//! Runs one instance's replication plumbing: a local event bus, the outbound
//! replicator forwarding locally originated events to Redpanda, one inbound
//! subscription per event kind re-posting foreign events locally, and an audit
//! listener logging everything that crosses the bus.
//!
//! # Usage
//!
//! ```bash
//! USERBRIDGE_APPLICATION=accounts-eu \
//! USERBRIDGE_SYSTEM=accounts \
//! REDPANDA_BROKERS=localhost:9092 \
//! cargo run -p userbridge-node
//! ```

mod config;
mod metrics;

use anyhow::Context;
use config::NodeConfig;
use metrics::MetricsServer;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use userbridge_core::broker::Broker;
use userbridge_core::bus::{AuditListener, EventBus, LocalEventBus};
use userbridge_core::replication::{InboundReplicator, OutboundReplicator};
use userbridge_redpanda::RedpandaBroker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,userbridge_core=debug,userbridge_node=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        application = %config.replication.application,
        system = %config.replication.system,
        brokers = %config.brokers,
        "Starting Userbridge node"
    );

    MetricsServer::new(config.metrics_addr).start()?;

    let broker: Arc<dyn Broker> = Arc::new(
        RedpandaBroker::builder()
            .brokers(&config.brokers)
            .consumer_group(&config.consumer_group)
            .build()
            .context("Failed to create Redpanda broker")?,
    );

    let bus = Arc::new(LocalEventBus::new());
    bus.register(Arc::new(AuditListener));

    let (outbound, forwarder) = OutboundReplicator::new(config.replication.clone(), Arc::clone(&broker));
    bus.register(Arc::new(outbound));
    let forwarder = tokio::spawn(forwarder.run());

    let mut inbound = InboundReplicator::new(config.replication.clone(), bus.clone(), broker)
        .start()
        .await
        .context("Failed to subscribe inbound handlers")?;

    tracing::info!(listeners = bus.listener_count(), "Node running, press Ctrl+C to stop");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received, stopping...");
        }
        Some(ended) = inbound.join_next() => {
            tracing::warn!(report = ?ended.ok(), "Inbound subscription ended unexpectedly");
        }
    }

    inbound.abort_all();
    while inbound.join_next().await.is_some() {}
    // Dropping the bus drops the outbound replicator, which lets the forwarder
    // drain its queue and finish
    drop(bus);
    let report = forwarder.await.context("Forwarder task failed")?;
    tracing::info!(
        published = report.published,
        failed = report.failed,
        "Node stopped"
    );
    Ok(())
}
