//! Outbound replication: local bus to broker.
//!
//! [`OutboundReplicator`] is a bus listener. The bus dispatches synchronously,
//! so the listener only decides and encodes; the actual broker publish happens
//! on an [`OutboundForwarder`] task fed through an unbounded queue.
//!
//! ```text
//! bus.post ─▶ OutboundReplicator ──(queue)──▶ OutboundForwarder ─▶ Broker
//!             origin == local?                 publish, log failures
//! ```

use crate::broker::{Broker, BrokerMessage};
use crate::bus::{Interest, Listener, ListenerError};
use crate::config::ReplicationConfig;
use crate::event::{AccountEvent, EventError};
use crate::metrics::ReplicationMetrics;
use crate::replication::select_category;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An encoded event waiting to be published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination topic
    pub topic: String,
    /// Encoded event
    pub message: BrokerMessage,
}

/// Bus listener forwarding locally originated events to the broker.
pub struct OutboundReplicator {
    config: ReplicationConfig,
    queue: mpsc::UnboundedSender<OutboundMessage>,
}

impl OutboundReplicator {
    /// Create a replicator and the forwarder that drains its queue.
    #[must_use]
    pub fn new(config: ReplicationConfig, broker: Arc<dyn Broker>) -> (Self, OutboundForwarder) {
        let (queue, pending) = mpsc::unbounded_channel();
        (
            Self { config, queue },
            OutboundForwarder { broker, pending },
        )
    }

    /// Topic an event belongs on.
    #[must_use]
    pub fn topic_for(&self, event: &AccountEvent) -> String {
        self.config.topic(select_category(event.categories()))
    }

    /// Decide what to do with an event.
    ///
    /// Returns `None` for events that originated elsewhere; they already came
    /// from the broker and must not be echoed back out.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the event cannot be encoded.
    pub fn route(&self, event: &AccountEvent) -> Result<Option<OutboundMessage>, EventError> {
        if !event.originated_at(&self.config.application) {
            return Ok(None);
        }
        Ok(Some(OutboundMessage {
            topic: self.topic_for(event),
            message: BrokerMessage::encode(event)?,
        }))
    }
}

impl Listener for OutboundReplicator {
    fn name(&self) -> &str {
        "outbound-replication"
    }

    fn interest(&self) -> Interest {
        Interest::All
    }

    fn on_event(&self, event: &AccountEvent) -> Result<(), ListenerError> {
        let routed = self
            .route(event)
            .map_err(|e| ListenerError::new(self.name(), e.to_string()))?;

        let Some(outbound) = routed else {
            tracing::trace!(
                event_id = %event.id,
                origin = %event.application,
                "Skipping foreign event"
            );
            ReplicationMetrics::record_discarded("outbound");
            return Ok(());
        };

        tracing::debug!(
            event_id = %event.id,
            kind = %event.kind(),
            topic = %outbound.topic,
            "Queueing event for broker"
        );
        self.queue
            .send(outbound)
            .map_err(|_| ListenerError::new(self.name(), "forwarder has shut down"))
    }
}

/// Counts reported when a forwarder finishes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForwarderReport {
    /// Messages the broker accepted
    pub published: usize,
    /// Messages the broker rejected
    pub failed: usize,
}

/// Task publishing queued messages to the broker.
pub struct OutboundForwarder {
    broker: Arc<dyn Broker>,
    pending: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl OutboundForwarder {
    /// Publish queued messages until every replicator is dropped.
    ///
    /// Each message is attempted once. A failed publish is logged and counted
    /// and never stops the loop.
    pub async fn run(mut self) -> ForwarderReport {
        let mut report = ForwarderReport::default();

        while let Some(OutboundMessage { topic, message }) = self.pending.recv().await {
            match self.broker.publish(&topic, &message).await {
                Ok(()) => {
                    ReplicationMetrics::record_forwarded(&topic);
                    report.published += 1;
                },
                Err(error) => {
                    tracing::error!(
                        topic = %topic,
                        message_id = %message.message_id,
                        event_type = %message.event_type,
                        error = %error,
                        "Failed to forward event to broker"
                    );
                    ReplicationMetrics::record_publish_failure(&topic);
                    report.failed += 1;
                },
            }
        }

        tracing::debug!(
            published = report.published,
            failed = report.failed,
            "Outbound forwarder exiting"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, AccountId};
    use crate::broker::{BrokerError, MessageStream};
    use crate::event::{EventKind, EventPayload};
    use chrono::Utc;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingBroker {
        published: Mutex<Vec<(String, String)>>,
        reject: bool,
    }

    impl Broker for CapturingBroker {
        fn publish(
            &self,
            topic: &str,
            message: &BrokerMessage,
        ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
            let topic = topic.to_string();
            let event_type = message.event_type.clone();
            Box::pin(async move {
                if self.reject {
                    return Err(BrokerError::PublishFailed {
                        topic,
                        reason: "rejected".to_string(),
                    });
                }
                if let Ok(mut published) = self.published.lock() {
                    published.push((topic, event_type));
                }
                Ok(())
            })
        }

        fn subscribe(
            &self,
            topic: &str,
            _event_type: &str,
        ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BrokerError>> + Send + '_>> {
            let topic = topic.to_string();
            Box::pin(async move {
                Err(BrokerError::SubscriptionFailed {
                    topic,
                    reason: "not supported".to_string(),
                })
            })
        }
    }

    fn config() -> ReplicationConfig {
        ReplicationConfig::new("accounts-eu", "accounts")
    }

    fn event(application: &str, payload: EventPayload) -> AccountEvent {
        let account = Account::new(AccountId::new(), "default", "Ada", "iss", "sub", Utc::now());
        AccountEvent::new(application, account, payload, Utc::now())
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if routing fails
    fn local_event_is_routed_to_most_specific_topic() {
        let (replicator, _forwarder) =
            OutboundReplicator::new(config(), Arc::new(CapturingBroker::default()));

        let routed = replicator
            .route(&event("accounts-eu", EventPayload::Banned))
            .expect("routing should succeed")
            .expect("local event should be routed");

        assert_eq!(routed.topic, "accounts.arbitration");
        assert_eq!(routed.message.event_type, EventKind::Banned.type_tag());
    }

    #[test]
    fn foreign_event_is_not_routed() {
        let (replicator, _forwarder) =
            OutboundReplicator::new(config(), Arc::new(CapturingBroker::default()));

        let routed = replicator.route(&event("accounts-us", EventPayload::Banned));
        assert!(matches!(routed, Ok(None)));
    }

    #[test]
    fn topic_follows_configured_names() {
        let config = config().with_topic(crate::event::Category::State, "lifecycle");
        let (replicator, _forwarder) =
            OutboundReplicator::new(config, Arc::new(CapturingBroker::default()));

        assert_eq!(
            replicator.topic_for(&event("accounts-eu", EventPayload::Deleted)),
            "accounts.lifecycle"
        );
        assert_eq!(
            replicator.topic_for(&event("accounts-eu", EventPayload::Created)),
            "accounts.activity"
        );
    }

    #[tokio::test]
    async fn forwarder_publishes_each_local_event_once() {
        let broker = Arc::new(CapturingBroker::default());
        let (replicator, forwarder) = OutboundReplicator::new(config(), broker.clone());

        assert!(replicator.on_event(&event("accounts-eu", EventPayload::Deleted)).is_ok());
        assert!(replicator.on_event(&event("accounts-us", EventPayload::Deleted)).is_ok());
        assert!(replicator
            .on_event(&event("accounts-eu", EventPayload::NameChanged { previous: "Bob".into() }))
            .is_ok());
        drop(replicator);

        let report = forwarder.run().await;

        assert_eq!(report, ForwarderReport { published: 2, failed: 0 });
        let published = broker.published.lock().map(|p| p.clone()).unwrap_or_default();
        assert_eq!(
            published,
            vec![
                ("accounts.state".to_string(), EventKind::Deleted.type_tag().to_string()),
                (
                    "accounts.modification".to_string(),
                    EventKind::NameChanged.type_tag().to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn publish_failures_are_counted_not_fatal() {
        let broker = Arc::new(CapturingBroker {
            reject: true,
            ..CapturingBroker::default()
        });
        let (replicator, forwarder) = OutboundReplicator::new(config(), broker);

        assert!(replicator.on_event(&event("accounts-eu", EventPayload::Banned)).is_ok());
        assert!(replicator.on_event(&event("accounts-eu", EventPayload::Released)).is_ok());
        drop(replicator);

        assert_eq!(forwarder.run().await, ForwarderReport { published: 0, failed: 2 });
    }

    #[test]
    fn listener_reports_stopped_forwarder() {
        let (replicator, forwarder) =
            OutboundReplicator::new(config(), Arc::new(CapturingBroker::default()));
        drop(forwarder);

        let result = replicator.on_event(&event("accounts-eu", EventPayload::Banned));
        assert!(result.is_err());
    }
}
