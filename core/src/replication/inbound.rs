//! Inbound replication: broker to local bus.
//!
//! There is one [`InboundHandler`] per event kind, subscribed to the topic the
//! kind is published on. Foreign events are re-posted on the local bus, so the
//! local persistence and audit listeners run exactly as if the change had
//! happened here. Our own events looping back are dropped silently.
//!
//! A message that fails envelope validation is a protocol error: it is logged,
//! counted and dropped, and the subscription keeps running.

use crate::broker::{Broker, BrokerError, BrokerMessage, MessageStream, ProtocolError};
use crate::bus::{Delivery, EventBus};
use crate::config::ReplicationConfig;
use crate::event::EventKind;
use crate::metrics::ReplicationMetrics;
use crate::replication::select_category;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinSet;

/// What happened to one inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Foreign event, re-posted locally
    Reposted(Delivery),
    /// Our own event coming back, dropped
    Discarded,
}

/// Counts reported when a subscription ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InboundReport {
    /// Foreign events re-posted
    pub reposted: usize,
    /// Own events dropped
    pub discarded: usize,
    /// Messages dropped as protocol errors
    pub rejected: usize,
    /// Transport errors seen on the stream
    pub transport_errors: usize,
}

/// Subscription handler for one event kind.
pub struct InboundHandler {
    kind: EventKind,
    topic: String,
    application: String,
    bus: Arc<dyn EventBus>,
}

impl InboundHandler {
    /// Create the handler for `kind`.
    #[must_use]
    pub fn new(kind: EventKind, config: &ReplicationConfig, bus: Arc<dyn EventBus>) -> Self {
        Self {
            kind,
            topic: config.topic(select_category(kind.categories())),
            application: config.application.clone(),
            bus,
        }
    }

    /// Kind this handler accepts.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Topic this handler listens on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Process one message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the message does not carry a valid event of
    /// this handler's kind.
    pub fn handle(&self, message: &BrokerMessage) -> Result<InboundOutcome, ProtocolError> {
        let event = message.decode(self.kind)?;

        if event.originated_at(&self.application) {
            tracing::trace!(event_id = %event.id, "Dropping own event");
            ReplicationMetrics::record_discarded("inbound");
            return Ok(InboundOutcome::Discarded);
        }

        tracing::debug!(
            event_id = %event.id,
            kind = %self.kind,
            origin = %event.application,
            account_id = %event.account.id,
            "Re-posting foreign event"
        );
        ReplicationMetrics::record_reposted(self.kind);
        Ok(InboundOutcome::Reposted(self.bus.post(event)))
    }

    /// Subscribe to this handler's topic.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the broker refuses.
    pub async fn subscribe(&self, broker: &dyn Broker) -> Result<MessageStream, BrokerError> {
        broker.subscribe(&self.topic, self.kind.type_tag()).await
    }

    /// Handle messages until the stream ends.
    pub async fn consume(&self, mut stream: MessageStream) -> InboundReport {
        let mut report = InboundReport::default();

        while let Some(item) = stream.next().await {
            match item.map_err(Self::classify) {
                Ok(message) => match self.handle(&message) {
                    Ok(InboundOutcome::Reposted(_)) => report.reposted += 1,
                    Ok(InboundOutcome::Discarded) => report.discarded += 1,
                    Err(error) => {
                        self.reject(&error);
                        report.rejected += 1;
                    },
                },
                Err(Ok(error)) => {
                    self.reject(&error);
                    report.rejected += 1;
                },
                Err(Err(error)) => {
                    tracing::error!(
                        topic = %self.topic,
                        kind = %self.kind,
                        error = %error,
                        "Broker stream error"
                    );
                    report.transport_errors += 1;
                },
            }
        }

        tracing::debug!(
            topic = %self.topic,
            kind = %self.kind,
            reposted = report.reposted,
            discarded = report.discarded,
            rejected = report.rejected,
            "Inbound subscription ended"
        );
        report
    }

    // Protocol errors go to `Ok`, everything else stays an error.
    fn classify(error: BrokerError) -> Result<ProtocolError, BrokerError> {
        match error {
            BrokerError::Protocol(protocol) => Ok(protocol),
            other => Err(other),
        }
    }

    fn reject(&self, error: &ProtocolError) {
        tracing::warn!(
            topic = %self.topic,
            kind = %self.kind,
            error = %error,
            "Dropping malformed message"
        );
        ReplicationMetrics::record_protocol_error(self.kind);
    }
}

/// Runs one [`InboundHandler`] per event kind.
pub struct InboundReplicator {
    config: ReplicationConfig,
    bus: Arc<dyn EventBus>,
    broker: Arc<dyn Broker>,
}

impl InboundReplicator {
    /// Create a replicator for every event kind.
    #[must_use]
    pub fn new(config: ReplicationConfig, bus: Arc<dyn EventBus>, broker: Arc<dyn Broker>) -> Self {
        Self { config, bus, broker }
    }

    /// One handler per event kind.
    #[must_use]
    pub fn handlers(&self) -> Vec<InboundHandler> {
        EventKind::ALL
            .into_iter()
            .map(|kind| InboundHandler::new(kind, &self.config, Arc::clone(&self.bus)))
            .collect()
    }

    /// Subscribe every handler, then consume each subscription on its own task.
    ///
    /// All subscriptions are set up before any task is spawned, so a refused
    /// subscription fails the whole start.
    ///
    /// # Errors
    ///
    /// Returns the first [`BrokerError`] raised while subscribing.
    pub async fn start(&self) -> Result<JoinSet<InboundReport>, BrokerError> {
        let mut subscriptions = Vec::new();
        for handler in self.handlers() {
            let stream = handler.subscribe(self.broker.as_ref()).await?;
            tracing::info!(
                topic = handler.topic(),
                kind = %handler.kind(),
                application = %self.config.application,
                "Subscribed inbound handler"
            );
            subscriptions.push((handler, stream));
        }

        let mut tasks = JoinSet::new();
        for (handler, stream) in subscriptions {
            tasks.spawn(async move { handler.consume(stream).await });
        }
        Ok(tasks)
    }
}
