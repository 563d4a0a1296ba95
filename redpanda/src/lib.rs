//! Redpanda transport for Userbridge replication.
//!
//! This crate provides [`RedpandaBroker`], an implementation of the
//! [`Broker`] trait from `userbridge-core` on top of rdkafka, so it works with
//! Redpanda or any other Kafka-compatible cluster.
//!
//! # Wire Format
//!
//! | Record part | Content |
//! |---|---|
//! | topic | `{system}.{category}` |
//! | key | account id (keeps one account's events on one partition) |
//! | headers | `type`, `contentType`, `id`, `timestamp` (see [`headers`]) |
//! | payload | JSON-encoded account event |
//!
//! # Subscriptions
//!
//! Inbound replication subscribes once per event kind, and several kinds share
//! a topic. Each subscription therefore gets its own consumer group
//! (`{consumer_group}.{event_type}`) so every kind sees every record, and the
//! consumer task drops records whose `type` header names another kind before
//! the payload is touched. A record with no `type` header cannot be classified
//! and is passed on as a protocol error.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Offsets are committed AFTER the record is handed to the subscriber's channel
//! - If the process crashes before commit, records will be redelivered
//!
//! # Example
//!
//! ```no_run
//! use userbridge_redpanda::RedpandaBroker;
//! use userbridge_core::broker::Broker;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("accounts-eu")
//!     .build()?;
//!
//! let mut stream = broker.subscribe("accounts.arbitration", "userbridge.account.Banned.v1").await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(message) => println!("Received: {}", message),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod headers;

use headers::Envelope;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use userbridge_core::broker::{Broker, BrokerError, BrokerMessage, MessageStream};

/// Default number of records buffered per subscription.
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Redpanda-backed [`Broker`].
///
/// One producer is shared by all publishes; each subscription owns a consumer
/// running on its own task.
///
/// # Example
///
/// ```no_run
/// use userbridge_redpanda::RedpandaBroker;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Basic configuration
/// let broker = RedpandaBroker::new("localhost:9092")?;
///
/// // Custom configuration
/// let broker = RedpandaBroker::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .consumer_group("accounts-eu")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaBroker {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaBroker {
    /// Create a broker with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Bootstrap servers this broker connects to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group used for a subscription to `topic` / `event_type`.
    ///
    /// The configured group (or a name derived from the topic) suffixed with
    /// the event type.
    #[must_use]
    pub fn group_id(&self, topic: &str, event_type: &str) -> String {
        match &self.consumer_group {
            Some(group) => format!("{group}.{event_type}"),
            None => format!("userbridge.{topic}.{event_type}"),
        }
    }
}

/// What the consumer task does with one record.
#[derive(Debug)]
enum Routed {
    /// Hand to the subscriber
    Deliver(Result<BrokerMessage, BrokerError>),
    /// Another kind's record on a shared topic
    Skip,
}

fn route<'a>(
    event_type: &str,
    headers: impl IntoIterator<Item = (&'a str, Option<&'a [u8]>)>,
    key: Option<&[u8]>,
    payload: Option<&[u8]>,
) -> Routed {
    let envelope = Envelope::read(headers);
    if envelope.event_type().is_some_and(|declared| declared != event_type) {
        return Routed::Skip;
    }
    Routed::Deliver(
        envelope
            .into_message(key, payload.unwrap_or_default())
            .map_err(BrokerError::from),
    )
}

fn route_record(event_type: &str, record: &BorrowedMessage<'_>) -> Routed {
    let pairs: Vec<(&str, Option<&[u8]>)> = record
        .headers()
        .map(|headers| headers.iter().map(|h| (h.key, h.value)).collect())
        .unwrap_or_default();
    route(event_type, pairs, record.key(), record.payload())
}

/// Builder for configuring a [`RedpandaBroker`].
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBrokerBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group prefix.
    ///
    /// Every instance needs its own prefix (the application identifier works
    /// well), otherwise instances split records between them instead of each
    /// seeing all of them.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the record buffer per subscription. Zero is treated as one.
    ///
    /// Default: 1000
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set where new consumer groups start reading: "earliest" or "latest".
    ///
    /// Default: "latest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaBroker`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Cannot create producer
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let auto_offset_reset = self.auto_offset_reset.unwrap_or_else(|| "latest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks = acks,
            compression = compression,
            buffer_size = buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaBroker created"
        );

        Ok(RedpandaBroker {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size,
            auto_offset_reset,
        })
    }
}

impl Broker for RedpandaBroker {
    fn publish(
        &self,
        topic: &str,
        message: &BrokerMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        let message = message.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::to(&topic)
                .key(message.key.as_bytes())
                .payload(&message.payload)
                .headers(headers::encode(&message));

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition = partition,
                        offset = offset,
                        event_type = %message.event_type,
                        message_id = %message.message_id,
                        "Message published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        event_type = %message.event_type,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(BrokerError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        event_type: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        let event_type = event_type.to_string();
        let group_id = self.group_id(&topic, &event_type);
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topic = %topic,
                event_type = %event_type,
                consumer_group = %group_id,
                buffer_size = buffer_size,
                manual_commit = true,
                "Subscribed"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();

                while let Some(received) = stream.next().await {
                    match received {
                        Ok(record) => {
                            if let Routed::Deliver(item) = route_record(&event_type, &record) {
                                if let Err(ref error) = item {
                                    tracing::warn!(
                                        topic = record.topic(),
                                        offset = record.offset(),
                                        error = %error,
                                        "Unreadable record"
                                    );
                                }
                                // Only commit once the subscriber has the record
                                if tx.send(item).await.is_err() {
                                    tracing::debug!("Subscriber dropped, exiting consumer task");
                                    break;
                                }
                            }

                            if let Err(e) = consumer.commit_message(&record, CommitMode::Async) {
                                tracing::warn!(
                                    topic = record.topic(),
                                    partition = record.partition(),
                                    offset = record.offset(),
                                    error = %e,
                                    "Failed to commit offset (record may be redelivered)"
                                );
                            }
                        },
                        Err(e) => {
                            let error = BrokerError::TransportError(format!("Failed to receive record: {e}"));
                            if tx.send(Err(error)).await.is_err() {
                                break;
                            }
                        },
                    }
                }

                tracing::debug!(topic = %topic, event_type = %event_type, "Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}
