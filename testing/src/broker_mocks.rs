//! In-process broker shared by several instances.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use userbridge_core::broker::{Broker, BrokerError, BrokerMessage, MessageStream};

type Delivery = Result<BrokerMessage, BrokerError>;

#[derive(Debug)]
struct Subscription {
    topic: String,
    event_type: String,
    sender: mpsc::UnboundedSender<Delivery>,
}

/// [`Broker`] that delivers in-process.
///
/// Publishing records the message and hands a copy to every live subscription
/// on the same topic and event type, in subscription order. Clone the broker
/// (or share an `Arc`) to connect several instances.
///
/// # Example
///
/// ```
/// use userbridge_testing::InMemoryBroker;
///
/// let broker = InMemoryBroker::new();
/// assert!(broker.published().is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryBroker {
    published: Arc<Mutex<Vec<(String, BrokerMessage)>>>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    rejecting: Arc<AtomicBool>,
}

impl InMemoryBroker {
    /// Create a broker with no subscriptions
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted `(topic, message)`, in publish order
    #[must_use]
    pub fn published(&self) -> Vec<(String, BrokerMessage)> {
        self.published.lock().unwrap().clone()
    }

    /// Topics of the accepted messages, in publish order
    #[must_use]
    pub fn published_topics(&self) -> Vec<String> {
        self.published().into_iter().map(|(topic, _)| topic).collect()
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        subscriptions.retain(|s| !s.sender.is_closed());
        subscriptions.len()
    }

    /// Reject (or accept again) every publish
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Push an arbitrary item to every subscription on `topic`, whatever its
    /// event type. Used to feed malformed messages and transport errors.
    pub fn inject(&self, topic: &str, item: Delivery) {
        let subscriptions = self.subscriptions.lock().unwrap();
        for subscription in subscriptions.iter().filter(|s| s.topic == topic) {
            let _ = subscription.sender.send(item.clone());
        }
    }

    /// End every subscription stream
    pub fn close(&self) {
        self.subscriptions.lock().unwrap().clear();
    }
}

impl Broker for InMemoryBroker {
    fn publish(
        &self,
        topic: &str,
        message: &BrokerMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        let message = message.clone();
        Box::pin(async move {
            if self.rejecting.load(Ordering::SeqCst) {
                return Err(BrokerError::PublishFailed {
                    topic,
                    reason: "broker is rejecting publishes".to_string(),
                });
            }

            let mut subscriptions = self.subscriptions.lock().unwrap();
            subscriptions.retain(|s| !s.sender.is_closed());
            for subscription in subscriptions
                .iter()
                .filter(|s| s.topic == topic && s.event_type == message.event_type)
            {
                let _ = subscription.sender.send(Ok(message.clone()));
            }
            drop(subscriptions);

            self.published.lock().unwrap().push((topic, message));
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        event_type: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        let event_type = event_type.to_string();
        Box::pin(async move {
            let (sender, mut receiver) = mpsc::unbounded_channel();
            self.subscriptions.lock().unwrap().push(Subscription {
                topic,
                event_type,
                sender,
            });

            let stream: MessageStream = Box::pin(async_stream::stream! {
                while let Some(item) = receiver.recv().await {
                    yield item;
                }
            });
            Ok(stream)
        })
    }
}
