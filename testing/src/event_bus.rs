//! In-memory message bus.
//!
//! Each topic has one shared queue, so all subscriptions to a topic behave
//! like members of a single consumer group: every message is handed to one
//! subscriber. A nacked (or dropped) delivery goes back to the front of its
//! queue with the attempt counter incremented.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use futures::StreamExt;
use rsvp_core::event_bus::{
    AckDecision, AckHandle, BusMessage, Delivery, DeliveryStream, EventBus, EventBusError,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct TopicState {
    published: Vec<BusMessage>,
    pending: VecDeque<(BusMessage, u32)>,
    acked: usize,
    nacked: usize,
}

#[derive(Debug, Default)]
struct Shared {
    topics: Mutex<HashMap<String, TopicState>>,
    wake: Notify,
    fail_publish: AtomicBool,
}

/// In-memory [`EventBus`] with ack/nack redelivery.
///
/// # Example
///
/// ```
/// use rsvp_testing::InMemoryEventBus;
/// use rsvp_core::event_bus::{BusMessage, EventBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// bus.publish("event-mutations", &BusMessage::new(b"{}".to_vec())).await?;
/// assert_eq!(bus.published("event-mutations").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventBus {
    shared: Arc<Shared>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail until reset.
    pub fn fail_publishes(&self, fail: bool) {
        self.shared.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Every message ever accepted on `topic`, in publish order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<BusMessage> {
        self.shared
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|t| t.published.clone())
            .unwrap_or_default()
    }

    /// Number of acknowledged deliveries on `topic`.
    #[must_use]
    pub fn acked(&self, topic: &str) -> usize {
        self.shared.topics.lock().unwrap().get(topic).map_or(0, |t| t.acked)
    }

    /// Number of nacked deliveries on `topic`.
    #[must_use]
    pub fn nacked(&self, topic: &str) -> usize {
        self.shared.topics.lock().unwrap().get(topic).map_or(0, |t| t.nacked)
    }

    /// Messages waiting for delivery on `topic`.
    #[must_use]
    pub fn pending(&self, topic: &str) -> usize {
        self.shared.topics.lock().unwrap().get(topic).map_or(0, |t| t.pending.len())
    }

    fn take_next(shared: &Arc<Shared>, topics: &[String]) -> Option<Delivery> {
        let mut state = shared.topics.lock().unwrap();
        for topic in topics {
            let Some((message, attempt)) =
                state.get_mut(topic).and_then(|t| t.pending.pop_front())
            else {
                continue;
            };

            let settle_shared = Arc::clone(shared);
            let settle_topic = topic.clone();
            let requeue = message.clone();
            let ack = AckHandle::new(move |decision| {
                let mut state = settle_shared.topics.lock().unwrap();
                let entry = state.entry(settle_topic).or_default();
                match decision {
                    AckDecision::Ack => entry.acked += 1,
                    AckDecision::Nack => {
                        entry.nacked += 1;
                        entry.pending.push_front((requeue, attempt + 1));
                    }
                }
                drop(state);
                settle_shared.wake.notify_waiters();
            });

            return Some(Delivery {
                topic: topic.clone(),
                message,
                attempt,
                ack,
            });
        }
        None
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        message: &BusMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let message = message.clone();
        Box::pin(async move {
            if self.shared.fail_publish.load(Ordering::SeqCst) {
                return Err(EventBusError::PublishFailed {
                    topic,
                    reason: "injected publish failure".to_string(),
                });
            }
            {
                let mut state = self.shared.topics.lock().unwrap();
                let entry = state.entry(topic).or_default();
                entry.published.push(message.clone());
                entry.pending.push_back((message, 1));
            }
            self.shared.wake.notify_waiters();
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            if topics.is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "no topics given".to_string(),
                });
            }
            let stream = async_stream::stream! {
                loop {
                    // Register interest before looking, so a publish in between is not missed.
                    let notified = shared.wake.notified();
                    if let Some(delivery) = Self::take_next(&shared, &topics) {
                        yield Ok::<Delivery, EventBusError>(delivery);
                        continue;
                    }
                    notified.await;
                }
            };
            Ok(stream.boxed())
        })
    }
}
