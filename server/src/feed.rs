//! Change feed transport and the post-commit publisher.
//!
//! [`InMemoryChangeFeed`] fans events out through one
//! `tokio::sync::broadcast` channel per topic. [`ChangePublisher`] sits
//! between a committed mutation and the feed and retries failed publishes.

use seatbook_core::change::ChangeEvent;
use seatbook_core::change_feed::{ChangeFeed, ChangeStream, FeedError, FeedFuture};
use seatbook_runtime::{RetryPolicy, retry_if};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

/// Default number of buffered events per topic.
pub const DEFAULT_TOPIC_CAPACITY: usize = 1000;

/// In-process pub/sub keyed by topic.
///
/// Topics are created lazily by the first publish or subscribe. A subscriber
/// that falls more than `capacity` events behind receives
/// [`FeedError::Lagged`]; closing a topic ends every stream on it.
pub struct InMemoryChangeFeed {
    topics: RwLock<HashMap<String, broadcast::Sender<ChangeEvent>>>,
    capacity: usize,
}

impl InMemoryChangeFeed {
    /// Feed buffering `capacity` events per topic.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<ChangeEvent> {
        if let Some(sender) = self.topics.read().await.get(topic) {
            return sender.clone();
        }
        self.topics
            .write()
            .await
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Drop a topic; every open subscription on it ends.
    pub async fn close_topic(&self, topic: &str) {
        if self.topics.write().await.remove(topic).is_some() {
            tracing::info!(topic, "topic closed");
        }
    }

    /// Live subscriptions on a topic.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for InMemoryChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

impl ChangeFeed for InMemoryChangeFeed {
    fn publish<'a>(&'a self, topic: &'a str, event: &'a ChangeEvent) -> FeedFuture<'a, ()> {
        Box::pin(async move {
            let sender = self.sender(topic).await;
            // No receivers is not a failure: nobody is watching this restaurant.
            let delivered = sender.send(event.clone()).unwrap_or(0);
            tracing::trace!(topic, delivered, "change event published");
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> FeedFuture<'a, ChangeStream> {
        Box::pin(async move {
            let mut receiver = self.sender(topic).await.subscribe();
            tracing::debug!(topic, "subscribed");
            let stream = async_stream::stream! {
                loop {
                    match receiver.recv().await {
                        Ok(event) => yield Ok(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            yield Err(FeedError::Lagged(skipped));
                        },
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };
            Ok(Box::pin(stream) as ChangeStream)
        })
    }
}

/// Publishes committed changes, retrying transport failures.
///
/// Delivery is at-least-once. A publish that still fails after the retries is
/// logged and dropped; viewers recover the state by pulling a snapshot.
#[derive(Clone)]
pub struct ChangePublisher {
    feed: Arc<dyn ChangeFeed>,
    policy: RetryPolicy,
}

impl ChangePublisher {
    /// Publisher over `feed`.
    #[must_use]
    pub fn new(feed: Arc<dyn ChangeFeed>, policy: RetryPolicy) -> Self {
        Self { feed, policy }
    }

    /// The underlying feed, for subscribing.
    #[must_use]
    pub fn feed(&self) -> &Arc<dyn ChangeFeed> {
        &self.feed
    }

    /// Publish `event` on its restaurant topic.
    ///
    /// Returns whether the event reached the transport.
    #[tracing::instrument(skip(self, event), fields(restaurant_id = %event.restaurant_id, changes = event.changes.len()))]
    pub async fn publish(&self, event: &ChangeEvent) -> bool {
        if event.changes.is_empty() {
            return true;
        }
        let topic = event.topic();
        let result = retry_if(
            &self.policy,
            || self.feed.publish(&topic, event),
            |error| matches!(error, FeedError::PublishFailed(_)),
        )
        .await;

        match result {
            Ok(()) => {
                metrics::counter!("seatbook.feed.published").increment(1);
                true
            },
            Err(error) => {
                tracing::error!(%error, topic, "change event dropped; viewers will reconcile");
                metrics::counter!("seatbook.feed.publish_failures").increment(1);
                false
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use seatbook_core::change::{ChangeCause, EntityChange, seat_topic};
    use seatbook_core::types::{RestaurantId, TableId, Version};
    use seatbook_testing::mocks::RecordingFeed;
    use std::time::Duration;

    fn event(restaurant_id: RestaurantId) -> ChangeEvent {
        ChangeEvent {
            restaurant_id,
            cause: ChangeCause::StaffEdit,
            changes: vec![EntityChange::TableRemoved {
                table_id: TableId::new(),
                version: Version::new(2),
            }],
            committed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_only_see_their_topic() {
        let feed = InMemoryChangeFeed::new(16);
        let mine = RestaurantId::new();
        let other = RestaurantId::new();
        let mut stream = feed.subscribe(&seat_topic(mine)).await.unwrap();

        feed.publish(&seat_topic(other), &event(other)).await.unwrap();
        let sent = event(mine);
        feed.publish(&seat_topic(mine), &sent).await.unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn slow_subscriber_is_told_it_lagged() {
        let feed = InMemoryChangeFeed::new(2);
        let id = RestaurantId::new();
        let topic = seat_topic(id);
        let mut stream = feed.subscribe(&topic).await.unwrap();

        for _ in 0..5 {
            feed.publish(&topic, &event(id)).await.unwrap();
        }

        assert!(matches!(stream.next().await, Some(Err(FeedError::Lagged(3)))));
        assert!(matches!(stream.next().await, Some(Ok(_))));
    }

    #[tokio::test]
    async fn closing_a_topic_ends_streams() {
        let feed = InMemoryChangeFeed::default();
        let topic = seat_topic(RestaurantId::new());
        let stream = feed.subscribe(&topic).await.unwrap();
        assert_eq!(feed.subscriber_count(&topic).await, 1);

        feed.close_topic(&topic).await;
        let remaining: Vec<_> = stream.collect().await;
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn publisher_retries_transport_failures() {
        let recording = Arc::new(RecordingFeed::new());
        recording.fail_next_publishes(2);
        let publisher = ChangePublisher::new(
            recording.clone(),
            RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(1))
                .jitter(0.0)
                .build(),
        );

        let id = RestaurantId::new();
        assert!(publisher.publish(&event(id)).await);
        assert_eq!(recording.topics(), vec![seat_topic(id)]);
    }

    #[tokio::test]
    async fn publisher_gives_up_without_failing_the_caller() {
        let recording = Arc::new(RecordingFeed::new());
        recording.fail_next_publishes(10);
        let publisher = ChangePublisher::new(recording.clone(), RetryPolicy::no_retry());

        assert!(!publisher.publish(&event(RestaurantId::new())).await);
        assert!(recording.events().is_empty());
    }
}
