//! Change-feed transport abstraction.
//!
//! The engine treats push delivery as a capability: publish a
//! [`ChangeEvent`] on a topic, subscribe to a topic. Any pub/sub mechanism
//! satisfies the contract.
//!
//! # Delivery Guarantees
//!
//! - **At-least-once**: subscribers may see an event more than once
//! - **Unordered across tables**: no ordering between different tables
//! - **Per-seat order**: events for one seat arrive in commit order, and each
//!   carries the version it produced, so a version check on the consumer side
//!   discards anything stale
//!
//! A subscription may be lost at any time (lagging consumer, transport
//! restart). The stream then yields an error or ends, and the consumer is
//! expected to re-pull a snapshot before resuming.

use crate::change::ChangeEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from change-feed operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Transport failed while publishing.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Could not establish a subscription.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Subscriber fell behind and missed events.
    #[error("subscriber lagged behind by {0} events")]
    Lagged(u64),

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Stream of change events for one subscription.
///
/// Dropping the stream unsubscribes.
pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent, FeedError>> + Send>>;

/// Boxed future returned by feed methods.
pub type FeedFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FeedError>> + Send + 'a>>;

/// Publish/subscribe transport for [`ChangeEvent`]s.
pub trait ChangeFeed: Send + Sync {
    /// Publish an event on a topic.
    ///
    /// # Errors
    ///
    /// [`FeedError::PublishFailed`] when the transport rejects the event.
    fn publish<'a>(&'a self, topic: &'a str, event: &'a ChangeEvent) -> FeedFuture<'a, ()>;

    /// Subscribe to a topic.
    ///
    /// # Errors
    ///
    /// [`FeedError::SubscribeFailed`] when the subscription cannot be opened.
    fn subscribe<'a>(&'a self, topic: &'a str) -> FeedFuture<'a, ChangeStream>;
}
