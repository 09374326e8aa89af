//! # Seatbook Testing
//!
//! Test doubles and helpers for the seatbook reservation engine.
//!
//! - [`mocks`]: deterministic clocks, a token-table identity provider, a
//!   fault-injecting [`mocks::FlakyStore`] and a [`mocks::RecordingFeed`]
//! - [`reducer_test`]: Given-When-Then harness for reducers
//!
//! ## Example
//!
//! ```ignore
//! use seatbook_testing::mocks::FlakyStore;
//!
//! let store = Arc::new(FlakyStore::new(Arc::new(InMemorySeatStore::new(clock))));
//! store.fail_next_mutations(1);
//! let err = service.propose_booking(Some(&session), request).await.unwrap_err();
//! ```

use chrono::{DateTime, Utc};
use seatbook_core::environment::Clock;

pub mod reducer_test;

pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations of the engine's collaborators.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use seatbook_core::change::ChangeEvent;
    use seatbook_core::change_feed::{ChangeFeed, ChangeStream, FeedError, FeedFuture};
    use seatbook_core::error::StoreError;
    use seatbook_core::identity::{IdentityFuture, IdentityProvider, Session};
    use seatbook_core::mutation::{Mutation, MutationOutcome};
    use seatbook_core::seat_map::SeatMapSnapshot;
    use seatbook_core::store::{IntegrityViolation, NewRestaurant, SeatStore, StoreFuture};
    use seatbook_core::types::{
        Booking, BookingId, Restaurant, RestaurantId, Seat, SeatId, TableId, UserId,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex, RwLock};
    use tokio::sync::broadcast;

    /// Fixed clock for deterministic tests
    ///
    /// # Example
    ///
    /// ```
    /// use seatbook_testing::mocks::FixedClock;
    /// use seatbook_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a clock frozen at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        time: RwLock<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: RwLock::new(time),
            }
        }

        /// Move forward.
        pub fn advance(&self, by: chrono::Duration) {
            let mut guard = self
                .time
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .time
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Identity provider backed by a fixed token table.
    #[derive(Debug, Default)]
    pub struct StaticIdentity {
        sessions: RwLock<HashMap<String, Session>>,
    }

    impl StaticIdentity {
        /// Empty token table.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a token.
        #[must_use]
        pub fn with(self, token: impl Into<String>, session: Session) -> Self {
            self.sessions
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(token.into(), session);
            self
        }

        /// Diner session for a fresh user.
        #[must_use]
        pub fn diner() -> Session {
            Session::diner(UserId::new())
        }
    }

    impl IdentityProvider for StaticIdentity {
        fn current_session<'a>(&'a self, token: &'a str) -> IdentityFuture<'a, Option<Session>> {
            let session = self
                .sessions
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(token)
                .cloned();
            Box::pin(async move { Ok(session) })
        }
    }

    /// Wraps a real store and injects storage failures.
    ///
    /// - `fail_next_reads(n)`: the next `n` seat reads fail before touching storage
    /// - `fail_next_mutations(n)`: the next `n` mutations fail before touching storage
    /// - `lose_next_acks(n)`: the next `n` mutations commit, then report
    ///   `Unavailable` as if the response were lost in transit
    pub struct FlakyStore {
        inner: Arc<dyn SeatStore>,
        failing_reads: AtomicU32,
        failing_mutations: AtomicU32,
        lost_acks: AtomicU32,
        mutation_calls: AtomicU32,
    }

    impl FlakyStore {
        /// Wrap `inner`.
        #[must_use]
        pub fn new(inner: Arc<dyn SeatStore>) -> Self {
            Self {
                inner,
                failing_reads: AtomicU32::new(0),
                failing_mutations: AtomicU32::new(0),
                lost_acks: AtomicU32::new(0),
                mutation_calls: AtomicU32::new(0),
            }
        }

        /// Fail the next `n` seat reads.
        pub fn fail_next_reads(&self, n: u32) {
            self.failing_reads.store(n, Ordering::SeqCst);
        }

        /// Fail the next `n` mutations before they reach storage.
        pub fn fail_next_mutations(&self, n: u32) {
            self.failing_mutations.store(n, Ordering::SeqCst);
        }

        /// Commit the next `n` mutations but report them as failed.
        pub fn lose_next_acks(&self, n: u32) {
            self.lost_acks.store(n, Ordering::SeqCst);
        }

        /// Number of `apply_mutation` calls seen.
        #[must_use]
        pub fn mutation_calls(&self) -> u32 {
            self.mutation_calls.load(Ordering::SeqCst)
        }

        fn take(counter: &AtomicU32) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl SeatStore for FlakyStore {
        fn get_seat_map(&self, restaurant_id: RestaurantId) -> StoreFuture<'_, SeatMapSnapshot> {
            self.inner.get_seat_map(restaurant_id)
        }

        fn read_seats<'a>(
            &'a self,
            table_id: TableId,
            seat_ids: &'a [SeatId],
        ) -> StoreFuture<'a, Vec<Seat>> {
            if Self::take(&self.failing_reads) {
                return Box::pin(async {
                    Err(StoreError::Unavailable("injected read failure".into()))
                });
            }
            self.inner.read_seats(table_id, seat_ids)
        }

        fn apply_mutation(&self, mutation: Mutation) -> StoreFuture<'_, MutationOutcome> {
            self.mutation_calls.fetch_add(1, Ordering::SeqCst);
            if Self::take(&self.failing_mutations) {
                return Box::pin(async {
                    Err(StoreError::Unavailable("injected write failure".into()))
                });
            }
            let lose_ack = Self::take(&self.lost_acks);
            Box::pin(async move {
                let outcome = self.inner.apply_mutation(mutation).await?;
                if lose_ack {
                    return Err(StoreError::Unavailable("injected lost acknowledgement".into()));
                }
                Ok(outcome)
            })
        }

        fn get_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Option<Booking>> {
            self.inner.get_booking(booking_id)
        }

        fn list_user_bookings(&self, user_id: UserId) -> StoreFuture<'_, Vec<Booking>> {
            self.inner.list_user_bookings(user_id)
        }

        fn list_restaurant_bookings(
            &self,
            restaurant_id: RestaurantId,
        ) -> StoreFuture<'_, Vec<Booking>> {
            self.inner.list_restaurant_bookings(restaurant_id)
        }

        fn create_restaurant(&self, restaurant: NewRestaurant) -> StoreFuture<'_, Restaurant> {
            self.inner.create_restaurant(restaurant)
        }

        fn get_restaurant(
            &self,
            restaurant_id: RestaurantId,
        ) -> StoreFuture<'_, Option<Restaurant>> {
            self.inner.get_restaurant(restaurant_id)
        }

        fn list_restaurants(&self) -> StoreFuture<'_, Vec<Restaurant>> {
            self.inner.list_restaurants()
        }

        fn audit_integrity(
            &self,
            restaurant_id: RestaurantId,
        ) -> StoreFuture<'_, Vec<IntegrityViolation>> {
            self.inner.audit_integrity(restaurant_id)
        }

        fn ping(&self) -> StoreFuture<'_, ()> {
            self.inner.ping()
        }
    }

    /// Change feed that records every published event.
    ///
    /// Subscriptions are served from an internal broadcast channel, so it can
    /// stand in for a real transport in synchronizer tests.
    pub struct RecordingFeed {
        published: Mutex<Vec<(String, ChangeEvent)>>,
        failing_publishes: AtomicU32,
        sender: broadcast::Sender<ChangeEvent>,
    }

    impl RecordingFeed {
        /// Empty recorder.
        #[must_use]
        pub fn new() -> Self {
            let (sender, _) = broadcast::channel(256);
            Self {
                published: Mutex::new(Vec::new()),
                failing_publishes: AtomicU32::new(0),
                sender,
            }
        }

        /// Fail the next `n` publishes.
        pub fn fail_next_publishes(&self, n: u32) {
            self.failing_publishes.store(n, Ordering::SeqCst);
        }

        /// Events published so far.
        #[must_use]
        pub fn events(&self) -> Vec<ChangeEvent> {
            self.published
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .iter()
                .map(|(_, event)| event.clone())
                .collect()
        }

        /// Topics published to so far, in order.
        #[must_use]
        pub fn topics(&self) -> Vec<String> {
            self.published
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .iter()
                .map(|(topic, _)| topic.clone())
                .collect()
        }
    }

    impl Default for RecordingFeed {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ChangeFeed for RecordingFeed {
        fn publish<'a>(&'a self, topic: &'a str, event: &'a ChangeEvent) -> FeedFuture<'a, ()> {
            Box::pin(async move {
                if FlakyStore::take(&self.failing_publishes) {
                    return Err(FeedError::PublishFailed("injected publish failure".into()));
                }
                self.published
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push((topic.to_string(), event.clone()));
                let _ = self.sender.send(event.clone());
                Ok(())
            })
        }

        fn subscribe<'a>(&'a self, topic: &'a str) -> FeedFuture<'a, ChangeStream> {
            let mut rx = self.sender.subscribe();
            let topic = topic.to_string();
            Box::pin(async move {
                let stream = async_stream::stream! {
                    loop {
                        match rx.recv().await {
                            Ok(event) if event.topic() == topic => yield Ok(event),
                            Ok(_) => {},
                            Err(broadcast::error::RecvError::Lagged(n)) => yield Err(FeedError::Lagged(n)),
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                };
                Ok(Box::pin(stream) as ChangeStream)
            })
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fixed_clock_does_not_move() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn manual_clock_advances_on_request() {
        let clock = ManualClock::new(test_clock().now());
        let start = clock.now();
        clock.advance(Duration::minutes(30));
        assert_eq!(clock.now() - start, Duration::minutes(30));
    }
}
