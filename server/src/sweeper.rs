//! Release of elapsed reservations.
//!
//! Reads already report a seat of a finished booking as `available`, but the
//! stored seat keeps its `reserved` status and version, so nothing reaches
//! the change feed and viewers keep showing the seat as taken. The sweeper
//! commits [`Mutation::ReleaseElapsed`] per restaurant and publishes the seats
//! it freed, each at a new version.

use crate::feed::ChangePublisher;
use seatbook_core::change::{ChangeCause, ChangeEvent};
use seatbook_core::environment::Clock;
use seatbook_core::error::EngineError;
use seatbook_core::mutation::Mutation;
use seatbook_core::store::SeatStore;
use seatbook_core::types::RestaurantId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Frees the seats of bookings whose slot has ended.
pub struct ReservationSweeper {
    store: Arc<dyn SeatStore>,
    publisher: ChangePublisher,
    clock: Arc<dyn Clock>,
}

impl ReservationSweeper {
    /// Sweeper over a store and publisher.
    #[must_use]
    pub fn new(store: Arc<dyn SeatStore>, publisher: ChangePublisher, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            publisher,
            clock,
        }
    }

    /// Release one restaurant's elapsed seats and publish them.
    ///
    /// Returns the number of seats freed.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown restaurant, `StoreUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_restaurant(&self, restaurant_id: RestaurantId) -> Result<usize, EngineError> {
        let outcome = self
            .store
            .apply_mutation(Mutation::ReleaseElapsed { restaurant_id })
            .await?;
        let freed = outcome.changes.len();
        if freed > 0 {
            self.publisher
                .publish(&ChangeEvent {
                    restaurant_id,
                    cause: ChangeCause::Elapsed,
                    changes: outcome.changes,
                    committed_at: self.clock.now(),
                })
                .await;
            metrics::counter!("seatbook.sweeper.released")
                .increment(u64::try_from(freed).unwrap_or(u64::MAX));
            tracing::info!(%restaurant_id, freed, "elapsed reservations released");
        }
        Ok(freed)
    }

    /// Sweep every restaurant once.
    ///
    /// A failing restaurant is logged and skipped. Returns the seats freed.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` when the restaurants cannot be listed.
    pub async fn sweep_all(&self) -> Result<usize, EngineError> {
        let mut freed = 0;
        for restaurant in self.store.list_restaurants().await? {
            match self.sweep_restaurant(restaurant.id).await {
                Ok(count) => freed += count,
                // deleted between the listing and the sweep
                Err(EngineError::NotFound { .. }) => {},
                Err(error) => {
                    tracing::warn!(restaurant_id = %restaurant.id, %error, "sweep failed");
                },
            }
        }
        Ok(freed)
    }

    /// Run [`Self::sweep_all`] every `period` until the handle is aborted.
    #[must_use]
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if let Err(error) = self.sweep_all().await {
                    tracing::warn!(%error, "reservation sweep skipped");
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::booking::{BookingRequest, BookingRules, BookingService};
    use crate::store::InMemorySeatStore;
    use chrono::Duration as ChronoDuration;
    use seatbook_core::change::EntityChange;
    use seatbook_core::identity::Session;
    use seatbook_core::mutation::NewTable;
    use seatbook_core::store::NewRestaurant;
    use seatbook_core::types::{Position, SeatStatus, TableId, TableNumber, TableStatus, UserId};
    use seatbook_runtime::RetryPolicy;
    use seatbook_testing::mocks::{ManualClock, RecordingFeed};
    use seatbook_testing::test_clock;

    #[tokio::test]
    async fn elapsed_booking_is_published_as_freed_seats() {
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let store: Arc<dyn SeatStore> = Arc::new(InMemorySeatStore::new(clock.clone()));
        let feed = Arc::new(RecordingFeed::new());
        let publisher = ChangePublisher::new(feed.clone(), RetryPolicy::no_retry());
        let restaurant = store
            .create_restaurant(NewRestaurant {
                name: "Quayside".into(),
                ..NewRestaurant::default()
            })
            .await
            .unwrap()
            .id;
        let table_id = TableId::new();
        let seats = store
            .apply_mutation(Mutation::CreateTable(NewTable {
                table_id,
                restaurant_id: restaurant,
                table_number: TableNumber::new(1),
                capacity: 2,
                position: Position::default(),
                status: TableStatus::Available,
            }))
            .await
            .unwrap()
            .snapshot
            .tables[0]
            .seats
            .clone();
        let bookings = BookingService::new(
            Arc::clone(&store),
            publisher.clone(),
            clock.clone(),
            BookingRules::default(),
        );
        bookings
            .propose_booking(
                Some(&Session::diner(UserId::new())),
                BookingRequest {
                    restaurant_id: restaurant,
                    table_id,
                    seat_ids: vec![seats[0].id],
                    party_size: 1,
                    date_time: clock.now() + ChronoDuration::minutes(30),
                    special_requests: None,
                    request_id: None,
                },
            )
            .await
            .unwrap();
        let sweeper = ReservationSweeper::new(Arc::clone(&store), publisher, clock.clone());

        assert_eq!(sweeper.sweep_all().await.unwrap(), 0);
        assert_eq!(feed.events().len(), 1);

        clock.advance(ChronoDuration::hours(3));
        assert_eq!(sweeper.sweep_all().await.unwrap(), 1);

        let events = feed.events();
        let freed = events.last().unwrap();
        assert_eq!(freed.cause, ChangeCause::Elapsed);
        assert!(matches!(
            freed.changes.as_slice(),
            [EntityChange::Seat { seat_id, status: SeatStatus::Available, .. }] if *seat_id == seats[0].id
        ));
        assert_eq!(sweeper.sweep_all().await.unwrap(), 0);
    }
}
