//! End-to-end behaviour of the booking transaction, the change feed and live
//! seat maps over the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{DateTime, Utc};
use futures::StreamExt;
use seatbook::selection::{Rejection, SubmissionOutcome};
use seatbook::viewer::{SessionBookingGateway, Viewer};
use seatbook::{
    BookingRequest, BookingRules, BookingService, ChangePublisher, InMemoryChangeFeed,
    InMemorySeatStore, ReservationSweeper, SeatMapSynchronizer, SyncStatus,
};
use seatbook_core::change::{ChangeCause, seat_topic};
use seatbook_core::change_feed::ChangeFeed;
use seatbook_core::environment::Clock;
use seatbook_core::error::EngineError;
use seatbook_core::identity::{Session, SessionWatch};
use seatbook_core::mutation::{Mutation, NewTable};
use seatbook_core::seat_map::{SeatMapSnapshot, TableView};
use seatbook_core::store::{NewRestaurant, SeatStore};
use seatbook_core::types::{
    BookingStatus, Position, RestaurantId, SeatId, SeatStatus, TableId, TableNumber, TableStatus,
    UserId, Version,
};
use seatbook_runtime::RetryPolicy;
use seatbook_testing::mocks::{FlakyStore, ManualClock};
use seatbook_testing::test_clock;
use std::sync::Arc;
use std::time::Duration;

const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

struct Engine {
    store: Arc<dyn SeatStore>,
    feed: Arc<InMemoryChangeFeed>,
    bookings: Arc<BookingService>,
    restaurant: RestaurantId,
    table: TableView,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(2)
        .initial_delay(Duration::from_millis(1))
        .jitter(0.0)
        .build()
}

async fn seeded_store(clock: Arc<dyn Clock>, capacity: u16) -> (Arc<dyn SeatStore>, RestaurantId, TableView) {
    let store: Arc<dyn SeatStore> = Arc::new(InMemorySeatStore::new(clock));
    let restaurant = store
        .create_restaurant(NewRestaurant {
            name: "Harbour Grill".into(),
            ..NewRestaurant::default()
        })
        .await
        .unwrap()
        .id;
    let table_id = TableId::new();
    let outcome = store
        .apply_mutation(Mutation::CreateTable(NewTable {
            table_id,
            restaurant_id: restaurant,
            table_number: TableNumber::new(5),
            capacity,
            position: Position::new(0, 0),
            status: TableStatus::Available,
        }))
        .await
        .unwrap();
    let table = outcome.snapshot.table(table_id).unwrap().clone();
    (store, restaurant, table)
}

fn engine_over(store: Arc<dyn SeatStore>, restaurant: RestaurantId, table: TableView) -> Engine {
    let feed = Arc::new(InMemoryChangeFeed::new(64));
    let bookings = BookingService::new(
        Arc::clone(&store),
        ChangePublisher::new(feed.clone(), RetryPolicy::no_retry()),
        Arc::new(test_clock()),
        BookingRules {
            retry: fast_retry(),
            ..BookingRules::default()
        },
    );
    Engine {
        store,
        feed,
        bookings: Arc::new(bookings),
        restaurant,
        table,
    }
}

async fn engine(capacity: u16) -> Engine {
    let (store, restaurant, table) = seeded_store(Arc::new(test_clock()), capacity).await;
    engine_over(store, restaurant, table)
}

fn dinner_time() -> DateTime<Utc> {
    test_clock().now() + chrono::Duration::days(1)
}

impl Engine {
    fn seat(&self, index: usize) -> SeatId {
        self.table.seats[index].id
    }

    fn request(&self, seats: &[usize]) -> BookingRequest {
        BookingRequest {
            restaurant_id: self.restaurant,
            table_id: self.table.table.id,
            seat_ids: seats.iter().map(|&i| self.seat(i)).collect(),
            party_size: u16::try_from(seats.len()).unwrap(),
            date_time: dinner_time(),
            special_requests: None,
            request_id: None,
        }
    }

    async fn map(&self) -> SeatMapSnapshot {
        self.store.get_seat_map(self.restaurant).await.unwrap()
    }

    async fn viewer(&self, session: Session) -> Viewer {
        let sync = SeatMapSynchronizer::start(
            self.restaurant,
            Arc::clone(&self.store),
            self.feed.clone(),
            fast_retry(),
        )
        .await
        .unwrap();
        let gateway = SessionBookingGateway::new(
            Arc::clone(&self.bookings),
            SessionWatch::new(Some(session)),
        );
        Viewer::new(Arc::new(sync), Arc::new(gateway))
    }
}

fn statuses(snapshot: &SeatMapSnapshot, seats: &[SeatId]) -> Vec<SeatStatus> {
    seats
        .iter()
        .map(|id| snapshot.seat(*id).map_or(SeatStatus::Occupied, |s| s.status))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_of_one_seat_have_exactly_one_winner() {
    let engine = engine(4).await;
    let contested = engine.seat(2);

    let mut handles = Vec::new();
    for i in 0..16 {
        let bookings = Arc::clone(&engine.bookings);
        // every request includes the contested seat, half of them with a neighbour
        let request = if i % 2 == 0 {
            engine.request(&[2])
        } else {
            engine.request(&[2, 3])
        };
        handles.push(tokio::spawn(async move {
            let diner = Session::diner(UserId::new());
            bookings.propose_booking(Some(&diner), request).await
        }));
    }

    let mut confirmed = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(booking) => confirmed.push(booking),
            Err(EngineError::SeatConflict { seats, .. }) => assert!(seats.contains(&contested)),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(confirmed.len(), 1);

    let map = engine.map().await;
    for seat_id in &confirmed[0].seat_ids {
        assert_eq!(map.seat(*seat_id).unwrap().status, SeatStatus::Reserved);
    }
    assert!(engine.store.audit_integrity(engine.restaurant).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_booking_leaves_no_trace() {
    let clock: Arc<dyn Clock> = Arc::new(test_clock());
    let (memory, restaurant, table) = seeded_store(clock, 4).await;
    let flaky = Arc::new(FlakyStore::new(Arc::clone(&memory)));
    let engine = engine_over(flaky.clone(), restaurant, table);
    let diner = Session::diner(UserId::new());

    flaky.fail_next_mutations(10);
    let err = engine
        .bookings
        .propose_booking(Some(&diner), engine.request(&[0, 1]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StoreUnavailable(_)));
    assert_eq!(flaky.mutation_calls(), 3);

    let map = memory.get_seat_map(restaurant).await.unwrap();
    assert!(map.tables[0].seats.iter().all(|s| s.is_available() && s.version == Version::INITIAL));
    assert!(memory.list_user_bookings(diner.user_id).await.unwrap().is_empty());
    assert!(memory.audit_integrity(restaurant).await.unwrap().is_empty());
}

#[tokio::test]
async fn conflict_on_one_seat_claims_none_of_the_others() {
    let engine = engine(4).await;
    let first = Session::diner(UserId::new());
    let second = Session::diner(UserId::new());

    engine
        .bookings
        .propose_booking(Some(&first), engine.request(&[1]))
        .await
        .unwrap();
    let err = engine
        .bookings
        .propose_booking(Some(&second), engine.request(&[0, 1, 2]))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let map = engine.map().await;
    assert_eq!(
        statuses(&map, &[engine.seat(0), engine.seat(1), engine.seat(2)]),
        vec![SeatStatus::Available, SeatStatus::Reserved, SeatStatus::Available]
    );
    assert!(engine.store.list_user_bookings(second.user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn booking_then_cancellation_round_trips_every_seat() {
    let engine = engine(4).await;
    let diner = Session::diner(UserId::new());
    let mut changes = engine.feed.subscribe(&seat_topic(engine.restaurant)).await.unwrap();

    let booking = engine
        .bookings
        .propose_booking(Some(&diner), engine.request(&[0, 1, 2]))
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);

    let cancelled = engine
        .bookings
        .cancel_booking(Some(&diner), booking.id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    let map = engine.map().await;
    assert!(map.tables[0].seats.iter().all(|s| s.is_available()));
    assert!(engine.store.audit_integrity(engine.restaurant).await.unwrap().is_empty());

    let booked = changes.next().await.unwrap().unwrap();
    let released = changes.next().await.unwrap().unwrap();
    assert_eq!(booked.cause, ChangeCause::Booking { booking_id: booking.id });
    assert_eq!(released.cause, ChangeCause::Cancellation { booking_id: booking.id });
    assert_eq!(released.seat_ids().count(), 3);
}

#[tokio::test]
async fn party_size_mismatch_is_rejected_before_the_store() {
    let clock: Arc<dyn Clock> = Arc::new(test_clock());
    let (memory, restaurant, table) = seeded_store(clock, 4).await;
    let flaky = Arc::new(FlakyStore::new(memory));
    let engine = engine_over(flaky.clone(), restaurant, table);

    let mut request = engine.request(&[0, 1]);
    request.party_size = 3;
    let err = engine
        .bookings
        .propose_booking(Some(&Session::diner(UserId::new())), request)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(flaky.mutation_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_viewers_racing_for_table_five_converge() {
    let engine = engine(4).await;
    let (s1, s2, s3) = (engine.seat(0), engine.seat(1), engine.seat(2));
    let a = engine.viewer(Session::diner(UserId::new())).await;
    let b = engine.viewer(Session::diner(UserId::new())).await;

    for seat in [s1, s2] {
        a.select(seat).await.unwrap().wait().await;
    }
    for seat in [s2, s3] {
        b.select(seat).await.unwrap().wait().await;
    }

    let (mut submit_a, mut submit_b) =
        tokio::join!(a.submit(dinner_time(), None), b.submit(dinner_time(), None));
    tokio::join!(submit_a.wait(), submit_b.wait());

    let (outcome_a, outcome_b) = (
        a.selection().await.last_outcome.unwrap(),
        b.selection().await.last_outcome.unwrap(),
    );
    let (winner, loser) = match (&outcome_a, &outcome_b) {
        (SubmissionOutcome::Confirmed(_), SubmissionOutcome::Failed(e)) => {
            assert!(e.is_conflict());
            (vec![s1, s2], vec![s3])
        },
        (SubmissionOutcome::Failed(e), SubmissionOutcome::Confirmed(_)) => {
            assert!(e.is_conflict());
            (vec![s2, s3], vec![s1])
        },
        other => panic!("expected one winner and one conflict, got {other:?}"),
    };

    let converged = |snapshot: &SeatMapSnapshot| {
        statuses(snapshot, &winner).iter().all(|s| *s == SeatStatus::Reserved)
            && statuses(snapshot, &loser).iter().all(|s| *s == SeatStatus::Available)
    };
    for viewer in [&a, &b] {
        viewer
            .synchronizer()
            .wait_until(SYNC_TIMEOUT, |view| {
                view.status == SyncStatus::Live && converged(&view.snapshot)
            })
            .await
            .unwrap();
        let selection = viewer.selection().await;
        assert!(selection.selected_seats().is_empty());
        assert!(!selection.needs_refresh);
    }
}

#[tokio::test]
async fn synchronizer_recovers_after_losing_its_subscription() {
    let engine = engine(2).await;
    let sync = SeatMapSynchronizer::start(
        engine.restaurant,
        Arc::clone(&engine.store),
        engine.feed.clone(),
        fast_retry(),
    )
    .await
    .unwrap();
    assert_eq!(sync.view().reconciliations, 1);

    engine.feed.close_topic(&seat_topic(engine.restaurant)).await;
    engine
        .bookings
        .propose_booking(Some(&Session::diner(UserId::new())), engine.request(&[0]))
        .await
        .unwrap();

    let seat = engine.seat(0);
    let view = sync
        .wait_until(SYNC_TIMEOUT, |view| {
            view.status == SyncStatus::Live
                && view.reconciliations >= 2
                && view.snapshot.seat(seat).is_some_and(|s| s.status == SeatStatus::Reserved)
        })
        .await
        .unwrap();
    assert!(view.snapshot.seat(engine.seat(1)).unwrap().is_available());
}

#[tokio::test]
async fn live_map_follows_staff_edits() {
    let engine = engine(2).await;
    let sync = SeatMapSynchronizer::start(
        engine.restaurant,
        Arc::clone(&engine.store),
        engine.feed.clone(),
        fast_retry(),
    )
    .await
    .unwrap();

    let staff = seatbook::StaffConsole::new(
        Arc::clone(&engine.store),
        ChangePublisher::new(engine.feed.clone(), RetryPolicy::no_retry()),
        Arc::new(test_clock()),
    );
    let manager = Session::staff(UserId::new(), vec![engine.restaurant]);
    let seat = &engine.table.seats[1];
    staff
        .set_seat_status(
            Some(&manager),
            engine.restaurant,
            seat.id,
            seat.version,
            SeatStatus::Occupied,
        )
        .await
        .unwrap();

    let view = sync
        .wait_until(SYNC_TIMEOUT, |view| view.events_applied >= 1)
        .await
        .unwrap();
    let merged = view.snapshot.seat(seat.id).unwrap();
    assert_eq!(merged.status, SeatStatus::Occupied);
    assert_eq!(merged.version, Version::new(2));
}

#[tokio::test]
async fn elapsed_booking_frees_the_seat_on_a_live_map() {
    let clock = Arc::new(ManualClock::new(test_clock().now()));
    let (store, restaurant, table) = seeded_store(clock.clone(), 2).await;
    let engine = engine_over(store, restaurant, table);
    let viewer = engine.viewer(Session::diner(UserId::new())).await;
    let seat = engine.seat(0);

    engine
        .bookings
        .propose_booking(Some(&Session::diner(UserId::new())), engine.request(&[0]))
        .await
        .unwrap();
    viewer
        .synchronizer()
        .wait_until(SYNC_TIMEOUT, |view| {
            view.snapshot.seat(seat).is_some_and(|s| s.status == SeatStatus::Reserved)
        })
        .await
        .unwrap();
    viewer.select(seat).await.unwrap().wait().await;
    assert_eq!(viewer.selection().await.last_rejection, Some(Rejection::SeatUnavailable));

    clock.advance(chrono::Duration::days(2));
    let sweeper = ReservationSweeper::new(
        Arc::clone(&engine.store),
        ChangePublisher::new(engine.feed.clone(), RetryPolicy::no_retry()),
        clock.clone(),
    );
    assert_eq!(sweeper.sweep_restaurant(engine.restaurant).await.unwrap(), 1);

    let view = viewer
        .synchronizer()
        .wait_until(SYNC_TIMEOUT, |view| {
            view.snapshot.seat(seat).is_some_and(|s| s.status == SeatStatus::Available)
        })
        .await
        .unwrap();
    assert_eq!(view.snapshot.seat(seat).unwrap().version, Version::new(3));
    viewer.select(seat).await.unwrap().wait().await;
    let selection = viewer.selection().await;
    assert_eq!(selection.selected_seats(), &[seat]);
    assert_eq!(selection.last_rejection, None);
}

#[tokio::test]
async fn synchronizer_closes_once_its_restaurant_is_deleted() {
    let engine = engine(2).await;
    let sync = SeatMapSynchronizer::start(
        engine.restaurant,
        Arc::clone(&engine.store),
        engine.feed.clone(),
        fast_retry(),
    )
    .await
    .unwrap();
    let staff = seatbook::StaffConsole::new(
        Arc::clone(&engine.store),
        ChangePublisher::new(engine.feed.clone(), RetryPolicy::no_retry()),
        Arc::new(test_clock()),
    );
    let manager = Session::staff(UserId::new(), vec![engine.restaurant]);

    staff.delete_restaurant(Some(&manager), engine.restaurant).await.unwrap();
    let view = sync
        .wait_until(SYNC_TIMEOUT, |view| view.snapshot.tables.is_empty())
        .await
        .unwrap();
    assert_eq!(view.status, SyncStatus::Live);

    sync.request_resync();
    let view = sync
        .wait_until(SYNC_TIMEOUT, |view| view.status == SyncStatus::Closed)
        .await
        .unwrap();
    assert!(view.snapshot.tables.is_empty());
    let err = seatbook::sync::SnapshotSource::refresh(&sync).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "restaurant", .. }));
}
