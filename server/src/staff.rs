//! Staff console: table management and the floor-plan editor.
//!
//! Every operation is one [`Mutation`] through the same atomic store path the
//! booking transaction uses, followed by a publish. A seat held by a live
//! booking cannot be edited; staff cancel the booking first.

use crate::feed::ChangePublisher;
use seatbook_core::change::{ChangeCause, ChangeEvent};
use seatbook_core::environment::Clock;
use seatbook_core::error::EngineError;
use seatbook_core::identity::Session;
use seatbook_core::mutation::{Mutation, MutationOutcome, NewTable, TableRef};
use seatbook_core::seat_map::SeatMapSnapshot;
use seatbook_core::store::{IntegrityViolation, NewRestaurant, SeatStore};
use seatbook_core::types::{
    Position, Restaurant, RestaurantId, SeatId, SeatStatus, TableId, TableNumber, TableStatus,
    Version,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A table to add to the floor plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Unique within the restaurant
    pub table_number: TableNumber,
    /// Seats to create
    pub capacity: u16,
    /// Where it sits on the floor plan
    #[serde(default)]
    pub position: Position,
    /// Starting status
    #[serde(default = "default_table_status")]
    pub status: TableStatus,
}

const fn default_table_status() -> TableStatus {
    TableStatus::Available
}

/// One edit in a layout save.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LayoutEdit {
    /// Move a table
    MoveTable {
        /// Table
        table_id: TableId,
        /// Version the editor loaded
        expected: Version,
        /// New position
        position: Position,
    },
    /// Change a table's status
    TableStatus {
        /// Table
        table_id: TableId,
        /// Version the editor loaded
        expected: Version,
        /// New status
        status: TableStatus,
    },
    /// Change a seat's status
    SeatStatus {
        /// Seat
        seat_id: SeatId,
        /// Version the editor loaded
        expected: Version,
        /// New status
        status: SeatStatus,
    },
}

impl From<LayoutEdit> for Mutation {
    fn from(edit: LayoutEdit) -> Self {
        match edit {
            LayoutEdit::MoveTable {
                table_id,
                expected,
                position,
            } => Self::UpdateTable {
                table: TableRef { table_id, expected },
                status: None,
                position: Some(position),
            },
            LayoutEdit::TableStatus {
                table_id,
                expected,
                status,
            } => Self::UpdateTable {
                table: TableRef { table_id, expected },
                status: Some(status),
                position: None,
            },
            LayoutEdit::SeatStatus {
                seat_id,
                expected,
                status,
            } => Self::UpdateSeat {
                seat_id,
                expected,
                status,
            },
        }
    }
}

/// Restaurant administration and layout operations.
pub struct StaffConsole {
    store: Arc<dyn SeatStore>,
    publisher: ChangePublisher,
    clock: Arc<dyn Clock>,
}

impl StaffConsole {
    /// Console over a store and publisher.
    #[must_use]
    pub fn new(store: Arc<dyn SeatStore>, publisher: ChangePublisher, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            publisher,
            clock,
        }
    }

    fn authorize(
        session: Option<&Session>,
        restaurant_id: RestaurantId,
    ) -> Result<&Session, EngineError> {
        let session = session.ok_or(EngineError::AuthRequired)?;
        if session.can_manage(restaurant_id) {
            Ok(session)
        } else {
            Err(EngineError::Forbidden(format!(
                "not staff of restaurant {restaurant_id}"
            )))
        }
    }

    /// Apply a staff mutation and publish what changed.
    ///
    /// Single edits go to the store as a one-element batch scoped to
    /// `restaurant_id`, so an edit can never reach another restaurant's tables.
    /// A restaurant deletion names its restaurant and is sent as is.
    async fn commit(
        &self,
        restaurant_id: RestaurantId,
        mutation: Mutation,
    ) -> Result<MutationOutcome, EngineError> {
        let kind = mutation.kind();
        let scoped = match mutation {
            whole @ (Mutation::Batch { .. } | Mutation::DeleteRestaurant { .. }) => whole,
            single => Mutation::Batch {
                restaurant_id,
                mutations: vec![single],
            },
        };
        let outcome = self.store.apply_mutation(scoped).await.map_err(|error| {
            let error = EngineError::from(error);
            if error.is_conflict() {
                tracing::info!(kind, %restaurant_id, %error, "staff edit conflicted");
            }
            error
        })?;
        self.publisher
            .publish(&ChangeEvent {
                restaurant_id,
                cause: ChangeCause::StaffEdit,
                changes: outcome.changes.clone(),
                committed_at: self.clock.now(),
            })
            .await;
        metrics::counter!("seatbook.staff.edits", "kind" => kind).increment(1);
        Ok(outcome)
    }

    // ========================================================================
    // Restaurants
    // ========================================================================

    /// Create a restaurant owned by the session's user.
    ///
    /// # Errors
    ///
    /// `AuthRequired`, `Forbidden` for diners, `Validation` for an empty name.
    pub async fn create_restaurant(
        &self,
        session: Option<&Session>,
        mut restaurant: NewRestaurant,
    ) -> Result<Restaurant, EngineError> {
        let session = session.ok_or(EngineError::AuthRequired)?;
        if session.role == seatbook_core::identity::Role::Diner {
            return Err(EngineError::Forbidden("diners cannot create restaurants".into()));
        }
        restaurant.created_by = Some(session.user_id);
        let created = self.store.create_restaurant(restaurant).await?;
        tracing::info!(restaurant_id = %created.id, name = %created.name, "restaurant created");
        Ok(created)
    }

    /// Delete a restaurant with everything it owns.
    ///
    /// Viewers receive a `table_removed` change for every table. Refused
    /// while any booking is live; staff cancel those first.
    ///
    /// # Errors
    ///
    /// `AuthRequired`, `Forbidden`, `NotFound`, `SeatConflict` naming the
    /// seats of live bookings.
    pub async fn delete_restaurant(
        &self,
        session: Option<&Session>,
        restaurant_id: RestaurantId,
    ) -> Result<(), EngineError> {
        Self::authorize(session, restaurant_id)?;
        let outcome = self
            .commit(restaurant_id, Mutation::DeleteRestaurant { restaurant_id })
            .await?;
        tracing::info!(%restaurant_id, tables = outcome.changes.len(), "restaurant deleted");
        Ok(())
    }

    /// Report seats whose status contradicts their bookings.
    ///
    /// # Errors
    ///
    /// `AuthRequired`, `Forbidden`, `StoreUnavailable`.
    pub async fn audit(
        &self,
        session: Option<&Session>,
        restaurant_id: RestaurantId,
    ) -> Result<Vec<IntegrityViolation>, EngineError> {
        Self::authorize(session, restaurant_id)?;
        let violations = self.store.audit_integrity(restaurant_id).await?;
        if !violations.is_empty() {
            tracing::error!(%restaurant_id, count = violations.len(), "seat integrity violations found");
            metrics::counter!("seatbook.integrity.violations")
                .increment(u64::try_from(violations.len()).unwrap_or(u64::MAX));
        }
        Ok(violations)
    }

    // ========================================================================
    // Tables and seats
    // ========================================================================

    /// Add a table and its seats.
    ///
    /// # Errors
    ///
    /// `AuthRequired`, `Forbidden`, `Validation` (zero capacity, number in use).
    #[tracing::instrument(skip(self, session, spec), fields(table_number = %spec.table_number))]
    pub async fn create_table(
        &self,
        session: Option<&Session>,
        restaurant_id: RestaurantId,
        spec: TableSpec,
    ) -> Result<SeatMapSnapshot, EngineError> {
        Self::authorize(session, restaurant_id)?;
        let outcome = self
            .commit(
                restaurant_id,
                Mutation::CreateTable(NewTable {
                    table_id: TableId::new(),
                    restaurant_id,
                    table_number: spec.table_number,
                    capacity: spec.capacity,
                    position: spec.position,
                    status: spec.status,
                }),
            )
            .await?;
        Ok(outcome.snapshot)
    }

    /// Remove a table and its seats.
    ///
    /// # Errors
    ///
    /// `SeatConflict` while a live booking holds one of its seats or when the
    /// table changed since `expected`.
    pub async fn delete_table(
        &self,
        session: Option<&Session>,
        restaurant_id: RestaurantId,
        table: TableRef,
    ) -> Result<SeatMapSnapshot, EngineError> {
        Self::authorize(session, restaurant_id)?;
        Ok(self.commit(restaurant_id, Mutation::DeleteTable(table)).await?.snapshot)
    }

    /// Change a table's status, position or both in one edit.
    ///
    /// # Errors
    ///
    /// `Validation` when neither is given, `SeatConflict` when the table
    /// changed since `expected`.
    pub async fn update_table(
        &self,
        session: Option<&Session>,
        restaurant_id: RestaurantId,
        table: TableRef,
        status: Option<TableStatus>,
        position: Option<Position>,
    ) -> Result<SeatMapSnapshot, EngineError> {
        Self::authorize(session, restaurant_id)?;
        if status.is_none() && position.is_none() {
            return Err(EngineError::Validation(
                "a table update needs a status or a position".into(),
            ));
        }
        let mutation = Mutation::UpdateTable {
            table,
            status,
            position,
        };
        Ok(self.commit(restaurant_id, mutation).await?.snapshot)
    }

    /// Change a table's coarse status.
    ///
    /// # Errors
    ///
    /// `SeatConflict` when the table changed since `expected`.
    pub async fn set_table_status(
        &self,
        session: Option<&Session>,
        restaurant_id: RestaurantId,
        table: TableRef,
        status: TableStatus,
    ) -> Result<SeatMapSnapshot, EngineError> {
        self.update_table(session, restaurant_id, table, Some(status), None)
            .await
    }

    /// Move a table on the floor plan.
    ///
    /// # Errors
    ///
    /// `SeatConflict` when the table changed since `expected`.
    pub async fn move_table(
        &self,
        session: Option<&Session>,
        restaurant_id: RestaurantId,
        table: TableRef,
        position: Position,
    ) -> Result<SeatMapSnapshot, EngineError> {
        self.update_table(session, restaurant_id, table, None, Some(position))
            .await
    }

    /// Exchange two tables' positions.
    ///
    /// # Errors
    ///
    /// `Validation` for a table swapped with itself, `SeatConflict` on stale versions.
    pub async fn swap_tables(
        &self,
        session: Option<&Session>,
        restaurant_id: RestaurantId,
        first: TableRef,
        second: TableRef,
    ) -> Result<SeatMapSnapshot, EngineError> {
        Self::authorize(session, restaurant_id)?;
        Ok(self
            .commit(restaurant_id, Mutation::SwapTables { first, second })
            .await?
            .snapshot)
    }

    /// Mark a seat available or occupied (walk-in seating).
    ///
    /// # Errors
    ///
    /// `Validation` for `reserved`, `SeatConflict` when a live booking holds
    /// the seat or it changed since `expected`.
    pub async fn set_seat_status(
        &self,
        session: Option<&Session>,
        restaurant_id: RestaurantId,
        seat_id: SeatId,
        expected: Version,
        status: SeatStatus,
    ) -> Result<SeatMapSnapshot, EngineError> {
        Self::authorize(session, restaurant_id)?;
        let mutation = Mutation::UpdateSeat {
            seat_id,
            expected,
            status,
        };
        Ok(self.commit(restaurant_id, mutation).await?.snapshot)
    }

    /// Save a batch of editor changes all-or-nothing.
    ///
    /// # Errors
    ///
    /// Any error of the individual edits; nothing is applied in that case.
    #[tracing::instrument(skip(self, session, edits), fields(edits = edits.len()))]
    pub async fn save_layout(
        &self,
        session: Option<&Session>,
        restaurant_id: RestaurantId,
        edits: Vec<LayoutEdit>,
    ) -> Result<SeatMapSnapshot, EngineError> {
        Self::authorize(session, restaurant_id)?;
        let mutation = Mutation::Batch {
            restaurant_id,
            mutations: edits.into_iter().map(Mutation::from).collect(),
        };
        Ok(self.commit(restaurant_id, mutation).await?.snapshot)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::booking::{BookingRequest, BookingRules, BookingService};
    use crate::store::InMemorySeatStore;
    use seatbook_core::change::EntityChange;
    use seatbook_core::types::UserId;
    use seatbook_runtime::RetryPolicy;
    use seatbook_testing::mocks::RecordingFeed;
    use seatbook_testing::test_clock;

    struct Fixture {
        console: StaffConsole,
        store: Arc<dyn SeatStore>,
        feed: Arc<RecordingFeed>,
        staff: Session,
        restaurant: RestaurantId,
    }

    async fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(test_clock());
        let store: Arc<dyn SeatStore> = Arc::new(InMemorySeatStore::new(Arc::clone(&clock)));
        let feed = Arc::new(RecordingFeed::new());
        let console = StaffConsole::new(
            Arc::clone(&store),
            ChangePublisher::new(feed.clone(), RetryPolicy::no_retry()),
            clock,
        );
        let owner = Session::staff(UserId::new(), Vec::new());
        let restaurant = console
            .create_restaurant(
                Some(&owner),
                NewRestaurant {
                    name: "Corner Bistro".into(),
                    ..NewRestaurant::default()
                },
            )
            .await
            .unwrap();
        Fixture {
            console,
            store,
            feed,
            staff: Session::staff(owner.user_id, vec![restaurant.id]),
            restaurant: restaurant.id,
        }
    }

    fn spec(number: u32, capacity: u16) -> TableSpec {
        TableSpec {
            table_number: TableNumber::new(number),
            capacity,
            position: Position::new(i32::try_from(number).unwrap() * 10, 0),
            status: TableStatus::Available,
        }
    }

    fn table_ref(snapshot: &SeatMapSnapshot, number: u32) -> TableRef {
        let view = snapshot.table_by_number(TableNumber::new(number)).unwrap();
        TableRef {
            table_id: view.table.id,
            expected: view.table.version,
        }
    }

    #[tokio::test]
    async fn created_table_is_published_as_a_staff_edit() {
        let fx = fixture().await;
        let snapshot = fx
            .console
            .create_table(Some(&fx.staff), fx.restaurant, spec(5, 4))
            .await
            .unwrap();

        let table = snapshot.table_by_number(TableNumber::new(5)).unwrap();
        assert_eq!(table.seats.len(), 4);

        let events = fx.feed.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].cause, ChangeCause::StaffEdit);
    }

    #[tokio::test]
    async fn diners_and_other_staff_are_refused() {
        let fx = fixture().await;
        let diner = Session::diner(UserId::new());
        let stranger = Session::staff(UserId::new(), vec![RestaurantId::new()]);

        for session in [Some(&diner), Some(&stranger)] {
            let err = fx
                .console
                .create_table(session, fx.restaurant, spec(1, 2))
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::Forbidden(_)));
        }
        let err = fx
            .console
            .create_table(None, fx.restaurant, spec(1, 2))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::AuthRequired);
        assert!(fx.feed.events().is_empty());
    }

    #[tokio::test]
    async fn stale_table_version_is_a_conflict() {
        let fx = fixture().await;
        let snapshot = fx
            .console
            .create_table(Some(&fx.staff), fx.restaurant, spec(1, 2))
            .await
            .unwrap();
        let loaded = table_ref(&snapshot, 1);

        fx.console
            .move_table(Some(&fx.staff), fx.restaurant, loaded, Position::new(3, 3))
            .await
            .unwrap();
        let err = fx
            .console
            .set_table_status(Some(&fx.staff), fx.restaurant, loaded, TableStatus::Standby)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_without_changes_is_invalid() {
        let fx = fixture().await;
        let snapshot = fx
            .console
            .create_table(Some(&fx.staff), fx.restaurant, spec(1, 2))
            .await
            .unwrap();
        let err = fx
            .console
            .update_table(Some(&fx.staff), fx.restaurant, table_ref(&snapshot, 1), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn swap_exchanges_positions() {
        let fx = fixture().await;
        fx.console
            .create_table(Some(&fx.staff), fx.restaurant, spec(1, 2))
            .await
            .unwrap();
        let snapshot = fx
            .console
            .create_table(Some(&fx.staff), fx.restaurant, spec(2, 2))
            .await
            .unwrap();

        let swapped = fx
            .console
            .swap_tables(
                Some(&fx.staff),
                fx.restaurant,
                table_ref(&snapshot, 1),
                table_ref(&snapshot, 2),
            )
            .await
            .unwrap();
        let first = swapped.table_by_number(TableNumber::new(1)).unwrap();
        let second = swapped.table_by_number(TableNumber::new(2)).unwrap();
        assert_eq!(first.table.position, Position::new(20, 0));
        assert_eq!(second.table.position, Position::new(10, 0));
    }

    #[tokio::test]
    async fn failed_layout_save_changes_nothing() {
        let fx = fixture().await;
        let snapshot = fx
            .console
            .create_table(Some(&fx.staff), fx.restaurant, spec(1, 2))
            .await
            .unwrap();
        let table = snapshot.table_by_number(TableNumber::new(1)).unwrap().clone();
        let published = fx.feed.events().len();

        let err = fx
            .console
            .save_layout(
                Some(&fx.staff),
                fx.restaurant,
                vec![
                    LayoutEdit::MoveTable {
                        table_id: table.table.id,
                        expected: table.table.version,
                        position: Position::new(99, 99),
                    },
                    LayoutEdit::SeatStatus {
                        seat_id: table.seats[0].id,
                        expected: table.seats[0].version.next(),
                        status: SeatStatus::Occupied,
                    },
                ],
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let after = fx.store.get_seat_map(fx.restaurant).await.unwrap();
        assert_eq!(after.tables[0].table.position, table.table.position);
        assert_eq!(after.tables[0].seats[0].status, SeatStatus::Available);
        assert_eq!(fx.feed.events().len(), published);
    }

    #[tokio::test]
    async fn booked_seat_cannot_be_edited_by_staff() {
        let fx = fixture().await;
        let snapshot = fx
            .console
            .create_table(Some(&fx.staff), fx.restaurant, spec(1, 2))
            .await
            .unwrap();
        let table = snapshot.table_by_number(TableNumber::new(1)).unwrap().clone();

        let bookings = BookingService::new(
            Arc::clone(&fx.store),
            ChangePublisher::new(fx.feed.clone(), RetryPolicy::no_retry()),
            Arc::new(test_clock()),
            BookingRules::default(),
        );
        let booking = bookings
            .propose_booking(
                Some(&Session::diner(UserId::new())),
                BookingRequest {
                    restaurant_id: fx.restaurant,
                    table_id: table.table.id,
                    seat_ids: vec![table.seats[0].id],
                    party_size: 1,
                    date_time: test_clock().now() + chrono::Duration::hours(2),
                    special_requests: None,
                    request_id: None,
                },
            )
            .await
            .unwrap();

        let map = fx.store.get_seat_map(fx.restaurant).await.unwrap();
        let seat = &map.tables[0].seats[0];
        let err = fx
            .console
            .set_seat_status(
                Some(&fx.staff),
                fx.restaurant,
                seat.id,
                seat.version,
                SeatStatus::Available,
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        bookings
            .cancel_booking(Some(&fx.staff), booking.id)
            .await
            .unwrap();
        let map = fx.store.get_seat_map(fx.restaurant).await.unwrap();
        let seat = &map.tables[0].seats[0];
        let snapshot = fx
            .console
            .set_seat_status(
                Some(&fx.staff),
                fx.restaurant,
                seat.id,
                seat.version,
                SeatStatus::Occupied,
            )
            .await
            .unwrap();
        assert_eq!(snapshot.tables[0].seats[0].status, SeatStatus::Occupied);
        let last = fx.feed.events().pop().unwrap();
        assert!(matches!(
            last.changes.as_slice(),
            [EntityChange::Seat { status: SeatStatus::Occupied, .. }]
        ));
    }

    #[tokio::test]
    async fn restaurant_deletion_waits_for_live_bookings_and_is_published() {
        let fx = fixture().await;
        let snapshot = fx
            .console
            .create_table(Some(&fx.staff), fx.restaurant, spec(1, 2))
            .await
            .unwrap();
        let table = snapshot.table_by_number(TableNumber::new(1)).unwrap().clone();
        let bookings = BookingService::new(
            Arc::clone(&fx.store),
            ChangePublisher::new(fx.feed.clone(), RetryPolicy::no_retry()),
            Arc::new(test_clock()),
            BookingRules::default(),
        );
        let booking = bookings
            .propose_booking(
                Some(&Session::diner(UserId::new())),
                BookingRequest {
                    restaurant_id: fx.restaurant,
                    table_id: table.table.id,
                    seat_ids: vec![table.seats[1].id],
                    party_size: 1,
                    date_time: test_clock().now() + chrono::Duration::hours(2),
                    special_requests: None,
                    request_id: None,
                },
            )
            .await
            .unwrap();

        let err = fx
            .console
            .delete_restaurant(Some(&fx.staff), fx.restaurant)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SeatConflict { ref seats, .. } if *seats == vec![table.seats[1].id]));
        assert!(fx.store.get_booking(booking.id).await.unwrap().is_some());

        bookings
            .cancel_booking(Some(&fx.staff), booking.id)
            .await
            .unwrap();
        fx.console
            .delete_restaurant(Some(&fx.staff), fx.restaurant)
            .await
            .unwrap();

        let last = fx.feed.events().pop().unwrap();
        assert_eq!(last.cause, ChangeCause::StaffEdit);
        assert_eq!(
            last.changes,
            vec![EntityChange::TableRemoved {
                table_id: table.table.id,
                version: table.table.version.next(),
            }]
        );
        assert!(fx.store.get_restaurant(fx.restaurant).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn audit_of_a_clean_restaurant_is_empty() {
        let fx = fixture().await;
        fx.console
            .create_table(Some(&fx.staff), fx.restaurant, spec(1, 3))
            .await
            .unwrap();
        assert!(fx
            .console
            .audit(Some(&fx.staff), fx.restaurant)
            .await
            .unwrap()
            .is_empty());
    }
}
