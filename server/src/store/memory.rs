//! In-memory state store.
//!
//! All records live behind one `tokio::sync::RwLock`. A mutation stages its
//! writes on a copy of the records and swaps the copy in only when every
//! check passed, so a failed mutation leaves nothing behind. The write lock is
//! held for that synchronous validate-and-commit step only.

use chrono::{DateTime, Utc};
use seatbook_core::change::EntityChange;
use seatbook_core::environment::Clock;
use seatbook_core::error::StoreError;
use seatbook_core::mutation::{
    ClaimSeats, MAX_TABLE_CAPACITY, Mutation, MutationOutcome, NewTable, TableRef,
};
use seatbook_core::seat_map::{SeatMapSnapshot, TableView};
use seatbook_core::store::{
    IntegrityViolation, NewRestaurant, SeatStore, StoreFuture, ViolationKind,
};
use seatbook_core::types::{
    Booking, BookingId, BookingSeat, BookingStatus, Position, Restaurant, RestaurantId, Seat,
    SeatId, SeatNumber, SeatStatus, Table, TableId, TableStatus, UserId, Version,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Debug, Default)]
struct Records {
    restaurants: HashMap<RestaurantId, Restaurant>,
    tables: HashMap<TableId, Table>,
    seats: HashMap<SeatId, Seat>,
    bookings: HashMap<BookingId, Booking>,
    links: BTreeSet<(BookingId, SeatId)>,
}

/// Versions of entities as they were before the current mutation started.
///
/// A batch may touch the same table twice; both edits are checked against
/// the version the editor read, not the one produced by the first edit.
#[derive(Default)]
struct BaseVersions {
    tables: HashMap<TableId, Version>,
    seats: HashMap<SeatId, Version>,
}

impl BaseVersions {
    fn table(&mut self, table: &Table) -> Version {
        *self.tables.entry(table.id).or_insert(table.version)
    }

    fn seat(&mut self, seat: &Seat) -> Version {
        *self.seats.entry(seat.id).or_insert(seat.version)
    }
}

impl Records {
    /// Seat as diners see it: a reservation whose slot elapsed reads as available.
    fn effective_seat(&self, seat: &Seat, now: DateTime<Utc>) -> Seat {
        if seat.status == SeatStatus::Reserved {
            if let Some(booking) = seat.claimed_by.and_then(|id| self.bookings.get(&id)) {
                if booking.status == BookingStatus::Confirmed && booking.slot().has_elapsed(now) {
                    return Seat {
                        status: SeatStatus::Available,
                        claimed_by: None,
                        ..seat.clone()
                    };
                }
            }
        }
        seat.clone()
    }

    /// Live booking currently holding a seat, if any.
    fn live_holder(&self, seat: &Seat, now: DateTime<Utc>) -> Option<&Booking> {
        if seat.status != SeatStatus::Reserved {
            return None;
        }
        seat.claimed_by
            .and_then(|id| self.bookings.get(&id))
            .filter(|booking| booking.is_live(now))
    }

    fn booking_with_seats(&self, booking: &Booking) -> Booking {
        let seat_ids = self
            .links
            .range((booking.id, SeatId::from_uuid(uuid::Uuid::nil()))..)
            .take_while(|(booking_id, _)| *booking_id == booking.id)
            .map(|(_, seat_id)| *seat_id)
            .collect();
        Booking {
            seat_ids,
            ..booking.clone()
        }
    }

    fn snapshot(
        &self,
        restaurant_id: RestaurantId,
        now: DateTime<Utc>,
    ) -> Result<SeatMapSnapshot, StoreError> {
        if !self.restaurants.contains_key(&restaurant_id) {
            return Err(StoreError::not_found("restaurant", restaurant_id));
        }

        let mut tables: Vec<TableView> = self
            .tables
            .values()
            .filter(|t| t.restaurant_id == restaurant_id)
            .map(|table| {
                let mut seats: Vec<Seat> = self
                    .seats
                    .values()
                    .filter(|s| s.table_id == table.id)
                    .map(|s| self.effective_seat(s, now))
                    .collect();
                seats.sort_by_key(|s| s.seat_number);
                TableView {
                    table: table.clone(),
                    seats,
                }
            })
            .collect();
        tables.sort_by_key(|t| t.table.table_number);

        Ok(SeatMapSnapshot {
            restaurant_id,
            tables,
            taken_at: now,
        })
    }

    fn table(&self, table_id: TableId) -> Result<&Table, StoreError> {
        self.tables
            .get(&table_id)
            .ok_or_else(|| StoreError::not_found("table", table_id))
    }

    fn seat(&self, seat_id: SeatId) -> Result<&Seat, StoreError> {
        self.seats
            .get(&seat_id)
            .ok_or_else(|| StoreError::not_found("seat", seat_id))
    }

    fn restaurant_of_seat(&self, seat_id: SeatId) -> Result<RestaurantId, StoreError> {
        let seat = self.seat(seat_id)?;
        Ok(self.table(seat.table_id)?.restaurant_id)
    }

    /// Restaurant a mutation belongs to.
    fn scope(&self, mutation: &Mutation) -> Result<RestaurantId, StoreError> {
        match mutation {
            Mutation::ClaimSeats(claim) => Ok(claim.restaurant_id),
            Mutation::ReleaseBooking { booking_id } => self
                .bookings
                .get(booking_id)
                .map(|b| b.restaurant_id)
                .ok_or_else(|| StoreError::not_found("booking", booking_id)),
            Mutation::CreateTable(table) => Ok(table.restaurant_id),
            Mutation::ReleaseElapsed { restaurant_id }
            | Mutation::DeleteRestaurant { restaurant_id }
            | Mutation::Batch { restaurant_id, .. } => Ok(*restaurant_id),
            Mutation::DeleteTable(table)
            | Mutation::UpdateTable { table, .. }
            | Mutation::SwapTables { first: table, .. } => {
                Ok(self.table(table.table_id)?.restaurant_id)
            },
            Mutation::UpdateSeat { seat_id, .. } => self.restaurant_of_seat(*seat_id),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    fn apply(
        &mut self,
        mutation: Mutation,
        now: DateTime<Utc>,
        base: &mut BaseVersions,
        changes: &mut Vec<EntityChange>,
    ) -> Result<Option<Booking>, StoreError> {
        match mutation {
            Mutation::ClaimSeats(claim) => self.claim_seats(claim, now, changes).map(Some),
            Mutation::ReleaseBooking { booking_id } => {
                self.release_booking(booking_id, now, changes).map(Some)
            },
            Mutation::ReleaseElapsed { restaurant_id } => {
                self.release_elapsed(restaurant_id, now, changes).map(|()| None)
            },
            Mutation::CreateTable(table) => self.create_table(table, changes).map(|()| None),
            Mutation::DeleteTable(table) => {
                self.delete_table(table, now, base, changes).map(|()| None)
            },
            Mutation::UpdateTable {
                table,
                status,
                position,
            } => self
                .update_table(table, status, position, base, changes)
                .map(|()| None),
            Mutation::SwapTables { first, second } => {
                self.swap_tables(first, second, base, changes).map(|()| None)
            },
            Mutation::UpdateSeat {
                seat_id,
                expected,
                status,
            } => self
                .update_seat(seat_id, expected, status, now, base, changes)
                .map(|()| None),
            Mutation::DeleteRestaurant { restaurant_id } => {
                self.delete_restaurant(restaurant_id, now, changes).map(|()| None)
            },
            Mutation::Batch {
                restaurant_id,
                mutations,
            } => {
                for mutation in mutations {
                    if self.scope(&mutation)? != restaurant_id {
                        return Err(StoreError::Invalid(format!(
                            "{} targets another restaurant",
                            mutation.kind()
                        )));
                    }
                    self.apply(mutation, now, base, changes)?;
                }
                Ok(None)
            },
        }
    }

    fn claim_seats(
        &mut self,
        claim: ClaimSeats,
        now: DateTime<Utc>,
        changes: &mut Vec<EntityChange>,
    ) -> Result<Booking, StoreError> {
        if self.bookings.contains_key(&claim.booking_id) {
            return Err(StoreError::conflict(format!(
                "booking {} already exists",
                claim.booking_id
            )));
        }
        let table = self.table(claim.table_id)?;
        if table.restaurant_id != claim.restaurant_id {
            return Err(StoreError::Invalid(format!(
                "table {} does not belong to restaurant {}",
                claim.table_id, claim.restaurant_id
            )));
        }

        let mut lost = Vec::new();
        for requested in &claim.seats {
            let seat = self.seat(requested.seat_id)?;
            if seat.table_id != claim.table_id {
                return Err(StoreError::Invalid(format!(
                    "seat {} is not on table {}",
                    seat.id, claim.table_id
                )));
            }
            let seat = self.effective_seat(seat, now);
            if seat.version != requested.expected || !seat.is_available() {
                lost.push(seat.id);
            }
        }
        if !lost.is_empty() {
            return Err(StoreError::seat_conflict(
                lost,
                "seats were claimed or changed since they were read",
            ));
        }

        let booking = Booking {
            id: claim.booking_id,
            user_id: claim.user_id,
            restaurant_id: claim.restaurant_id,
            table_id: claim.table_id,
            date_time: claim.slot.starts_at,
            ends_at: claim.slot.ends_at,
            party_size: claim.party_size,
            status: BookingStatus::Confirmed,
            special_requests: claim.special_requests,
            seat_ids: claim.seats.iter().map(|s| s.seat_id).collect(),
            created_at: now,
            updated_at: now,
        };

        for requested in &claim.seats {
            if let Some(seat) = self.seats.get_mut(&requested.seat_id) {
                seat.status = SeatStatus::Reserved;
                seat.claimed_by = Some(booking.id);
                seat.version = seat.version.next();
                changes.push(seat_change(seat));
            }
            self.links.insert((booking.id, requested.seat_id));
        }
        self.bookings.insert(booking.id, booking.clone());

        Ok(booking)
    }

    fn release_booking(
        &mut self,
        booking_id: BookingId,
        now: DateTime<Utc>,
        changes: &mut Vec<EntityChange>,
    ) -> Result<Booking, StoreError> {
        let booking = self
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("booking", booking_id))?;
        if booking.status == BookingStatus::Cancelled {
            return Ok(self.booking_with_seats(&booking));
        }

        let live = booking.is_live(now);
        let linked: Vec<SeatId> = self.booking_with_seats(&booking).seat_ids;
        for seat_id in linked {
            let Some(seat) = self.seats.get_mut(&seat_id) else {
                if live {
                    return Err(StoreError::Integrity(format!(
                        "seat {seat_id} of live booking {booking_id} is missing"
                    )));
                }
                continue;
            };
            if seat.status == SeatStatus::Reserved && seat.claimed_by == Some(booking_id) {
                seat.status = SeatStatus::Available;
                seat.claimed_by = None;
                seat.version = seat.version.next();
                changes.push(seat_change(seat));
            } else if live {
                return Err(StoreError::Integrity(format!(
                    "seat {seat_id} is {} but should be held by booking {booking_id}",
                    seat.status
                )));
            }
        }

        let Some(stored) = self.bookings.get_mut(&booking_id) else {
            return Err(StoreError::not_found("booking", booking_id));
        };
        stored.status = BookingStatus::Cancelled;
        stored.updated_at = now;
        let cancelled = stored.clone();
        Ok(self.booking_with_seats(&cancelled))
    }

    /// Persist what reads already report: seats of confirmed bookings whose
    /// slot ended become available at a new version.
    fn release_elapsed(
        &mut self,
        restaurant_id: RestaurantId,
        now: DateTime<Utc>,
        changes: &mut Vec<EntityChange>,
    ) -> Result<(), StoreError> {
        if !self.restaurants.contains_key(&restaurant_id) {
            return Err(StoreError::not_found("restaurant", restaurant_id));
        }
        let mut elapsed: Vec<&Seat> = self
            .seats
            .values()
            .filter(|s| {
                self.tables
                    .get(&s.table_id)
                    .is_some_and(|t| t.restaurant_id == restaurant_id)
            })
            .filter(|s| s.status == SeatStatus::Reserved && self.effective_seat(s, now).is_available())
            .collect();
        elapsed.sort_by_key(|s| (s.table_id, s.seat_number));
        let elapsed: Vec<SeatId> = elapsed.into_iter().map(|s| s.id).collect();

        for seat_id in elapsed {
            if let Some(seat) = self.seats.get_mut(&seat_id) {
                seat.status = SeatStatus::Available;
                seat.claimed_by = None;
                seat.version = seat.version.next();
                changes.push(seat_change(seat));
            }
        }
        Ok(())
    }

    fn create_table(
        &mut self,
        new: NewTable,
        changes: &mut Vec<EntityChange>,
    ) -> Result<(), StoreError> {
        if !self.restaurants.contains_key(&new.restaurant_id) {
            return Err(StoreError::not_found("restaurant", new.restaurant_id));
        }
        if new.capacity > MAX_TABLE_CAPACITY {
            return Err(StoreError::Invalid(format!(
                "capacity {} exceeds the maximum of {MAX_TABLE_CAPACITY}",
                new.capacity
            )));
        }
        if self.tables.contains_key(&new.table_id) {
            return Err(StoreError::conflict(format!("table {} already exists", new.table_id)));
        }
        if self
            .tables
            .values()
            .any(|t| t.restaurant_id == new.restaurant_id && t.table_number == new.table_number)
        {
            return Err(StoreError::Invalid(format!(
                "table number {} is already used in this restaurant",
                new.table_number
            )));
        }

        let table = Table {
            id: new.table_id,
            restaurant_id: new.restaurant_id,
            table_number: new.table_number,
            capacity: new.capacity,
            status: new.status,
            position: new.position,
            version: Version::INITIAL,
        };
        changes.push(table_change(&table));
        self.tables.insert(table.id, table);

        for number in 1..=new.capacity {
            let seat = Seat {
                id: SeatId::new(),
                table_id: new.table_id,
                seat_number: SeatNumber::new(number),
                status: SeatStatus::Available,
                claimed_by: None,
                version: Version::INITIAL,
            };
            changes.push(seat_change(&seat));
            self.seats.insert(seat.id, seat);
        }
        Ok(())
    }

    fn checked_table(
        &self,
        table_ref: TableRef,
        base: &mut BaseVersions,
    ) -> Result<Table, StoreError> {
        let table = self.table(table_ref.table_id)?.clone();
        let read = base.table(&table);
        if read != table_ref.expected {
            return Err(StoreError::conflict(format!(
                "table {} is at {read}, edit was based on {}",
                table.table_number, table_ref.expected
            )));
        }
        Ok(table)
    }

    fn delete_table(
        &mut self,
        table_ref: TableRef,
        now: DateTime<Utc>,
        base: &mut BaseVersions,
        changes: &mut Vec<EntityChange>,
    ) -> Result<(), StoreError> {
        let table = self.checked_table(table_ref, base)?;
        let seat_ids: Vec<SeatId> = self
            .seats
            .values()
            .filter(|s| s.table_id == table.id)
            .map(|s| s.id)
            .collect();

        let held: Vec<SeatId> = seat_ids
            .iter()
            .filter_map(|id| self.seats.get(id))
            .filter(|s| self.live_holder(s, now).is_some())
            .map(|s| s.id)
            .collect();
        if !held.is_empty() {
            return Err(StoreError::seat_conflict(
                held,
                format!("table {} has live bookings", table.table_number),
            ));
        }

        // links stay: cancelled and past bookings keep their seat list
        for seat_id in &seat_ids {
            self.seats.remove(seat_id);
        }
        self.tables.remove(&table.id);
        changes.push(EntityChange::TableRemoved {
            table_id: table.id,
            version: table.version.next(),
        });
        Ok(())
    }

    fn update_table(
        &mut self,
        table_ref: TableRef,
        status: Option<TableStatus>,
        position: Option<Position>,
        base: &mut BaseVersions,
        changes: &mut Vec<EntityChange>,
    ) -> Result<(), StoreError> {
        if status.is_none() && position.is_none() {
            return Err(StoreError::Invalid("table edit changes nothing".into()));
        }
        self.checked_table(table_ref, base)?;
        if let Some(table) = self.tables.get_mut(&table_ref.table_id) {
            if let Some(status) = status {
                table.status = status;
            }
            if let Some(position) = position {
                table.position = position;
            }
            table.version = table.version.next();
            changes.push(table_change(table));
        }
        Ok(())
    }

    fn swap_tables(
        &mut self,
        first: TableRef,
        second: TableRef,
        base: &mut BaseVersions,
        changes: &mut Vec<EntityChange>,
    ) -> Result<(), StoreError> {
        let a = self.checked_table(first, base)?;
        let b = self.checked_table(second, base)?;
        if a.restaurant_id != b.restaurant_id {
            return Err(StoreError::Invalid(
                "cannot swap tables of different restaurants".into(),
            ));
        }
        for (id, position) in [(a.id, b.position), (b.id, a.position)] {
            if let Some(table) = self.tables.get_mut(&id) {
                table.position = position;
                table.version = table.version.next();
                changes.push(table_change(table));
            }
        }
        Ok(())
    }

    fn update_seat(
        &mut self,
        seat_id: SeatId,
        expected: Version,
        status: SeatStatus,
        now: DateTime<Utc>,
        base: &mut BaseVersions,
        changes: &mut Vec<EntityChange>,
    ) -> Result<(), StoreError> {
        if status == SeatStatus::Reserved {
            return Err(StoreError::Invalid(
                "seats become reserved only through a booking".into(),
            ));
        }
        let seat = self.seat(seat_id)?.clone();
        let read = base.seat(&seat);
        if read != expected {
            return Err(StoreError::seat_conflict(
                vec![seat_id],
                format!("seat is at {read}, edit was based on {expected}"),
            ));
        }
        if let Some(holder) = self.live_holder(&seat, now) {
            return Err(StoreError::seat_conflict(
                vec![seat_id],
                format!("seat is held by booking {}", holder.id),
            ));
        }
        if let Some(seat) = self.seats.get_mut(&seat_id) {
            seat.status = status;
            seat.claimed_by = None;
            seat.version = seat.version.next();
            changes.push(seat_change(seat));
        }
        Ok(())
    }

    fn delete_restaurant(
        &mut self,
        restaurant_id: RestaurantId,
        now: DateTime<Utc>,
        changes: &mut Vec<EntityChange>,
    ) -> Result<(), StoreError> {
        if !self.restaurants.contains_key(&restaurant_id) {
            return Err(StoreError::not_found("restaurant", restaurant_id));
        }
        let held: Vec<SeatId> = self
            .bookings
            .values()
            .filter(|b| b.restaurant_id == restaurant_id && b.is_live(now))
            .flat_map(|b| self.booking_with_seats(b).seat_ids)
            .collect();
        if !held.is_empty() {
            return Err(StoreError::seat_conflict(
                held,
                "restaurant has live bookings; cancel them first",
            ));
        }

        let mut tables: Vec<&Table> = self
            .tables
            .values()
            .filter(|t| t.restaurant_id == restaurant_id)
            .collect();
        tables.sort_by_key(|t| t.table_number);
        changes.extend(tables.iter().map(|table| EntityChange::TableRemoved {
            table_id: table.id,
            version: table.version.next(),
        }));
        let table_ids: HashSet<TableId> = tables.into_iter().map(|t| t.id).collect();
        let booking_ids: HashSet<BookingId> = self
            .bookings
            .values()
            .filter(|b| b.restaurant_id == restaurant_id)
            .map(|b| b.id)
            .collect();

        self.seats.retain(|_, s| !table_ids.contains(&s.table_id));
        self.tables.retain(|id, _| !table_ids.contains(id));
        self.links.retain(|(booking_id, _)| !booking_ids.contains(booking_id));
        self.bookings.retain(|id, _| !booking_ids.contains(id));
        self.restaurants.remove(&restaurant_id);
        Ok(())
    }

    fn audit(&self, restaurant_id: RestaurantId, now: DateTime<Utc>) -> Vec<IntegrityViolation> {
        let mut violations = Vec::new();
        let mut live_links: HashMap<SeatId, usize> = HashMap::new();
        for (booking_id, seat_id) in &self.links {
            if self.bookings.get(booking_id).is_some_and(|b| b.is_live(now)) {
                *live_links.entry(*seat_id).or_default() += 1;
            }
        }

        let mut seats: Vec<&Seat> = self
            .seats
            .values()
            .filter(|s| {
                self.tables
                    .get(&s.table_id)
                    .is_some_and(|t| t.restaurant_id == restaurant_id)
            })
            .collect();
        seats.sort_by_key(|s| (s.table_id, s.seat_number));

        for seat in seats {
            let violation = |kind, booking_id| IntegrityViolation {
                seat_id: seat.id,
                table_id: seat.table_id,
                booking_id,
                kind,
            };
            if live_links.get(&seat.id).copied().unwrap_or(0) > 1 {
                violations.push(violation(ViolationKind::DoubleBooked, None));
            }
            if seat.status != SeatStatus::Reserved {
                continue;
            }
            match seat.claimed_by.map(|id| (id, self.bookings.get(&id))) {
                None | Some((_, None)) => violations.push(violation(
                    ViolationKind::ReservedWithoutBooking,
                    seat.claimed_by,
                )),
                Some((id, Some(booking))) if booking.status == BookingStatus::Cancelled => {
                    violations.push(violation(ViolationKind::ReservedByCancelledBooking, Some(id)));
                },
                Some((id, Some(_))) if !self.links.contains(&(id, seat.id)) => {
                    violations.push(violation(ViolationKind::ClaimWithoutLink, Some(id)));
                },
                Some(_) => {},
            }
        }
        violations
    }
}

fn seat_change(seat: &Seat) -> EntityChange {
    EntityChange::Seat {
        seat_id: seat.id,
        table_id: seat.table_id,
        seat_number: seat.seat_number,
        status: seat.status,
        version: seat.version,
    }
}

fn table_change(table: &Table) -> EntityChange {
    EntityChange::Table {
        table_id: table.id,
        table_number: table.table_number,
        capacity: table.capacity,
        status: table.status,
        position: table.position,
        version: table.version,
    }
}

/// Reference [`SeatStore`] keeping everything in process memory.
pub struct InMemorySeatStore {
    records: RwLock<Records>,
    clock: Arc<dyn Clock>,
}

impl InMemorySeatStore {
    /// Empty store reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(Records::default()),
            clock,
        }
    }

    /// Every booking-seat link, for inspection in tests and tooling.
    pub async fn booking_seats(&self) -> Vec<BookingSeat> {
        self.records
            .read()
            .await
            .links
            .iter()
            .map(|(booking_id, seat_id)| BookingSeat {
                booking_id: *booking_id,
                seat_id: *seat_id,
            })
            .collect()
    }

    /// Number of stored bookings, cancelled ones included.
    pub async fn booking_count(&self) -> usize {
        self.records.read().await.bookings.len()
    }
}

impl SeatStore for InMemorySeatStore {
    fn get_seat_map(&self, restaurant_id: RestaurantId) -> StoreFuture<'_, SeatMapSnapshot> {
        Box::pin(async move {
            let now = self.clock.now();
            self.records.read().await.snapshot(restaurant_id, now)
        })
    }

    fn read_seats<'a>(
        &'a self,
        table_id: TableId,
        seat_ids: &'a [SeatId],
    ) -> StoreFuture<'a, Vec<Seat>> {
        Box::pin(async move {
            let now = self.clock.now();
            let records = self.records.read().await;
            records.table(table_id)?;
            Ok(seat_ids
                .iter()
                .filter_map(|id| records.seats.get(id))
                .filter(|s| s.table_id == table_id)
                .map(|s| records.effective_seat(s, now))
                .collect())
        })
    }

    fn apply_mutation(&self, mutation: Mutation) -> StoreFuture<'_, MutationOutcome> {
        Box::pin(async move {
            let kind = mutation.kind();
            mutation.check_shape().map_err(StoreError::Invalid)?;
            let now = self.clock.now();

            let mut records = self.records.write().await;
            let restaurant_id = records.scope(&mutation)?;

            let mut staged = records.clone();
            let mut changes = Vec::new();
            let result = staged.apply(mutation, now, &mut BaseVersions::default(), &mut changes);

            match result {
                Ok(booking) => {
                    let snapshot = if staged.restaurants.contains_key(&restaurant_id) {
                        staged.snapshot(restaurant_id, now)?
                    } else {
                        SeatMapSnapshot::empty(restaurant_id, now)
                    };
                    *records = staged;
                    drop(records);
                    tracing::debug!(kind, %restaurant_id, changes = changes.len(), "mutation committed");
                    metrics::counter!("seatbook.store.mutations", "kind" => kind, "result" => "committed")
                        .increment(1);
                    Ok(MutationOutcome {
                        restaurant_id,
                        changes,
                        booking,
                        snapshot,
                    })
                },
                Err(error) => {
                    let result = if matches!(error, StoreError::Conflict { .. }) {
                        "conflict"
                    } else {
                        "rejected"
                    };
                    tracing::debug!(kind, %restaurant_id, %error, "mutation not applied");
                    metrics::counter!("seatbook.store.mutations", "kind" => kind, "result" => result)
                        .increment(1);
                    Err(error)
                },
            }
        })
    }

    fn get_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            let records = self.records.read().await;
            Ok(records
                .bookings
                .get(&booking_id)
                .map(|b| records.booking_with_seats(b)))
        })
    }

    fn list_user_bookings(&self, user_id: UserId) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let records = self.records.read().await;
            let mut bookings: Vec<Booking> = records
                .bookings
                .values()
                .filter(|b| b.user_id == user_id)
                .map(|b| records.booking_with_seats(b))
                .collect();
            bookings.sort_by(|a, b| b.date_time.cmp(&a.date_time));
            Ok(bookings)
        })
    }

    fn list_restaurant_bookings(
        &self,
        restaurant_id: RestaurantId,
    ) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let records = self.records.read().await;
            let mut bookings: Vec<Booking> = records
                .bookings
                .values()
                .filter(|b| b.restaurant_id == restaurant_id)
                .map(|b| records.booking_with_seats(b))
                .collect();
            bookings.sort_by_key(|b| b.date_time);
            Ok(bookings)
        })
    }

    fn create_restaurant(&self, restaurant: NewRestaurant) -> StoreFuture<'_, Restaurant> {
        Box::pin(async move {
            let name = restaurant.name.trim();
            if name.is_empty() {
                return Err(StoreError::Invalid("restaurant name is required".into()));
            }
            let created = Restaurant {
                id: RestaurantId::new(),
                name: name.to_string(),
                description: restaurant.description,
                address: restaurant.address,
                phone: restaurant.phone,
                image_url: restaurant.image_url,
                created_by: restaurant.created_by,
                created_at: self.clock.now(),
            };
            self.records
                .write()
                .await
                .restaurants
                .insert(created.id, created.clone());
            Ok(created)
        })
    }

    fn get_restaurant(&self, restaurant_id: RestaurantId) -> StoreFuture<'_, Option<Restaurant>> {
        Box::pin(async move {
            Ok(self
                .records
                .read()
                .await
                .restaurants
                .get(&restaurant_id)
                .cloned())
        })
    }

    fn list_restaurants(&self) -> StoreFuture<'_, Vec<Restaurant>> {
        Box::pin(async move {
            let mut restaurants: Vec<Restaurant> =
                self.records.read().await.restaurants.values().cloned().collect();
            restaurants.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(restaurants)
        })
    }

    fn audit_integrity(
        &self,
        restaurant_id: RestaurantId,
    ) -> StoreFuture<'_, Vec<IntegrityViolation>> {
        Box::pin(async move {
            let now = self.clock.now();
            Ok(self.records.read().await.audit(restaurant_id, now))
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
