//! State store abstraction.
//!
//! The [`SeatStore`] trait is the single source of truth for restaurants,
//! tables, seats, bookings and booking-seat links. Reads are side-effect free;
//! every write is a [`Mutation`] applied atomically through
//! [`SeatStore::apply_mutation`].
//!
//! # Guarantees
//!
//! Implementations must serialise mutations that touch overlapping seat sets
//! with a compare-and-swap or transactional mechanism: two concurrent
//! `apply_mutation` calls claiming the same seat never both succeed, and a
//! failed mutation leaves no partial writes behind.
//!
//! # Example
//!
//! ```ignore
//! let seats = store.read_seats(table_id, &seat_ids).await?;
//! let outcome = store.apply_mutation(Mutation::ClaimSeats(ClaimSeats {
//!     seats: seats.iter().map(|s| SeatClaim { seat_id: s.id, expected: s.version }).collect(),
//!     ..claim
//! })).await?;
//! ```

use crate::error::StoreError;
use crate::mutation::{Mutation, MutationOutcome};
use crate::seat_map::SeatMapSnapshot;
use crate::types::{
    Booking, BookingId, Restaurant, RestaurantId, Seat, SeatId, TableId, UserId,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Descriptive fields for a new restaurant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRestaurant {
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: Option<String>,
    /// Street address
    pub address: Option<String>,
    /// Contact phone number
    pub phone: Option<String>,
    /// Cover image
    pub image_url: Option<String>,
    /// Creator
    pub created_by: Option<UserId>,
}

/// Kind of data-integrity fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Seat is `reserved` but no booking claims it
    ReservedWithoutBooking,
    /// Seat is `reserved` by a booking that was cancelled
    ReservedByCancelledBooking,
    /// A seat claims a booking that is not linked to it
    ClaimWithoutLink,
    /// Two live bookings link the same seat
    DoubleBooked,
}

/// A detected inconsistency between seat status and booking links.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityViolation {
    /// Seat at fault
    pub seat_id: SeatId,
    /// Its table
    pub table_id: TableId,
    /// Booking involved, if any
    pub booking_id: Option<BookingId>,
    /// Classification
    pub kind: ViolationKind,
}

/// Authoritative storage for the seat engine.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the trait can be used as
/// `Arc<dyn SeatStore>`.
pub trait SeatStore: Send + Sync {
    /// Current tables and seats of a restaurant.
    ///
    /// Seats held by a booking whose slot has elapsed are reported
    /// `available`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown restaurant, `Unavailable` on storage failure.
    fn get_seat_map(&self, restaurant_id: RestaurantId) -> StoreFuture<'_, SeatMapSnapshot>;

    /// Read status and version of the given seats of one table.
    ///
    /// Seats that do not exist on `table_id` are omitted from the result.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown table, `Unavailable` on storage failure.
    fn read_seats<'a>(
        &'a self,
        table_id: TableId,
        seat_ids: &'a [SeatId],
    ) -> StoreFuture<'a, Vec<Seat>>;

    /// Apply a mutation atomically.
    ///
    /// # Errors
    ///
    /// `Conflict` when a version check fails or a seat is not claimable,
    /// `Invalid` for malformed mutations, `NotFound`, `Unavailable`.
    fn apply_mutation(&self, mutation: Mutation) -> StoreFuture<'_, MutationOutcome>;

    /// Look up a booking.
    ///
    /// # Errors
    ///
    /// `Unavailable` on storage failure.
    fn get_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Option<Booking>>;

    /// Bookings made by a user, newest date first.
    ///
    /// # Errors
    ///
    /// `Unavailable` on storage failure.
    fn list_user_bookings(&self, user_id: UserId) -> StoreFuture<'_, Vec<Booking>>;

    /// Bookings at a restaurant, by date.
    ///
    /// # Errors
    ///
    /// `Unavailable` on storage failure.
    fn list_restaurant_bookings(
        &self,
        restaurant_id: RestaurantId,
    ) -> StoreFuture<'_, Vec<Booking>>;

    /// Create a restaurant.
    ///
    /// # Errors
    ///
    /// `Invalid` for an empty name, `Unavailable` on storage failure.
    fn create_restaurant(&self, restaurant: NewRestaurant) -> StoreFuture<'_, Restaurant>;

    /// Look up a restaurant.
    ///
    /// # Errors
    ///
    /// `Unavailable` on storage failure.
    fn get_restaurant(&self, restaurant_id: RestaurantId) -> StoreFuture<'_, Option<Restaurant>>;

    /// All restaurants, by name.
    ///
    /// # Errors
    ///
    /// `Unavailable` on storage failure.
    fn list_restaurants(&self) -> StoreFuture<'_, Vec<Restaurant>>;

    /// Report seats whose status contradicts their booking links.
    ///
    /// # Errors
    ///
    /// `Unavailable` on storage failure.
    fn audit_integrity(
        &self,
        restaurant_id: RestaurantId,
    ) -> StoreFuture<'_, Vec<IntegrityViolation>>;

    /// Cheap connectivity probe.
    ///
    /// # Errors
    ///
    /// `Unavailable` when storage cannot be reached.
    fn ping(&self) -> StoreFuture<'_, ()>;
}
