//! The booking transaction.
//!
//! [`BookingService::propose_booking`] is the only path from `available` to
//! `reserved`. It validates the request without touching storage, reads the
//! requested seats with their versions, then hands a single
//! [`Mutation::ClaimSeats`] to the store, which re-checks every version and
//! commits booking, links and seat statuses as one unit. The change event is
//! published after the commit.

use crate::feed::ChangePublisher;
use chrono::{DateTime, Utc};
use seatbook_core::change::{ChangeCause, ChangeEvent, EntityChange};
use seatbook_core::environment::Clock;
use seatbook_core::error::EngineError;
use seatbook_core::identity::Session;
use seatbook_core::mutation::{ClaimSeats, Mutation, SeatClaim};
use seatbook_core::store::SeatStore;
use seatbook_core::types::{
    Booking, BookingId, BookingStatus, RestaurantId, SeatId, TableId, TimeSlot,
};
use seatbook_runtime::{RetryPolicy, retry_if};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Longest accepted special-requests text, in characters.
pub const MAX_SPECIAL_REQUESTS_CHARS: usize = 500;

/// A diner's proposal: these seats, at this table, at this time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    /// Restaurant of the table
    pub restaurant_id: RestaurantId,
    /// Table every seat must belong to
    pub table_id: TableId,
    /// Seats to claim
    pub seat_ids: Vec<SeatId>,
    /// Must equal the number of seats
    pub party_size: u16,
    /// Start of the reservation
    pub date_time: DateTime<Utc>,
    /// Free-text notes
    #[serde(default)]
    pub special_requests: Option<String>,
    /// Client-chosen id making resubmission after a timeout safe
    #[serde(default)]
    pub request_id: Option<BookingId>,
}

/// Limits applied to every booking.
#[derive(Clone, Debug)]
pub struct BookingRules {
    /// How long a booking holds its seats
    pub slot_length: chrono::Duration,
    /// Largest accepted party
    pub max_party_size: u16,
    /// Backoff for storage failures
    pub retry: RetryPolicy,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            slot_length: chrono::Duration::minutes(120),
            max_party_size: 20,
            retry: RetryPolicy::default(),
        }
    }
}

/// Diner-facing booking operations.
pub struct BookingService {
    store: Arc<dyn SeatStore>,
    publisher: ChangePublisher,
    clock: Arc<dyn Clock>,
    rules: BookingRules,
}

impl BookingService {
    /// Service over a store and publisher.
    #[must_use]
    pub fn new(
        store: Arc<dyn SeatStore>,
        publisher: ChangePublisher,
        clock: Arc<dyn Clock>,
        rules: BookingRules,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            rules,
        }
    }

    /// Rules in force.
    #[must_use]
    pub const fn rules(&self) -> &BookingRules {
        &self.rules
    }

    /// Check a request without touching the store.
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] naming the first problem.
    pub fn validate(&self, request: &BookingRequest) -> Result<(), EngineError> {
        if request.seat_ids.is_empty() {
            return Err(EngineError::Validation("select at least one seat".into()));
        }
        let unique: HashSet<SeatId> = request.seat_ids.iter().copied().collect();
        if unique.len() != request.seat_ids.len() {
            return Err(EngineError::Validation("a seat was selected twice".into()));
        }
        if usize::from(request.party_size) != request.seat_ids.len() {
            return Err(EngineError::Validation(format!(
                "party size {} does not match the {} selected seats",
                request.party_size,
                request.seat_ids.len()
            )));
        }
        if request.party_size > self.rules.max_party_size {
            return Err(EngineError::Validation(format!(
                "parties larger than {} cannot be booked online",
                self.rules.max_party_size
            )));
        }
        if request.date_time < self.clock.now() {
            return Err(EngineError::Validation(
                "reservation time is in the past".into(),
            ));
        }
        if request
            .special_requests
            .as_ref()
            .is_some_and(|text| text.chars().count() > MAX_SPECIAL_REQUESTS_CHARS)
        {
            return Err(EngineError::Validation(format!(
                "special requests are limited to {MAX_SPECIAL_REQUESTS_CHARS} characters"
            )));
        }
        Ok(())
    }

    /// Claim the requested seats.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AuthRequired`] without a session
    /// - [`EngineError::Validation`] for malformed or cross-table requests
    /// - [`EngineError::SeatConflict`] when another booking holds or won a seat
    /// - [`EngineError::StoreUnavailable`] once retries are exhausted
    #[tracing::instrument(
        skip(self, session, request),
        fields(table_id = %request.table_id, seats = request.seat_ids.len())
    )]
    pub async fn propose_booking(
        &self,
        session: Option<&Session>,
        request: BookingRequest,
    ) -> Result<Booking, EngineError> {
        let session = session.ok_or(EngineError::AuthRequired)?;
        self.validate(&request)?;

        let booking_id = request.request_id.unwrap_or_default();
        if request.request_id.is_some() {
            if let Some(existing) = self.store.get_booking(booking_id).await? {
                return Self::replayed(session, &request, existing);
            }
        }

        let attempts = AtomicU32::new(0);
        let result = retry_if(
            &self.rules.retry,
            || self.attempt(session, &request, booking_id, attempts.fetch_add(1, Ordering::SeqCst)),
            EngineError::is_transient,
        )
        .await;

        match result {
            Ok((booking, changes)) => {
                if !changes.is_empty() {
                    self.publisher
                        .publish(&ChangeEvent {
                            restaurant_id: booking.restaurant_id,
                            cause: ChangeCause::Booking {
                                booking_id: booking.id,
                            },
                            changes,
                            committed_at: booking.created_at,
                        })
                        .await;
                }
                metrics::counter!("seatbook.bookings.confirmed").increment(1);
                tracing::info!(booking_id = %booking.id, party_size = booking.party_size, "booking confirmed");
                Ok(booking)
            },
            Err(error) => {
                if error.is_conflict() {
                    metrics::counter!("seatbook.bookings.conflicts").increment(1);
                    tracing::debug!(%error, "booking lost the race");
                }
                Err(error)
            },
        }
    }

    /// One read-then-claim round trip.
    ///
    /// Retries first check whether an earlier attempt committed before its
    /// acknowledgement was lost.
    async fn attempt(
        &self,
        session: &Session,
        request: &BookingRequest,
        booking_id: BookingId,
        attempt: u32,
    ) -> Result<(Booking, Vec<EntityChange>), EngineError> {
        if attempt > 0 {
            if let Some(landed) = self.store.get_booking(booking_id).await? {
                tracing::info!(%booking_id, attempt, "earlier attempt had committed");
                let changes = self.current_seat_changes(&landed).await?;
                return Ok((landed, changes));
            }
        }

        let seats = self
            .store
            .read_seats(request.table_id, &request.seat_ids)
            .await?;
        if seats.len() != request.seat_ids.len() {
            return Err(EngineError::Validation(
                "all seats must belong to the selected table".into(),
            ));
        }
        let taken: Vec<SeatId> = seats
            .iter()
            .filter(|s| !s.is_available())
            .map(|s| s.id)
            .collect();
        if !taken.is_empty() {
            return Err(EngineError::SeatConflict {
                seats: taken,
                detail: "seats are no longer available".into(),
            });
        }

        let outcome = self
            .store
            .apply_mutation(Mutation::ClaimSeats(ClaimSeats {
                booking_id,
                user_id: session.user_id,
                restaurant_id: request.restaurant_id,
                table_id: request.table_id,
                slot: TimeSlot::starting_at(request.date_time, self.rules.slot_length),
                party_size: request.party_size,
                special_requests: request.special_requests.clone(),
                seats: seats
                    .iter()
                    .map(|s| SeatClaim {
                        seat_id: s.id,
                        expected: s.version,
                    })
                    .collect(),
            }))
            .await?;

        let booking = outcome.booking.ok_or_else(|| {
            EngineError::IntegrityFault(format!("claim for {booking_id} returned no booking"))
        })?;
        Ok((booking, outcome.changes))
    }

    /// A resubmitted request id resolves to the booking it created.
    fn replayed(
        session: &Session,
        request: &BookingRequest,
        existing: Booking,
    ) -> Result<Booking, EngineError> {
        let mut requested = request.seat_ids.clone();
        let mut booked = existing.seat_ids.clone();
        requested.sort();
        booked.sort();
        if existing.user_id != session.user_id || existing.table_id != request.table_id || requested != booked {
            return Err(EngineError::Validation(
                "request id was already used for a different booking".into(),
            ));
        }
        tracing::debug!(booking_id = %existing.id, "duplicate submission");
        Ok(existing)
    }

    /// Current state of a booking's seats as change entries.
    ///
    /// Used when the original event for a commit was never emitted; merging
    /// by version makes re-sending current state harmless.
    async fn current_seat_changes(
        &self,
        booking: &Booking,
    ) -> Result<Vec<EntityChange>, EngineError> {
        let seats = self
            .store
            .read_seats(booking.table_id, &booking.seat_ids)
            .await?;
        Ok(seats
            .into_iter()
            .map(|seat| EntityChange::Seat {
                seat_id: seat.id,
                table_id: seat.table_id,
                seat_number: seat.seat_number,
                status: seat.status,
                version: seat.version,
            })
            .collect())
    }

    /// Cancel a booking and release its seats.
    ///
    /// Cancelling a booking that is already cancelled succeeds without a new
    /// change event.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AuthRequired`] without a session
    /// - [`EngineError::NotFound`] for an unknown booking
    /// - [`EngineError::Forbidden`] unless owner, restaurant staff or admin
    /// - [`EngineError::IntegrityFault`] when a live booking's seat is not held by it
    #[tracing::instrument(skip(self, session))]
    pub async fn cancel_booking(
        &self,
        session: Option<&Session>,
        booking_id: BookingId,
    ) -> Result<Booking, EngineError> {
        let session = session.ok_or(EngineError::AuthRequired)?;
        let booking = self.visible_booking(session, booking_id).await?;
        if booking.status == BookingStatus::Cancelled {
            return Ok(booking);
        }

        let attempts = &AtomicU32::new(0);
        let booking = &booking;
        let result = retry_if(
            &self.rules.retry,
            || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                    if let Some(current) = self.store.get_booking(booking_id).await? {
                        if current.status == BookingStatus::Cancelled {
                            let changes = self.current_seat_changes(&current).await?;
                            return Ok((current, changes));
                        }
                    }
                }
                let outcome = self
                    .store
                    .apply_mutation(Mutation::ReleaseBooking { booking_id })
                    .await?;
                let cancelled = outcome.booking.unwrap_or_else(|| Booking {
                    status: BookingStatus::Cancelled,
                    ..booking.clone()
                });
                Ok((cancelled, outcome.changes))
            },
            EngineError::is_transient,
        )
        .await;

        let (cancelled, changes) = result.inspect_err(|error| {
            if matches!(error, EngineError::IntegrityFault(_)) {
                tracing::error!(%booking_id, %error, "cancellation refused: seat state contradicts booking");
            }
        })?;

        self.publisher
            .publish(&ChangeEvent {
                restaurant_id: cancelled.restaurant_id,
                cause: ChangeCause::Cancellation { booking_id },
                changes,
                committed_at: self.clock.now(),
            })
            .await;
        metrics::counter!("seatbook.bookings.cancelled").increment(1);
        tracing::info!(%booking_id, "booking cancelled");
        Ok(cancelled)
    }

    /// Look up a booking the session may see.
    ///
    /// # Errors
    ///
    /// `AuthRequired`, `NotFound` or `Forbidden`.
    pub async fn get_booking(
        &self,
        session: Option<&Session>,
        booking_id: BookingId,
    ) -> Result<Booking, EngineError> {
        let session = session.ok_or(EngineError::AuthRequired)?;
        self.visible_booking(session, booking_id).await
    }

    async fn visible_booking(
        &self,
        session: &Session,
        booking_id: BookingId,
    ) -> Result<Booking, EngineError> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "booking",
                id: booking_id.to_string(),
            })?;
        if booking.user_id != session.user_id && !session.can_manage(booking.restaurant_id) {
            return Err(EngineError::Forbidden(
                "booking belongs to another diner".into(),
            ));
        }
        Ok(booking)
    }

    /// The session's own bookings, newest first.
    ///
    /// # Errors
    ///
    /// `AuthRequired` or `StoreUnavailable`.
    pub async fn my_bookings(&self, session: Option<&Session>) -> Result<Vec<Booking>, EngineError> {
        let session = session.ok_or(EngineError::AuthRequired)?;
        Ok(self.store.list_user_bookings(session.user_id).await?)
    }

    /// Every booking of a restaurant, for its staff.
    ///
    /// # Errors
    ///
    /// `AuthRequired`, `Forbidden` or `StoreUnavailable`.
    pub async fn restaurant_bookings(
        &self,
        session: Option<&Session>,
        restaurant_id: RestaurantId,
    ) -> Result<Vec<Booking>, EngineError> {
        let session = session.ok_or(EngineError::AuthRequired)?;
        if !session.can_manage(restaurant_id) {
            return Err(EngineError::Forbidden(
                "only restaurant staff can list its bookings".into(),
            ));
        }
        Ok(self.store.list_restaurant_bookings(restaurant_id).await?)
    }
}
