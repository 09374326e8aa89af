//! Booking API endpoints.
//!
//! - POST /api/bookings - Propose a booking (requires auth)
//! - GET /api/bookings/:id - Get a booking (owner or restaurant staff)
//! - POST /api/bookings/:id/cancel - Cancel a booking and free its seats
//! - GET /api/me/bookings - The caller's bookings

use crate::auth::CurrentSession;
use crate::booking::BookingRequest;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use seatbook_core::types::{Booking, BookingId};
use seatbook_web::AppError;

/// Propose a booking.
///
/// Either every requested seat is reserved for the caller or nothing is;
/// a lost race answers 409 `SEAT_CONFLICT` listing the contested seats.
/// Resubmitting with the same `request_id` after a timeout returns the
/// original booking.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/bookings \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{
///     "restaurant_id": "…",
///     "table_id": "…",
///     "seat_ids": ["…", "…"],
///     "party_size": 2,
///     "date_time": "2025-06-01T19:00:00Z"
///   }'
/// ```
pub async fn propose_booking(
    session: CurrentSession,
    State(state): State<AppState>,
    Json(request): Json<BookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let booking = state
        .bookings
        .propose_booking(session.as_ref(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// Get a booking.
pub async fn get_booking(
    session: CurrentSession,
    Path(booking_id): Path<BookingId>,
    State(state): State<AppState>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(
        state
            .bookings
            .get_booking(session.as_ref(), booking_id)
            .await?,
    ))
}

/// Cancel a booking.
///
/// Cancelling an already cancelled booking succeeds and returns it unchanged.
pub async fn cancel_booking(
    session: CurrentSession,
    Path(booking_id): Path<BookingId>,
    State(state): State<AppState>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(
        state
            .bookings
            .cancel_booking(session.as_ref(), booking_id)
            .await?,
    ))
}

/// The caller's bookings, newest first.
pub async fn my_bookings(
    session: CurrentSession,
    State(state): State<AppState>,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(state.bookings.my_bookings(session.as_ref()).await?))
}
