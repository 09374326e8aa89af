//! Restaurant API endpoints.
//!
//! - GET /api/restaurants - List restaurants
//! - POST /api/restaurants - Create a restaurant (staff or admin)
//! - GET /api/restaurants/:id - Get one restaurant
//! - DELETE /api/restaurants/:id - Delete a restaurant and everything it owns
//! - GET /api/restaurants/:id/seat-map - Current seat map (public)
//! - GET /api/restaurants/:id/integrity - Seat integrity audit (staff)
//! - GET /api/restaurants/:id/bookings - Every booking of the restaurant (staff)

use crate::auth::CurrentSession;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use seatbook_core::seat_map::SeatMapSnapshot;
use seatbook_core::store::{IntegrityViolation, NewRestaurant};
use seatbook_core::types::{Booking, Restaurant, RestaurantId};
use seatbook_web::AppError;
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to create a restaurant.
#[derive(Debug, Deserialize)]
pub struct CreateRestaurantRequest {
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Street address
    #[serde(default)]
    pub address: Option<String>,
    /// Contact phone number
    #[serde(default)]
    pub phone: Option<String>,
    /// Cover image
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Result of an integrity audit.
#[derive(Debug, Serialize)]
pub struct IntegrityReport {
    /// Audited restaurant
    pub restaurant_id: RestaurantId,
    /// True when no violation was found
    pub healthy: bool,
    /// Seats contradicting their bookings
    pub violations: Vec<IntegrityViolation>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List every restaurant.
///
/// Public endpoint.
pub async fn list_restaurants(
    State(state): State<AppState>,
) -> Result<Json<Vec<Restaurant>>, AppError> {
    Ok(Json(state.store.list_restaurants().await?))
}

/// Create a restaurant owned by the caller.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/restaurants \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{"name": "Harbour Grill"}'
/// ```
pub async fn create_restaurant(
    session: CurrentSession,
    State(state): State<AppState>,
    Json(request): Json<CreateRestaurantRequest>,
) -> Result<(StatusCode, Json<Restaurant>), AppError> {
    let restaurant = state
        .staff
        .create_restaurant(
            session.as_ref(),
            NewRestaurant {
                name: request.name,
                description: request.description,
                address: request.address,
                phone: request.phone,
                image_url: request.image_url,
                created_by: None,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(restaurant)))
}

/// Get one restaurant.
///
/// Public endpoint.
pub async fn get_restaurant(
    Path(restaurant_id): Path<RestaurantId>,
    State(state): State<AppState>,
) -> Result<Json<Restaurant>, AppError> {
    state
        .store
        .get_restaurant(restaurant_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Restaurant", restaurant_id))
}

/// Delete a restaurant with its tables, seats and bookings.
///
/// Answers 409 while any booking is live.
pub async fn delete_restaurant(
    session: CurrentSession,
    Path(restaurant_id): Path<RestaurantId>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    state
        .staff
        .delete_restaurant(session.as_ref(), restaurant_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Current seat map.
///
/// Public endpoint; a viewer loads this before subscribing to
/// `/ws/restaurants/:id`.
pub async fn get_seat_map(
    Path(restaurant_id): Path<RestaurantId>,
    State(state): State<AppState>,
) -> Result<Json<SeatMapSnapshot>, AppError> {
    Ok(Json(state.store.get_seat_map(restaurant_id).await?))
}

/// Report seats whose status contradicts their bookings.
pub async fn audit_integrity(
    session: CurrentSession,
    Path(restaurant_id): Path<RestaurantId>,
    State(state): State<AppState>,
) -> Result<Json<IntegrityReport>, AppError> {
    let violations = state.staff.audit(session.as_ref(), restaurant_id).await?;
    Ok(Json(IntegrityReport {
        restaurant_id,
        healthy: violations.is_empty(),
        violations,
    }))
}

/// Every booking of a restaurant.
pub async fn list_restaurant_bookings(
    session: CurrentSession,
    Path(restaurant_id): Path<RestaurantId>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(
        state
            .bookings
            .restaurant_bookings(session.as_ref(), restaurant_id)
            .await?,
    ))
}
