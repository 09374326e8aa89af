//! Router configuration.
//!
//! Builds the complete Axum router with all endpoints.

use super::state::AppState;
use crate::api::{bookings, live, restaurants, tables};
use axum::{
    Router,
    routing::{get, patch, post, put},
};
use seatbook_web::correlation_id_layer;
use seatbook_web::handlers::{health_check, readiness};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// Configures:
/// - Health checks (`/health`, `/health/ready`)
/// - Restaurant, floor-plan and booking endpoints under `/api`
/// - The live seat-map WebSocket under `/ws`
///
/// Every request gets a correlation id, a trace span and permissive CORS.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Restaurants
        .route(
            "/restaurants",
            get(restaurants::list_restaurants).post(restaurants::create_restaurant),
        )
        .route(
            "/restaurants/:id",
            get(restaurants::get_restaurant).delete(restaurants::delete_restaurant),
        )
        .route("/restaurants/:id/seat-map", get(restaurants::get_seat_map))
        .route("/restaurants/:id/integrity", get(restaurants::audit_integrity))
        .route(
            "/restaurants/:id/bookings",
            get(restaurants::list_restaurant_bookings),
        )
        // Floor plan
        .route("/restaurants/:id/tables", post(tables::create_table))
        .route("/restaurants/:id/tables/swap", post(tables::swap_tables))
        .route("/restaurants/:id/layout", put(tables::save_layout))
        .route(
            "/tables/:id",
            patch(tables::update_table).delete(tables::delete_table),
        )
        .route("/seats/:id", patch(tables::update_seat))
        // Bookings
        .route("/bookings", post(bookings::propose_booking))
        .route("/bookings/:id", get(bookings::get_booking))
        .route("/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/me/bookings", get(bookings::my_bookings));

    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness))
        .route("/ws/restaurants/:id", get(live::seat_map_updates))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
