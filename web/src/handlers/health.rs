//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use axum::{Json, extract::State, http::StatusCode};
use seatbook_core::store::SeatStore;
use serde::Serialize;
use std::sync::Arc;

/// Simple health check endpoint (for basic liveness).
///
/// Does not check the store.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    /// Component checked
    pub component: &'static str,
    /// `ready` or `unavailable`
    pub status: &'static str,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Readiness check: pings the seat store.
///
/// - 200 OK: the store answered
/// - 503 Service Unavailable: it did not
///
/// ```text
/// GET /health/ready
/// ```
pub async fn readiness(State(store): State<Arc<dyn SeatStore>>) -> (StatusCode, Json<Readiness>) {
    match store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(Readiness {
                component: "store",
                status: "ready",
                message: None,
            }),
        ),
        Err(error) => {
            tracing::warn!(%error, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Readiness {
                    component: "store",
                    status: "unavailable",
                    message: Some(error.to_string()),
                }),
            )
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use seatbook_core::error::StoreError;
    use seatbook_core::mutation::{Mutation, MutationOutcome};
    use seatbook_core::seat_map::SeatMapSnapshot;
    use seatbook_core::store::{IntegrityViolation, NewRestaurant, StoreFuture};
    use seatbook_core::types::{
        Booking, BookingId, Restaurant, RestaurantId, Seat, SeatId, TableId, UserId,
    };

    /// Store whose every call reports the backend as down.
    struct DownStore;

    fn down<T: Send + 'static>() -> StoreFuture<'static, T> {
        Box::pin(async { Err(StoreError::Unavailable("connection refused".into())) })
    }

    impl SeatStore for DownStore {
        fn get_seat_map(&self, _: RestaurantId) -> StoreFuture<'_, SeatMapSnapshot> {
            down()
        }
        fn read_seats<'a>(&'a self, _: TableId, _: &'a [SeatId]) -> StoreFuture<'a, Vec<Seat>> {
            down()
        }
        fn apply_mutation(&self, _: Mutation) -> StoreFuture<'_, MutationOutcome> {
            down()
        }
        fn get_booking(&self, _: BookingId) -> StoreFuture<'_, Option<Booking>> {
            down()
        }
        fn list_user_bookings(&self, _: UserId) -> StoreFuture<'_, Vec<Booking>> {
            down()
        }
        fn list_restaurant_bookings(&self, _: RestaurantId) -> StoreFuture<'_, Vec<Booking>> {
            down()
        }
        fn create_restaurant(&self, _: NewRestaurant) -> StoreFuture<'_, Restaurant> {
            down()
        }
        fn get_restaurant(&self, _: RestaurantId) -> StoreFuture<'_, Option<Restaurant>> {
            down()
        }
        fn list_restaurants(&self) -> StoreFuture<'_, Vec<Restaurant>> {
            down()
        }
        fn audit_integrity(&self, _: RestaurantId) -> StoreFuture<'_, Vec<IntegrityViolation>> {
            down()
        }
        fn ping(&self) -> StoreFuture<'_, ()> {
            down()
        }
    }

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn unreachable_store_is_not_ready() {
        let store: Arc<dyn SeatStore> = Arc::new(DownStore);
        let (status, Json(report)) = readiness(State(store)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.status, "unavailable");
        assert!(report.message.unwrap().contains("connection refused"));
    }
}
