//! Error types for web handlers.
//!
//! [`AppError`] bridges the engine's error taxonomy and HTTP responses. Every
//! response body carries a stable `code` clients can switch on; seat
//! conflicts also name the seats that were lost.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use seatbook_core::error::{EngineError, StoreError};
use seatbook_core::types::SeatId;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(app): State<AppState>) -> Result<Json<Booking>, AppError> {
///     let booking = app.bookings.propose_booking(session.as_ref(), request).await?;
///     Ok(Json(booking))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Seats involved in a conflict
    seats: Vec<SeatId>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            seats: Vec::new(),
        }
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message.into(), "AUTH_REQUIRED")
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        EngineError::from(error).into()
    }
}

impl From<EngineError> for AppError {
    fn from(error: EngineError) -> Self {
        let status = match &error {
            EngineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::SeatConflict { .. } => StatusCode::CONFLICT,
            EngineError::AuthRequired => StatusCode::UNAUTHORIZED,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::StoreUnavailable(_) | EngineError::SubscriptionLost(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            },
            EngineError::IntegrityFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = error.code();
        let message = error.to_string();
        let seats = match error {
            EngineError::SeatConflict { seats, .. } => seats,
            _ => Vec::new(),
        };
        Self {
            status,
            message,
            code,
            seats,
        }
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: &'static str,
    /// Human-readable error message.
    message: String,
    /// Seats lost to another booking.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    seats: Vec<SeatId>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                "request failed"
            );
        } else if self.status == StatusCode::CONFLICT {
            tracing::debug!(code = self.code, seats = self.seats.len(), "request conflicted");
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            seats: self.seats,
        };

        (self.status, Json(body)).into_response()
    }
}
