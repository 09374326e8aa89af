//! Staff floor-plan endpoints.
//!
//! - POST /api/restaurants/:id/tables - Add a table with its seats
//! - PUT /api/restaurants/:id/layout - Save a batch of editor changes
//! - POST /api/restaurants/:id/tables/swap - Exchange two tables' positions
//! - PATCH /api/tables/:id - Change a table's status or position
//! - DELETE /api/tables/:id - Remove a table
//! - PATCH /api/seats/:id - Mark a seat available or occupied
//!
//! Every edit carries the version the editor loaded; a stale version is a
//! 409 and the editor reloads the seat map. Each successful edit returns the
//! seat map as committed.

use crate::auth::CurrentSession;
use crate::server::state::AppState;
use crate::staff::{LayoutEdit, TableSpec};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use seatbook_core::mutation::TableRef;
use seatbook_core::seat_map::SeatMapSnapshot;
use seatbook_core::types::{
    Position, RestaurantId, SeatId, SeatStatus, TableId, TableStatus, Version,
};
use seatbook_web::AppError;
use serde::Deserialize;

// ============================================================================
// Request Types
// ============================================================================

/// Batch of editor changes, applied all-or-nothing.
#[derive(Debug, Deserialize)]
pub struct SaveLayoutRequest {
    /// Edits in order
    pub edits: Vec<LayoutEdit>,
}

/// Two tables to swap.
#[derive(Debug, Deserialize)]
pub struct SwapTablesRequest {
    /// First table and its loaded version
    pub first: TableRef,
    /// Second table and its loaded version
    pub second: TableRef,
}

/// Change to one table.
#[derive(Debug, Deserialize)]
pub struct UpdateTableRequest {
    /// Restaurant the table belongs to
    pub restaurant_id: RestaurantId,
    /// Version the editor loaded
    pub expected: Version,
    /// New status
    #[serde(default)]
    pub status: Option<TableStatus>,
    /// New position
    #[serde(default)]
    pub position: Option<Position>,
}

/// Query identifying the table to delete.
#[derive(Debug, Deserialize)]
pub struct DeleteTableQuery {
    /// Restaurant the table belongs to
    pub restaurant_id: RestaurantId,
    /// Version the editor loaded
    pub expected: Version,
}

/// Change to one seat.
#[derive(Debug, Deserialize)]
pub struct UpdateSeatRequest {
    /// Restaurant the seat belongs to
    pub restaurant_id: RestaurantId,
    /// Version the editor loaded
    pub expected: Version,
    /// `available` or `occupied`
    pub status: SeatStatus,
}

// ============================================================================
// Handlers
// ============================================================================

/// Add a table and its seats.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/restaurants/<id>/tables \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{"table_number": 5, "capacity": 4, "position": {"x": 120, "y": 40}}'
/// ```
pub async fn create_table(
    session: CurrentSession,
    Path(restaurant_id): Path<RestaurantId>,
    State(state): State<AppState>,
    Json(spec): Json<TableSpec>,
) -> Result<(StatusCode, Json<SeatMapSnapshot>), AppError> {
    let snapshot = state
        .staff
        .create_table(session.as_ref(), restaurant_id, spec)
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// Save a batch of layout edits.
pub async fn save_layout(
    session: CurrentSession,
    Path(restaurant_id): Path<RestaurantId>,
    State(state): State<AppState>,
    Json(request): Json<SaveLayoutRequest>,
) -> Result<Json<SeatMapSnapshot>, AppError> {
    Ok(Json(
        state
            .staff
            .save_layout(session.as_ref(), restaurant_id, request.edits)
            .await?,
    ))
}

/// Exchange two tables' positions.
pub async fn swap_tables(
    session: CurrentSession,
    Path(restaurant_id): Path<RestaurantId>,
    State(state): State<AppState>,
    Json(request): Json<SwapTablesRequest>,
) -> Result<Json<SeatMapSnapshot>, AppError> {
    Ok(Json(
        state
            .staff
            .swap_tables(session.as_ref(), restaurant_id, request.first, request.second)
            .await?,
    ))
}

/// Change a table's status, position or both.
pub async fn update_table(
    session: CurrentSession,
    Path(table_id): Path<TableId>,
    State(state): State<AppState>,
    Json(request): Json<UpdateTableRequest>,
) -> Result<Json<SeatMapSnapshot>, AppError> {
    let table = TableRef {
        table_id,
        expected: request.expected,
    };
    Ok(Json(
        state
            .staff
            .update_table(
                session.as_ref(),
                request.restaurant_id,
                table,
                request.status,
                request.position,
            )
            .await?,
    ))
}

/// Remove a table.
///
/// ```bash
/// curl -X DELETE "http://localhost:8080/api/tables/<id>?restaurant_id=<rid>&expected=3" \
///   -H "Authorization: Bearer <token>"
/// ```
pub async fn delete_table(
    session: CurrentSession,
    Path(table_id): Path<TableId>,
    Query(query): Query<DeleteTableQuery>,
    State(state): State<AppState>,
) -> Result<Json<SeatMapSnapshot>, AppError> {
    let table = TableRef {
        table_id,
        expected: query.expected,
    };
    Ok(Json(
        state
            .staff
            .delete_table(session.as_ref(), query.restaurant_id, table)
            .await?,
    ))
}

/// Mark a seat available or occupied.
pub async fn update_seat(
    session: CurrentSession,
    Path(seat_id): Path<SeatId>,
    State(state): State<AppState>,
    Json(request): Json<UpdateSeatRequest>,
) -> Result<Json<SeatMapSnapshot>, AppError> {
    Ok(Json(
        state
            .staff
            .set_seat_status(
                session.as_ref(),
                request.restaurant_id,
                seat_id,
                request.expected,
                request.status,
            )
            .await?,
    ))
}
