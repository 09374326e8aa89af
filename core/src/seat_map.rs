//! Seat-map snapshots.
//!
//! A [`SeatMapSnapshot`] is a full, self-consistent read of one restaurant's
//! tables and seats. Viewers initialise from it and fall back to it after
//! losing their change-feed subscription.

use crate::types::{RestaurantId, Seat, SeatId, SeatStatus, Table, TableId, TableNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One table and its seats as seen in a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableView {
    /// Table record
    pub table: Table,
    /// Seats ordered by seat number
    pub seats: Vec<Seat>,
}

impl TableView {
    /// Seats currently claimable.
    pub fn available_seats(&self) -> impl Iterator<Item = &Seat> {
        self.seats.iter().filter(|s| s.is_available())
    }
}

/// Full read of a restaurant's layout and seat state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatMapSnapshot {
    /// Restaurant the snapshot belongs to
    pub restaurant_id: RestaurantId,
    /// Tables ordered by table number
    pub tables: Vec<TableView>,
    /// When the snapshot was read
    pub taken_at: DateTime<Utc>,
}

impl SeatMapSnapshot {
    /// Empty snapshot for a restaurant with no tables.
    #[must_use]
    pub const fn empty(restaurant_id: RestaurantId, taken_at: DateTime<Utc>) -> Self {
        Self {
            restaurant_id,
            tables: Vec::new(),
            taken_at,
        }
    }

    /// Look up a table by id.
    #[must_use]
    pub fn table(&self, table_id: TableId) -> Option<&TableView> {
        self.tables.iter().find(|t| t.table.id == table_id)
    }

    /// Look up a table by its number.
    #[must_use]
    pub fn table_by_number(&self, number: TableNumber) -> Option<&TableView> {
        self.tables.iter().find(|t| t.table.table_number == number)
    }

    /// Look up a seat anywhere in the restaurant.
    #[must_use]
    pub fn seat(&self, seat_id: SeatId) -> Option<&Seat> {
        self.tables
            .iter()
            .flat_map(|t| t.seats.iter())
            .find(|s| s.id == seat_id)
    }

    /// Status of a seat, if present.
    #[must_use]
    pub fn seat_status(&self, seat_id: SeatId) -> Option<SeatStatus> {
        self.seat(seat_id).map(|s| s.status)
    }

    /// Total number of seats across all tables.
    #[must_use]
    pub fn seat_count(&self) -> usize {
        self.tables.iter().map(|t| t.seats.len()).sum()
    }
}
