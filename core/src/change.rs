//! Change events delivered through the change feed.
//!
//! A [`ChangeEvent`] is emitted after every committed mutation and names each
//! affected table or seat together with its new state and version. Consumers
//! merge by version, so duplicated or reordered events are harmless.

use crate::types::{
    BookingId, Position, RestaurantId, SeatId, SeatNumber, SeatStatus, TableId, TableNumber,
    TableStatus, Version,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// New state of one entity after a commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum EntityChange {
    /// A seat was created or changed status
    Seat {
        /// Seat
        seat_id: SeatId,
        /// Owning table
        table_id: TableId,
        /// Number within the table
        seat_number: SeatNumber,
        /// New status
        status: SeatStatus,
        /// Version after the commit
        version: Version,
    },
    /// A table was created, moved or changed status
    Table {
        /// Table
        table_id: TableId,
        /// Number within the restaurant
        table_number: TableNumber,
        /// Seat count
        capacity: u16,
        /// New coarse status
        status: TableStatus,
        /// New position
        position: Position,
        /// Version after the commit
        version: Version,
    },
    /// A table and all its seats were deleted
    TableRemoved {
        /// Table
        table_id: TableId,
        /// Tombstone version (one past the last live version)
        version: Version,
    },
}

impl EntityChange {
    /// Version carried by the change.
    #[must_use]
    pub const fn version(&self) -> Version {
        match self {
            Self::Seat { version, .. }
            | Self::Table { version, .. }
            | Self::TableRemoved { version, .. } => *version,
        }
    }

    /// Table the change belongs to.
    #[must_use]
    pub const fn table_id(&self) -> TableId {
        match self {
            Self::Seat { table_id, .. }
            | Self::Table { table_id, .. }
            | Self::TableRemoved { table_id, .. } => *table_id,
        }
    }
}

/// What triggered a change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeCause {
    /// A booking claimed seats
    Booking {
        /// Booking created
        booking_id: BookingId,
    },
    /// A booking released its seats
    Cancellation {
        /// Booking cancelled
        booking_id: BookingId,
    },
    /// A staff layout or status edit
    StaffEdit,
    /// Seats held by bookings whose slot ended were freed
    Elapsed,
}

/// Event published after a committed mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Restaurant owning every changed entity
    pub restaurant_id: RestaurantId,
    /// What caused the change
    pub cause: ChangeCause,
    /// Changed entities with their new versions
    pub changes: Vec<EntityChange>,
    /// Commit time
    pub committed_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Topic this event is published on.
    #[must_use]
    pub fn topic(&self) -> String {
        seat_topic(self.restaurant_id)
    }

    /// Seat ids touched by the event.
    pub fn seat_ids(&self) -> impl Iterator<Item = SeatId> + '_ {
        self.changes.iter().filter_map(|change| match change {
            EntityChange::Seat { seat_id, .. } => Some(*seat_id),
            _ => None,
        })
    }
}

/// Change-feed topic carrying a restaurant's table and seat changes.
#[must_use]
pub fn seat_topic(restaurant_id: RestaurantId) -> String {
    format!("restaurant.{restaurant_id}.seats")
}
