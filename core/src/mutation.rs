//! The closed set of writes accepted by the state store.
//!
//! Every change to a table or seat, whether it comes from a diner's booking,
//! a cancellation or a staff edit, is expressed as a [`Mutation`] and handed
//! to [`crate::store::SeatStore::apply_mutation`]. Each variant carries the
//! versions its author read so the store can compare-and-swap.

use crate::change::EntityChange;
use crate::seat_map::SeatMapSnapshot;
use crate::types::{
    Booking, BookingId, Position, RestaurantId, SeatId, SeatStatus, TableId, TableNumber,
    TableStatus, TimeSlot, UserId, Version,
};
use serde::{Deserialize, Serialize};

/// Largest table a store accepts.
pub const MAX_TABLE_CAPACITY: u16 = 64;

/// One seat a booking wants, with the version observed when it was read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatClaim {
    /// Seat to claim
    pub seat_id: SeatId,
    /// Version read in step one of the booking transaction
    pub expected: Version,
}

/// Insert a confirmed booking and flip its seats to `reserved`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSeats {
    /// Id of the booking to create
    pub booking_id: BookingId,
    /// Diner making the booking
    pub user_id: UserId,
    /// Restaurant of the table
    pub restaurant_id: RestaurantId,
    /// Table every seat must belong to
    pub table_id: TableId,
    /// Window the seats are held for
    pub slot: TimeSlot,
    /// Equals `seats.len()`
    pub party_size: u16,
    /// Free-text notes
    pub special_requests: Option<String>,
    /// Seats with their read versions
    pub seats: Vec<SeatClaim>,
}

/// A table to create together with `capacity` seats.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTable {
    /// Id for the new table
    pub table_id: TableId,
    /// Owning restaurant
    pub restaurant_id: RestaurantId,
    /// Must be unused within the restaurant
    pub table_number: TableNumber,
    /// Seats to create, numbered `1..=capacity`
    pub capacity: u16,
    /// Initial floor-plan position
    pub position: Position,
    /// Initial coarse status
    pub status: TableStatus,
}

/// Reference to a table at a read version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    /// Table
    pub table_id: TableId,
    /// Version the editor read
    pub expected: Version,
}

/// A write to the state store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    /// Booking transaction steps two and three
    ClaimSeats(ClaimSeats),
    /// Cancel a booking and release every seat it still holds
    ReleaseBooking {
        /// Booking to cancel
        booking_id: BookingId,
    },
    /// Free the seats of confirmed bookings whose slot has ended
    ReleaseElapsed {
        /// Restaurant to sweep
        restaurant_id: RestaurantId,
    },
    /// Create a table and its seats
    CreateTable(NewTable),
    /// Delete a table and its seats
    DeleteTable(TableRef),
    /// Change a table's status and/or position
    UpdateTable {
        /// Target table
        table: TableRef,
        /// New coarse status
        status: Option<TableStatus>,
        /// New floor-plan position
        position: Option<Position>,
    },
    /// Exchange the positions of two tables
    SwapTables {
        /// Dragged table
        first: TableRef,
        /// Drop target
        second: TableRef,
    },
    /// Change a seat's status (staff only; never to `reserved`)
    UpdateSeat {
        /// Target seat
        seat_id: SeatId,
        /// Version the editor read
        expected: Version,
        /// New status
        status: SeatStatus,
    },
    /// Delete a restaurant with its tables, seats and bookings; refused
    /// while any booking is live
    DeleteRestaurant {
        /// Restaurant to delete
        restaurant_id: RestaurantId,
    },
    /// Staff edits applied all-or-nothing
    Batch {
        /// Restaurant every edit must belong to
        restaurant_id: RestaurantId,
        /// Edits in application order
        mutations: Vec<Mutation>,
    },
}

impl Mutation {
    /// Short name used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ClaimSeats(_) => "claim_seats",
            Self::ReleaseBooking { .. } => "release_booking",
            Self::ReleaseElapsed { .. } => "release_elapsed",
            Self::CreateTable(_) => "create_table",
            Self::DeleteTable(_) => "delete_table",
            Self::UpdateTable { .. } => "update_table",
            Self::SwapTables { .. } => "swap_tables",
            Self::UpdateSeat { .. } => "update_seat",
            Self::DeleteRestaurant { .. } => "delete_restaurant",
            Self::Batch { .. } => "batch",
        }
    }

    /// Whether the mutation is a staff layout or status edit.
    #[must_use]
    pub const fn is_staff_edit(&self) -> bool {
        !matches!(
            self,
            Self::ClaimSeats(_) | Self::ReleaseBooking { .. } | Self::ReleaseElapsed { .. }
        )
    }

    /// Structural checks that need no stored state.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn check_shape(&self) -> Result<(), String> {
        match self {
            Self::ClaimSeats(claim) => {
                if claim.seats.is_empty() {
                    return Err("a booking must claim at least one seat".into());
                }
                if usize::from(claim.party_size) != claim.seats.len() {
                    return Err(format!(
                        "party size {} does not match {} seats",
                        claim.party_size,
                        claim.seats.len()
                    ));
                }
                Ok(())
            },
            Self::CreateTable(table) if table.capacity == 0 => {
                Err("a table needs at least one seat".into())
            },
            Self::UpdateSeat {
                status: SeatStatus::Reserved,
                ..
            } => Err("seats become reserved only through a booking".into()),
            Self::SwapTables { first, second } if first.table_id == second.table_id => {
                Err("cannot swap a table with itself".into())
            },
            Self::Batch { mutations, .. } => {
                if mutations.is_empty() {
                    return Err("batch is empty".into());
                }
                for mutation in mutations {
                    if matches!(mutation, Self::Batch { .. } | Self::DeleteRestaurant { .. })
                        || !mutation.is_staff_edit()
                    {
                        return Err(format!("{} is not allowed in a batch", mutation.kind()));
                    }
                    mutation.check_shape()?;
                }
                Ok(())
            },
            _ => Ok(()),
        }
    }
}

/// Result of a committed mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOutcome {
    /// Restaurant the mutation touched
    pub restaurant_id: RestaurantId,
    /// Every entity whose state changed, with its new version
    pub changes: Vec<EntityChange>,
    /// Booking created or cancelled by the mutation
    pub booking: Option<Booking>,
    /// Seat map read right after the commit
    pub snapshot: SeatMapSnapshot,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn claim(party_size: u16, seats: usize) -> Mutation {
        Mutation::ClaimSeats(ClaimSeats {
            booking_id: BookingId::new(),
            user_id: UserId::new(),
            restaurant_id: RestaurantId::new(),
            table_id: TableId::new(),
            slot: TimeSlot::starting_at(Utc::now(), Duration::hours(2)),
            party_size,
            special_requests: None,
            seats: (0..seats)
                .map(|_| SeatClaim {
                    seat_id: SeatId::new(),
                    expected: Version::INITIAL,
                })
                .collect(),
        })
    }

    #[test]
    fn claim_requires_matching_party_size() {
        assert!(claim(2, 2).check_shape().is_ok());
        assert!(claim(3, 2).check_shape().is_err());
        assert!(claim(0, 0).check_shape().is_err());
    }

    #[test]
    fn staff_cannot_reserve_a_seat() {
        let mutation = Mutation::UpdateSeat {
            seat_id: SeatId::new(),
            expected: Version::INITIAL,
            status: SeatStatus::Reserved,
        };
        assert!(mutation.check_shape().is_err());
    }

    #[test]
    fn batch_rejects_bookings() {
        let batch = Mutation::Batch {
            restaurant_id: RestaurantId::new(),
            mutations: vec![claim(1, 1)],
        };
        let err = batch.check_shape().unwrap_err();
        assert!(err.contains("claim_seats"));
    }

    #[test]
    fn batch_rejects_sweeps_and_restaurant_deletion() {
        let restaurant_id = RestaurantId::new();
        for nested in [
            Mutation::ReleaseElapsed { restaurant_id },
            Mutation::DeleteRestaurant { restaurant_id },
        ] {
            let kind = nested.kind();
            let batch = Mutation::Batch {
                restaurant_id,
                mutations: vec![nested],
            };
            assert!(batch.check_shape().unwrap_err().contains(kind));
        }
    }

    #[test]
    fn batch_checks_nested_edits() {
        let table = TableRef {
            table_id: TableId::new(),
            expected: Version::INITIAL,
        };
        let batch = Mutation::Batch {
            restaurant_id: RestaurantId::new(),
            mutations: vec![Mutation::SwapTables {
                first: table,
                second: table,
            }],
        };
        assert!(batch.check_shape().is_err());
    }
}
