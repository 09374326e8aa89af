//! Domain types for the reservation engine.
//!
//! Identifiers, closed status enumerations, per-entity versions and the
//! records owned by the state store: [`Restaurant`], [`Table`], [`Seat`],
//! [`Booking`] and [`BookingSeat`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a restaurant
    RestaurantId
);
uuid_id!(
    /// Unique identifier for a table
    TableId
);
uuid_id!(
    /// Unique identifier for a seat
    SeatId
);
uuid_id!(
    /// Unique identifier for a booking
    BookingId
);
uuid_id!(
    /// Identifier of an actor issued by the identity service
    UserId
);

// ============================================================================
// Versions
// ============================================================================

/// Per-entity version token.
///
/// Starts at [`Version::INITIAL`] when the entity is created and increases by
/// one on every committed change. Compare-and-swap writes carry the version
/// they read; change events carry the version they produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version of a freshly created entity.
    pub const INITIAL: Self = Self(1);

    /// Create a version from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version produced by the next committed change.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ============================================================================
// Closed status enumerations
// ============================================================================

/// Error returned when a persisted status string is outside its enumeration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status: {value}")]
pub struct UnknownStatus {
    /// Which enumeration was being parsed
    pub kind: &'static str,
    /// The rejected value
    pub value: String,
}

/// Coarse occupancy status of a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    /// Open for diners
    Available,
    /// Currently seated
    Occupied,
    /// Held back by staff
    Standby,
}

impl TableStatus {
    /// Persisted representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Occupied => "occupied",
            Self::Standby => "standby",
        }
    }
}

impl FromStr for TableStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "occupied" => Ok(Self::Occupied),
            "standby" => Ok(Self::Standby),
            other => Err(UnknownStatus {
                kind: "table",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single seat.
///
/// `Reserved` is only ever written by the booking transaction; `Occupied`
/// only by staff (walk-in seating).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    /// Free to be claimed
    Available,
    /// Seated by staff
    Occupied,
    /// Claimed by a confirmed booking
    Reserved,
}

impl SeatStatus {
    /// Persisted representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Occupied => "occupied",
            Self::Reserved => "reserved",
        }
    }
}

impl FromStr for SeatStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "occupied" => Ok(Self::Occupied),
            "reserved" => Ok(Self::Reserved),
            other => Err(UnknownStatus {
                kind: "seat",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    /// Holding its seats
    Confirmed,
    /// Released; kept for history
    Cancelled,
}

impl BookingStatus {
    /// Persisted representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus {
                kind: "booking",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Value objects
// ============================================================================

/// Table number, unique within a restaurant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableNumber(u32);

impl TableNumber {
    /// Create a table number.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Seat number, unique within a table (1-based).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatNumber(u16);

impl SeatNumber {
    /// Create a seat number.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for SeatNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a table on the floor-plan grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Column
    pub x: i32,
    /// Row
    pub y: i32,
}

impl Position {
    /// Create a position.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Half-open time window `[starts_at, ends_at)` held by a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Reserved date-time
    pub starts_at: DateTime<Utc>,
    /// When the seats become free again
    pub ends_at: DateTime<Utc>,
}

impl TimeSlot {
    /// Slot of `length` starting at `starts_at`.
    #[must_use]
    pub fn starting_at(starts_at: DateTime<Utc>, length: Duration) -> Self {
        Self {
            starts_at,
            ends_at: starts_at + length,
        }
    }

    /// Whether the slot is over at `now`.
    #[must_use]
    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.ends_at <= now
    }
}

// ============================================================================
// Records
// ============================================================================

/// A restaurant and its descriptive fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    /// Identity
    pub id: RestaurantId,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: Option<String>,
    /// Street address
    pub address: Option<String>,
    /// Contact phone number
    pub phone: Option<String>,
    /// Cover image
    pub image_url: Option<String>,
    /// Staff or owner who created it
    pub created_by: Option<UserId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A physical table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Identity
    pub id: TableId,
    /// Owning restaurant
    pub restaurant_id: RestaurantId,
    /// Number shown to diners and staff
    pub table_number: TableNumber,
    /// Number of seats created with the table
    pub capacity: u16,
    /// Coarse occupancy
    pub status: TableStatus,
    /// Floor-plan position
    pub position: Position,
    /// Row version
    pub version: Version,
}

/// A single reservable seat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    /// Identity
    pub id: SeatId,
    /// Owning table
    pub table_id: TableId,
    /// Number within the table
    pub seat_number: SeatNumber,
    /// Current status
    pub status: SeatStatus,
    /// Booking currently holding the seat, when `Reserved`
    pub claimed_by: Option<BookingId>,
    /// Row version
    pub version: Version,
}

impl Seat {
    /// Whether the seat can be claimed by a new booking.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == SeatStatus::Available
    }
}

/// The outcome of one reservation attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Identity
    pub id: BookingId,
    /// Diner who booked
    pub user_id: UserId,
    /// Restaurant booked at
    pub restaurant_id: RestaurantId,
    /// Table holding every linked seat
    pub table_id: TableId,
    /// Reserved date-time
    pub date_time: DateTime<Utc>,
    /// End of the reserved slot
    pub ends_at: DateTime<Utc>,
    /// Equals the number of linked seats
    pub party_size: u16,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Free-text notes from the diner
    pub special_requests: Option<String>,
    /// Linked seats
    pub seat_ids: Vec<SeatId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// The time window this booking holds.
    #[must_use]
    pub const fn slot(&self) -> TimeSlot {
        TimeSlot {
            starts_at: self.date_time,
            ends_at: self.ends_at,
        }
    }

    /// A confirmed booking whose slot has not elapsed still holds its seats.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Confirmed && !self.slot().has_elapsed(now)
    }
}

/// Join record linking one booking to one seat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingSeat {
    /// Booking side
    pub booking_id: BookingId,
    /// Seat side
    pub seat_id: SeatId,
}
