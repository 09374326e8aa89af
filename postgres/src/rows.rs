//! Row types and their conversion into domain records.

use chrono::{DateTime, Utc};
use seatbook_core::error::StoreError;
use seatbook_core::types::{
    Booking, BookingId, BookingStatus, Position, Restaurant, RestaurantId, Seat, SeatId,
    SeatNumber, SeatStatus, Table, TableId, TableNumber, TableStatus, UserId, Version,
};
use sqlx::types::Uuid;

pub(crate) const TABLE_COLUMNS: &str =
    "t.id, t.restaurant_id, t.table_number, t.capacity, t.status, t.position_x, t.position_y, t.version";

/// Seat columns plus the status and end of the booking claiming it.
pub(crate) const SEAT_COLUMNS: &str = "s.id, s.table_id, s.seat_number, s.status, s.claimed_by, s.version, \
     b.status AS holder_status, b.ends_at AS holder_ends_at";

pub(crate) const SEAT_FROM: &str = "seats s LEFT JOIN bookings b ON b.id = s.claimed_by";

pub(crate) const BOOKING_SELECT: &str = "SELECT bk.id, bk.user_id, bk.restaurant_id, bk.table_id, bk.date_time, \
     bk.ends_at, bk.party_size, bk.status, bk.special_requests, bk.created_at, bk.updated_at, \
     COALESCE(array_agg(bs.seat_id ORDER BY bs.seat_id) FILTER (WHERE bs.seat_id IS NOT NULL), '{}') AS seat_ids \
     FROM bookings bk LEFT JOIN booking_seats bs ON bs.booking_id = bk.id";

fn corrupt(what: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Integrity(format!("stored {what} is malformed: {detail}"))
}

pub(crate) fn version(raw: i64) -> Result<Version, StoreError> {
    u64::try_from(raw)
        .map(Version::new)
        .map_err(|_| corrupt("version", raw))
}

pub(crate) fn db_version(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version.value()).map_err(|_| StoreError::Invalid(format!("version {version} out of range")))
}

#[derive(sqlx::FromRow)]
pub(crate) struct RestaurantRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    address: Option<String>,
    phone: Option<String>,
    image_url: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<RestaurantRow> for Restaurant {
    fn from(row: RestaurantRow) -> Self {
        Self {
            id: RestaurantId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            address: row.address,
            phone: row.phone,
            image_url: row.image_url,
            created_by: row.created_by.map(UserId::from_uuid),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct TableRow {
    id: Uuid,
    restaurant_id: Uuid,
    table_number: i32,
    capacity: i32,
    status: String,
    position_x: i32,
    position_y: i32,
    version: i64,
}

impl TryFrom<TableRow> for Table {
    type Error = StoreError;

    fn try_from(row: TableRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TableId::from_uuid(row.id),
            restaurant_id: RestaurantId::from_uuid(row.restaurant_id),
            table_number: TableNumber::new(
                u32::try_from(row.table_number).map_err(|_| corrupt("table number", row.table_number))?,
            ),
            capacity: u16::try_from(row.capacity).map_err(|_| corrupt("capacity", row.capacity))?,
            status: row.status.parse::<TableStatus>().map_err(|e| corrupt("table status", e))?,
            position: Position::new(row.position_x, row.position_y),
            version: version(row.version)?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SeatRow {
    id: Uuid,
    table_id: Uuid,
    seat_number: i32,
    status: String,
    claimed_by: Option<Uuid>,
    version: i64,
    holder_status: Option<String>,
    holder_ends_at: Option<DateTime<Utc>>,
}

impl SeatRow {
    /// Seat as stored.
    pub(crate) fn stored(&self) -> Result<Seat, StoreError> {
        Ok(Seat {
            id: SeatId::from_uuid(self.id),
            table_id: TableId::from_uuid(self.table_id),
            seat_number: SeatNumber::new(
                u16::try_from(self.seat_number).map_err(|_| corrupt("seat number", self.seat_number))?,
            ),
            status: self.status.parse::<SeatStatus>().map_err(|e| corrupt("seat status", e))?,
            claimed_by: self.claimed_by.map(BookingId::from_uuid),
            version: version(self.version)?,
        })
    }

    /// Confirmed booking claiming the seat has ended.
    fn holder_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.holder_status.as_deref() == Some(BookingStatus::Confirmed.as_str())
            && self.holder_ends_at.is_some_and(|ends_at| ends_at <= now)
    }

    /// A confirmed, unelapsed booking holds the seat.
    pub(crate) fn held_live(&self, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Reserved.as_str()
            && self.holder_status.as_deref() == Some(BookingStatus::Confirmed.as_str())
            && self.holder_ends_at.is_some_and(|ends_at| ends_at > now)
    }

    /// Seat as diners see it: a reservation whose slot elapsed reads as available.
    pub(crate) fn effective(&self, now: DateTime<Utc>) -> Result<Seat, StoreError> {
        let mut seat = self.stored()?;
        if seat.status == SeatStatus::Reserved && self.holder_elapsed(now) {
            seat.status = SeatStatus::Available;
            seat.claimed_by = None;
        }
        Ok(seat)
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct BookingRow {
    id: Uuid,
    user_id: Uuid,
    restaurant_id: Uuid,
    table_id: Uuid,
    date_time: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    party_size: i32,
    status: String,
    special_requests: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    seat_ids: Vec<Uuid>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: BookingId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            restaurant_id: RestaurantId::from_uuid(row.restaurant_id),
            table_id: TableId::from_uuid(row.table_id),
            date_time: row.date_time,
            ends_at: row.ends_at,
            party_size: u16::try_from(row.party_size).map_err(|_| corrupt("party size", row.party_size))?,
            status: row.status.parse::<BookingStatus>().map_err(|e| corrupt("booking status", e))?,
            special_requests: row.special_requests,
            seat_ids: row.seat_ids.into_iter().map(SeatId::from_uuid).collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// One seat's facts needed by the integrity audit.
#[derive(sqlx::FromRow)]
pub(crate) struct AuditRow {
    pub(crate) id: Uuid,
    pub(crate) table_id: Uuid,
    pub(crate) status: String,
    pub(crate) claimed_by: Option<Uuid>,
    pub(crate) holder_status: Option<String>,
    pub(crate) linked: bool,
    pub(crate) live_links: i64,
}
