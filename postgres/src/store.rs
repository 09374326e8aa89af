//! [`SeatStore`] over `PostgreSQL`.
//!
//! Every mutation runs in one transaction. Rows it depends on are locked
//! `FOR UPDATE` (seats in id order) before their versions are compared, and
//! the seat claim itself is a version-checked `UPDATE ... FROM UNNEST(...)`
//! whose affected row count must match the request. Serialization failures
//! and deadlocks surface as conflicts.

use crate::rows::{
    AuditRow, BOOKING_SELECT, BookingRow, RestaurantRow, SEAT_COLUMNS, SEAT_FROM, SeatRow,
    TABLE_COLUMNS, TableRow, db_version,
};
use chrono::{DateTime, Utc};
use seatbook_core::change::EntityChange;
use seatbook_core::environment::Clock;
use seatbook_core::error::StoreError;
use seatbook_core::mutation::{
    ClaimSeats, MAX_TABLE_CAPACITY, Mutation, MutationOutcome, NewTable, TableRef,
};
use seatbook_core::seat_map::{SeatMapSnapshot, TableView};
use seatbook_core::store::{
    IntegrityViolation, NewRestaurant, SeatStore, StoreFuture, ViolationKind,
};
use seatbook_core::types::{
    Booking, BookingId, BookingStatus, Position, Restaurant, RestaurantId, Seat, SeatId,
    SeatNumber, SeatStatus, Table, TableId, TableStatus, UserId, Version,
};
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::types::Uuid;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Map a sqlx error onto the store taxonomy.
fn db_error(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure, deadlock_detected, unique_violation
            Some("40001" | "40P01" | "23505") => {
                StoreError::conflict(format!("concurrent write: {}", db.message()))
            },
            Some("23503" | "23514") => StoreError::Invalid(db.message().to_string()),
            _ => StoreError::Unavailable(error.to_string()),
        },
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_) => StoreError::Integrity(error.to_string()),
        _ => StoreError::Unavailable(error.to_string()),
    }
}

fn seat_change(seat: &Seat) -> EntityChange {
    EntityChange::Seat {
        seat_id: seat.id,
        table_id: seat.table_id,
        seat_number: seat.seat_number,
        status: seat.status,
        version: seat.version,
    }
}

fn table_change(table: &Table) -> EntityChange {
    EntityChange::Table {
        table_id: table.id,
        table_number: table.table_number,
        capacity: table.capacity,
        status: table.status,
        position: table.position,
        version: table.version,
    }
}

/// Versions as first read in the current transaction; batch edits compare
/// against these rather than versions produced earlier in the same batch.
#[derive(Default)]
struct BaseVersions {
    tables: HashMap<TableId, Version>,
    seats: HashMap<SeatId, Version>,
}

/// `PostgreSQL`-backed seat store.
#[derive(Clone)]
pub struct PostgresSeatStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresSeatStore {
    /// Store over an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Connect a pool.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the database cannot be reached within `connect_timeout`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        connect_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to connect: {e}")))?;
        tracing::info!(max_connections, "postgres pool connected");
        Ok(Self::from_pool(pool, clock))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// `Unavailable` if migrations fail.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[tracing::instrument(skip(self, mutation), fields(kind = mutation.kind()))]
    async fn commit(&self, mutation: Mutation) -> Result<MutationOutcome, StoreError> {
        let kind = mutation.kind();
        mutation.check_shape().map_err(StoreError::Invalid)?;
        let now = self.clock.now();

        let deletes_restaurant = matches!(mutation, Mutation::DeleteRestaurant { .. });

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let result: Result<MutationOutcome, StoreError> = async {
            let restaurant_id = scope(&mut tx, &mutation).await?;
            let mut base = BaseVersions::default();
            let mut changes = Vec::new();
            let booking = match mutation {
                Mutation::Batch {
                    restaurant_id,
                    mutations,
                } => {
                    for member in mutations {
                        if scope(&mut tx, &member).await? != restaurant_id {
                            return Err(StoreError::Invalid(format!(
                                "{} targets another restaurant",
                                member.kind()
                            )));
                        }
                        apply(&mut tx, member, now, &mut base, &mut changes).await?;
                    }
                    None
                },
                single => apply(&mut tx, single, now, &mut base, &mut changes).await?,
            };
            let snapshot = if deletes_restaurant {
                SeatMapSnapshot::empty(restaurant_id, now)
            } else {
                load_snapshot(&mut tx, restaurant_id, now).await?
            };
            Ok(MutationOutcome {
                restaurant_id,
                changes,
                booking,
                snapshot,
            })
        }
        .await;

        match result {
            Ok(outcome) => {
                tx.commit().await.map_err(db_error)?;
                tracing::debug!(kind, restaurant_id = %outcome.restaurant_id, changes = outcome.changes.len(), "mutation committed");
                metrics::counter!("seatbook.store.mutations", "kind" => kind, "result" => "committed")
                    .increment(1);
                Ok(outcome)
            },
            Err(error) => {
                let _ = tx.rollback().await;
                let result = if matches!(error, StoreError::Conflict { .. }) {
                    "conflict"
                } else {
                    "rejected"
                };
                tracing::debug!(kind, %error, "mutation rolled back");
                metrics::counter!("seatbook.store.mutations", "kind" => kind, "result" => result)
                    .increment(1);
                Err(error)
            },
        }
    }
}

// ============================================================================
// Reads
// ============================================================================

async fn load_snapshot(
    conn: &mut PgConnection,
    restaurant_id: RestaurantId,
    now: DateTime<Utc>,
) -> Result<SeatMapSnapshot, StoreError> {
    let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM restaurants WHERE id = $1")
        .bind(restaurant_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    if exists.is_none() {
        return Err(StoreError::not_found("restaurant", restaurant_id));
    }

    let tables: Vec<TableRow> = sqlx::query_as(&format!(
        "SELECT {TABLE_COLUMNS} FROM restaurant_tables t WHERE t.restaurant_id = $1 ORDER BY t.table_number"
    ))
    .bind(restaurant_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;

    let seats: Vec<SeatRow> = sqlx::query_as(&format!(
        "SELECT {SEAT_COLUMNS} FROM {SEAT_FROM} JOIN restaurant_tables t ON t.id = s.table_id \
         WHERE t.restaurant_id = $1 ORDER BY t.table_number, s.seat_number"
    ))
    .bind(restaurant_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;

    let mut by_table: HashMap<TableId, Vec<Seat>> = HashMap::new();
    for row in &seats {
        let seat = row.effective(now)?;
        by_table.entry(seat.table_id).or_default().push(seat);
    }
    let tables = tables
        .into_iter()
        .map(|row| {
            let table = Table::try_from(row)?;
            let seats = by_table.remove(&table.id).unwrap_or_default();
            Ok(TableView { table, seats })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    Ok(SeatMapSnapshot {
        restaurant_id,
        tables,
        taken_at: now,
    })
}

async fn load_booking(
    conn: &mut PgConnection,
    booking_id: BookingId,
) -> Result<Option<Booking>, StoreError> {
    let row: Option<BookingRow> = sqlx::query_as(&format!("{BOOKING_SELECT} WHERE bk.id = $1 GROUP BY bk.id"))
        .bind(booking_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    row.map(Booking::try_from).transpose()
}

/// Restaurant a mutation belongs to.
async fn scope(conn: &mut PgConnection, mutation: &Mutation) -> Result<RestaurantId, StoreError> {
    let (sql, id, entity): (&str, Uuid, &'static str) = match mutation {
        Mutation::ClaimSeats(claim) => return Ok(claim.restaurant_id),
        Mutation::CreateTable(table) => return Ok(table.restaurant_id),
        Mutation::ReleaseElapsed { restaurant_id }
        | Mutation::DeleteRestaurant { restaurant_id }
        | Mutation::Batch { restaurant_id, .. } => return Ok(*restaurant_id),
        Mutation::ReleaseBooking { booking_id } => (
            "SELECT restaurant_id FROM bookings WHERE id = $1",
            *booking_id.as_uuid(),
            "booking",
        ),
        Mutation::DeleteTable(table)
        | Mutation::UpdateTable { table, .. }
        | Mutation::SwapTables { first: table, .. } => (
            "SELECT restaurant_id FROM restaurant_tables WHERE id = $1",
            *table.table_id.as_uuid(),
            "table",
        ),
        Mutation::UpdateSeat { seat_id, .. } => (
            "SELECT t.restaurant_id FROM seats s JOIN restaurant_tables t ON t.id = s.table_id WHERE s.id = $1",
            *seat_id.as_uuid(),
            "seat",
        ),
    };
    let row: Option<(Uuid,)> = sqlx::query_as(sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    row.map(|(restaurant,)| RestaurantId::from_uuid(restaurant))
        .ok_or_else(|| StoreError::not_found(entity, id))
}

// ============================================================================
// Mutations
// ============================================================================

async fn apply(
    conn: &mut PgConnection,
    mutation: Mutation,
    now: DateTime<Utc>,
    base: &mut BaseVersions,
    changes: &mut Vec<EntityChange>,
) -> Result<Option<Booking>, StoreError> {
    match mutation {
        Mutation::ClaimSeats(claim) => claim_seats(conn, claim, now, changes).await.map(Some),
        Mutation::ReleaseBooking { booking_id } => {
            release_booking(conn, booking_id, now, changes).await.map(Some)
        },
        Mutation::ReleaseElapsed { restaurant_id } => {
            release_elapsed(conn, restaurant_id, now, changes).await.map(|()| None)
        },
        Mutation::CreateTable(table) => create_table(conn, table, changes).await.map(|()| None),
        Mutation::DeleteTable(table) => {
            delete_table(conn, table, now, base, changes).await.map(|()| None)
        },
        Mutation::UpdateTable {
            table,
            status,
            position,
        } => {
            if status.is_none() && position.is_none() {
                return Err(StoreError::Invalid("table edit changes nothing".into()));
            }
            locked_table(conn, table, base).await?;
            let updated = update_table(conn, table.table_id, status, position).await?;
            changes.push(table_change(&updated));
            Ok(None)
        },
        Mutation::SwapTables { first, second } => {
            let a = locked_table(conn, first, base).await?;
            let b = locked_table(conn, second, base).await?;
            if a.restaurant_id != b.restaurant_id {
                return Err(StoreError::Invalid(
                    "cannot swap tables of different restaurants".into(),
                ));
            }
            for (id, position) in [(a.id, b.position), (b.id, a.position)] {
                let updated = update_table(conn, id, None, Some(position)).await?;
                changes.push(table_change(&updated));
            }
            Ok(None)
        },
        Mutation::UpdateSeat {
            seat_id,
            expected,
            status,
        } => update_seat(conn, seat_id, expected, status, now, base, changes)
            .await
            .map(|()| None),
        Mutation::DeleteRestaurant { restaurant_id } => {
            delete_restaurant(conn, restaurant_id, now, changes).await.map(|()| None)
        },
        Mutation::Batch { .. } => Err(StoreError::Invalid("batches cannot be nested".into())),
    }
}

async fn claim_seats(
    conn: &mut PgConnection,
    claim: ClaimSeats,
    now: DateTime<Utc>,
    changes: &mut Vec<EntityChange>,
) -> Result<Booking, StoreError> {
    let table: Option<(Uuid,)> =
        sqlx::query_as("SELECT restaurant_id FROM restaurant_tables WHERE id = $1 FOR SHARE")
            .bind(claim.table_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?;
    let (owner,) = table.ok_or_else(|| StoreError::not_found("table", claim.table_id))?;
    if RestaurantId::from_uuid(owner) != claim.restaurant_id {
        return Err(StoreError::Invalid(format!(
            "table {} does not belong to restaurant {}",
            claim.table_id, claim.restaurant_id
        )));
    }

    let ids: Vec<Uuid> = claim.seats.iter().map(|s| *s.seat_id.as_uuid()).collect();
    let rows: Vec<SeatRow> = sqlx::query_as(&format!(
        "SELECT {SEAT_COLUMNS} FROM {SEAT_FROM} WHERE s.id = ANY($1) ORDER BY s.id FOR UPDATE OF s"
    ))
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;
    let locked: HashMap<SeatId, Seat> = rows
        .iter()
        .map(|row| row.effective(now).map(|seat| (seat.id, seat)))
        .collect::<Result<_, _>>()?;

    let mut lost = Vec::new();
    for requested in &claim.seats {
        let seat = locked
            .get(&requested.seat_id)
            .ok_or_else(|| StoreError::not_found("seat", requested.seat_id))?;
        if seat.table_id != claim.table_id {
            return Err(StoreError::Invalid(format!(
                "seat {} is not on table {}",
                seat.id, claim.table_id
            )));
        }
        if seat.version != requested.expected || !seat.is_available() {
            lost.push(seat.id);
        }
    }
    if !lost.is_empty() {
        return Err(StoreError::seat_conflict(
            lost,
            "seats were claimed or changed since they were read",
        ));
    }

    let inserted = sqlx::query(
        "INSERT INTO bookings (id, user_id, restaurant_id, table_id, date_time, ends_at, party_size, \
         status, special_requests, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 'confirmed', $8, $9, $9) ON CONFLICT (id) DO NOTHING",
    )
    .bind(claim.booking_id.as_uuid())
    .bind(claim.user_id.as_uuid())
    .bind(claim.restaurant_id.as_uuid())
    .bind(claim.table_id.as_uuid())
    .bind(claim.slot.starts_at)
    .bind(claim.slot.ends_at)
    .bind(i32::from(claim.party_size))
    .bind(claim.special_requests.as_deref())
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;
    if inserted.rows_affected() == 0 {
        return Err(StoreError::conflict(format!(
            "booking {} already exists",
            claim.booking_id
        )));
    }

    let expected: Vec<i64> = claim
        .seats
        .iter()
        .map(|s| db_version(s.expected))
        .collect::<Result<_, _>>()?;
    let claimed: Vec<SeatRow> = sqlx::query_as(
        "UPDATE seats s SET status = 'reserved', claimed_by = $3, version = s.version + 1 \
         FROM UNNEST($1::uuid[], $2::bigint[]) AS req(id, expected) \
         WHERE s.id = req.id AND s.version = req.expected \
         RETURNING s.id, s.table_id, s.seat_number, s.status, s.claimed_by, s.version, \
         NULL::text AS holder_status, NULL::timestamptz AS holder_ends_at",
    )
    .bind(&ids)
    .bind(&expected)
    .bind(claim.booking_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;
    if claimed.len() != ids.len() {
        let won: Vec<Uuid> = claimed.iter().map(|row| row.stored().map(|s| *s.id.as_uuid())).collect::<Result<_, _>>()?;
        let lost = ids
            .iter()
            .filter(|id| !won.contains(id))
            .map(|id| SeatId::from_uuid(*id))
            .collect();
        return Err(StoreError::seat_conflict(lost, "seat versions moved during the claim"));
    }

    sqlx::query("INSERT INTO booking_seats (booking_id, seat_id) SELECT $1, UNNEST($2::uuid[])")
        .bind(claim.booking_id.as_uuid())
        .bind(&ids)
        .execute(&mut *conn)
        .await
        .map_err(db_error)?;

    let mut claimed = claimed
        .iter()
        .map(SeatRow::stored)
        .collect::<Result<Vec<_>, _>>()?;
    claimed.sort_by_key(|seat| {
        claim
            .seats
            .iter()
            .position(|s| s.seat_id == seat.id)
            .unwrap_or(usize::MAX)
    });
    changes.extend(claimed.iter().map(seat_change));

    Ok(Booking {
        id: claim.booking_id,
        user_id: claim.user_id,
        restaurant_id: claim.restaurant_id,
        table_id: claim.table_id,
        date_time: claim.slot.starts_at,
        ends_at: claim.slot.ends_at,
        party_size: claim.party_size,
        status: BookingStatus::Confirmed,
        special_requests: claim.special_requests,
        seat_ids: claim.seats.iter().map(|s| s.seat_id).collect(),
        created_at: now,
        updated_at: now,
    })
}

async fn release_booking(
    conn: &mut PgConnection,
    booking_id: BookingId,
    now: DateTime<Utc>,
    changes: &mut Vec<EntityChange>,
) -> Result<Booking, StoreError> {
    let locked: Option<(String, DateTime<Utc>)> =
        sqlx::query_as("SELECT status, ends_at FROM bookings WHERE id = $1 FOR UPDATE")
            .bind(booking_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?;
    let (status, ends_at) = locked.ok_or_else(|| StoreError::not_found("booking", booking_id))?;
    if status != BookingStatus::Cancelled.as_str() {
        let live = ends_at > now;
        let rows: Vec<SeatRow> = sqlx::query_as(&format!(
            "SELECT {SEAT_COLUMNS} FROM {SEAT_FROM} JOIN booking_seats l ON l.seat_id = s.id \
             WHERE l.booking_id = $1 ORDER BY s.id FOR UPDATE OF s"
        ))
        .bind(booking_id.as_uuid())
        .fetch_all(&mut *conn)
        .await
        .map_err(db_error)?;

        let mut release = Vec::new();
        for row in &rows {
            let seat = row.stored()?;
            if seat.status == SeatStatus::Reserved && seat.claimed_by == Some(booking_id) {
                release.push(*seat.id.as_uuid());
            } else if live {
                return Err(StoreError::Integrity(format!(
                    "seat {} is {} but should be held by booking {booking_id}",
                    seat.id, seat.status
                )));
            }
        }

        let released: Vec<SeatRow> = sqlx::query_as(
            "UPDATE seats s SET status = 'available', claimed_by = NULL, version = s.version + 1 \
             WHERE s.id = ANY($1) \
             RETURNING s.id, s.table_id, s.seat_number, s.status, s.claimed_by, s.version, \
             NULL::text AS holder_status, NULL::timestamptz AS holder_ends_at",
        )
        .bind(&release)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_error)?;
        let mut released = released
            .iter()
            .map(SeatRow::stored)
            .collect::<Result<Vec<_>, _>>()?;
        released.sort_by_key(|seat| seat.id);
        changes.extend(released.iter().map(seat_change));

        sqlx::query("UPDATE bookings SET status = 'cancelled', updated_at = $2 WHERE id = $1")
            .bind(booking_id.as_uuid())
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(db_error)?;
    }

    load_booking(conn, booking_id)
        .await?
        .ok_or_else(|| StoreError::not_found("booking", booking_id))
}

/// Persist what reads already report: seats of confirmed bookings whose slot
/// ended become available at a new version.
async fn release_elapsed(
    conn: &mut PgConnection,
    restaurant_id: RestaurantId,
    now: DateTime<Utc>,
    changes: &mut Vec<EntityChange>,
) -> Result<(), StoreError> {
    let released: Vec<SeatRow> = sqlx::query_as(
        "UPDATE seats s SET status = 'available', claimed_by = NULL, version = s.version + 1 \
         FROM restaurant_tables t, bookings b \
         WHERE t.id = s.table_id AND t.restaurant_id = $1 AND b.id = s.claimed_by \
         AND s.status = 'reserved' AND b.status = 'confirmed' AND b.ends_at <= $2 \
         RETURNING s.id, s.table_id, s.seat_number, s.status, s.claimed_by, s.version, \
         NULL::text AS holder_status, NULL::timestamptz AS holder_ends_at",
    )
    .bind(restaurant_id.as_uuid())
    .bind(now)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;
    let mut released = released
        .iter()
        .map(SeatRow::stored)
        .collect::<Result<Vec<_>, _>>()?;
    released.sort_by_key(|seat| (seat.table_id, seat.seat_number));
    changes.extend(released.iter().map(seat_change));
    Ok(())
}

async fn create_table(
    conn: &mut PgConnection,
    new: NewTable,
    changes: &mut Vec<EntityChange>,
) -> Result<(), StoreError> {
    let restaurant: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM restaurants WHERE id = $1 FOR SHARE")
            .bind(new.restaurant_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?;
    if restaurant.is_none() {
        return Err(StoreError::not_found("restaurant", new.restaurant_id));
    }
    if new.capacity > MAX_TABLE_CAPACITY {
        return Err(StoreError::Invalid(format!(
            "capacity {} exceeds the maximum of {MAX_TABLE_CAPACITY}",
            new.capacity
        )));
    }
    let number = i32::try_from(new.table_number.value())
        .map_err(|_| StoreError::Invalid(format!("table number {} out of range", new.table_number)))?;
    let clash: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM restaurant_tables WHERE id = $1 OR (restaurant_id = $2 AND table_number = $3)",
    )
    .bind(new.table_id.as_uuid())
    .bind(new.restaurant_id.as_uuid())
    .bind(number)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error)?;
    match clash {
        Some((id,)) if id == *new.table_id.as_uuid() => {
            return Err(StoreError::conflict(format!("table {} already exists", new.table_id)));
        },
        Some(_) => {
            return Err(StoreError::Invalid(format!(
                "table number {} is already used in this restaurant",
                new.table_number
            )));
        },
        None => {},
    }

    let table = Table {
        id: new.table_id,
        restaurant_id: new.restaurant_id,
        table_number: new.table_number,
        capacity: new.capacity,
        status: new.status,
        position: new.position,
        version: Version::INITIAL,
    };
    sqlx::query(
        "INSERT INTO restaurant_tables (id, restaurant_id, table_number, capacity, status, position_x, position_y, version) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 1)",
    )
    .bind(table.id.as_uuid())
    .bind(table.restaurant_id.as_uuid())
    .bind(number)
    .bind(i32::from(table.capacity))
    .bind(table.status.as_str())
    .bind(table.position.x)
    .bind(table.position.y)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;
    changes.push(table_change(&table));

    let seats: Vec<Seat> = (1..=new.capacity)
        .map(|number| Seat {
            id: SeatId::new(),
            table_id: table.id,
            seat_number: SeatNumber::new(number),
            status: SeatStatus::Available,
            claimed_by: None,
            version: Version::INITIAL,
        })
        .collect();
    let ids: Vec<Uuid> = seats.iter().map(|s| *s.id.as_uuid()).collect();
    let numbers: Vec<i32> = seats.iter().map(|s| i32::from(s.seat_number.value())).collect();
    sqlx::query(
        "INSERT INTO seats (id, table_id, seat_number, status, version) \
         SELECT id, $1, number, 'available', 1 FROM UNNEST($2::uuid[], $3::int[]) AS new(id, number)",
    )
    .bind(table.id.as_uuid())
    .bind(&ids)
    .bind(&numbers)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;
    changes.extend(seats.iter().map(seat_change));
    Ok(())
}

/// Lock a table and check the editor's version against the pre-mutation one.
async fn locked_table(
    conn: &mut PgConnection,
    table_ref: TableRef,
    base: &mut BaseVersions,
) -> Result<Table, StoreError> {
    let row: Option<TableRow> = sqlx::query_as(&format!(
        "SELECT {TABLE_COLUMNS} FROM restaurant_tables t WHERE t.id = $1 FOR UPDATE"
    ))
    .bind(table_ref.table_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error)?;
    let table = Table::try_from(row.ok_or_else(|| StoreError::not_found("table", table_ref.table_id))?)?;
    let read = *base.tables.entry(table.id).or_insert(table.version);
    if read != table_ref.expected {
        return Err(StoreError::conflict(format!(
            "table {} is at {read}, edit was based on {}",
            table.table_number, table_ref.expected
        )));
    }
    Ok(table)
}

async fn update_table(
    conn: &mut PgConnection,
    table_id: TableId,
    status: Option<TableStatus>,
    position: Option<Position>,
) -> Result<Table, StoreError> {
    let row: TableRow = sqlx::query_as(&format!(
        "UPDATE restaurant_tables t SET status = COALESCE($2, t.status), \
         position_x = COALESCE($3, t.position_x), position_y = COALESCE($4, t.position_y), \
         version = t.version + 1 WHERE t.id = $1 RETURNING {TABLE_COLUMNS}"
    ))
    .bind(table_id.as_uuid())
    .bind(status.map(TableStatus::as_str))
    .bind(position.map(|p| p.x))
    .bind(position.map(|p| p.y))
    .fetch_one(&mut *conn)
    .await
    .map_err(db_error)?;
    Table::try_from(row)
}

async fn delete_table(
    conn: &mut PgConnection,
    table_ref: TableRef,
    now: DateTime<Utc>,
    base: &mut BaseVersions,
    changes: &mut Vec<EntityChange>,
) -> Result<(), StoreError> {
    let table = locked_table(conn, table_ref, base).await?;
    let seats: Vec<SeatRow> = sqlx::query_as(&format!(
        "SELECT {SEAT_COLUMNS} FROM {SEAT_FROM} WHERE s.table_id = $1 ORDER BY s.id FOR UPDATE OF s"
    ))
    .bind(table.id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;

    let mut held = Vec::new();
    for row in seats.iter().filter(|row| row.held_live(now)) {
        held.push(row.stored()?.id);
    }
    if !held.is_empty() {
        return Err(StoreError::seat_conflict(
            held,
            format!("table {} has live bookings", table.table_number),
        ));
    }

    sqlx::query("DELETE FROM restaurant_tables WHERE id = $1")
        .bind(table.id.as_uuid())
        .execute(&mut *conn)
        .await
        .map_err(db_error)?;
    changes.push(EntityChange::TableRemoved {
        table_id: table.id,
        version: table.version.next(),
    });
    Ok(())
}

async fn delete_restaurant(
    conn: &mut PgConnection,
    restaurant_id: RestaurantId,
    now: DateTime<Utc>,
    changes: &mut Vec<EntityChange>,
) -> Result<(), StoreError> {
    let locked: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM restaurants WHERE id = $1 FOR UPDATE")
        .bind(restaurant_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    if locked.is_none() {
        return Err(StoreError::not_found("restaurant", restaurant_id));
    }
    // claims hold their table FOR SHARE, so this waits out in-flight bookings
    let tables: Vec<TableRow> = sqlx::query_as(&format!(
        "SELECT {TABLE_COLUMNS} FROM restaurant_tables t WHERE t.restaurant_id = $1 \
         ORDER BY t.table_number FOR UPDATE"
    ))
    .bind(restaurant_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;

    let held: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT l.seat_id FROM booking_seats l JOIN bookings b ON b.id = l.booking_id \
         WHERE b.restaurant_id = $1 AND b.status = 'confirmed' AND b.ends_at > $2 ORDER BY l.seat_id",
    )
    .bind(restaurant_id.as_uuid())
    .bind(now)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;
    if !held.is_empty() {
        return Err(StoreError::seat_conflict(
            held.into_iter().map(|(id,)| SeatId::from_uuid(id)).collect(),
            "restaurant has live bookings; cancel them first",
        ));
    }

    for row in tables {
        let table = Table::try_from(row)?;
        changes.push(EntityChange::TableRemoved {
            table_id: table.id,
            version: table.version.next(),
        });
    }
    sqlx::query("DELETE FROM restaurants WHERE id = $1")
        .bind(restaurant_id.as_uuid())
        .execute(&mut *conn)
        .await
        .map_err(db_error)?;
    Ok(())
}

async fn update_seat(
    conn: &mut PgConnection,
    seat_id: SeatId,
    expected: Version,
    status: SeatStatus,
    now: DateTime<Utc>,
    base: &mut BaseVersions,
    changes: &mut Vec<EntityChange>,
) -> Result<(), StoreError> {
    if status == SeatStatus::Reserved {
        return Err(StoreError::Invalid(
            "seats become reserved only through a booking".into(),
        ));
    }
    let row: Option<SeatRow> = sqlx::query_as(&format!(
        "SELECT {SEAT_COLUMNS} FROM {SEAT_FROM} WHERE s.id = $1 FOR UPDATE OF s"
    ))
    .bind(seat_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error)?;
    let row = row.ok_or_else(|| StoreError::not_found("seat", seat_id))?;
    let seat = row.stored()?;

    let read = *base.seats.entry(seat_id).or_insert(seat.version);
    if read != expected {
        return Err(StoreError::seat_conflict(
            vec![seat_id],
            format!("seat is at {read}, edit was based on {expected}"),
        ));
    }
    if row.held_live(now) {
        return Err(StoreError::seat_conflict(
            vec![seat_id],
            format!(
                "seat is held by booking {}",
                seat.claimed_by.map_or_else(String::new, |id| id.to_string())
            ),
        ));
    }

    let updated: SeatRow = sqlx::query_as(
        "UPDATE seats s SET status = $2, claimed_by = NULL, version = s.version + 1 WHERE s.id = $1 \
         RETURNING s.id, s.table_id, s.seat_number, s.status, s.claimed_by, s.version, \
         NULL::text AS holder_status, NULL::timestamptz AS holder_ends_at",
    )
    .bind(seat_id.as_uuid())
    .bind(status.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(db_error)?;
    changes.push(seat_change(&updated.stored()?));
    Ok(())
}

fn classify(row: &AuditRow) -> Vec<IntegrityViolation> {
    let violation = |kind, booking_id| IntegrityViolation {
        seat_id: SeatId::from_uuid(row.id),
        table_id: TableId::from_uuid(row.table_id),
        booking_id,
        kind,
    };
    let claimed_by = row.claimed_by.map(BookingId::from_uuid);
    let mut found = Vec::new();
    if row.live_links > 1 {
        found.push(violation(ViolationKind::DoubleBooked, None));
    }
    if row.status != SeatStatus::Reserved.as_str() {
        return found;
    }
    match (claimed_by, row.holder_status.as_deref()) {
        (None, _) | (Some(_), None) => {
            found.push(violation(ViolationKind::ReservedWithoutBooking, claimed_by));
        },
        (Some(id), Some(status)) if status == BookingStatus::Cancelled.as_str() => {
            found.push(violation(ViolationKind::ReservedByCancelledBooking, Some(id)));
        },
        (Some(id), Some(_)) if !row.linked => {
            found.push(violation(ViolationKind::ClaimWithoutLink, Some(id)));
        },
        _ => {},
    }
    found
}

// ============================================================================
// SeatStore
// ============================================================================

impl SeatStore for PostgresSeatStore {
    fn get_seat_map(&self, restaurant_id: RestaurantId) -> StoreFuture<'_, SeatMapSnapshot> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(db_error)?;
            load_snapshot(&mut conn, restaurant_id, self.clock.now()).await
        })
    }

    fn read_seats<'a>(
        &'a self,
        table_id: TableId,
        seat_ids: &'a [SeatId],
    ) -> StoreFuture<'a, Vec<Seat>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut conn = self.pool.acquire().await.map_err(db_error)?;
            let table: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM restaurant_tables WHERE id = $1")
                .bind(table_id.as_uuid())
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_error)?;
            if table.is_none() {
                return Err(StoreError::not_found("table", table_id));
            }

            let ids: Vec<Uuid> = seat_ids.iter().map(|id| *id.as_uuid()).collect();
            let rows: Vec<SeatRow> = sqlx::query_as(&format!(
                "SELECT {SEAT_COLUMNS} FROM {SEAT_FROM} WHERE s.table_id = $1 AND s.id = ANY($2)"
            ))
            .bind(table_id.as_uuid())
            .bind(&ids)
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error)?;
            let mut found: HashMap<SeatId, Seat> = rows
                .iter()
                .map(|row| row.effective(now).map(|seat| (seat.id, seat)))
                .collect::<Result<_, _>>()?;
            Ok(seat_ids.iter().filter_map(|id| found.remove(id)).collect())
        })
    }

    fn apply_mutation(&self, mutation: Mutation) -> StoreFuture<'_, MutationOutcome> {
        Box::pin(self.commit(mutation))
    }

    fn get_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(db_error)?;
            load_booking(&mut conn, booking_id).await
        })
    }

    fn list_user_bookings(&self, user_id: UserId) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let rows: Vec<BookingRow> = sqlx::query_as(&format!(
                "{BOOKING_SELECT} WHERE bk.user_id = $1 GROUP BY bk.id ORDER BY bk.date_time DESC"
            ))
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            rows.into_iter().map(Booking::try_from).collect()
        })
    }

    fn list_restaurant_bookings(
        &self,
        restaurant_id: RestaurantId,
    ) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let rows: Vec<BookingRow> = sqlx::query_as(&format!(
                "{BOOKING_SELECT} WHERE bk.restaurant_id = $1 GROUP BY bk.id ORDER BY bk.date_time"
            ))
            .bind(restaurant_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            rows.into_iter().map(Booking::try_from).collect()
        })
    }

    fn create_restaurant(&self, restaurant: NewRestaurant) -> StoreFuture<'_, Restaurant> {
        Box::pin(async move {
            let name = restaurant.name.trim();
            if name.is_empty() {
                return Err(StoreError::Invalid("restaurant name is required".into()));
            }
            let row: RestaurantRow = sqlx::query_as(
                "INSERT INTO restaurants (id, name, description, address, phone, image_url, created_by, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 RETURNING id, name, description, address, phone, image_url, created_by, created_at",
            )
            .bind(RestaurantId::new().as_uuid())
            .bind(name)
            .bind(restaurant.description.as_deref())
            .bind(restaurant.address.as_deref())
            .bind(restaurant.phone.as_deref())
            .bind(restaurant.image_url.as_deref())
            .bind(restaurant.created_by.map(|id| *id.as_uuid()))
            .bind(self.clock.now())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(Restaurant::from(row))
        })
    }

    fn get_restaurant(&self, restaurant_id: RestaurantId) -> StoreFuture<'_, Option<Restaurant>> {
        Box::pin(async move {
            let row: Option<RestaurantRow> = sqlx::query_as(
                "SELECT id, name, description, address, phone, image_url, created_by, created_at \
                 FROM restaurants WHERE id = $1",
            )
            .bind(restaurant_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(row.map(Restaurant::from))
        })
    }

    fn list_restaurants(&self) -> StoreFuture<'_, Vec<Restaurant>> {
        Box::pin(async move {
            let rows: Vec<RestaurantRow> = sqlx::query_as(
                "SELECT id, name, description, address, phone, image_url, created_by, created_at \
                 FROM restaurants ORDER BY name",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(rows.into_iter().map(Restaurant::from).collect())
        })
    }

    fn audit_integrity(
        &self,
        restaurant_id: RestaurantId,
    ) -> StoreFuture<'_, Vec<IntegrityViolation>> {
        Box::pin(async move {
            let rows: Vec<AuditRow> = sqlx::query_as(
                "SELECT s.id, s.table_id, s.status, s.claimed_by, b.status AS holder_status, \
                 EXISTS (SELECT 1 FROM booking_seats l WHERE l.booking_id = s.claimed_by AND l.seat_id = s.id) AS linked, \
                 (SELECT COUNT(*) FROM booking_seats l JOIN bookings lb ON lb.id = l.booking_id \
                  WHERE l.seat_id = s.id AND lb.status = 'confirmed' AND lb.ends_at > $2) AS live_links \
                 FROM seats s JOIN restaurant_tables t ON t.id = s.table_id \
                 LEFT JOIN bookings b ON b.id = s.claimed_by \
                 WHERE t.restaurant_id = $1 ORDER BY s.table_id, s.seat_number",
            )
            .bind(restaurant_id.as_uuid())
            .bind(self.clock.now())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(rows.iter().flat_map(classify).collect())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }
}
